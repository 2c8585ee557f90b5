//! Mel-frequency cepstral coefficients.
//!
//! Pipeline: centered STFT power spectrum → Slaney mel filterbank →
//! power-to-dB → orthonormal DCT-II. Filterbank, window, DCT basis and FFT plan
//! are built once per [`Mfcc`] and shared across calls.

use ndarray::{Array1, Array2, Axis};
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::f32::consts::PI;
use std::fmt;
use std::sync::Arc;

/// Floor applied to power before taking the logarithm
const AMIN: f32 = 1e-10;

/// Dynamic range kept below the loudest bin, in dB
const TOP_DB: f32 = 80.0;

/// MFCC transform with precomputed bases.
#[derive(Clone)]
pub struct Mfcc {
    n_fft: usize,
    hop_length: usize,
    window: Vec<f32>,
    mel_filterbank: Array2<f32>,
    dct: Array2<f32>,
    fft: Arc<dyn Fft<f32>>,
}

impl fmt::Debug for Mfcc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mfcc")
            .field("n_fft", &self.n_fft)
            .field("hop_length", &self.hop_length)
            .field("n_mels", &self.mel_filterbank.nrows())
            .field("n_mfcc", &self.dct.nrows())
            .finish()
    }
}

impl Mfcc {
    /// Build the transform.
    ///
    /// Callers validate parameters first (see `ExtractionConfig::validate`).
    pub fn new(
        sample_rate: u32,
        n_fft: usize,
        hop_length: usize,
        n_mels: usize,
        n_mfcc: usize,
    ) -> Self {
        let fft = FftPlanner::<f32>::new().plan_fft_forward(n_fft);

        Self {
            n_fft,
            hop_length,
            window: hann_window(n_fft),
            mel_filterbank: create_mel_filterbank(n_fft, n_mels, sample_rate as f32),
            dct: create_dct_basis(n_mfcc, n_mels),
            fft,
        }
    }

    pub fn n_mfcc(&self) -> usize {
        self.dct.nrows()
    }

    /// Coefficients per frame.
    ///
    /// # Returns
    ///
    /// 2D array of shape (n_mfcc, frames)
    pub fn apply(&self, audio: &[f32]) -> Array2<f32> {
        let spectrogram = self.power_spectrogram(audio);
        let mel = self.mel_filterbank.dot(&spectrogram);
        let log_mel = power_to_db(mel);
        self.dct.dot(&log_mel)
    }

    /// Coefficients averaged over time.
    pub fn apply_mean(&self, audio: &[f32]) -> Array1<f32> {
        let coefficients = self.apply(audio);
        coefficients
            .mean_axis(Axis(1))
            .unwrap_or_else(|| Array1::zeros(self.n_mfcc()))
    }

    /// Centered STFT power spectrogram with zero padding of `n_fft / 2` on both sides.
    ///
    /// # Returns
    ///
    /// 2D array of shape (n_fft / 2 + 1, frames)
    fn power_spectrogram(&self, audio: &[f32]) -> Array2<f32> {
        let pad = self.n_fft / 2;
        let mut padded = vec![0.0_f32; audio.len() + 2 * pad];
        padded[pad..pad + audio.len()].copy_from_slice(audio);

        let num_frames = 1 + (padded.len() - self.n_fft) / self.hop_length;
        let freq_bins = self.n_fft / 2 + 1;
        let mut spectrogram = Array2::<f32>::zeros((freq_bins, num_frames));

        let mut frame = vec![Complex::new(0.0_f32, 0.0); self.n_fft];
        let mut scratch = vec![Complex::new(0.0_f32, 0.0); self.fft.get_inplace_scratch_len()];

        for frame_idx in 0..num_frames {
            let start = frame_idx * self.hop_length;

            for (i, slot) in frame.iter_mut().enumerate() {
                *slot = Complex::new(padded[start + i] * self.window[i], 0.0);
            }

            self.fft.process_with_scratch(&mut frame, &mut scratch);

            for k in 0..freq_bins {
                spectrogram[[k, frame_idx]] = frame[k].norm_sqr();
            }
        }

        spectrogram
    }
}

/// Periodic Hann window.
fn hann_window(window_length: usize) -> Vec<f32> {
    (0..window_length)
        .map(|i| 0.5 - 0.5 * ((2.0 * PI * i as f32) / window_length as f32).cos())
        .collect()
}

const F_SP: f32 = 200.0 / 3.0;
const MIN_LOG_HZ: f32 = 1000.0;
const MIN_LOG_MEL: f32 = MIN_LOG_HZ / F_SP;

fn log_step() -> f32 {
    6.4_f32.ln() / 27.0
}

/// Convert frequency in Hz to the Slaney mel scale.
fn hz_to_mel(freq: f32) -> f32 {
    if freq >= MIN_LOG_HZ {
        MIN_LOG_MEL + (freq / MIN_LOG_HZ).ln() / log_step()
    } else {
        freq / F_SP
    }
}

/// Convert Slaney mel scale to frequency in Hz.
fn mel_to_hz(mel: f32) -> f32 {
    if mel >= MIN_LOG_MEL {
        MIN_LOG_HZ * (log_step() * (mel - MIN_LOG_MEL)).exp()
    } else {
        F_SP * mel
    }
}

/// Create an area-normalized mel filterbank of shape (n_mels, n_fft / 2 + 1).
fn create_mel_filterbank(n_fft: usize, n_mels: usize, sample_rate: f32) -> Array2<f32> {
    let freq_bins = n_fft / 2 + 1;
    let mut filterbank = Array2::<f32>::zeros((n_mels, freq_bins));

    let min_mel = hz_to_mel(0.0);
    let max_mel = hz_to_mel(sample_rate / 2.0);

    let mel_points: Vec<f32> = (0..n_mels + 2)
        .map(|i| mel_to_hz(min_mel + (max_mel - min_mel) * i as f32 / (n_mels + 1) as f32))
        .collect();

    let freq_bin_width = sample_rate / n_fft as f32;

    for mel_idx in 0..n_mels {
        let left = mel_points[mel_idx];
        let center = mel_points[mel_idx + 1];
        let right = mel_points[mel_idx + 2];
        let enorm = 2.0 / (right - left);

        for freq_idx in 0..freq_bins {
            let freq = freq_idx as f32 * freq_bin_width;
            let lower = (freq - left) / (center - left);
            let upper = (right - freq) / (right - center);
            filterbank[[mel_idx, freq_idx]] = lower.min(upper).max(0.0) * enorm;
        }
    }

    filterbank
}

/// Orthonormal DCT-II basis keeping the first `n_mfcc` rows.
fn create_dct_basis(n_mfcc: usize, n_mels: usize) -> Array2<f32> {
    let n = n_mels as f32;
    Array2::from_shape_fn((n_mfcc, n_mels), |(k, i)| {
        let scale = if k == 0 { (1.0 / n).sqrt() } else { (2.0 / n).sqrt() };
        scale * (PI * k as f32 * (2.0 * i as f32 + 1.0) / (2.0 * n)).cos()
    })
}

/// 10·log10 with an absolute floor and a relative floor `TOP_DB` below the peak.
fn power_to_db(power: Array2<f32>) -> Array2<f32> {
    let mut db = power.mapv(|x| 10.0 * x.max(AMIN).log10());
    let peak = db.iter().fold(f32::NEG_INFINITY, |acc, &x| acc.max(x));
    let floor = peak - TOP_DB;
    db.mapv_inplace(|x| x.max(floor));
    db
}
