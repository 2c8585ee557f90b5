//! Audio clip type and sample-level preprocessing.

use crate::error::{AudioError, Result};
use rubato::{FastFixedIn, PolynomialDegree, Resampler};

/// Mono waveform at a known sample rate.
#[derive(Clone, Debug, PartialEq)]
pub struct AudioClip {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl AudioClip {
    /// Create a mono clip.
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Create a mono clip from interleaved samples, averaging channels.
    ///
    /// # Errors
    ///
    /// Returns error if `channels` is 0.
    pub fn from_interleaved(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Result<Self> {
        let samples = match channels {
            0 => return Err(AudioError::InvalidChannels(channels).into()),
            1 => samples,
            n => samples
                .chunks(n as usize)
                .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
                .collect(),
        };

        Ok(Self::new(samples, sample_rate))
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Duration in seconds.
    pub fn duration_secs(&self) -> f32 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f32 / self.sample_rate as f32
    }

    /// Convert to `target_rate`, returning a copy when the rate already matches.
    pub fn resample(&self, target_rate: u32) -> Result<AudioClip> {
        if self.sample_rate == target_rate || self.samples.is_empty() {
            return Ok(AudioClip::new(self.samples.clone(), target_rate));
        }

        tracing::debug!(
            from = self.sample_rate,
            to = target_rate,
            frames = self.samples.len(),
            "resampling"
        );

        let mut resampler = FastFixedIn::<f32>::new(
            target_rate as f64 / self.sample_rate as f64,
            1.0,
            PolynomialDegree::Septic,
            self.samples.len(),
            1,
        )
        .map_err(|e| AudioError::Resample(e.to_string()))?;

        let mut output = resampler
            .process(&[self.samples.as_slice()], None)
            .map_err(|e| AudioError::Resample(e.to_string()))?;

        Ok(AudioClip::new(output.remove(0), target_rate))
    }

    /// Take `len` samples starting at `offset` when the clip is longer than `len`.
    ///
    /// Shorter clips are returned whole; the window end is clamped to the clip end.
    pub fn window(&self, offset: usize, len: usize) -> AudioClip {
        // A clip that already fits keeps its start; the offset only skips
        // lead-in on recordings longer than the window.
        if self.samples.len() <= len {
            return self.clone();
        }

        let start = offset.min(self.samples.len());
        let end = start.saturating_add(len).min(self.samples.len());

        AudioClip::new(self.samples[start..end].to_vec(), self.sample_rate)
    }
}

/// Cut leading and trailing audio more than `top_db` below the loudest frame.
///
/// Centered frames of `frame_length` samples, stepped by `hop_length`, locate
/// the non-silent region by RMS. Its edges are then tightened to the first and
/// last sample within `top_db` of the region's peak, so the result does not
/// depend on where the frame grid happens to fall. Silent input trims to an
/// empty slice.
pub fn trim_silence(samples: &[f32], top_db: f32, frame_length: usize, hop_length: usize) -> &[f32] {
    if samples.is_empty() || frame_length == 0 || hop_length == 0 {
        return samples;
    }

    let ratio = 10.0_f32.powf(-top_db / 20.0);
    let half = frame_length / 2;
    let frame_bounds = |frame: usize| {
        let center = frame * hop_length;
        let start = center.saturating_sub(half);
        let end = (center + frame_length - half).min(samples.len());
        (start, end)
    };

    let rms: Vec<f32> = (0..=samples.len() / hop_length)
        .map(|frame| {
            let (start, end) = frame_bounds(frame);
            let energy: f32 = samples[start..end].iter().map(|x| x * x).sum();
            (energy / frame_length as f32).sqrt()
        })
        .collect();

    let loudest = rms.iter().fold(0.0_f32, |acc, &r| acc.max(r));
    if loudest <= 0.0 || !loudest.is_finite() {
        return &samples[..0];
    }

    let floor = loudest * ratio;
    let (Some(first), Some(last)) = (
        rms.iter().position(|&r| r > floor),
        rms.iter().rposition(|&r| r > floor),
    ) else {
        return &samples[..0];
    };

    let region = &samples[frame_bounds(first).0..frame_bounds(last).1];
    let peak = region.iter().fold(0.0_f32, |acc, &x| acc.max(x.abs()));
    let threshold = peak * ratio;

    match (
        region.iter().position(|x| x.abs() > threshold),
        region.iter().rposition(|x| x.abs() > threshold),
    ) {
        (Some(start), Some(end)) => &region[start..=end],
        _ => &samples[..0],
    }
}

/// Scale samples so that the largest magnitude becomes 1.0.
///
/// Silent input is left unchanged.
pub fn normalize_peak(samples: &mut [f32]) {
    let peak = samples.iter().fold(0.0_f32, |acc, &x| acc.max(x.abs()));
    if peak > 0.0 && peak.is_finite() {
        for sample in samples.iter_mut() {
            *sample /= peak;
        }
    }
}

/// Zero-pad or truncate to exactly `len` samples.
pub fn fix_length(mut samples: Vec<f32>, len: usize) -> Vec<f32> {
    samples.resize(len, 0.0);
    samples
}
