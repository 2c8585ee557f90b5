//! Feature extraction configuration shared by training and inference.
//!
//! One [`ExtractionConfig`] describes the whole preprocessing recipe. Its
//! [`fingerprint`](ExtractionConfig::fingerprint) is stored next to every trained
//! model so that a drifted recipe is detected at load time.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;

/// Version of the extraction recipe. Bump when the MFCC pipeline changes.
pub const CONFIG_VERSION: u32 = 1;

/// Default target sample rate (Hz)
const DEFAULT_SAMPLE_RATE: u32 = 22050;

/// Default clip duration in seconds
const DEFAULT_DURATION: f32 = 3.0;

/// Default clip offset in seconds
const DEFAULT_OFFSET: f32 = 0.5;

/// Default number of cepstral coefficients
const DEFAULT_N_MFCC: usize = 40;

/// Default number of mel bands
const DEFAULT_N_MELS: usize = 128;

/// Default FFT size
const DEFAULT_N_FFT: usize = 2048;

/// Default hop between STFT frames
const DEFAULT_HOP_LENGTH: usize = 512;

/// Minimum usable clip duration in seconds
const DEFAULT_MIN_DURATION: f32 = 0.1;

/// How clips shorter than `duration` are handled after windowing.
#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LengthPolicy {
    /// Zero-pad or truncate to exactly `duration`
    Pad,
    /// Keep the natural length
    Natural,
}

/// Amplitude normalization applied before the MFCC transform.
#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Normalization {
    /// Scale so that the largest absolute sample is 1.0
    Peak,
    /// Leave amplitudes untouched
    None,
}

/// Feature extraction recipe.
#[derive(clap::Args, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Target sample rate in Hz
    #[arg(long, default_value_t = DEFAULT_SAMPLE_RATE)]
    pub sample_rate: u32,

    /// Clip duration in seconds
    #[arg(long = "clip-duration", default_value_t = DEFAULT_DURATION)]
    pub duration: f32,

    /// Clip offset in seconds, applied when the clip is longer than the duration
    #[arg(long = "clip-offset", default_value_t = DEFAULT_OFFSET)]
    pub offset: f32,

    /// Number of MFCC coefficients
    #[arg(long, default_value_t = DEFAULT_N_MFCC)]
    pub n_mfcc: usize,

    /// Number of mel bands
    #[arg(long, default_value_t = DEFAULT_N_MELS)]
    pub n_mels: usize,

    /// FFT window size
    #[arg(long, default_value_t = DEFAULT_N_FFT)]
    pub n_fft: usize,

    /// Hop length between frames
    #[arg(long, default_value_t = DEFAULT_HOP_LENGTH)]
    pub hop_length: usize,

    /// Minimum usable clip duration in seconds
    #[arg(long, default_value_t = DEFAULT_MIN_DURATION)]
    pub min_duration: f32,

    /// Short clip handling
    #[arg(long, value_enum, default_value_t = LengthPolicy::Pad)]
    pub length_policy: LengthPolicy,

    /// Amplitude normalization
    #[arg(long, value_enum, default_value_t = Normalization::Peak)]
    pub normalization: Normalization,

    /// Trim leading and trailing audio more than this many dB below the loudest frame
    #[arg(long, value_name = "DB")]
    pub trim_db: Option<f32>,

    #[arg(skip = CONFIG_VERSION)]
    pub version: u32,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            duration: DEFAULT_DURATION,
            offset: DEFAULT_OFFSET,
            n_mfcc: DEFAULT_N_MFCC,
            n_mels: DEFAULT_N_MELS,
            n_fft: DEFAULT_N_FFT,
            hop_length: DEFAULT_HOP_LENGTH,
            min_duration: DEFAULT_MIN_DURATION,
            length_policy: LengthPolicy::Pad,
            normalization: Normalization::Peak,
            trim_db: None,
            version: CONFIG_VERSION,
        }
    }
}

impl ExtractionConfig {
    /// Load a config from a TOML file. Missing keys take their defaults.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Check every parameter is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn invalid(name: &'static str, reason: impl Into<String>) -> ConfigError {
            ConfigError::InvalidParameter {
                name,
                reason: reason.into(),
            }
        }

        if self.version != CONFIG_VERSION {
            return Err(invalid(
                "version",
                format!("unsupported version {} (expected {CONFIG_VERSION})", self.version),
            ));
        }
        if self.sample_rate == 0 {
            return Err(invalid("sample_rate", "must be positive"));
        }
        if !(self.duration.is_finite() && self.duration > 0.0) {
            return Err(invalid("duration", format!("{}s must be positive", self.duration)));
        }
        if !(self.offset.is_finite() && self.offset >= 0.0) {
            return Err(invalid("offset", format!("{}s must not be negative", self.offset)));
        }
        if !(self.min_duration.is_finite() && self.min_duration >= 0.0) {
            return Err(invalid(
                "min_duration",
                format!("{}s must not be negative", self.min_duration),
            ));
        }
        if self.min_duration > self.duration {
            return Err(invalid(
                "min_duration",
                format!(
                    "{}s exceeds clip duration {}s",
                    self.min_duration, self.duration
                ),
            ));
        }
        if let Some(db) = self.trim_db.filter(|db| !(db.is_finite() && *db > 0.0)) {
            return Err(invalid("trim_db", format!("{db}dB must be positive")));
        }
        if self.n_fft < 2 {
            return Err(invalid("n_fft", "must be at least 2"));
        }
        if self.hop_length == 0 {
            return Err(invalid("hop_length", "must be positive"));
        }
        if self.n_mels == 0 {
            return Err(invalid("n_mels", "must be positive"));
        }
        if self.n_mfcc == 0 || self.n_mfcc > self.n_mels {
            return Err(invalid(
                "n_mfcc",
                format!("{} must be between 1 and n_mels ({})", self.n_mfcc, self.n_mels),
            ));
        }
        Ok(())
    }

    /// Clip duration in samples at the target rate.
    pub fn duration_samples(&self) -> usize {
        (self.duration * self.sample_rate as f32).round() as usize
    }

    /// Clip offset in samples at the target rate.
    pub fn offset_samples(&self) -> usize {
        (self.offset * self.sample_rate as f32).round() as usize
    }

    /// Minimum usable clip length in samples at the target rate.
    pub fn min_samples(&self) -> usize {
        (self.min_duration * self.sample_rate as f32).round() as usize
    }

    /// Stable hex digest of the canonical JSON form.
    pub fn fingerprint(&self) -> String {
        // Serializing a plain struct of numbers and unit enums cannot fail.
        let canonical = serde_json::to_vec(self).unwrap_or_default();
        let digest = Sha256::digest(&canonical);
        format!("{digest:x}")[..16].to_string()
    }

    /// Fail when `other` would extract different features.
    pub fn ensure_matches(&self, other: &ExtractionConfig) -> Result<(), ConfigError> {
        if self == other {
            return Ok(());
        }
        Err(ConfigError::Mismatch {
            expected: format!("{} ({})", self.summary(), self.fingerprint()),
            found: format!("{} ({})", other.summary(), other.fingerprint()),
        })
    }

    /// Short human-readable description.
    pub fn summary(&self) -> String {
        let mut summary = format!(
            "{}Hz, {}s@{}s, {} mfcc",
            self.sample_rate, self.duration, self.offset, self.n_mfcc
        );
        if let Some(db) = self.trim_db {
            summary.push_str(&format!(", trim {db}dB"));
        }
        summary
    }
}
