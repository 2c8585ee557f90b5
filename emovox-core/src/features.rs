//! Fixed-length feature vectors and the extractor that produces them.

use crate::audio::{AudioClip, fix_length, normalize_peak, trim_silence};
use crate::config::{ExtractionConfig, LengthPolicy, Normalization};
use crate::decode::decode_file;
use crate::error::{AudioError, FeatureError, Result};
use crate::mfcc::Mfcc;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Time-averaged MFCC coefficients for one clip.
///
/// Always finite; construct through [`FeatureVector::new`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f32>", into = "Vec<f32>")]
pub struct FeatureVector(Vec<f32>);

impl FeatureVector {
    /// Wrap `values`, rejecting NaN and infinity.
    pub fn new(values: Vec<f32>) -> std::result::Result<Self, FeatureError> {
        if let Some(index) = values.iter().position(|v| !v.is_finite()) {
            return Err(FeatureError::NonFinite { index });
        }
        Ok(Self(values))
    }

    /// Wrap `values`, additionally requiring exactly `expected` entries.
    pub fn with_len(values: Vec<f32>, expected: usize) -> std::result::Result<Self, FeatureError> {
        if values.len() != expected {
            return Err(FeatureError::Length {
                expected,
                got: values.len(),
            });
        }
        Self::new(values)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn into_inner(self) -> Vec<f32> {
        self.0
    }
}

impl TryFrom<Vec<f32>> for FeatureVector {
    type Error = FeatureError;

    fn try_from(values: Vec<f32>) -> std::result::Result<Self, Self::Error> {
        Self::new(values)
    }
}

impl From<FeatureVector> for Vec<f32> {
    fn from(features: FeatureVector) -> Self {
        features.0
    }
}

/// Clip → [`FeatureVector`] following one [`ExtractionConfig`].
///
/// Cheap to share: the MFCC bases are built once and the extractor is `Send + Sync`.
#[derive(Clone, Debug)]
pub struct FeatureExtractor {
    config: ExtractionConfig,
    mfcc: Mfcc,
}

impl FeatureExtractor {
    /// Validate `config` and precompute the transform.
    pub fn new(config: ExtractionConfig) -> Result<Self> {
        config.validate()?;

        let mfcc = Mfcc::new(
            config.sample_rate,
            config.n_fft,
            config.hop_length,
            config.n_mels,
            config.n_mfcc,
        );

        Ok(Self { config, mfcc })
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    /// Decode `path` and extract features.
    pub fn extract_file(&self, path: impl AsRef<Path>) -> Result<FeatureVector> {
        let clip = decode_file(path)?;
        self.extract(&clip)
    }

    /// Extract features from a decoded clip.
    ///
    /// Steps:
    /// 1. Resample to the target rate
    /// 2. Window `[offset, offset + duration)` when the clip is long enough
    /// 3. Trim leading and trailing silence when `trim_db` is set
    /// 4. Reject clips under `min_duration`
    /// 5. Normalize amplitude
    /// 6. Pad or truncate (pad policy)
    /// 7. MFCC averaged over time
    ///
    /// # Errors
    ///
    /// - [`AudioError::TooShort`] for clips under the minimum duration
    /// - [`FeatureError`] when the result is not finite or has the wrong length
    pub fn extract(&self, clip: &AudioClip) -> Result<FeatureVector> {
        let config = &self.config;

        let clip = clip
            .resample(config.sample_rate)?
            .window(config.offset_samples(), config.duration_samples());

        let clip = match config.trim_db {
            Some(top_db) => {
                let kept = trim_silence(clip.samples(), top_db, config.n_fft, config.hop_length);
                tracing::trace!(before = clip.len(), after = kept.len(), "trimmed silence");
                AudioClip::new(kept.to_vec(), clip.sample_rate())
            }
            None => clip,
        };

        if clip.is_empty() || clip.len() < config.min_samples() {
            return Err(AudioError::TooShort {
                duration: clip.duration_secs(),
                min: config.min_duration,
            }
            .into());
        }

        let mut samples = clip.into_samples();

        match config.normalization {
            Normalization::Peak => normalize_peak(&mut samples),
            Normalization::None => {}
        }

        if config.length_policy == LengthPolicy::Pad {
            samples = fix_length(samples, config.duration_samples());
        }

        let mean = self.mfcc.apply_mean(&samples);
        let features = FeatureVector::with_len(mean.to_vec(), config.n_mfcc)?;

        Ok(features)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    fn tone(freq: f32, sample_rate: u32, secs: f32) -> AudioClip {
        let len = (secs * sample_rate as f32) as usize;
        let samples = (0..len)
            .map(|i| 0.4 * (2.0 * PI * freq * i as f32 / sample_rate as f32).sin())
            .collect();
        AudioClip::new(samples, sample_rate)
    }

    #[test]
    fn fixed_length_for_any_duration() {
        let extractor = FeatureExtractor::new(ExtractionConfig::default()).unwrap();

        for secs in [0.2, 1.0, 3.0, 5.5] {
            let features = extractor.extract(&tone(440.0, 22050, secs)).unwrap();
            assert_eq!(features.len(), 40);
            assert!(features.as_slice().iter().all(|v| v.is_finite()));
        }
    }

    #[test]
    fn silent_short_clip_is_padded() {
        let config = ExtractionConfig {
            sample_rate: 16000,
            duration: 3.0,
            offset: 0.0,
            ..ExtractionConfig::default()
        };
        let extractor = FeatureExtractor::new(config).unwrap();

        let features = extractor
            .extract(&AudioClip::new(vec![0.0; 16000], 16000))
            .unwrap();

        assert_eq!(features.len(), 40);
        assert!(features.as_slice().iter().all(|v| v.is_finite()));
    }

    #[test]
    fn rejects_clips_under_minimum() {
        let extractor = FeatureExtractor::new(ExtractionConfig::default()).unwrap();

        let err = extractor.extract(&tone(440.0, 22050, 0.05)).unwrap_err();

        assert_eq!(err.kind(), "too_short");
    }

    #[test]
    fn extraction_is_deterministic() {
        let extractor = FeatureExtractor::new(ExtractionConfig::default()).unwrap();
        let clip = tone(330.0, 44100, 2.0);

        let first = extractor.extract(&clip).unwrap();
        let second = extractor.extract(&clip).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn file_extraction_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 16000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for sample in tone(523.0, 16000, 1.5).samples() {
            writer.write_sample((sample * i16::MAX as f32) as i16).unwrap();
        }
        writer.finalize().unwrap();
        let extractor = FeatureExtractor::new(ExtractionConfig::default()).unwrap();

        let first = extractor.extract_file(&path).unwrap();
        let second = extractor.extract_file(&path).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn trimmed_padding_matches_unpadded_clip() {
        let config = ExtractionConfig {
            sample_rate: 16000,
            duration: 3.0,
            offset: 0.0,
            trim_db: Some(60.0),
            ..ExtractionConfig::default()
        };
        let clip = tone(440.0, 16000, 1.0);
        let mut samples = vec![0.0; 8000];
        samples.extend_from_slice(clip.samples());
        samples.extend(std::iter::repeat_n(0.0, 8000));
        let padded = AudioClip::new(samples, 16000);

        let trimming = FeatureExtractor::new(config.clone()).unwrap();
        assert_eq!(
            trimming.extract(&clip).unwrap(),
            trimming.extract(&padded).unwrap()
        );

        let untrimmed = FeatureExtractor::new(ExtractionConfig {
            trim_db: None,
            ..config
        })
        .unwrap();
        assert_ne!(
            untrimmed.extract(&clip).unwrap(),
            untrimmed.extract(&padded).unwrap()
        );
    }

    #[test]
    fn trimming_silence_leaves_too_short_clip() {
        let extractor = FeatureExtractor::new(ExtractionConfig {
            trim_db: Some(60.0),
            ..ExtractionConfig::default()
        })
        .unwrap();

        let err = extractor
            .extract(&AudioClip::new(vec![0.0; 22050], 22050))
            .unwrap_err();

        assert_eq!(err.kind(), "too_short");
    }

    #[test]
    fn natural_policy_differs_from_pad() {
        let padded = FeatureExtractor::new(ExtractionConfig::default()).unwrap();
        let natural = FeatureExtractor::new(ExtractionConfig {
            length_policy: LengthPolicy::Natural,
            ..ExtractionConfig::default()
        })
        .unwrap();
        let clip = tone(440.0, 22050, 1.0);

        let a = padded.extract(&clip).unwrap();
        let b = natural.extract(&clip).unwrap();

        assert_eq!(a.len(), b.len());
        assert_ne!(a, b);
    }

    #[test]
    fn feature_vector_rejects_non_finite() {
        assert!(matches!(
            FeatureVector::new(vec![0.0, f32::NAN]),
            Err(FeatureError::NonFinite { index: 1 })
        ));
        assert!(matches!(
            FeatureVector::with_len(vec![0.0; 3], 40),
            Err(FeatureError::Length { expected: 40, got: 3 })
        ));
        assert!(serde_json::from_str::<FeatureVector>("[1.0, 2.0]").is_ok());
    }

    #[test]
    fn invalid_config_is_rejected() {
        let result = FeatureExtractor::new(ExtractionConfig {
            hop_length: 0,
            ..ExtractionConfig::default()
        });
        assert!(result.is_err());
    }
}
