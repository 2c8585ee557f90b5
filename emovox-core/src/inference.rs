//! Inference service shared by the CLI, the HTTP endpoint and the listen loop.

use crate::audio::AudioClip;
use crate::classifier::Probabilities;
use crate::config::ExtractionConfig;
use crate::decode::{AudioFormat, decode_file};
use crate::error::{AudioError, Error, ModelError};
use crate::features::{FeatureExtractor, FeatureVector};
use crate::labels::LabelSet;
use crate::persist::LoadedModel;
use serde::Serialize;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Pipeline stage that produced an inference failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Malformed request (missing file, empty filename)
    Request,
    /// Storing the uploaded bytes
    Upload,
    /// Container decoding
    Decode,
    /// Feature extraction and validation
    Extraction,
    /// Classifier evaluation
    Prediction,
    /// No usable classifier
    Classifier,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Request => "request",
            Stage::Upload => "upload",
            Stage::Decode => "decode",
            Stage::Extraction => "extraction",
            Stage::Prediction => "prediction",
            Stage::Classifier => "classifier",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-request failure. Display is always `"<stage>: <message>"`.
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("request: no audio file provided")]
    NoFile,

    #[error("request: empty filename")]
    EmptyFilename,

    #[error("request: malformed upload: {0}")]
    Malformed(String),

    #[error("upload: failed to store audio: {0}")]
    TempFile(#[source] std::io::Error),

    #[error("decode: {0}")]
    Decode(#[source] Error),

    #[error("extraction: {0}")]
    Extraction(#[source] Error),

    #[error("prediction: {0}")]
    Prediction(#[source] Error),

    #[error("classifier: classifier unavailable")]
    ClassifierUnavailable,
}

impl InferenceError {
    pub fn stage(&self) -> Stage {
        match self {
            InferenceError::NoFile
            | InferenceError::EmptyFilename
            | InferenceError::Malformed(_) => Stage::Request,
            InferenceError::TempFile(_) => Stage::Upload,
            InferenceError::Decode(_) => Stage::Decode,
            InferenceError::Extraction(_) => Stage::Extraction,
            InferenceError::Prediction(_) => Stage::Prediction,
            InferenceError::ClassifierUnavailable => Stage::Classifier,
        }
    }

    /// Stable tag of the underlying library error, if any.
    pub fn kind(&self) -> &'static str {
        match self {
            InferenceError::Decode(e)
            | InferenceError::Extraction(e)
            | InferenceError::Prediction(e) => e.kind(),
            _ => self.stage().as_str(),
        }
    }

    fn from_extraction(error: Error) -> Self {
        match error {
            Error::Audio(AudioError::Decode { .. } | AudioError::Io(_)) => {
                InferenceError::Decode(error)
            }
            other => InferenceError::Extraction(other),
        }
    }

    fn from_prediction(error: Error) -> Self {
        match error {
            Error::Model(ModelError::Unavailable) => InferenceError::ClassifierUnavailable,
            other => InferenceError::Prediction(other),
        }
    }
}

/// Outcome of one classification.
#[derive(Clone, Debug, PartialEq)]
pub struct PredictionResult {
    labels: LabelSet,
    probabilities: Probabilities,
    index: usize,
}

impl PredictionResult {
    /// # Errors
    ///
    /// Fails when the distribution and label set differ in length.
    pub fn new(labels: LabelSet, probabilities: Probabilities) -> Result<Self, ModelError> {
        if labels.len() != probabilities.len() {
            return Err(ModelError::Output(format!(
                "{} probabilities for {} labels",
                probabilities.len(),
                labels.len()
            )));
        }
        let index = probabilities.argmax();
        Ok(Self {
            labels,
            probabilities,
            index,
        })
    }

    /// Index of the predicted label.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Predicted label name, lowercase.
    pub fn label(&self) -> &str {
        self.labels.name(self.index).unwrap_or_default()
    }

    /// Predicted label name, capitalized.
    pub fn emotion(&self) -> String {
        self.labels.display_name(self.index).unwrap_or_default()
    }

    /// Maximum probability as a percentage.
    pub fn confidence(&self) -> f32 {
        self.probabilities.max() * 100.0
    }

    pub fn labels(&self) -> &LabelSet {
        &self.labels
    }

    pub fn probabilities(&self) -> &Probabilities {
        &self.probabilities
    }

    /// `(label, probability)` in label order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, f32)> {
        self.labels
            .iter()
            .map(|(i, name)| (name, self.probabilities.as_slice()[i]))
    }

    /// The `k` most likely labels, most likely first.
    pub fn top(&self, k: usize) -> Vec<(&str, f32)> {
        let mut ranked: Vec<_> = self.iter().collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranked.truncate(k);
        ranked
    }
}

/// An uploaded audio file.
#[derive(Clone, Debug, Default)]
pub struct Upload {
    pub filename: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

/// Immutable inference context: extractor plus loaded model.
///
/// Built once at startup and shared by reference (or `Arc`) across requests.
#[derive(Debug)]
pub struct InferenceService {
    extractor: FeatureExtractor,
    model: LoadedModel,
    temp_dir: Option<PathBuf>,
}

impl InferenceService {
    /// Wrap a loaded model, using the extraction config it was trained with.
    pub fn new(model: LoadedModel) -> crate::error::Result<Self> {
        let extractor = FeatureExtractor::new(model.config.clone())?;
        Ok(Self {
            extractor,
            model,
            temp_dir: None,
        })
    }

    /// Load the model at `path`.
    pub fn load(path: impl AsRef<Path>) -> crate::error::Result<Self> {
        Self::new(LoadedModel::load(path)?)
    }

    /// Store uploads under `dir` instead of the system temp directory.
    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = Some(dir.into());
        self
    }

    pub fn labels(&self) -> &LabelSet {
        &self.model.labels
    }

    pub fn config(&self) -> &ExtractionConfig {
        self.extractor.config()
    }

    pub fn model(&self) -> &LoadedModel {
        &self.model
    }

    /// Classify an already extracted vector.
    pub fn classify(&self, features: &FeatureVector) -> Result<PredictionResult, InferenceError> {
        let probabilities = self
            .model
            .classifier
            .predict(features)
            .map_err(InferenceError::from_prediction)?;

        PredictionResult::new(self.model.labels.clone(), probabilities)
            .map_err(|e| InferenceError::Prediction(e.into()))
    }

    /// Extract and classify a decoded clip.
    pub fn predict_clip(&self, clip: &AudioClip) -> Result<PredictionResult, InferenceError> {
        let features = self
            .extractor
            .extract(clip)
            .map_err(InferenceError::from_extraction)?;
        self.classify(&features)
    }

    /// Decode, extract and classify a file.
    pub fn predict_file(&self, path: impl AsRef<Path>) -> Result<PredictionResult, InferenceError> {
        let clip = decode_file(path).map_err(InferenceError::Decode)?;
        self.predict_clip(&clip)
    }

    /// Classify uploaded bytes via a temporary file owned by this call.
    ///
    /// The file is removed when this returns, whatever the outcome.
    pub fn predict_upload(&self, upload: &Upload) -> Result<PredictionResult, InferenceError> {
        if upload.filename.trim().is_empty() {
            return Err(InferenceError::EmptyFilename);
        }

        let format = AudioFormat::from_upload(Some(&upload.filename), upload.content_type.as_deref());

        let mut builder = tempfile::Builder::new();
        builder.prefix("emovox-upload-").suffix(format.suffix());
        let mut file = match &self.temp_dir {
            Some(dir) => builder.tempfile_in(dir),
            None => builder.tempfile(),
        }
        .map_err(InferenceError::TempFile)?;

        file.write_all(&upload.bytes)
            .and_then(|()| file.flush())
            .map_err(InferenceError::TempFile)?;

        tracing::debug!(
            filename = %upload.filename,
            content_type = ?upload.content_type,
            bytes = upload.bytes.len(),
            ?format,
            "stored upload"
        );

        self.predict_file(file.path())
    }
}
