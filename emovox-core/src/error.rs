//! Error types for emovox-core organized by processing stage.

use ndarray::ShapeError;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Pipeline error variants organized by processing stage.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration stage error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Audio loading stage error
    #[error(transparent)]
    Audio(#[from] AudioError),

    /// Feature extraction stage error
    #[error(transparent)]
    Feature(#[from] FeatureError),

    /// Dataset loading stage error
    #[error(transparent)]
    Dataset(#[from] DatasetError),

    /// Model persistence and inference error
    #[error(transparent)]
    Model(#[from] ModelError),
}

impl Error {
    /// Stable tag for logs and skip reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Config(ConfigError::Mismatch { .. }) => "config_mismatch",
            Error::Config(_) => "config",
            Error::Audio(AudioError::Decode { .. }) => "decode",
            Error::Audio(AudioError::TooShort { .. }) => "too_short",
            Error::Audio(_) => "audio",
            Error::Feature(_) => "invalid_feature",
            Error::Dataset(DatasetError::Empty { .. }) => "empty_dataset",
            Error::Dataset(_) => "dataset",
            Error::Model(ModelError::Load { .. } | ModelError::Shape { .. }) => "model_load",
            Error::Model(_) => "model",
        }
    }
}

/// Configuration errors (extraction parameters, label sets, artifacts).
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Extraction or training parameter out of range
    #[error("invalid {name}: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    /// Label set is empty, duplicated or malformed
    #[error("invalid label set: {0}")]
    InvalidLabels(String),

    /// Training-time and inference-time extraction configs differ
    #[error("extraction config mismatch: model expects {expected}, got {found}")]
    Mismatch { expected: String, found: String },

    /// Config file could not be read
    #[error("failed to read config {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Config file is not valid TOML
    #[error(transparent)]
    Toml(#[from] toml::de::Error),
}

/// One failed decode attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodeFailure {
    pub strategy: &'static str,
    pub reason: String,
}

impl fmt::Display for DecodeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.strategy, self.reason)
    }
}

/// Audio loading and validation errors.
#[derive(Debug, Error)]
pub enum AudioError {
    /// Every decode strategy failed
    #[error("could not decode {path:?} ({})", join_failures(.attempts))]
    Decode {
        path: PathBuf,
        attempts: Vec<DecodeFailure>,
    },

    /// Clip shorter than the minimum usable duration
    #[error("audio too short: {duration:.3}s (minimum {min}s)")]
    TooShort { duration: f32, min: f32 },

    /// Channel count validation failed
    #[error("invalid channel count: {0}")]
    InvalidChannels(u16),

    /// Sample rate conversion failed
    #[error("resampling failed: {0}")]
    Resample(String),

    /// Capture device error
    #[error("audio capture failed: {0}")]
    Capture(String),

    /// IO error during audio loading
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

fn join_failures(attempts: &[DecodeFailure]) -> String {
    attempts
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Feature extraction errors.
#[derive(Debug, Error)]
pub enum FeatureError {
    /// Extracted vector contains NaN or infinity
    #[error("invalid MFCC features: non-finite value at coefficient {index}")]
    NonFinite { index: usize },

    /// Extracted vector has the wrong number of coefficients
    #[error("invalid MFCC features: expected {expected} coefficients, got {got}")]
    Length { expected: usize, got: usize },
}

/// Dataset loading and feature cache errors.
#[derive(Debug, Error)]
pub enum DatasetError {
    /// Dataset root does not exist
    #[error("dataset root not found: {0:?}")]
    MissingRoot(PathBuf),

    /// No usable training examples
    #[error("empty dataset{}: no usable training examples ({skipped} files skipped)", in_root(.root))]
    Empty {
        root: Option<PathBuf>,
        skipped: usize,
    },

    /// Feature and label arrays do not belong together
    #[error("feature cache mismatch: {0}")]
    CacheMismatch(String),

    /// IO error while walking the dataset or cache
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Cache file is not valid JSON
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

fn in_root(root: &Option<PathBuf>) -> String {
    root.as_ref()
        .map(|r| format!(" at {}", r.display()))
        .unwrap_or_default()
}

/// Model persistence and inference errors.
#[derive(Debug, Error)]
pub enum ModelError {
    /// Artifact missing, corrupt or of an unknown format
    #[error("failed to load model {path:?}: {reason}")]
    Load { path: PathBuf, reason: String },

    /// Artifact shape does not match its own config or label set
    #[error("model shape mismatch: {0}")]
    Shape(String),

    /// Artifact could not be written
    #[error("failed to save model {path:?}: {source}")]
    Save {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Input vector width differs from the classifier input width
    #[error("classifier expects {expected} features, got {got}")]
    InputWidth { expected: usize, got: usize },

    /// Classifier output is not a probability distribution
    #[error("invalid classifier output: {0}")]
    Output(String),

    /// Classifier can no longer be used
    #[error("classifier unavailable")]
    Unavailable,

    /// ONNX Runtime error
    #[cfg(feature = "onnx")]
    #[error(transparent)]
    Ort(#[from] ort::Error),

    /// ndarray shape error
    #[error(transparent)]
    Array(#[from] ShapeError),
}

/// Result type alias for emovox-core operations.
pub type Result<T> = std::result::Result<T, Error>;

// std::io::Error → AudioError → Error
impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Audio(AudioError::Io(e))
    }
}

// serde_json::Error → DatasetError → Error
impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Dataset(DatasetError::Json(e))
    }
}

// ShapeError → ModelError → Error
impl From<ShapeError> for Error {
    fn from(e: ShapeError) -> Self {
        Error::Model(ModelError::Array(e))
    }
}

// ort::Error → ModelError → Error
#[cfg(feature = "onnx")]
impl From<ort::Error> for Error {
    fn from(e: ort::Error) -> Self {
        Error::Model(ModelError::Ort(e))
    }
}
