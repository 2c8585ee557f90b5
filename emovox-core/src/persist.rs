//! Model artifacts on disk.
//!
//! A native artifact is a single JSON document holding the classifier together
//! with the extraction config and label set it was trained with, so a loaded
//! model always knows how its inputs must be produced.

use crate::classifier::{EmotionClassifier, SoftmaxClassifier};
use crate::config::ExtractionConfig;
use crate::error::{ConfigError, ModelError, Result};
use crate::labels::LabelSet;
use crate::train::TrainingHistory;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Format tag written into every native artifact.
pub const ARTIFACT_FORMAT: &str = "emovox-softmax/1";

/// Where `train` writes and `predict`/`serve` look by default.
pub const DEFAULT_MODEL_PATH: &str = "model/emotion_model.json";

/// Serialized native model.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub format: String,
    /// [`ExtractionConfig::fingerprint`] of `config` at save time
    pub fingerprint: String,
    pub config: ExtractionConfig,
    pub labels: LabelSet,
    pub classifier: SoftmaxClassifier,
    #[serde(default)]
    pub history: TrainingHistory,
}

impl ModelArtifact {
    pub fn new(
        config: ExtractionConfig,
        labels: LabelSet,
        classifier: SoftmaxClassifier,
        history: TrainingHistory,
    ) -> Self {
        Self {
            format: ARTIFACT_FORMAT.to_string(),
            fingerprint: config.fingerprint(),
            config,
            labels,
            classifier,
            history,
        }
    }

    /// Write to `path`, replacing it atomically.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let save_err = |source| ModelError::Save {
            path: path.to_path_buf(),
            source,
        };

        let dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir).map_err(save_err)?;

        let mut file = NamedTempFile::new_in(dir).map_err(save_err)?;
        serde_json::to_writer_pretty(&mut file, self)
            .map_err(|e| save_err(std::io::Error::other(e)))?;
        file.flush().map_err(save_err)?;
        file.persist(path).map_err(|e| save_err(e.error))?;

        tracing::info!(path = ?path.display(), fingerprint = %self.fingerprint, "model saved");
        Ok(())
    }

    /// Read and verify an artifact.
    ///
    /// # Errors
    ///
    /// - [`ModelError::Load`] if the file is missing, unparsable, of another
    ///   format or its fingerprint does not match its config
    /// - [`ModelError::Shape`] if the classifier does not fit the config or labels
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let load_err = |reason: String| ModelError::Load {
            path: path.to_path_buf(),
            reason,
        };

        let text = std::fs::read_to_string(path).map_err(|e| load_err(e.to_string()))?;
        let artifact: Self = serde_json::from_str(&text).map_err(|e| load_err(e.to_string()))?;

        if artifact.format != ARTIFACT_FORMAT {
            return Err(load_err(format!(
                "unsupported format {:?} (expected {ARTIFACT_FORMAT:?})",
                artifact.format
            ))
            .into());
        }
        artifact
            .config
            .validate()
            .map_err(|e| load_err(e.to_string()))?;
        if artifact.fingerprint != artifact.config.fingerprint() {
            return Err(load_err(format!(
                "fingerprint {} does not match stored config ({})",
                artifact.fingerprint,
                artifact.config.fingerprint()
            ))
            .into());
        }

        artifact.classifier.validate()?;
        check_shape(
            artifact.classifier.num_features(),
            artifact.classifier.num_classes(),
            &artifact.config,
            &artifact.labels,
        )?;

        Ok(artifact)
    }
}

/// Input width must equal `n_mfcc`; output width must equal the label count.
fn check_shape(
    features: usize,
    classes: usize,
    config: &ExtractionConfig,
    labels: &LabelSet,
) -> std::result::Result<(), ModelError> {
    if features != config.n_mfcc {
        return Err(ModelError::Shape(format!(
            "classifier takes {features} features but config extracts {}",
            config.n_mfcc
        )));
    }
    if classes != labels.len() {
        return Err(ModelError::Shape(format!(
            "classifier has {classes} outputs for {} labels",
            labels.len()
        )));
    }
    Ok(())
}

/// A classifier ready for inference, with the recipe its inputs must follow.
pub struct LoadedModel {
    pub path: PathBuf,
    pub config: ExtractionConfig,
    pub labels: LabelSet,
    pub classifier: Box<dyn EmotionClassifier>,
}

impl fmt::Debug for LoadedModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedModel")
            .field("path", &self.path)
            .field("config", &self.config)
            .field("labels", &self.labels)
            .field("backend", &self.classifier.backend())
            .finish()
    }
}

impl LoadedModel {
    /// Load a model by extension: `.onnx` for ONNX networks, anything else as
    /// a native JSON artifact.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let is_onnx = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("onnx"));

        let model = if is_onnx {
            Self::load_onnx(path)?
        } else {
            let artifact = ModelArtifact::load(path)?;
            Self {
                path: path.to_path_buf(),
                config: artifact.config,
                labels: artifact.labels,
                classifier: Box::new(artifact.classifier),
            }
        };

        tracing::info!(
            path = ?path.display(),
            backend = model.classifier.backend(),
            labels = %model.labels,
            config = %model.config.summary(),
            "model loaded"
        );

        Ok(model)
    }

    #[cfg(feature = "onnx")]
    fn load_onnx(path: &Path) -> Result<Self> {
        let (classifier, manifest) = crate::onnx::OnnxClassifier::load(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            config: manifest.config,
            labels: manifest.labels,
            classifier: Box::new(classifier),
        })
    }

    #[cfg(not(feature = "onnx"))]
    fn load_onnx(path: &Path) -> Result<Self> {
        Err(ModelError::Load {
            path: path.to_path_buf(),
            reason: "ONNX models require the `onnx` feature".into(),
        }
        .into())
    }

    /// Fail when `expected` differs from the config the model was trained with.
    pub fn ensure_config(&self, expected: &ExtractionConfig) -> std::result::Result<(), ConfigError> {
        self.config.ensure_matches(expected)
    }
}
