//! ONNX Runtime backend for externally trained networks.
//!
//! A `model.onnx` file is paired with a `model.onnx.json` manifest that
//! records the extraction config, label order and tensor layout.

use crate::classifier::{EmotionClassifier, Probabilities};
use crate::config::ExtractionConfig;
use crate::error::{ModelError, Result};
use crate::features::FeatureVector;
use crate::labels::LabelSet;
use ndarray::{ArrayD, IxDyn};
use ort::inputs;
use ort::session::Session;
use ort::value::Tensor;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

fn default_input() -> String {
    "input".to_string()
}

fn default_output() -> String {
    "output".to_string()
}

fn default_input_shape() -> Vec<i64> {
    vec![1, -1]
}

/// Sidecar description of an ONNX classifier.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OnnxManifest {
    pub config: ExtractionConfig,
    pub labels: LabelSet,
    #[serde(default = "default_input")]
    pub input: String,
    #[serde(default = "default_output")]
    pub output: String,
    /// Input tensor shape; `-1` stands for the coefficient axis
    #[serde(default = "default_input_shape")]
    pub input_shape: Vec<i64>,
    /// Whether the network emits logits rather than probabilities
    #[serde(default)]
    pub apply_softmax: bool,
}

impl OnnxManifest {
    /// Manifest path for a model file (`model.onnx` → `model.onnx.json`).
    pub fn path_for(model: &Path) -> PathBuf {
        let mut name = model.as_os_str().to_owned();
        name.push(".json");
        PathBuf::from(name)
    }

    fn tensor_shape(&self) -> std::result::Result<Vec<usize>, ModelError> {
        let shape: Vec<usize> = self
            .input_shape
            .iter()
            .map(|&d| if d < 0 { self.config.n_mfcc } else { d as usize })
            .collect();
        if shape.iter().product::<usize>() != self.config.n_mfcc {
            return Err(ModelError::Shape(format!(
                "input shape {:?} does not hold {} coefficients",
                self.input_shape, self.config.n_mfcc
            )));
        }
        Ok(shape)
    }
}

/// ONNX session behind a lock; `Session::run` needs exclusive access.
pub struct OnnxClassifier {
    session: Mutex<Session>,
    input: String,
    output: String,
    shape: Vec<usize>,
    classes: usize,
    apply_softmax: bool,
}

impl OnnxClassifier {
    /// Load `path` and its manifest.
    pub fn load(path: &Path) -> Result<(Self, OnnxManifest)> {
        let load_err = |reason: String| ModelError::Load {
            path: path.to_path_buf(),
            reason,
        };

        let manifest_path = OnnxManifest::path_for(path);
        let text = std::fs::read_to_string(&manifest_path)
            .map_err(|e| load_err(format!("manifest {}: {e}", manifest_path.display())))?;
        let manifest: OnnxManifest =
            serde_json::from_str(&text).map_err(|e| load_err(format!("manifest: {e}")))?;
        manifest
            .config
            .validate()
            .map_err(|e| load_err(e.to_string()))?;

        let shape = manifest.tensor_shape()?;

        let session = Session::builder()
            .and_then(|builder| builder.commit_from_file(path))
            .map_err(|e| load_err(e.to_string()))?;

        let classifier = Self {
            session: Mutex::new(session),
            input: manifest.input.clone(),
            output: manifest.output.clone(),
            shape,
            classes: manifest.labels.len(),
            apply_softmax: manifest.apply_softmax,
        };

        Ok((classifier, manifest))
    }
}

impl EmotionClassifier for OnnxClassifier {
    fn num_features(&self) -> usize {
        self.shape.iter().product()
    }

    fn num_classes(&self) -> usize {
        self.classes
    }

    fn predict(&self, features: &FeatureVector) -> Result<Probabilities> {
        if features.len() != self.num_features() {
            return Err(ModelError::InputWidth {
                expected: self.num_features(),
                got: features.len(),
            }
            .into());
        }

        let input = ArrayD::from_shape_vec(IxDyn(&self.shape), features.as_slice().to_vec())?;
        let input = Tensor::from_array(input)?;

        let values: Vec<f32> = {
            let mut session = self.session.lock().map_err(|_| ModelError::Unavailable)?;
            let outputs = session.run(inputs![self.input.as_str() => input])?;
            let output = outputs
                .get(self.output.as_str())
                .ok_or_else(|| ModelError::Output(format!("missing output {:?}", self.output)))?;
            output.try_extract_array::<f32>()?.iter().copied().collect()
        };

        if values.len() != self.classes {
            return Err(ModelError::Output(format!(
                "{} outputs for {} classes",
                values.len(),
                self.classes
            ))
            .into());
        }

        let probabilities = if self.apply_softmax {
            Probabilities::from_logits(&values)?
        } else {
            Probabilities::new(values)?
        };
        Ok(probabilities)
    }

    fn backend(&self) -> &'static str {
        "onnx"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifest_sits_next_to_model() {
        assert_eq!(
            OnnxManifest::path_for(Path::new("model/emotion.onnx")),
            PathBuf::from("model/emotion.onnx.json")
        );
    }

    #[test]
    fn manifest_defaults() {
        let manifest: OnnxManifest =
            serde_json::from_str(r#"{"config": {}, "labels": ["neutral", "happy", "sad", "angry"]}"#)
                .unwrap();

        assert_eq!(manifest.input, "input");
        assert_eq!(manifest.tensor_shape().unwrap(), vec![1, 40]);
        assert!(!manifest.apply_softmax);
    }

    #[test]
    fn conv_style_shape_is_accepted() {
        let manifest = OnnxManifest {
            config: ExtractionConfig::default(),
            labels: LabelSet::four_class(),
            input: default_input(),
            output: default_output(),
            input_shape: vec![1, -1, 1],
            apply_softmax: true,
        };
        assert_eq!(manifest.tensor_shape().unwrap(), vec![1, 40, 1]);

        let bad = OnnxManifest {
            input_shape: vec![2, -1],
            ..manifest
        };
        assert!(bad.tensor_shape().is_err());
    }

    #[test]
    fn missing_manifest_is_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.onnx");
        std::fs::write(&path, b"onnx").unwrap();

        let err = OnnxClassifier::load(&path).err().unwrap();
        assert_eq!(err.kind(), "model_load");
    }
}
