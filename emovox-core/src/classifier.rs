//! Classifier boundary and the native softmax classifier.

use crate::error::{ModelError, Result};
use crate::features::FeatureVector;
use ndarray::{Array1, Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};

/// Probability distribution over a label set, in label order.
#[derive(Clone, Debug, PartialEq)]
pub struct Probabilities(Vec<f32>);

impl Probabilities {
    /// Wrap classifier output, checking it is a finite distribution.
    pub fn new(values: Vec<f32>) -> std::result::Result<Self, ModelError> {
        if values.is_empty() {
            return Err(ModelError::Output("empty distribution".into()));
        }
        if values.iter().any(|p| !p.is_finite() || *p < 0.0) {
            return Err(ModelError::Output(format!("not a distribution: {values:?}")));
        }
        let total: f32 = values.iter().sum();
        if (total - 1.0).abs() > 1e-3 {
            return Err(ModelError::Output(format!("probabilities sum to {total}")));
        }
        Ok(Self(values))
    }

    /// Numerically stable softmax.
    pub fn from_logits(logits: &[f32]) -> std::result::Result<Self, ModelError> {
        let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let exps: Vec<f32> = logits.iter().map(|&z| (z - max).exp()).collect();
        let total: f32 = exps.iter().sum();
        Self::new(exps.into_iter().map(|e| e / total).collect())
    }

    /// Index of the most likely class. Ties resolve to the lowest index.
    pub fn argmax(&self) -> usize {
        self.0
            .iter()
            .enumerate()
            .fold((0, f32::NEG_INFINITY), |best, (i, &p)| {
                if p > best.1 { (i, p) } else { best }
            })
            .0
    }

    pub fn max(&self) -> f32 {
        self.0[self.argmax()]
    }

    pub fn get(&self, index: usize) -> Option<f32> {
        self.0.get(index).copied()
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
}

/// A trained model mapping feature vectors to class probabilities.
///
/// Implementations are immutable after loading and shared across request threads.
pub trait EmotionClassifier: Send + Sync {
    /// Expected feature vector width.
    fn num_features(&self) -> usize;

    /// Number of output classes.
    fn num_classes(&self) -> usize;

    /// Class probabilities for one vector.
    fn predict(&self, features: &FeatureVector) -> Result<Probabilities>;

    /// Short backend name for logs.
    fn backend(&self) -> &'static str;
}

/// Per-feature standardization: `(x - mean) / scale`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    mean: Array1<f32>,
    scale: Array1<f32>,
}

impl StandardScaler {
    /// Fit on rows of `x`. Zero-variance features get unit scale.
    pub fn fit(x: &Array2<f32>) -> Self {
        let cols = x.ncols();
        let mean = x
            .mean_axis(Axis(0))
            .unwrap_or_else(|| Array1::zeros(cols));
        let scale = x.std_axis(Axis(0), 0.0).mapv(|s| if s > 1e-8 { s } else { 1.0 });
        Self { mean, scale }
    }

    pub fn identity(width: usize) -> Self {
        Self {
            mean: Array1::zeros(width),
            scale: Array1::ones(width),
        }
    }

    pub fn width(&self) -> usize {
        self.mean.len()
    }

    pub fn transform(&self, x: &Array2<f32>) -> Array2<f32> {
        (x - &self.mean) / &self.scale
    }

    pub fn transform_row(&self, x: ArrayView1<f32>) -> Array1<f32> {
        (&x - &self.mean) / &self.scale
    }

    fn is_valid(&self) -> bool {
        self.mean.len() == self.scale.len()
            && self.mean.iter().all(|v| v.is_finite())
            && self.scale.iter().all(|v| v.is_finite() && *v > 0.0)
    }
}

/// Multinomial logistic regression over standardized features.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SoftmaxClassifier {
    scaler: StandardScaler,
    /// Shape (classes, features)
    weights: Array2<f32>,
    bias: Array1<f32>,
}

impl SoftmaxClassifier {
    /// Assemble and validate a classifier.
    pub fn from_parts(
        scaler: StandardScaler,
        weights: Array2<f32>,
        bias: Array1<f32>,
    ) -> std::result::Result<Self, ModelError> {
        let classifier = Self {
            scaler,
            weights,
            bias,
        };
        classifier.validate()?;
        Ok(classifier)
    }

    /// Check internal shapes and values, e.g. after deserialization.
    pub fn validate(&self) -> std::result::Result<(), ModelError> {
        if self.weights.nrows() == 0 || self.weights.ncols() == 0 {
            return Err(ModelError::Shape("empty weight matrix".into()));
        }
        if self.bias.len() != self.weights.nrows() {
            return Err(ModelError::Shape(format!(
                "bias has {} entries for {} classes",
                self.bias.len(),
                self.weights.nrows()
            )));
        }
        if self.scaler.width() != self.weights.ncols() {
            return Err(ModelError::Shape(format!(
                "scaler width {} for {} features",
                self.scaler.width(),
                self.weights.ncols()
            )));
        }
        if !self.scaler.is_valid()
            || self.weights.iter().chain(self.bias.iter()).any(|v| !v.is_finite())
        {
            return Err(ModelError::Shape("non-finite parameters".into()));
        }
        Ok(())
    }

    pub fn scaler(&self) -> &StandardScaler {
        &self.scaler
    }

    pub fn weights(&self) -> &Array2<f32> {
        &self.weights
    }

    pub fn bias(&self) -> &Array1<f32> {
        &self.bias
    }

    /// Logits for a batch of raw (unscaled) rows, shape (rows, classes).
    pub fn logits(&self, x: &Array2<f32>) -> Array2<f32> {
        self.scaler.transform(x).dot(&self.weights.t()) + &self.bias
    }
}

impl EmotionClassifier for SoftmaxClassifier {
    fn num_features(&self) -> usize {
        self.weights.ncols()
    }

    fn num_classes(&self) -> usize {
        self.weights.nrows()
    }

    fn predict(&self, features: &FeatureVector) -> Result<Probabilities> {
        if features.len() != self.num_features() {
            return Err(ModelError::InputWidth {
                expected: self.num_features(),
                got: features.len(),
            }
            .into());
        }

        let x = self
            .scaler
            .transform_row(ArrayView1::from(features.as_slice()));
        let logits = self.weights.dot(&x) + &self.bias;

        Ok(Probabilities::from_logits(&logits.to_vec())?)
    }

    fn backend(&self) -> &'static str {
        "softmax"
    }
}
