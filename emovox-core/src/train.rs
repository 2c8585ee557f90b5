//! Native trainer: softmax regression by full-batch gradient descent.

use crate::classifier::{EmotionClassifier, SoftmaxClassifier, StandardScaler};
use crate::dataset::Dataset;
use crate::error::{DatasetError, ModelError, Result};
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

/// Default number of gradient steps
const DEFAULT_EPOCHS: usize = 300;

/// Default learning rate
const DEFAULT_LEARNING_RATE: f32 = 0.1;

/// Default L2 penalty on weights
const DEFAULT_L2: f32 = 1e-4;

/// Default held-out fraction
const DEFAULT_VALIDATION_SPLIT: f32 = 0.2;

/// Default shuffle seed
const DEFAULT_SEED: u64 = 42;

/// Trainer hyperparameters.
#[derive(clap::Args, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrainConfig {
    /// Number of full-batch gradient steps
    #[arg(long, default_value_t = DEFAULT_EPOCHS)]
    pub epochs: usize,

    /// Gradient descent step size
    #[arg(long, default_value_t = DEFAULT_LEARNING_RATE)]
    pub learning_rate: f32,

    /// L2 regularization strength
    #[arg(long, default_value_t = DEFAULT_L2)]
    pub l2: f32,

    /// Fraction of examples held out for evaluation
    #[arg(long, default_value_t = DEFAULT_VALIDATION_SPLIT)]
    pub validation_split: f32,

    /// Shuffle seed for the split
    #[arg(long, default_value_t = DEFAULT_SEED)]
    pub seed: u64,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            epochs: DEFAULT_EPOCHS,
            learning_rate: DEFAULT_LEARNING_RATE,
            l2: DEFAULT_L2,
            validation_split: DEFAULT_VALIDATION_SPLIT,
            seed: DEFAULT_SEED,
        }
    }
}

/// Loss and accuracy after one epoch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    pub epoch: usize,
    pub loss: f32,
    pub accuracy: f32,
    pub val_loss: Option<f32>,
    pub val_accuracy: Option<f32>,
}

/// Per-epoch metrics of one training run.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingHistory {
    pub epochs: Vec<EpochMetrics>,
    pub train_size: usize,
    pub validation_size: usize,
}

impl TrainingHistory {
    pub fn last(&self) -> Option<&EpochMetrics> {
        self.epochs.last()
    }
}

/// Classifier plus the history that produced it.
#[derive(Clone, Debug)]
pub struct TrainedModel {
    pub classifier: SoftmaxClassifier,
    pub history: TrainingHistory,
    /// Metrics on the held-out split, if there was one
    pub evaluation: Option<Evaluation>,
}

/// Held-out metrics.
#[derive(Clone, Debug, PartialEq)]
pub struct Evaluation {
    pub loss: f32,
    pub accuracy: f32,
    /// `confusion[true][predicted]`
    pub confusion: Vec<Vec<usize>>,
}

/// Train a softmax classifier on `dataset`.
///
/// # Errors
///
/// Returns [`DatasetError::Empty`] before any work when `dataset` has no rows.
pub fn train(dataset: &Dataset, config: &TrainConfig) -> Result<TrainedModel> {
    let Some(width) = dataset.num_features() else {
        return Err(DatasetError::Empty {
            root: None,
            skipped: 0,
        }
        .into());
    };
    if !(config.learning_rate.is_finite() && config.learning_rate > 0.0) {
        return Err(crate::error::ConfigError::InvalidParameter {
            name: "learning_rate",
            reason: format!("{} must be positive", config.learning_rate),
        }
        .into());
    }

    let classes = dataset.label_set().len();
    let (train_set, val_set) = dataset.split(config.validation_split, config.seed);

    tracing::info!(
        train = train_set.len(),
        validation = val_set.len(),
        features = width,
        classes,
        epochs = config.epochs,
        "training"
    );

    let x_raw = to_matrix(&train_set)?;
    let scaler = StandardScaler::fit(&x_raw);
    let x = scaler.transform(&x_raw);
    let y = one_hot(train_set.labels(), classes);
    let n = x.nrows() as f32;

    let x_val = if val_set.is_empty() {
        None
    } else {
        Some(to_matrix(&val_set)?)
    };

    let mut weights = Array2::<f32>::zeros((classes, width));
    let mut bias = Array1::<f32>::zeros(classes);
    let mut history = TrainingHistory {
        epochs: Vec::with_capacity(config.epochs),
        train_size: train_set.len(),
        validation_size: val_set.len(),
    };

    for epoch in 1..=config.epochs {
        let logits = x.dot(&weights.t()) + &bias;
        let probs = softmax_rows(logits);

        let loss = cross_entropy(&probs, train_set.labels())
            + 0.5 * config.l2 * weights.mapv(|w| w * w).sum();
        let accuracy = accuracy(&probs, train_set.labels());

        let grad_logits = (&probs - &y) / n;
        let grad_w = grad_logits.t().dot(&x) + &(&weights * config.l2);
        let grad_b = grad_logits.sum_axis(Axis(0));

        weights.scaled_add(-config.learning_rate, &grad_w);
        bias.scaled_add(-config.learning_rate, &grad_b);

        let (val_loss, val_accuracy) = match &x_val {
            Some(x_val) => {
                let probs = softmax_rows(scaler.transform(x_val).dot(&weights.t()) + &bias);
                (
                    Some(cross_entropy(&probs, val_set.labels())),
                    Some(self::accuracy(&probs, val_set.labels())),
                )
            }
            None => (None, None),
        };

        if !loss.is_finite() {
            return Err(ModelError::Output(format!("training diverged at epoch {epoch}")).into());
        }

        tracing::debug!(epoch, loss, accuracy, ?val_loss, ?val_accuracy, "epoch");

        history.epochs.push(EpochMetrics {
            epoch,
            loss,
            accuracy,
            val_loss,
            val_accuracy,
        });
    }

    let classifier = SoftmaxClassifier::from_parts(scaler, weights, bias)?;
    let evaluation = if val_set.is_empty() {
        None
    } else {
        Some(evaluate(&classifier, &val_set)?)
    };

    if let Some(last) = history.last() {
        tracing::info!(
            loss = last.loss,
            accuracy = last.accuracy,
            val_accuracy = ?last.val_accuracy,
            "training finished"
        );
    }

    Ok(TrainedModel {
        classifier,
        history,
        evaluation,
    })
}

/// Loss, accuracy and confusion matrix of `classifier` on `dataset`.
pub fn evaluate(classifier: &dyn EmotionClassifier, dataset: &Dataset) -> Result<Evaluation> {
    let classes = classifier.num_classes();
    let mut confusion = vec![vec![0; classes]; classes];
    let mut loss = 0.0;
    let mut correct = 0;

    for (features, &label) in dataset.features().iter().zip(dataset.labels()) {
        let probs = classifier.predict(features)?;
        let predicted = probs.argmax();

        loss -= probs.get(label).unwrap_or(0.0).max(f32::EPSILON).ln();
        if predicted == label {
            correct += 1;
        }
        if let Some(row) = confusion.get_mut(label) {
            row[predicted] += 1;
        }
    }

    let n = dataset.len().max(1) as f32;
    Ok(Evaluation {
        loss: loss / n,
        accuracy: correct as f32 / n,
        confusion,
    })
}

fn to_matrix(dataset: &Dataset) -> Result<Array2<f32>> {
    let width = dataset.num_features().unwrap_or(0);
    let flat: Vec<f32> = dataset
        .features()
        .iter()
        .flat_map(|f| f.as_slice().iter().copied())
        .collect();
    Ok(Array2::from_shape_vec((dataset.len(), width), flat)?)
}

fn one_hot(labels: &[usize], classes: usize) -> Array2<f32> {
    let mut y = Array2::zeros((labels.len(), classes));
    for (row, &label) in labels.iter().enumerate() {
        y[[row, label]] = 1.0;
    }
    y
}

fn softmax_rows(mut logits: Array2<f32>) -> Array2<f32> {
    for mut row in logits.rows_mut() {
        let max = row.fold(f32::NEG_INFINITY, |a, &b| a.max(b));
        row.mapv_inplace(|z| (z - max).exp());
        let total = row.sum();
        row.mapv_inplace(|e| e / total);
    }
    logits
}

fn cross_entropy(probs: &Array2<f32>, labels: &[usize]) -> f32 {
    let total: f32 = labels
        .iter()
        .enumerate()
        .map(|(row, &label)| -probs[[row, label]].max(f32::EPSILON).ln())
        .sum();
    total / labels.len().max(1) as f32
}

fn accuracy(probs: &Array2<f32>, labels: &[usize]) -> f32 {
    let correct = probs
        .rows()
        .into_iter()
        .zip(labels)
        .filter(|(row, label)| {
            let predicted = row
                .iter()
                .enumerate()
                .fold((0, f32::NEG_INFINITY), |best, (i, &p)| {
                    if p > best.1 { (i, p) } else { best }
                })
                .0;
            predicted == **label
        })
        .count();
    correct as f32 / labels.len().max(1) as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::FeatureVector;
    use crate::labels::LabelSet;

    /// Two well separated clusters per class along distinct axes.
    fn separable(per_class: usize) -> Dataset {
        let labels: LabelSet = "neutral,happy,sad".parse().unwrap();
        let mut dataset = Dataset::new(labels);
        for class in 0..3 {
            for i in 0..per_class {
                let mut values = vec![0.0; 4];
                values[class] = 5.0 + (i % 3) as f32 * 0.1;
                values[3] = i as f32 * 0.01;
                dataset.push(FeatureVector::new(values).unwrap(), class);
            }
        }
        dataset
    }

    #[test]
    fn learns_separable_data() {
        let dataset = separable(10);
        let model = train(&dataset, &TrainConfig::default()).unwrap();

        assert_eq!(model.history.epochs.len(), 300);
        let first = &model.history.epochs[0];
        let last = model.history.last().unwrap();
        assert!(last.loss < first.loss);
        assert!(last.accuracy > 0.99);

        let eval = model.evaluation.unwrap();
        assert!(eval.accuracy > 0.99);
        assert_eq!(eval.confusion.len(), 3);
        let total: usize = eval.confusion.iter().flatten().sum();
        assert_eq!(total, model.history.validation_size);
    }

    #[test]
    fn empty_dataset_fails_before_training() {
        let dataset = Dataset::new(LabelSet::four_class());
        let err = train(&dataset, &TrainConfig::default()).unwrap_err();
        assert_eq!(err.kind(), "empty_dataset");
    }

    #[test]
    fn training_is_deterministic() {
        let dataset = separable(6);
        let config = TrainConfig {
            epochs: 20,
            ..TrainConfig::default()
        };

        let a = train(&dataset, &config).unwrap();
        let b = train(&dataset, &config).unwrap();

        assert_eq!(a.classifier, b.classifier);
        assert_eq!(a.history, b.history);
    }

    #[test]
    fn without_validation_split() {
        let dataset = separable(3);
        let config = TrainConfig {
            epochs: 5,
            validation_split: 0.0,
            ..TrainConfig::default()
        };

        let model = train(&dataset, &config).unwrap();

        assert!(model.evaluation.is_none());
        assert_eq!(model.history.validation_size, 0);
        assert!(model.history.last().unwrap().val_loss.is_none());
    }
}
