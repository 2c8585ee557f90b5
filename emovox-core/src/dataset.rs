//! Labeled feature datasets and the directory loader that builds them.
//!
//! Layout on disk: one subdirectory per label name under a root directory,
//! each holding that label's audio files.

use crate::error::{DatasetError, Error, Result};
use crate::features::{FeatureExtractor, FeatureVector};
use crate::labels::LabelSet;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use std::path::{Path, PathBuf};

/// Parallel sequences of feature vectors and label indices.
#[derive(Clone, Debug, PartialEq)]
pub struct Dataset {
    features: Vec<FeatureVector>,
    labels: Vec<usize>,
    label_set: LabelSet,
}

impl Dataset {
    pub fn new(label_set: LabelSet) -> Self {
        Self {
            features: Vec::new(),
            labels: Vec::new(),
            label_set,
        }
    }

    /// Build from parallel vectors.
    ///
    /// # Errors
    ///
    /// Returns [`DatasetError::CacheMismatch`] when lengths differ, a label index
    /// is out of range, or vectors have different widths.
    pub fn from_parts(
        features: Vec<FeatureVector>,
        labels: Vec<usize>,
        label_set: LabelSet,
    ) -> Result<Self> {
        if features.len() != labels.len() {
            return Err(DatasetError::CacheMismatch(format!(
                "{} feature rows but {} labels",
                features.len(),
                labels.len()
            ))
            .into());
        }
        if let Some(&bad) = labels.iter().find(|&&l| l >= label_set.len()) {
            return Err(DatasetError::CacheMismatch(format!(
                "label index {bad} outside {} classes",
                label_set.len()
            ))
            .into());
        }
        if let Some(first) = features.first() {
            let width = first.len();
            if let Some(row) = features.iter().position(|f| f.len() != width) {
                return Err(DatasetError::CacheMismatch(format!(
                    "row {row} has {} features, expected {width}",
                    features[row].len()
                ))
                .into());
            }
        }

        Ok(Self {
            features,
            labels,
            label_set,
        })
    }

    pub fn push(&mut self, features: FeatureVector, label: usize) {
        self.features.push(features);
        self.labels.push(label);
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn features(&self) -> &[FeatureVector] {
        &self.features
    }

    pub fn labels(&self) -> &[usize] {
        &self.labels
    }

    pub fn label_set(&self) -> &LabelSet {
        &self.label_set
    }

    /// Width of each feature vector, if any rows exist.
    pub fn num_features(&self) -> Option<usize> {
        self.features.first().map(FeatureVector::len)
    }

    /// Example count per label index.
    pub fn label_counts(&self) -> Vec<usize> {
        let mut counts = vec![0; self.label_set.len()];
        for &label in &self.labels {
            counts[label] += 1;
        }
        counts
    }

    /// Select rows by index into a new dataset.
    pub fn subset(&self, indices: &[usize]) -> Dataset {
        Dataset {
            features: indices.iter().map(|&i| self.features[i].clone()).collect(),
            labels: indices.iter().map(|&i| self.labels[i]).collect(),
            label_set: self.label_set.clone(),
        }
    }

    /// Shuffle with `seed` and split into `(train, held_out)`.
    ///
    /// `held_out_ratio` is clamped to `[0, 1)`. The held-out part is empty when
    /// the dataset has fewer than two rows.
    pub fn split(&self, held_out_ratio: f32, seed: u64) -> (Dataset, Dataset) {
        let mut indices: Vec<usize> = (0..self.len()).collect();
        indices.shuffle(&mut StdRng::seed_from_u64(seed));

        let ratio = held_out_ratio.clamp(0.0, 0.99);
        let mut held_out = (self.len() as f32 * ratio).round() as usize;
        if self.len() < 2 {
            held_out = 0;
        } else {
            held_out = held_out.min(self.len() - 1);
        }

        let (eval, train) = indices.split_at(held_out);
        (self.subset(train), self.subset(eval))
    }
}

/// A file left out of a dataset load.
#[derive(Clone, Debug)]
pub struct SkippedFile {
    pub path: PathBuf,
    /// Stable error tag, see [`Error::kind`]
    pub kind: &'static str,
    pub message: String,
}

/// Result of a successful load, including files that were skipped.
#[derive(Debug)]
pub struct LoadReport {
    pub dataset: Dataset,
    pub skipped: Vec<SkippedFile>,
}

/// Walks a dataset root and extracts features for every eligible file.
#[derive(Debug)]
pub struct DatasetLoader<'a> {
    extractor: &'a FeatureExtractor,
    extensions: Vec<String>,
}

impl<'a> DatasetLoader<'a> {
    /// Loader accepting `.wav` files.
    pub fn new(extractor: &'a FeatureExtractor) -> Self {
        Self {
            extractor,
            extensions: vec!["wav".to_string()],
        }
    }

    /// Replace the accepted file extensions (case-insensitive, without dot).
    pub fn with_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.extensions = extensions
            .into_iter()
            .map(|e| e.as_ref().trim_start_matches('.').to_lowercase())
            .collect();
        self
    }

    fn is_eligible(&self, path: &Path) -> bool {
        path.is_file()
            && path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| self.extensions.contains(&e.to_lowercase()))
    }

    /// Load `root/<label>/*` for every label in `labels`.
    ///
    /// Files are visited in sorted order within each label directory. A file
    /// that fails decoding or extraction is skipped and reported, as is a label
    /// directory (or entry) that cannot be read; neither aborts the load. A
    /// label directory that does not exist is only logged.
    ///
    /// # Errors
    ///
    /// - [`DatasetError::MissingRoot`] if `root` is not a directory
    /// - [`DatasetError::Empty`] if no file produced a feature vector
    pub fn load(&self, root: impl AsRef<Path>, labels: &LabelSet) -> Result<LoadReport> {
        let root = root.as_ref();
        if !root.is_dir() {
            return Err(DatasetError::MissingRoot(root.to_path_buf()).into());
        }

        let mut dataset = Dataset::new(labels.clone());
        let mut skipped = Vec::new();

        for (index, name) in labels.iter() {
            let dir = root.join(name);
            let entries = match std::fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    tracing::warn!(label = name, dir = ?dir.display(), "label directory missing");
                    continue;
                }
                Err(e) => {
                    let e = Error::from(DatasetError::Io(e));
                    tracing::warn!(label = name, dir = ?dir.display(), error = %e, "unreadable label directory");
                    skipped.push(skip(dir, &e));
                    continue;
                }
            };

            let mut files = Vec::new();
            for entry in entries {
                match entry {
                    Ok(entry) => files.push(entry.path()),
                    Err(e) => {
                        let e = Error::from(DatasetError::Io(e));
                        tracing::warn!(dir = ?dir.display(), error = %e, "unreadable directory entry");
                        skipped.push(skip(dir.clone(), &e));
                    }
                }
            }
            files.retain(|path| self.is_eligible(path));
            files.sort();

            let before = dataset.len();
            for path in files {
                match self.extractor.extract_file(&path) {
                    Ok(features) => dataset.push(features, index),
                    Err(e) => {
                        tracing::warn!(path = ?path.display(), kind = e.kind(), error = %e, "skipping file");
                        skipped.push(skip(path, &e));
                    }
                }
            }

            tracing::info!(label = name, files = dataset.len() - before, "loaded label");
        }

        if dataset.is_empty() {
            return Err(DatasetError::Empty {
                root: Some(root.to_path_buf()),
                skipped: skipped.len(),
            }
            .into());
        }

        tracing::info!(
            examples = dataset.len(),
            skipped = skipped.len(),
            "dataset loaded"
        );

        Ok(LoadReport { dataset, skipped })
    }
}

fn skip(path: PathBuf, error: &Error) -> SkippedFile {
    SkippedFile {
        path,
        kind: error.kind(),
        message: error.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExtractionConfig;
    use hound::{SampleFormat, WavSpec, WavWriter};
    use std::f32::consts::PI;

    fn write_tone(path: &Path, freq: f32, secs: f32) {
        let spec = WavSpec {
            channels: 1,
            sample_rate: 16000,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(path, spec).unwrap();
        for i in 0..(secs * 16000.0) as usize {
            let s = 0.5 * (2.0 * PI * freq * i as f32 / 16000.0).sin();
            writer.write_sample((s * 32767.0) as i16).unwrap();
        }
        writer.finalize().unwrap();
    }

    fn extractor() -> FeatureExtractor {
        FeatureExtractor::new(ExtractionConfig {
            sample_rate: 16000,
            duration: 1.0,
            offset: 0.0,
            ..ExtractionConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn skips_bad_files_without_aborting() {
        let root = tempfile::tempdir().unwrap();
        let happy = root.path().join("happy");
        let sad = root.path().join("sad");
        std::fs::create_dir_all(&happy).unwrap();
        std::fs::create_dir_all(&sad).unwrap();

        write_tone(&happy.join("a.wav"), 440.0, 0.5);
        write_tone(&happy.join("b.WAV"), 660.0, 0.5);
        std::fs::write(happy.join("broken.wav"), b"not audio").unwrap();
        std::fs::write(happy.join("notes.txt"), b"ignored").unwrap();
        write_tone(&sad.join("c.wav"), 220.0, 0.5);
        write_tone(&sad.join("blip.wav"), 220.0, 0.01);

        let labels: LabelSet = "happy,sad".parse().unwrap();
        let extractor = extractor();
        let report = DatasetLoader::new(&extractor)
            .load(root.path(), &labels)
            .unwrap();

        assert_eq!(report.dataset.len(), 3);
        assert_eq!(report.dataset.labels(), [0, 0, 1]);
        assert_eq!(report.dataset.label_counts(), vec![2, 1]);

        let mut kinds: Vec<_> = report.skipped.iter().map(|s| s.kind).collect();
        kinds.sort();
        assert_eq!(kinds, ["decode", "too_short"]);
    }

    #[test]
    fn unreadable_label_dir_is_skipped() {
        let root = tempfile::tempdir().unwrap();
        let happy = root.path().join("happy");
        std::fs::create_dir_all(&happy).unwrap();
        write_tone(&happy.join("a.wav"), 440.0, 0.5);
        // a plain file where the label directory should be
        std::fs::write(root.path().join("sad"), b"not a directory").unwrap();

        let labels: LabelSet = "happy,sad,angry".parse().unwrap();
        let extractor = extractor();
        let report = DatasetLoader::new(&extractor)
            .load(root.path(), &labels)
            .unwrap();

        assert_eq!(report.dataset.len(), 1);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].path, root.path().join("sad"));
        assert_eq!(report.skipped[0].kind, "dataset");
    }

    #[test]
    fn empty_label_dirs_are_fatal() {
        let root = tempfile::tempdir().unwrap();
        for label in crate::labels::FOUR_CLASS {
            std::fs::create_dir_all(root.path().join(label)).unwrap();
        }

        let extractor = extractor();
        let err = DatasetLoader::new(&extractor)
            .load(root.path(), &LabelSet::four_class())
            .unwrap_err();

        assert_eq!(err.kind(), "empty_dataset");
    }

    #[test]
    fn missing_root_is_reported() {
        let extractor = extractor();
        let err = DatasetLoader::new(&extractor)
            .load("/nonexistent/dataset", &LabelSet::four_class())
            .unwrap_err();

        assert!(matches!(err, Error::Dataset(DatasetError::MissingRoot(_))));
    }

    #[test]
    fn split_is_seeded_and_disjoint() {
        let labels = LabelSet::four_class();
        let mut dataset = Dataset::new(labels);
        for i in 0..10 {
            dataset.push(FeatureVector::new(vec![i as f32]).unwrap(), i % 4);
        }

        let (train_a, eval_a) = dataset.split(0.2, 7);
        let (train_b, eval_b) = dataset.split(0.2, 7);

        assert_eq!(train_a, train_b);
        assert_eq!(eval_a, eval_b);
        assert_eq!(train_a.len(), 8);
        assert_eq!(eval_a.len(), 2);

        let mut all: Vec<f32> = train_a
            .features()
            .iter()
            .chain(eval_a.features())
            .map(|f| f.as_slice()[0])
            .collect();
        all.sort_by(f32::total_cmp);
        assert_eq!(all, (0..10).map(|i| i as f32).collect::<Vec<_>>());
    }

    #[test]
    fn from_parts_checks_lengths() {
        let labels = LabelSet::four_class();
        let rows = vec![FeatureVector::new(vec![1.0]).unwrap()];

        assert!(Dataset::from_parts(rows.clone(), vec![0, 1], labels.clone()).is_err());
        assert!(Dataset::from_parts(rows.clone(), vec![9], labels.clone()).is_err());
        assert!(Dataset::from_parts(rows, vec![2], labels).is_ok());
    }
}
