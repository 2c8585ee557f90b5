//! On-disk feature cache for offline preprocessing.
//!
//! Two files live side by side: `features.json` (rows plus the recipe that made
//! them) and `labels.json` (label indices). Both carry the same generation id.

use crate::config::ExtractionConfig;
use crate::dataset::Dataset;
use crate::error::{DatasetError, Result};
use crate::features::FeatureVector;
use crate::labels::LabelSet;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use uuid::Uuid;

pub const FEATURES_FILE: &str = "features.json";
pub const LABELS_FILE: &str = "labels.json";

#[derive(Serialize, Deserialize)]
struct FeaturesFile {
    generation: Uuid,
    config: ExtractionConfig,
    labels: LabelSet,
    rows: Vec<FeatureVector>,
}

#[derive(Serialize, Deserialize)]
struct LabelsFile {
    generation: Uuid,
    labels: Vec<usize>,
}

/// Cached dataset features in a directory.
#[derive(Clone, Debug)]
pub struct FeatureCache {
    dir: PathBuf,
}

impl FeatureCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn features_path(&self) -> PathBuf {
        self.dir.join(FEATURES_FILE)
    }

    pub fn labels_path(&self) -> PathBuf {
        self.dir.join(LABELS_FILE)
    }

    /// Whether both cache files are present.
    pub fn exists(&self) -> bool {
        self.features_path().is_file() && self.labels_path().is_file()
    }

    /// Write `dataset`, replacing any previous cache.
    ///
    /// Both files are fully written to temporaries before either is moved into place.
    /// The two renames are not atomic together: a failure between them leaves a
    /// new features file beside the old labels file. [`FeatureCache::load`]
    /// rejects that pair by generation, and the previous cache is not recoverable,
    /// so rerun `preprocess`.
    pub fn save(&self, dataset: &Dataset, config: &ExtractionConfig) -> Result<()> {
        std::fs::create_dir_all(&self.dir).map_err(DatasetError::Io)?;

        let generation = Uuid::new_v4();
        let features = FeaturesFile {
            generation,
            config: config.clone(),
            labels: dataset.label_set().clone(),
            rows: dataset.features().to_vec(),
        };
        let labels = LabelsFile {
            generation,
            labels: dataset.labels().to_vec(),
        };

        let features_tmp = self.write_temp(&features)?;
        let labels_tmp = self.write_temp(&labels)?;

        features_tmp
            .persist(self.features_path())
            .map_err(|e| DatasetError::Io(e.error))?;
        labels_tmp
            .persist(self.labels_path())
            .map_err(|e| DatasetError::Io(e.error))?;

        tracing::info!(
            dir = ?self.dir.display(),
            rows = dataset.len(),
            %generation,
            "feature cache written"
        );

        Ok(())
    }

    fn write_temp<T: Serialize>(&self, value: &T) -> Result<NamedTempFile> {
        let mut file = NamedTempFile::new_in(&self.dir).map_err(DatasetError::Io)?;
        serde_json::to_writer(&mut file, value)?;
        file.flush().map_err(DatasetError::Io)?;
        Ok(file)
    }

    /// Read the cache back together with the recipe that produced it.
    ///
    /// # Errors
    ///
    /// Returns [`DatasetError::CacheMismatch`] when the two files come from
    /// different runs or disagree in length.
    pub fn load(&self) -> Result<(Dataset, ExtractionConfig)> {
        let features: FeaturesFile = read_json(&self.features_path())?;
        let labels: LabelsFile = read_json(&self.labels_path())?;

        if features.generation != labels.generation {
            return Err(DatasetError::CacheMismatch(format!(
                "features generation {} but labels generation {}",
                features.generation, labels.generation
            ))
            .into());
        }

        features.config.validate()?;
        if let Some(row) = features
            .rows
            .iter()
            .position(|r| r.len() != features.config.n_mfcc)
        {
            return Err(DatasetError::CacheMismatch(format!(
                "row {row} does not have {} coefficients",
                features.config.n_mfcc
            ))
            .into());
        }

        let dataset = Dataset::from_parts(features.rows, labels.labels, features.labels)?;
        Ok((dataset, features.config))
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let file = std::fs::File::open(path).map_err(DatasetError::Io)?;
    let value = serde_json::from_reader(std::io::BufReader::new(file))?;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_dataset() -> Dataset {
        let mut dataset = Dataset::new(LabelSet::four_class());
        for i in 0..6 {
            dataset.push(FeatureVector::new(vec![i as f32; 40]).unwrap(), i % 4);
        }
        dataset
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FeatureCache::new(dir.path().join("cache"));
        let config = ExtractionConfig::default();

        cache.save(&sample_dataset(), &config).unwrap();
        let (dataset, loaded_config) = cache.load().unwrap();

        assert!(cache.exists());
        assert_eq!(dataset, sample_dataset());
        assert_eq!(loaded_config, config);
    }

    #[test]
    fn rerun_overwrites_both_files() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FeatureCache::new(dir.path());
        let config = ExtractionConfig::default();

        cache.save(&sample_dataset(), &config).unwrap();
        let mut smaller = Dataset::new(LabelSet::four_class());
        smaller.push(FeatureVector::new(vec![0.5; 40]).unwrap(), 2);
        cache.save(&smaller, &config).unwrap();

        let (dataset, _) = cache.load().unwrap();
        assert_eq!(dataset, smaller);

        let leftovers = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(leftovers, 2);
    }

    #[test]
    fn mixed_generations_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let first = FeatureCache::new(dir.path().join("a"));
        let second = FeatureCache::new(dir.path().join("b"));
        let config = ExtractionConfig::default();

        first.save(&sample_dataset(), &config).unwrap();
        second.save(&sample_dataset(), &config).unwrap();
        std::fs::copy(second.labels_path(), first.labels_path()).unwrap();

        let err = first.load().unwrap_err();
        assert!(matches!(
            err,
            crate::error::Error::Dataset(DatasetError::CacheMismatch(_))
        ));
    }

    #[test]
    fn save_interrupted_between_renames_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FeatureCache::new(dir.path().join("cache"));
        let staged = FeatureCache::new(dir.path().join("staged"));
        let config = ExtractionConfig::default();

        cache.save(&sample_dataset(), &config).unwrap();
        staged.save(&sample_dataset(), &config).unwrap();
        // only the features rename landed
        std::fs::copy(staged.features_path(), cache.features_path()).unwrap();

        let err = cache.load().unwrap_err();
        assert!(matches!(
            err,
            crate::error::Error::Dataset(DatasetError::CacheMismatch(_))
        ));
    }

    #[test]
    fn missing_cache_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(FeatureCache::new(dir.path()).load().is_err());
    }
}
