//! Shared argument groups and their resolution.

use emovox_core::config::ExtractionConfig;
use emovox_core::inference::InferenceService;
use emovox_core::labels::LabelSet;
use emovox_core::persist::{DEFAULT_MODEL_PATH, LoadedModel};
use eyre::{Result, WrapErr};
use std::path::PathBuf;

/// Extraction recipe from a TOML file or from flags.
#[derive(clap::Args, Debug)]
pub struct ExtractionArgs {
    /// TOML file with extraction parameters; replaces the flags below
    #[arg(long = "config", value_name = "TOML")]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub extraction: ExtractionConfig,
}

impl TryFrom<ExtractionArgs> for ExtractionConfig {
    type Error = eyre::Error;

    fn try_from(args: ExtractionArgs) -> Result<Self> {
        let config = match args.config_file {
            Some(path) => ExtractionConfig::from_toml_file(&path)
                .wrap_err_with(|| format!("failed to load extraction config {:?}", path.display()))?,
            None => args.extraction,
        };
        config.validate()?;

        tracing::debug!(config = %config.summary(), fingerprint = %config.fingerprint(), "extraction config");
        Ok(config)
    }
}

/// Label set selection.
#[derive(clap::Args, Debug)]
pub struct LabelArgs {
    /// Label set: `four-class`, `ravdess` or a comma-separated list
    #[arg(long, default_value = "four-class")]
    pub labels: LabelSet,
}

/// Path of a trained model.
#[derive(clap::Args, Debug)]
pub struct ModelArgs {
    /// Model artifact (`.json`, or `.onnx` with a `.onnx.json` manifest)
    #[arg(short, long, default_value = DEFAULT_MODEL_PATH)]
    pub model: PathBuf,

    /// Refuse the model unless it was trained with this extraction TOML
    #[arg(long = "config", value_name = "TOML")]
    pub expected_config: Option<PathBuf>,
}

/// A model path and the extraction recipe it must have been trained with.
#[derive(Debug)]
pub struct ModelSource {
    pub path: PathBuf,
    pub expected: Option<ExtractionConfig>,
}

impl TryFrom<ModelArgs> for ModelSource {
    type Error = eyre::Error;

    fn try_from(args: ModelArgs) -> Result<Self> {
        let expected = match args.expected_config {
            Some(path) => {
                let config = ExtractionConfig::from_toml_file(&path)
                    .wrap_err_with(|| format!("failed to load extraction config {:?}", path.display()))?;
                config.validate()?;
                Some(config)
            }
            None => None,
        };

        Ok(Self {
            path: args.model,
            expected,
        })
    }
}

impl ModelSource {
    /// Load the model, checking its extraction config when one is expected.
    pub fn load(&self) -> Result<InferenceService> {
        let model = LoadedModel::load(&self.path)
            .wrap_err_with(|| format!("failed to load model {:?}", self.path.display()))?;

        if let Some(expected) = &self.expected {
            model
                .ensure_config(expected)
                .wrap_err_with(|| format!("model {:?} was trained differently", self.path.display()))?;
        }

        Ok(InferenceService::new(model)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use emovox_core::config::LengthPolicy;

    fn args(config_file: Option<PathBuf>) -> ExtractionArgs {
        ExtractionArgs {
            config_file,
            extraction: ExtractionConfig {
                n_mfcc: 20,
                ..ExtractionConfig::default()
            },
        }
    }

    #[test]
    fn flags_are_used_without_file() {
        let config = ExtractionConfig::try_from(args(None)).unwrap();
        assert_eq!(config.n_mfcc, 20);
    }

    #[test]
    fn file_replaces_flags() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("extract.toml");
        std::fs::write(&path, "length_policy = \"natural\"\n").unwrap();

        let config = ExtractionConfig::try_from(args(Some(path))).unwrap();

        assert_eq!(config.n_mfcc, 40);
        assert_eq!(config.length_policy, LengthPolicy::Natural);
    }

    #[test]
    fn model_source_reads_expected_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("expected.toml");
        std::fs::write(&path, "sample_rate = 16000\n").unwrap();

        let source = ModelSource::try_from(ModelArgs {
            model: PathBuf::from("model.json"),
            expected_config: Some(path),
        })
        .unwrap();

        assert_eq!(source.expected.as_ref().map(|config| config.sample_rate), Some(16000));
        assert!(source.load().is_err());
    }

    #[test]
    fn missing_file_is_an_error() {
        let result = ExtractionConfig::try_from(args(Some(PathBuf::from("/nonexistent.toml"))));
        assert!(result.is_err());
    }
}
