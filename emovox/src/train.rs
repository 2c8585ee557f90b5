//! Train subcommand - fit a classifier and save the model artifact.

use crate::config::{ExtractionArgs, LabelArgs};
use emovox_core::cache::FeatureCache;
use emovox_core::config::ExtractionConfig;
use emovox_core::features::FeatureExtractor;
use emovox_core::labels::LabelSet;
use emovox_core::persist::{DEFAULT_MODEL_PATH, ModelArtifact};
use emovox_core::train::{Evaluation, TrainConfig, TrainedModel, train};
use eyre::{Result, WrapErr};
use std::path::PathBuf;
use std::time::Instant;

/// CLI arguments for training.
#[derive(clap::Args, Debug)]
pub struct Args {
    /// Dataset root with one subdirectory per label
    #[arg(required_unless_present = "cache", conflicts_with = "cache")]
    pub dataset: Option<PathBuf>,

    /// Train from a feature cache written by `preprocess`
    #[arg(long)]
    pub cache: Option<PathBuf>,

    /// Output model path
    #[arg(short, long, default_value = DEFAULT_MODEL_PATH)]
    pub output: PathBuf,

    /// Audio file extensions to include
    #[arg(long, value_delimiter = ',', default_value = "wav")]
    pub extensions: Vec<String>,

    #[command(flatten)]
    pub label_args: LabelArgs,

    #[command(flatten)]
    pub extraction_args: ExtractionArgs,

    #[command(flatten)]
    pub train_config: TrainConfig,
}

/// Where training examples come from.
#[derive(Debug)]
pub enum Source {
    Dataset {
        root: PathBuf,
        labels: LabelSet,
        extraction: ExtractionConfig,
        extensions: Vec<String>,
    },
    Cache(PathBuf),
}

/// Resolved configuration for training.
#[derive(Debug)]
pub struct Config {
    pub source: Source,
    pub output: PathBuf,
    pub train_config: TrainConfig,
}

impl TryFrom<Args> for Config {
    type Error = eyre::Error;

    fn try_from(args: Args) -> Result<Self> {
        let source = match (args.dataset, args.cache) {
            (_, Some(cache)) => Source::Cache(cache),
            (Some(root), None) => Source::Dataset {
                root,
                labels: args.label_args.labels,
                extraction: args.extraction_args.try_into()?,
                extensions: args.extensions,
            },
            (None, None) => eyre::bail!("either a dataset directory or --cache is required"),
        };

        Ok(Self {
            source,
            output: args.output,
            train_config: args.train_config,
        })
    }
}

pub fn execute(config: Config) -> Result<()> {
    let (dataset, extraction) = match config.source {
        Source::Dataset {
            root,
            labels,
            extraction,
            extensions,
        } => {
            let extractor = FeatureExtractor::new(extraction.clone())?;
            let report = crate::preprocess::load_dataset(&extractor, &root, &labels, &extensions)?;
            (report.dataset, extraction)
        }
        Source::Cache(dir) => {
            let (dataset, extraction) = FeatureCache::new(&dir)
                .load()
                .wrap_err_with(|| format!("failed to read feature cache {:?}", dir.display()))?;
            tracing::info!(
                cache = ?dir.display(),
                examples = dataset.len(),
                config = %extraction.summary(),
                "using extraction config from cache"
            );
            (dataset, extraction)
        }
    };

    let start = Instant::now();
    let model = train(&dataset, &config.train_config).wrap_err("training failed")?;
    tracing::info!(elapsed_sec = start.elapsed().as_secs_f32(), "trained");

    print_summary(&model, dataset.label_set());

    let TrainedModel {
        classifier,
        history,
        ..
    } = model;
    ModelArtifact::new(extraction, dataset.label_set().clone(), classifier, history)
        .save(&config.output)
        .wrap_err_with(|| format!("failed to save model {:?}", config.output.display()))?;

    println!("Saved model to {}", config.output.display());
    Ok(())
}

fn print_summary(model: &TrainedModel, labels: &LabelSet) {
    let history = &model.history;
    println!(
        "Trained on {} examples, {} held out, {} epochs",
        history.train_size,
        history.validation_size,
        history.epochs.len()
    );

    if let Some(last) = history.last() {
        println!(
            "  train loss {:.4}  accuracy {:.1}%",
            last.loss,
            last.accuracy * 100.0
        );
    }

    if let Some(eval) = &model.evaluation {
        println!(
            "  held-out loss {:.4}  accuracy {:.1}%",
            eval.loss,
            eval.accuracy * 100.0
        );
        print_confusion(eval, labels);
    }
}

fn print_confusion(eval: &Evaluation, labels: &LabelSet) {
    println!("Confusion matrix (rows: true, columns: predicted)");

    let header: String = labels.iter().map(|(_, name)| format!("{name:>9}")).collect();
    println!("{:>10}{header}", "");

    for (index, row) in eval.confusion.iter().enumerate() {
        let cells: String = row.iter().map(|count| format!("{count:>9}")).collect();
        println!("{:>10}{cells}", labels.name(index).unwrap_or_default());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{Cli, Commands};
    use clap::Parser;

    #[test]
    fn cache_source_wins() {
        let cli = Cli::parse_from(["emovox", "train", "--cache", "features", "--epochs", "10"]);
        let Commands::Train(args) = cli.command else {
            panic!("expected train command");
        };

        let config = Config::try_from(args).unwrap();

        assert!(matches!(config.source, Source::Cache(ref dir) if dir.to_str() == Some("features")));
        assert_eq!(config.train_config.epochs, 10);
        assert_eq!(config.output.to_str(), Some(DEFAULT_MODEL_PATH));
    }

    #[test]
    fn dataset_and_cache_conflict() {
        let result = Cli::try_parse_from(["emovox", "train", "data", "--cache", "features"]);
        assert!(result.is_err());
    }

    #[test]
    fn requires_a_source() {
        assert!(Cli::try_parse_from(["emovox", "train"]).is_err());
    }
}
