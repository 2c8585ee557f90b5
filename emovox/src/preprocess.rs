//! Preprocess subcommand - extract dataset features into a cache.

use crate::config::{ExtractionArgs, LabelArgs};
use emovox_core::cache::FeatureCache;
use emovox_core::config::ExtractionConfig;
use emovox_core::dataset::{DatasetLoader, LoadReport};
use emovox_core::features::FeatureExtractor;
use emovox_core::labels::LabelSet;
use eyre::{Result, WrapErr};
use std::path::{Path, PathBuf};
use std::time::Instant;

/// CLI arguments for feature preprocessing.
#[derive(clap::Args, Debug)]
pub struct Args {
    /// Dataset root with one subdirectory per label
    pub dataset: PathBuf,

    /// Cache directory for features.json and labels.json
    #[arg(short, long, default_value = "features")]
    pub output: PathBuf,

    /// Audio file extensions to include
    #[arg(long, value_delimiter = ',', default_value = "wav")]
    pub extensions: Vec<String>,

    #[command(flatten)]
    pub label_args: LabelArgs,

    #[command(flatten)]
    pub extraction_args: ExtractionArgs,
}

/// Resolved configuration for preprocessing.
#[derive(Debug)]
pub struct Config {
    pub dataset: PathBuf,
    pub output: PathBuf,
    pub extensions: Vec<String>,
    pub labels: LabelSet,
    pub extraction: ExtractionConfig,
}

impl TryFrom<Args> for Config {
    type Error = eyre::Error;

    fn try_from(args: Args) -> Result<Self> {
        Ok(Self {
            dataset: args.dataset,
            output: args.output,
            extensions: args.extensions,
            labels: args.label_args.labels,
            extraction: args.extraction_args.try_into()?,
        })
    }
}

pub fn execute(config: Config) -> Result<()> {
    let extractor = FeatureExtractor::new(config.extraction.clone())?;
    let report = load_dataset(&extractor, &config.dataset, &config.labels, &config.extensions)?;

    FeatureCache::new(&config.output)
        .save(&report.dataset, &config.extraction)
        .wrap_err_with(|| format!("failed to write feature cache {:?}", config.output.display()))?;

    println!(
        "Cached {} examples ({} skipped) to {}",
        report.dataset.len(),
        report.skipped.len(),
        config.output.display()
    );

    Ok(())
}

/// Walk `root` and extract every eligible file, printing a per-label summary.
pub(crate) fn load_dataset(
    extractor: &FeatureExtractor,
    root: &Path,
    labels: &LabelSet,
    extensions: &[String],
) -> Result<LoadReport> {
    tracing::info!(root = ?root.display(), %labels, "loading dataset");
    let start = Instant::now();

    let report = DatasetLoader::new(extractor)
        .with_extensions(extensions)
        .load(root, labels)
        .wrap_err_with(|| format!("failed to load dataset {:?}", root.display()))?;

    tracing::info!(
        examples = report.dataset.len(),
        skipped = report.skipped.len(),
        elapsed_sec = start.elapsed().as_secs_f32(),
        "dataset ready"
    );

    for (index, count) in report.dataset.label_counts().into_iter().enumerate() {
        println!("  {:<10} {count}", labels.name(index).unwrap_or_default());
    }
    for skipped in &report.skipped {
        println!("  skipped {} [{}]", skipped.path.display(), skipped.kind);
    }

    Ok(report)
}
