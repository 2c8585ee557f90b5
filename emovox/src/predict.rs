//! Predict subcommand - classify audio files with a trained model.

use crate::config::{ModelArgs, ModelSource};
use emovox_core::inference::{InferenceError, InferenceService, PredictionResult};
use emovox_core::response::PredictionResponse;
use eyre::Result;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};

const DEFAULT_TOP: usize = 3;

/// CLI arguments for file prediction.
#[derive(clap::Args, Debug)]
pub struct Args {
    /// Audio files to classify
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    #[command(flatten)]
    pub model_args: ModelArgs,

    /// Number of ranked emotions to print
    #[arg(short = 'k', long, default_value_t = DEFAULT_TOP)]
    pub top: usize,

    /// Print one JSON response per line
    #[arg(long)]
    pub json: bool,
}

/// Resolved configuration for prediction.
#[derive(Debug)]
pub struct Config {
    pub files: Vec<PathBuf>,
    pub model: ModelSource,
    pub top: usize,
    pub json: bool,
}

impl TryFrom<Args> for Config {
    type Error = eyre::Error;

    fn try_from(args: Args) -> Result<Self> {
        Ok(Self {
            files: args.files,
            model: args.model_args.try_into()?,
            top: args.top.max(1),
            json: args.json,
        })
    }
}

/// One JSON line of `--json` output.
#[derive(Debug, Serialize)]
struct FileReport<'a> {
    file: &'a Path,
    #[serde(flatten)]
    response: PredictionResponse,
}

pub fn execute(config: Config) -> Result<()> {
    let service = config.model.load()?;

    tracing::info!(
        model = ?config.model.path.display(),
        backend = service.model().classifier.backend(),
        labels = %service.labels(),
        "model loaded"
    );

    let mut failed = 0;
    for file in &config.files {
        let outcome = service.predict_file(file);
        if outcome.is_err() {
            failed += 1;
        }

        if config.json {
            let report = FileReport {
                file,
                response: PredictionResponse::from(&outcome),
            };
            println!("{}", serde_json::to_string(&report)?);
        } else {
            print_outcome(file.display(), &outcome, config.top);
        }
    }

    if failed > 0 {
        eyre::bail!("{failed} of {} files failed", config.files.len());
    }
    Ok(())
}

/// Human-readable rendering of one prediction.
pub(crate) fn print_outcome(
    name: impl fmt::Display,
    outcome: &Result<PredictionResult, InferenceError>,
    top: usize,
) {
    match outcome {
        Ok(result) => {
            println!(
                "{name}: {} ({:.1}%)",
                result.emotion(),
                result.confidence()
            );
            for (label, probability) in result.top(top) {
                println!("  {label:<10} {:>5.1}%", probability * 100.0);
            }
        }
        Err(e) => {
            tracing::warn!(%name, stage = %e.stage(), error = %e, "prediction failed");
            println!("{name}: failed [{}] {e}", e.kind());
        }
    }
}
