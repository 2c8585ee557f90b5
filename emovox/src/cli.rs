//! CLI argument definitions using clap.

use clap::{Parser, Subcommand};
use eyre::Result;

#[derive(Debug, Parser)]
#[command(name = "emovox")]
#[command(about = "Speech emotion recognition from MFCC features")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Extract features from a labelled dataset into a cache
    Preprocess(crate::preprocess::Args),

    /// Train a classifier from a dataset or feature cache
    Train(crate::train::Args),

    /// Classify audio files
    Predict(crate::predict::Args),

    /// Classify microphone audio (or replayed files) until interrupted
    Listen(crate::listen::Args),

    /// Serve predictions over HTTP
    Serve(crate::serve::Args),
}

/// Execute CLI command - separated for testing.
pub fn run_cli(cli: Cli) -> Result<()> {
    tracing::debug!(?cli, "parsed arguments");

    match cli.command {
        Commands::Preprocess(args) => crate::preprocess::execute(args.try_into()?),
        Commands::Train(args) => crate::train::execute(args.try_into()?),
        Commands::Predict(args) => crate::predict::execute(args.try_into()?),
        Commands::Listen(args) => crate::listen::execute(args.try_into()?),
        Commands::Serve(args) => crate::serve::execute(args.try_into()?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use emovox_core::config::{LengthPolicy, Normalization};

    #[test]
    fn parses_preprocess_command() {
        let cli = Cli::parse_from(["emovox", "preprocess", "data"]);

        assert!(matches!(
            &cli.command,
            Commands::Preprocess(args)
            if args.dataset.to_str() == Some("data")
            && args.output.to_str() == Some("features")
            && args.extensions == ["wav"]
            && args.label_args.labels.len() == 4
            && args.extraction_args.extraction.sample_rate == 22050
        ));
    }

    #[test]
    fn parses_extraction_flags() {
        let cli = Cli::parse_from([
            "emovox",
            "preprocess",
            "data",
            "--labels",
            "ravdess",
            "--extensions",
            "wav,mp3",
            "--n-mfcc",
            "13",
            "--length-policy",
            "natural",
            "--normalization",
            "none",
        ]);

        let Commands::Preprocess(args) = cli.command else {
            panic!("expected preprocess command");
        };
        let extraction = &args.extraction_args.extraction;

        assert_eq!(args.label_args.labels.len(), 7);
        assert_eq!(args.extensions, ["wav", "mp3"]);
        assert_eq!(extraction.n_mfcc, 13);
        assert_eq!(extraction.length_policy, LengthPolicy::Natural);
        assert_eq!(extraction.normalization, Normalization::None);
    }

    #[test]
    fn parses_train_with_output() {
        let cli = Cli::parse_from(["emovox", "train", "data", "-o", "out/model.json", "--epochs", "5"]);

        assert!(matches!(
            &cli.command,
            Commands::Train(args)
            if args.dataset.as_deref().is_some_and(|p| p == "data")
            && args.output.to_str() == Some("out/model.json")
            && args.train_config.epochs == 5
        ));
    }

    #[test]
    fn parses_predict_command() {
        let cli = Cli::parse_from(["emovox", "predict", "a.wav", "b.mp3", "-m", "m.json"]);

        assert!(matches!(
            &cli.command,
            Commands::Predict(args)
            if args.files.len() == 2
            && args.model_args.model.to_str() == Some("m.json")
            && !args.json
        ));
    }

    #[test]
    fn predict_requires_files() {
        assert!(Cli::try_parse_from(["emovox", "predict"]).is_err());
    }

    #[test]
    fn parses_listen_replay() {
        let cli = Cli::parse_from(["emovox", "listen", "--replay", "a.wav", "b.wav", "--iterations", "1"]);

        assert!(matches!(
            &cli.command,
            Commands::Listen(args)
            if args.replay.len() == 2 && args.iterations == Some(1) && args.seconds.is_none()
        ));
    }

    #[test]
    fn parses_serve_defaults() {
        let cli = Cli::parse_from(["emovox", "serve"]);

        assert!(matches!(
            &cli.command,
            Commands::Serve(args)
            if args.addr.to_string() == "127.0.0.1:5000"
            && args.temp_dir.is_none()
            && args.model_args.model.to_str() == Some("model/emotion_model.json")
        ));
    }

    #[test]
    fn rejects_duplicate_labels() {
        assert!(Cli::try_parse_from(["emovox", "preprocess", "data", "--labels", "neutral,neutral"]).is_err());
    }
}
