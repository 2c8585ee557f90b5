//! Listen subcommand - classify audio continuously until interrupted.

use crate::config::{ModelArgs, ModelSource};
use crate::predict::print_outcome;
use emovox_core::audio::AudioClip;
use emovox_core::decode::decode_file;
use emovox_core::error::AudioError;
use emovox_core::inference::InferenceService;
use emovox_core::realtime::{AudioSource, ListenConfig, ListenSummary, run_listen_loop};
use eyre::{Result, WrapErr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const DEFAULT_TOP: usize = 3;

/// Longest capture accepted for one iteration.
const MAX_SECONDS: f32 = 3600.0;

fn parse_seconds(value: &str) -> std::result::Result<f32, String> {
    let seconds: f32 = value.parse().map_err(|e| format!("{e}"))?;
    check_seconds(seconds)?;
    Ok(seconds)
}

fn check_seconds(seconds: f32) -> std::result::Result<(), String> {
    if seconds.is_finite() && seconds > 0.0 && seconds <= MAX_SECONDS {
        Ok(())
    } else {
        Err(format!("expected seconds in (0, {MAX_SECONDS}], got {seconds}"))
    }
}

/// CLI arguments for the listen loop.
#[derive(clap::Args, Debug)]
pub struct Args {
    #[command(flatten)]
    pub model_args: ModelArgs,

    /// Seconds recorded per iteration [default: the model's clip duration]
    #[arg(long, value_parser = parse_seconds)]
    pub seconds: Option<f32>,

    /// Stop after this many iterations
    #[arg(long)]
    pub iterations: Option<usize>,

    /// Number of ranked emotions to print
    #[arg(short = 'k', long, default_value_t = DEFAULT_TOP)]
    pub top: usize,

    /// Replay these files instead of recording from the microphone
    #[arg(long, num_args = 1.., value_name = "FILE")]
    pub replay: Vec<PathBuf>,
}

/// Resolved configuration for the listen loop.
#[derive(Debug)]
pub struct Config {
    pub model: ModelSource,
    pub seconds: Option<f32>,
    pub iterations: Option<usize>,
    pub top: usize,
    pub replay: Vec<PathBuf>,
}

impl TryFrom<Args> for Config {
    type Error = eyre::Error;

    fn try_from(args: Args) -> Result<Self> {
        if let Some(seconds) = args.seconds {
            check_seconds(seconds).map_err(|reason| eyre::eyre!("--seconds: {reason}"))?;
        }

        Ok(Self {
            model: args.model_args.try_into()?,
            seconds: args.seconds,
            iterations: args.iterations,
            top: args.top.max(1),
            replay: args.replay,
        })
    }
}

/// Plays back decoded files, one per capture.
#[derive(Debug)]
pub struct ReplaySource {
    files: Vec<PathBuf>,
    next: usize,
}

impl ReplaySource {
    pub fn new(files: Vec<PathBuf>) -> Self {
        Self { files, next: 0 }
    }

    fn current(&self) -> Option<&Path> {
        self.files.get(self.next).map(PathBuf::as_path)
    }
}

impl AudioSource for ReplaySource {
    fn capture(&mut self, _duration: Duration) -> emovox_core::error::Result<AudioClip> {
        let path = self
            .current()
            .ok_or_else(|| AudioError::Capture("replay exhausted".into()))?
            .to_path_buf();
        self.next += 1;

        tracing::debug!(file = ?path.display(), "replaying");
        decode_file(&path)
    }
}

pub fn execute(config: Config) -> Result<()> {
    let service = config.model.load()?;

    let seconds = config
        .seconds
        .unwrap_or(service.config().duration + service.config().offset);
    let capture = Duration::try_from_secs_f32(seconds)
        .wrap_err_with(|| format!("invalid capture length {seconds}s"))?;

    let runtime = tokio::runtime::Runtime::new()?;
    let summary = runtime.block_on(listen(service, config, capture))?;

    println!(
        "Stopped after {} iterations ({} failed)",
        summary.iterations, summary.failures
    );
    Ok(())
}

async fn listen(service: InferenceService, config: Config, capture: Duration) -> Result<ListenSummary> {
    let cancel = CancellationToken::new();

    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, stopping after current capture");
            interrupt.cancel();
        }
    });

    let listen_config = ListenConfig {
        capture,
        max_iterations: config
            .iterations
            .or_else(|| (!config.replay.is_empty()).then_some(config.replay.len())),
    };
    let top = config.top;

    let summary = tokio::task::spawn_blocking(move || -> Result<ListenSummary> {
        let mut source = open_source(config.replay)?;
        println!("Listening in {:.1}s windows, press Ctrl+C to stop", capture.as_secs_f32());

        let summary = run_listen_loop(
            &service,
            source.as_mut(),
            &listen_config,
            &cancel,
            |iteration, outcome| print_outcome(format_args!("#{iteration}"), outcome, top),
        )?;
        Ok(summary)
    })
    .await??;

    Ok(summary)
}

fn open_source(replay: Vec<PathBuf>) -> Result<Box<dyn AudioSource>> {
    if !replay.is_empty() {
        return Ok(Box::new(ReplaySource::new(replay)));
    }
    open_microphone()
}

#[cfg(feature = "mic")]
fn open_microphone() -> Result<Box<dyn AudioSource>> {
    let source = emovox_core::capture::MicrophoneSource::open_default()
        .wrap_err("failed to open microphone")?;
    Ok(Box::new(source))
}

#[cfg(not(feature = "mic"))]
fn open_microphone() -> Result<Box<dyn AudioSource>> {
    eyre::bail!("microphone capture is not available; rebuild with --features mic or pass --replay")
}
