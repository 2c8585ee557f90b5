//! Record-then-classify loop with cooperative cancellation.

use crate::audio::AudioClip;
use crate::error::Result;
use crate::inference::{InferenceError, InferenceService, PredictionResult};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Blocking audio capture of a fixed duration.
pub trait AudioSource {
    /// Record for `duration` and return the clip.
    fn capture(&mut self, duration: Duration) -> Result<AudioClip>;
}

/// Listen loop settings.
#[derive(Clone, Debug, PartialEq)]
pub struct ListenConfig {
    /// Length of each recording
    pub capture: Duration,
    /// Stop after this many iterations
    pub max_iterations: Option<usize>,
}

/// Counts after the loop stops.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ListenSummary {
    pub iterations: usize,
    pub failures: usize,
}

/// Run capture → extract → classify → report until `cancel` fires or the
/// iteration limit is reached.
///
/// Cancellation is checked between iterations only; a capture in flight
/// always completes. Per-clip inference failures are reported and the loop
/// continues; capture failures end it.
pub fn run_listen_loop<S, F>(
    service: &InferenceService,
    source: &mut S,
    config: &ListenConfig,
    cancel: &CancellationToken,
    mut report: F,
) -> Result<ListenSummary>
where
    S: AudioSource + ?Sized,
    F: FnMut(usize, &std::result::Result<PredictionResult, InferenceError>),
{
    let mut summary = ListenSummary::default();

    while !cancel.is_cancelled() {
        if config
            .max_iterations
            .is_some_and(|max| summary.iterations >= max)
        {
            break;
        }

        let clip = source.capture(config.capture)?;
        let outcome = service.predict_clip(&clip);

        summary.iterations += 1;
        if let Err(e) = &outcome {
            summary.failures += 1;
            tracing::warn!(iteration = summary.iterations, stage = %e.stage(), error = %e, "listen iteration failed");
        }
        report(summary.iterations, &outcome);
    }

    tracing::info!(
        iterations = summary.iterations,
        failures = summary.failures,
        cancelled = cancel.is_cancelled(),
        "listen loop stopped"
    );

    Ok(summary)
}
