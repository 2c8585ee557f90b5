//! Default input device capture.

use crate::audio::AudioClip;
use crate::error::{AudioError, Result};
use crate::realtime::AudioSource;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Records from the system default input device.
///
/// The stream only runs inside [`AudioSource::capture`].
pub struct MicrophoneSource {
    device: cpal::Device,
    config: cpal::SupportedStreamConfig,
}

impl MicrophoneSource {
    pub fn open_default() -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| AudioError::Capture("no default input device found".into()))?;

        let config = device
            .default_input_config()
            .map_err(|e| AudioError::Capture(format!("failed to get default input config: {e}")))?;

        if config.sample_format() != cpal::SampleFormat::F32 {
            return Err(AudioError::Capture(format!(
                "unsupported input sample format {:?}",
                config.sample_format()
            ))
            .into());
        }

        tracing::info!(
            device = %device.name().unwrap_or_default(),
            sample_rate = config.sample_rate().0,
            channels = config.channels(),
            "opened input device"
        );

        Ok(Self { device, config })
    }
}

impl AudioSource for MicrophoneSource {
    fn capture(&mut self, duration: Duration) -> Result<AudioClip> {
        let stream_config: cpal::StreamConfig = self.config.clone().into();
        let channels = stream_config.channels;
        let sample_rate = stream_config.sample_rate.0;

        let buffer = Arc::new(Mutex::new(Vec::<f32>::new()));
        let sink = Arc::clone(&buffer);

        let stream = self
            .device
            .build_input_stream(
                &stream_config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    if let Ok(mut samples) = sink.lock() {
                        samples.extend_from_slice(data);
                    }
                },
                |err| tracing::error!(error = %err, "input stream error"),
                None,
            )
            .map_err(|e| AudioError::Capture(format!("failed to open input stream: {e}")))?;

        stream
            .play()
            .map_err(|e| AudioError::Capture(format!("failed to start input stream: {e}")))?;
        std::thread::sleep(duration);
        drop(stream);

        let samples = buffer
            .lock()
            .map(|mut samples| std::mem::take(&mut *samples))
            .map_err(|_| AudioError::Capture("capture buffer poisoned".into()))?;

        tracing::debug!(samples = samples.len(), sample_rate, channels, "captured audio");

        AudioClip::from_interleaved(samples, sample_rate, channels)
    }
}
