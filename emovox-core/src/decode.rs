//! Audio file decoding with an ordered fallback ladder.
//!
//! Each [`DecodeStrategy`] either yields a clip or a [`DecodeFailure`]; the ladder
//! stops at the first success and reports every failure otherwise.

use crate::audio::AudioClip;
use crate::error::{AudioError, DecodeFailure, Result};
use hound::{SampleFormat, WavReader};
use std::fs::File;
use std::path::Path;
use std::sync::OnceLock;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CODEC_TYPE_NULL, CodecRegistry, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia_adapter_libopus::OpusDecoder;

/// A way of turning a file into samples.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecodeStrategy {
    /// Direct RIFF/WAVE decoding
    Wav,
    /// Container probe hinted by the file extension
    ProbeHinted,
    /// Container probe hinted by the sniffed content type
    ProbeSniffed,
}

impl DecodeStrategy {
    /// Strategies in the order they are tried.
    pub const LADDER: [DecodeStrategy; 3] = [
        DecodeStrategy::Wav,
        DecodeStrategy::ProbeHinted,
        DecodeStrategy::ProbeSniffed,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            DecodeStrategy::Wav => "wav",
            DecodeStrategy::ProbeHinted => "probe-hinted",
            DecodeStrategy::ProbeSniffed => "probe-sniffed",
        }
    }

    /// Run this strategy once.
    pub fn attempt(&self, path: &Path) -> std::result::Result<AudioClip, DecodeFailure> {
        let result = match self {
            DecodeStrategy::Wav => decode_wav(path),
            DecodeStrategy::ProbeHinted => {
                let ext = path.extension().and_then(|e| e.to_str());
                decode_probed(path, ext)
            }
            DecodeStrategy::ProbeSniffed => match infer::get_from_path(path) {
                Ok(kind) => decode_probed(path, kind.map(|k| k.extension())),
                Err(e) => Err(e.to_string()),
            },
        };

        result.and_then(non_empty).map_err(|reason| DecodeFailure {
            strategy: self.name(),
            reason,
        })
    }
}

/// Decode `path` through the full ladder.
///
/// # Errors
///
/// Returns [`AudioError::Decode`] listing every failed attempt.
pub fn decode_file(path: impl AsRef<Path>) -> Result<AudioClip> {
    let path = path.as_ref();
    let mut attempts = Vec::new();

    for strategy in DecodeStrategy::LADDER {
        match strategy.attempt(path) {
            Ok(clip) => {
                tracing::debug!(
                    path = ?path.display(),
                    strategy = strategy.name(),
                    sample_rate = clip.sample_rate(),
                    duration_sec = clip.duration_secs(),
                    "decoded audio"
                );
                return Ok(clip);
            }
            Err(failure) => {
                tracing::debug!(path = ?path.display(), %failure, "decode attempt failed");
                attempts.push(failure);
            }
        }
    }

    Err(AudioError::Decode {
        path: path.to_path_buf(),
        attempts,
    }
    .into())
}

fn non_empty(clip: AudioClip) -> std::result::Result<AudioClip, String> {
    if clip.is_empty() {
        Err("no audio data".into())
    } else {
        Ok(clip)
    }
}

fn decode_wav(path: &Path) -> std::result::Result<AudioClip, String> {
    let mut reader = WavReader::open(path).map_err(|e| e.to_string())?;
    let spec = reader.spec();

    let samples: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<hound::Result<_>>()
            .map_err(|e| e.to_string())?,
        SampleFormat::Int => {
            let scale = (1_i64 << (spec.bits_per_sample.max(1) - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|s| s as f32 / scale))
                .collect::<hound::Result<_>>()
                .map_err(|e| e.to_string())?
        }
    };

    AudioClip::from_interleaved(samples, spec.sample_rate, spec.channels).map_err(|e| e.to_string())
}

/// Symphonia's enabled codecs plus Opus, which browsers record webm in.
fn codec_registry() -> &'static CodecRegistry {
    static REGISTRY: OnceLock<CodecRegistry> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let mut registry = CodecRegistry::new();
        symphonia::default::register_enabled_codecs(&mut registry);
        registry.register_all::<OpusDecoder>();
        registry
    })
}

fn decode_probed(path: &Path, extension: Option<&str>) -> std::result::Result<AudioClip, String> {
    let file = File::open(path).map_err(|e| e.to_string())?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = extension {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| format!("probe failed: {e}"))?;

    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or("no audio track")?;

    let track_id = track.id;
    let mut sample_rate = track.codec_params.sample_rate;

    let mut decoder = codec_registry()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| format!("unsupported codec: {e}"))?;

    let mut samples = Vec::new();
    let mut channels = 0_u16;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(format!("read failed: {e}")),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            // Corrupt packets are skipped, the rest of the stream is still usable.
            Err(SymphoniaError::DecodeError(e)) => {
                tracing::trace!(error = e, "skipping corrupt packet");
                continue;
            }
            Err(e) => return Err(format!("decode failed: {e}")),
        };

        let spec = *decoded.spec();
        sample_rate.get_or_insert(spec.rate);
        channels = spec.channels.count() as u16;

        let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        buffer.copy_interleaved_ref(decoded);
        samples.extend_from_slice(buffer.samples());
    }

    let sample_rate = sample_rate.ok_or("unknown sample rate")?;
    if channels == 0 {
        return Err("no audio data".into());
    }

    AudioClip::from_interleaved(samples, sample_rate, channels).map_err(|e| e.to_string())
}

/// Container format chosen for an uploaded clip.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AudioFormat {
    Wav,
    Mp3,
    Mp4,
    Webm,
}

impl AudioFormat {
    /// Pick a format from upload metadata.
    ///
    /// The content type is consulted first; a recognized filename extension
    /// overrides it. Unknown uploads default to WAV.
    pub fn from_upload(filename: Option<&str>, content_type: Option<&str>) -> Self {
        let mut format = AudioFormat::Wav;

        if let Some(content_type) = content_type {
            let content_type = content_type.to_lowercase();
            if content_type.contains("webm") {
                format = AudioFormat::Webm;
            } else if content_type.contains("mp4") || content_type.contains("mp4a") {
                format = AudioFormat::Mp4;
            } else if content_type.contains("mpeg") || content_type.contains("mp3") {
                format = AudioFormat::Mp3;
            } else if content_type.contains("wav") {
                format = AudioFormat::Wav;
            }
        }

        if let Some(name) = filename {
            let name = name.to_lowercase();
            if name.ends_with(".webm") {
                format = AudioFormat::Webm;
            } else if name.ends_with(".mp4") {
                format = AudioFormat::Mp4;
            } else if name.ends_with(".mp3") {
                format = AudioFormat::Mp3;
            } else if name.ends_with(".wav") {
                format = AudioFormat::Wav;
            }
        }

        format
    }

    /// File suffix including the dot.
    pub fn suffix(&self) -> &'static str {
        match self {
            AudioFormat::Wav => ".wav",
            AudioFormat::Mp3 => ".mp3",
            AudioFormat::Mp4 => ".mp4",
            AudioFormat::Webm => ".webm",
        }
    }
}

/// In-memory WebM/Opus recordings shaped like a browser `MediaRecorder` upload.
#[cfg(test)]
pub(crate) mod webm_fixture {
    /// Opus "silence" frame: CELT fullband, 20 ms, mono.
    const SILENT_FRAME: [u8; 3] = [0xF8, 0xFF, 0xFE];

    fn element(id: &[u8], body: &[u8]) -> Vec<u8> {
        let mut out = id.to_vec();
        out.push(0x01);
        out.extend_from_slice(&(body.len() as u64).to_be_bytes()[1..]);
        out.extend_from_slice(body);
        out
    }

    fn uint(id: &[u8], value: u64) -> Vec<u8> {
        element(id, &value.to_be_bytes())
    }

    fn concat(parts: &[Vec<u8>]) -> Vec<u8> {
        parts.concat()
    }

    /// A mono 48 kHz WebM file holding `frames` 20 ms Opus frames.
    pub(crate) fn silent_opus(frames: usize) -> Vec<u8> {
        let header = element(
            &[0x1A, 0x45, 0xDF, 0xA3],
            &concat(&[
                uint(&[0x42, 0x86], 1),
                uint(&[0x42, 0xF7], 1),
                uint(&[0x42, 0xF2], 4),
                uint(&[0x42, 0xF3], 8),
                element(&[0x42, 0x82], b"webm"),
                uint(&[0x42, 0x87], 4),
                uint(&[0x42, 0x85], 2),
            ]),
        );

        let info = element(
            &[0x15, 0x49, 0xA9, 0x66],
            &concat(&[
                uint(&[0x2A, 0xD7, 0xB1], 1_000_000),
                element(&[0x4D, 0x80], b"emovox"),
                element(&[0x57, 0x41], b"emovox"),
            ]),
        );

        let mut opus_head = b"OpusHead".to_vec();
        opus_head.extend_from_slice(&[1, 1]);
        opus_head.extend_from_slice(&0_u16.to_le_bytes());
        opus_head.extend_from_slice(&48_000_u32.to_le_bytes());
        opus_head.extend_from_slice(&0_i16.to_le_bytes());
        opus_head.push(0);

        let audio = element(
            &[0xE1],
            &concat(&[element(&[0xB5], &48_000_f64.to_be_bytes()), uint(&[0x9F], 1)]),
        );
        let track = element(
            &[0xAE],
            &concat(&[
                uint(&[0xD7], 1),
                uint(&[0x73, 0xC5], 1),
                uint(&[0x83], 2),
                element(&[0x86], b"A_OPUS"),
                element(&[0x63, 0xA2], &opus_head),
                audio,
            ]),
        );
        let tracks = element(&[0x16, 0x54, 0xAE, 0x6B], &track);

        let mut cluster_body = uint(&[0xE7], 0);
        for frame in 0..frames {
            let mut block = vec![0x81];
            block.extend_from_slice(&((frame * 20) as i16).to_be_bytes());
            block.push(0x80);
            block.extend_from_slice(&SILENT_FRAME);
            cluster_body.extend(element(&[0xA3], &block));
        }
        let cluster = element(&[0x1F, 0x43, 0xB6, 0x75], &cluster_body);

        let segment = element(&[0x18, 0x53, 0x80, 0x67], &concat(&[info, tracks, cluster]));
        concat(&[header, segment])
    }
}
