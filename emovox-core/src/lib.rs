//! emovox-core: speech emotion recognition built around one shared feature recipe.
//!
//! Training and inference both go through the same [`features::FeatureExtractor`],
//! driven by a single [`config::ExtractionConfig`]. The configuration is persisted
//! inside every model artifact, so a served model always extracts features exactly
//! the way its training data was extracted.
//!
//! # Architecture
//!
//! - [`decode`]: ordered decode strategies turning a file into an [`audio::AudioClip`]
//! - [`features`]: clip → fixed-length MFCC [`features::FeatureVector`]
//! - [`dataset`] / [`cache`]: labelled directories → [`dataset::Dataset`], cached on disk
//! - [`train`]: softmax classifier training with per-epoch history
//! - [`persist`]: model artifacts and [`persist::LoadedModel`]
//! - [`inference`]: [`inference::InferenceService`] for files, clips and uploads
//! - [`realtime`]: capture → classify loop with cooperative cancellation
//!
//! # Quick Start
//!
//! ```ignore
//! use emovox_core::inference::InferenceService;
//!
//! let service = InferenceService::load("model/emotion_model.json")?;
//! let result = service.predict_file("clip.wav")?;
//! println!("{} ({:.1}%)", result.emotion(), result.confidence());
//! ```

pub mod audio;
pub mod cache;
pub mod classifier;
pub mod config;
pub mod dataset;
pub mod decode;
pub mod error;
pub mod features;
pub mod inference;
pub mod labels;
pub mod mfcc;
pub mod persist;
pub mod realtime;
pub mod response;
pub mod train;

#[cfg(feature = "mic")]
pub mod capture;
#[cfg(feature = "onnx")]
pub mod onnx;
