//! faceforge-core: identity training and face swapping.
//!
//! Builds a unit-length identity embedding from sample photos and swaps it
//! into images, image folders and videos. Inference runs through ONNX
//! Runtime behind narrow adapter traits so the pipeline can be exercised
//! without model files.

pub mod adapter;
pub mod adaptive;
pub mod alignment;
pub mod batch;
pub mod detector;
pub mod enhance;
pub mod error;
pub mod ffmpeg;
pub mod identity;
pub mod media;
pub mod models;
pub mod pipeline;
pub mod processor;
pub mod progress;
pub mod recognizer;
pub mod report;
pub mod restorer;
pub mod session;
pub mod swap;
pub mod swapper;
pub mod types;
pub mod upsampler;
pub mod video;

#[cfg(test)]
pub(crate) mod testing;

pub use adapter::{AdapterError, AdapterFactory, FaceAnalyzer, FaceEnhancer, FaceSwapper};
pub use adaptive::AdaptiveDetector;
pub use error::{PipelineError, Result};
pub use models::{ModelPaths, OrtAdapterFactory};
pub use pipeline::{FacePipeline, PipelineOptions};
pub use progress::{JsonLinesSink, ProgressEvent, ProgressSink, ProgressStatus};
pub use types::{BoundingBox, DetectedFace, Embedding, Frame, IdentityModel, PipelineConfig};

use std::path::PathBuf;

/// Model directory used when none is configured: `$MODELS_DIR/checkpoints`,
/// else `./models/checkpoints`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("MODELS_DIR")
        .map(|dir| PathBuf::from(dir).join("checkpoints"))
        .unwrap_or_else(|_| PathBuf::from("models").join("checkpoints"))
}
