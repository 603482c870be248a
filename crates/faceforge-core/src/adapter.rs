//! Capability interfaces for the inference providers.
//!
//! Each provider sits behind one narrow trait. Implementations normalize
//! provider-specific metadata in their constructors and report failures as a
//! typed [`AdapterError`], so callers decide per stage whether to skip,
//! degrade, or abort.

use crate::swap::SourceIdentity;
use crate::types::{DetectedFace, Embedding, Frame};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AdapterError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("invalid model: {0}")]
    InvalidModel(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("face has no landmarks; alignment needs the five-point set")]
    MissingLandmarks,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Reason code of an [`AdapterError`], for logs and reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    ModelNotFound,
    InvalidModel,
    InferenceFailed,
    MissingLandmarks,
}

impl AdapterError {
    pub fn reason(&self) -> FailureReason {
        match self {
            AdapterError::ModelNotFound(_) => FailureReason::ModelNotFound,
            AdapterError::InvalidModel(_) => FailureReason::InvalidModel,
            AdapterError::InferenceFailed(_) | AdapterError::Ort(_) => {
                FailureReason::InferenceFailed
            }
            AdapterError::MissingLandmarks => FailureReason::MissingLandmarks,
        }
    }
}

pub type AdapterResult<T> = Result<T, AdapterError>;

/// Face detection plus identity embedding extraction.
pub trait FaceAnalyzer {
    /// Detect faces with the detector input resized to `input_size × input_size`,
    /// keeping detections scoring above `threshold`.
    fn detect(
        &mut self,
        frame: &Frame,
        input_size: u32,
        threshold: f32,
    ) -> AdapterResult<Vec<DetectedFace>>;

    /// Extract the identity embedding of one detected face.
    fn embed(&mut self, frame: &Frame, face: &DetectedFace) -> AdapterResult<Embedding>;
}

/// Identity-conditioned face replacement.
pub trait FaceSwapper {
    /// Replace `target` in `frame` with the face described by `source`,
    /// returning the updated frame.
    fn swap(
        &mut self,
        frame: &Frame,
        target: &DetectedFace,
        source: &SourceIdentity,
    ) -> AdapterResult<Frame>;
}

/// Face restoration with optional background upscaling.
pub trait FaceEnhancer {
    /// Upscale factor this enhancer was created for.
    fn upscale(&self) -> u32;

    /// Whether non-face regions can be upscaled.
    fn has_background_upsampler(&self) -> bool;

    /// Upscale the whole frame by [`upscale`](Self::upscale).
    fn upscale_background(&mut self, frame: &Frame) -> AdapterResult<Frame>;

    /// Restore each face in `frame`, blending restored pixels at `weight`.
    fn restore_faces(
        &mut self,
        frame: &Frame,
        faces: &[DetectedFace],
        weight: f32,
    ) -> AdapterResult<Frame>;
}

/// Builds adapters on demand. The session manager calls this at most once per
/// adapter kind and configuration.
pub trait AdapterFactory {
    fn create_analyzer(&self) -> AdapterResult<Box<dyn FaceAnalyzer>>;
    fn create_swapper(&self) -> AdapterResult<Box<dyn FaceSwapper>>;
    fn create_enhancer(&self, upscale: u32) -> AdapterResult<Box<dyn FaceEnhancer>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_codes() {
        assert_eq!(
            AdapterError::ModelNotFound("x".into()).reason(),
            FailureReason::ModelNotFound
        );
        assert_eq!(
            AdapterError::InferenceFailed("x".into()).reason(),
            FailureReason::InferenceFailed
        );
        assert_eq!(
            AdapterError::MissingLandmarks.reason(),
            FailureReason::MissingLandmarks
        );
    }
}
