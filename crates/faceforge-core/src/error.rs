use crate::adapter::{AdapterError, FailureReason};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("required resource not found: {0}")]
    ResourceNotFound(String),
    #[error("No faces found in dataset")]
    NoFacesFound,
    #[error("No faces detected in target image (tried multiple scales)")]
    NoFaceDetected,
    #[error("failed to load model {path}: {reason}")]
    ModelLoadFailure { path: String, reason: String },
    #[error("cannot read image {path}: {reason}")]
    ImageReadFailure { path: String, reason: String },
    #[error("enhancement failed: {0}")]
    EnhancementFailure(String),
    #[error("input unavailable: {0}")]
    InputUnavailable(String),
    #[error("video: {0}")]
    Video(String),
    #[error("adapter: {0}")]
    Adapter(AdapterError),
    #[error("image encode: {0}")]
    ImageWrite(#[from] image::ImageError),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<AdapterError> for PipelineError {
    fn from(err: AdapterError) -> Self {
        match err {
            AdapterError::ModelNotFound(path) => PipelineError::ResourceNotFound(path),
            other => PipelineError::Adapter(other),
        }
    }
}

impl PipelineError {
    /// Reason code when the failure came from an inference adapter.
    pub fn reason(&self) -> Option<FailureReason> {
        match self {
            PipelineError::ResourceNotFound(_) => Some(FailureReason::ModelNotFound),
            PipelineError::Adapter(e) => Some(e.reason()),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
