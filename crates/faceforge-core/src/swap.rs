//! Identity-conditioned face replacement for one frame.

use crate::adaptive::AdaptiveDetector;
use crate::adapter::AdapterFactory;
use crate::error::{PipelineError, Result};
use crate::session::SessionManager;
use crate::types::{DetectedFace, Embedding, Frame, IdentityModel};

/// The source side of a swap: the identity vector and nothing else.
///
/// Only the aggregate identity embedding exists for a trained model, so both
/// fields carry the same (already unit-length) vector.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceIdentity {
    pub embedding: Embedding,
    pub normed_embedding: Embedding,
}

impl SourceIdentity {
    pub fn from_model(model: &IdentityModel) -> Self {
        let embedding = Embedding::new(model.embedding.clone());
        Self {
            normed_embedding: embedding.clone(),
            embedding,
        }
    }
}

/// A swapped frame plus the faces that were replaced in it.
#[derive(Debug, Clone)]
pub struct SwapOutcome {
    pub frame: Frame,
    pub faces: Vec<DetectedFace>,
}

#[derive(Debug, Clone, Default)]
pub struct SwapEngine {
    detector: AdaptiveDetector,
}

impl SwapEngine {
    pub fn new(detector: AdaptiveDetector) -> Self {
        Self { detector }
    }

    /// Replace every detected face in `frame` with `identity`, in detector order.
    ///
    /// Fails with [`PipelineError::NoFaceDetected`] when no scale finds a face;
    /// callers streaming video treat that as pass-through.
    pub fn swap<F: AdapterFactory>(
        &self,
        sessions: &mut SessionManager<F>,
        identity: &IdentityModel,
        frame: &Frame,
    ) -> Result<SwapOutcome> {
        let faces = self.detector.detect(sessions.analyzer()?, frame);
        if faces.is_empty() {
            return Err(PipelineError::NoFaceDetected);
        }

        let source = SourceIdentity::from_model(identity);
        let swapper = sessions.swapper()?;

        let mut result = frame.clone();
        for face in &faces {
            result = swapper.swap(&result, face, &source)?;
        }
        tracing::debug!(faces = faces.len(), "swapped faces");

        Ok(SwapOutcome { frame: result, faces })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{face_frame, sample_identity as identity, swap_color, FakeFace, FakeFactory, BACKGROUND};

    #[test]
    fn test_source_identity_exposes_same_vector_twice() {
        let source = SourceIdentity::from_model(&identity());
        assert_eq!(source.embedding, source.normed_embedding);
        assert_eq!(source.embedding.values, vec![0.6, 0.8, 0.0]);
    }

    #[test]
    fn test_every_face_replaced_with_same_identity() {
        let factory = FakeFactory::default();
        let swaps = factory.swaps.clone();
        let mut sessions = SessionManager::new(factory);

        let frame = face_frame(
            300,
            200,
            &[
                FakeFace::new(10, 10, 50, [255, 1, 1]),
                FakeFace::new(150, 80, 80, [255, 2, 2]),
            ],
        );
        let outcome = SwapEngine::default().swap(&mut sessions, &identity(), &frame).unwrap();

        let expected = swap_color(&SourceIdentity::from_model(&identity()));
        assert_eq!(swaps.get(), 2);
        assert_eq!(outcome.faces.len(), 2);
        assert_eq!(*outcome.frame.get_pixel(30, 30), expected);
        assert_eq!(*outcome.frame.get_pixel(180, 120), expected);
        assert_eq!(*outcome.frame.get_pixel(120, 10), BACKGROUND);
    }

    #[test]
    fn test_no_face_is_an_explicit_error() {
        let mut sessions = SessionManager::new(FakeFactory::default());
        let frame = face_frame(100, 100, &[]);

        let err = SwapEngine::default().swap(&mut sessions, &identity(), &frame).unwrap_err();
        assert!(matches!(err, PipelineError::NoFaceDetected));
    }

    #[test]
    fn test_swap_failure_is_typed() {
        let factory = FakeFactory {
            swap_fails: true,
            ..FakeFactory::default()
        };
        let mut sessions = SessionManager::new(factory);
        let frame = face_frame(100, 100, &[FakeFace::new(10, 10, 40, [255, 0, 0])]);

        let err = SwapEngine::default().swap(&mut sessions, &identity(), &frame).unwrap_err();
        assert!(matches!(err, PipelineError::Adapter(_)));
    }

    #[test]
    fn test_swap_is_deterministic() {
        let mut sessions = SessionManager::new(FakeFactory::default());
        let frame = face_frame(120, 120, &[FakeFace::new(20, 20, 60, [255, 9, 9])]);
        let engine = SwapEngine::default();

        let a = engine.swap(&mut sessions, &identity(), &frame).unwrap();
        let b = engine.swap(&mut sessions, &identity(), &frame).unwrap();
        assert_eq!(a.frame, b.frame);
    }
}
