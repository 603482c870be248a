//! Multi-scale detection retry.
//!
//! Face size relative to the frame varies a lot between portraits, group
//! shots and video stills. A single detector input size misses both very
//! small and very large faces, so detection widens or narrows the window in
//! a fixed order, stopping at the first size that finds anything.

use crate::adapter::{AdapterError, FaceAnalyzer};
use crate::types::{DetectedFace, Frame};

/// Candidate detector input sizes, in the order they are tried.
pub const DEFAULT_DETECTION_SIZES: [u32; 3] = [640, 320, 1280];
pub const DEFAULT_DETECTION_THRESHOLD: f32 = 0.3;

#[derive(Debug, Clone)]
pub struct AdaptiveDetector {
    sizes: Vec<u32>,
    threshold: f32,
}

impl Default for AdaptiveDetector {
    fn default() -> Self {
        Self::new(DEFAULT_DETECTION_SIZES.to_vec(), DEFAULT_DETECTION_THRESHOLD)
    }
}

impl AdaptiveDetector {
    pub fn new(sizes: Vec<u32>, threshold: f32) -> Self {
        let sizes = if sizes.is_empty() {
            DEFAULT_DETECTION_SIZES.to_vec()
        } else {
            sizes
        };
        Self { sizes, threshold }
    }

    pub fn sizes(&self) -> &[u32] {
        &self.sizes
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Faces found at the first size that yields any; empty when every size
    /// came back empty or failed.
    pub fn detect(&self, analyzer: &mut dyn FaceAnalyzer, frame: &Frame) -> Vec<DetectedFace> {
        self.detect_with_report(analyzer, frame).unwrap_or_default()
    }

    /// Like [`detect`](Self::detect), but when every size failed with a
    /// provider error the last error is returned instead of an empty set.
    pub fn detect_with_report(
        &self,
        analyzer: &mut dyn FaceAnalyzer,
        frame: &Frame,
    ) -> Result<Vec<DetectedFace>, AdapterError> {
        let mut last_error = None;
        let mut any_succeeded = false;

        for &size in &self.sizes {
            tracing::debug!(size, "trying detection");
            match analyzer.detect(frame, size, self.threshold) {
                Ok(faces) if !faces.is_empty() => {
                    tracing::debug!(size, count = faces.len(), "faces found");
                    return Ok(faces);
                }
                Ok(_) => any_succeeded = true,
                Err(e) => {
                    tracing::warn!(size, reason = ?e.reason(), error = %e, "detection failed at this size");
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if !any_succeeded => Err(e),
            _ => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{face_frame, FakeAnalyzer, FakeFace};

    fn one_face_frame() -> Frame {
        face_frame(200, 200, &[FakeFace::new(50, 50, 60, [255, 10, 20])])
    }

    #[test]
    fn test_stops_at_first_size_with_faces() {
        let mut analyzer = FakeAnalyzer::default();
        let faces = AdaptiveDetector::default().detect(&mut analyzer, &one_face_frame());

        assert_eq!(faces.len(), 1);
        assert_eq!(*analyzer.calls.borrow(), vec![640]);
    }

    #[test]
    fn test_face_only_visible_at_320_is_found() {
        let mut analyzer = FakeAnalyzer {
            visible_sizes: Some(vec![320]),
            ..FakeAnalyzer::default()
        };
        let faces = AdaptiveDetector::default().detect(&mut analyzer, &one_face_frame());

        assert_eq!(faces.len(), 1);
        assert_eq!(*analyzer.calls.borrow(), vec![640, 320]);
    }

    #[test]
    fn test_provider_error_falls_through_to_next_size() {
        let mut analyzer = FakeAnalyzer {
            failing_sizes: vec![640, 320],
            ..FakeAnalyzer::default()
        };
        let faces = AdaptiveDetector::default().detect(&mut analyzer, &one_face_frame());

        assert_eq!(faces.len(), 1);
        assert_eq!(*analyzer.calls.borrow(), vec![640, 320, 1280]);
    }

    #[test]
    fn test_all_sizes_empty_returns_empty() {
        let mut analyzer = FakeAnalyzer::default();
        let frame = face_frame(200, 200, &[]);
        let detector = AdaptiveDetector::default();

        assert!(detector.detect(&mut analyzer, &frame).is_empty());
        assert!(detector.detect_with_report(&mut analyzer, &frame).unwrap().is_empty());
    }

    #[test]
    fn test_report_surfaces_error_only_when_every_size_failed() {
        let frame = one_face_frame();
        let detector = AdaptiveDetector::default();

        let mut all_fail = FakeAnalyzer {
            failing_sizes: vec![640, 320, 1280],
            ..FakeAnalyzer::default()
        };
        assert!(detector.detect_with_report(&mut all_fail, &frame).is_err());
        assert!(detector.detect(&mut all_fail, &frame).is_empty());

        let mut partly_empty = FakeAnalyzer {
            failing_sizes: vec![640, 1280],
            visible_sizes: Some(vec![]),
            ..FakeAnalyzer::default()
        };
        assert!(detector.detect_with_report(&mut partly_empty, &frame).unwrap().is_empty());
    }

    #[test]
    fn test_threshold_is_forwarded() {
        let mut analyzer = FakeAnalyzer::default();
        AdaptiveDetector::new(vec![480], 0.45).detect(&mut analyzer, &one_face_frame());
        assert_eq!(*analyzer.thresholds.borrow(), vec![0.45]);
        assert_eq!(*analyzer.calls.borrow(), vec![480]);
    }
}
