//! Optional post-swap restoration.
//!
//! Enhancement never fails a job: when the enhancer cannot be created or a
//! restoration pass errors, the swapped frame comes back untouched.

use crate::adapter::AdapterFactory;
use crate::error::PipelineError;
use crate::session::SessionManager;
use crate::types::{DetectedFace, Frame};
use image::imageops;

/// Gaussian sigma of the unsharp mask applied after upscaled restoration.
pub const SHARPEN_SIGMA: f32 = 2.0;

/// Restoration blend weight: full strength when upscaling, half otherwise.
pub fn restoration_weight(upscale: u32) -> f32 {
    if upscale > 1 {
        1.0
    } else {
        0.5
    }
}

/// Unsharp mask: `1.5 * original - 0.5 * blurred`, clamped per channel.
pub fn sharpen(frame: &Frame) -> Frame {
    let blurred = imageops::blur(frame, SHARPEN_SIGMA);
    let mut out = frame.clone();
    for (dst, soft) in out.pixels_mut().zip(blurred.pixels()) {
        for c in 0..3 {
            let v = 1.5 * dst.0[c] as f32 - 0.5 * soft.0[c] as f32;
            dst.0[c] = v.round().clamp(0.0, 255.0) as u8;
        }
    }
    out
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EnhancementStage;

impl EnhancementStage {
    /// Restore `faces` in `frame` at `upscale`.
    ///
    /// With `upscale > 1` and a background upsampler, the whole frame is
    /// upscaled first and the faces are restored at the larger resolution.
    pub fn enhance<F: AdapterFactory>(
        &self,
        sessions: &mut SessionManager<F>,
        frame: &Frame,
        faces: &[DetectedFace],
        upscale: u32,
    ) -> Frame {
        let upscale = upscale.max(1);
        let enhancer = match sessions.enhancer(upscale) {
            Ok(enhancer) => enhancer,
            Err(e) => {
                tracing::warn!(error = %e, "enhancer unavailable, skipping enhancement");
                return frame.clone();
            }
        };

        let weight = restoration_weight(upscale);
        let mut base = frame.clone();
        let mut targets = faces.to_vec();

        if upscale > 1 && enhancer.has_background_upsampler() {
            match enhancer.upscale_background(frame) {
                Ok(upscaled) => {
                    let factor = upscaled.width() as f32 / frame.width().max(1) as f32;
                    targets = faces.iter().map(|f| f.scaled(factor)).collect();
                    base = upscaled;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "background upscaling failed, restoring at native size");
                }
            }
        }

        match enhancer.restore_faces(&base, &targets, weight) {
            Ok(restored) if upscale > 1 => sharpen(&restored),
            Ok(restored) => restored,
            Err(e) => {
                let err = PipelineError::EnhancementFailure(e.to_string());
                tracing::warn!(error = %err, "returning unenhanced frame");
                frame.clone()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{face_frame, FakeFace, FakeFactory};

    fn frame_with_face() -> (Frame, Vec<DetectedFace>) {
        let frame = face_frame(80, 60, &[FakeFace::new(20, 10, 30, [255, 40, 40])]);
        let face = DetectedFace::new(crate::types::BoundingBox::new(20.0, 10.0, 50.0, 40.0), 0.9);
        (frame, vec![face])
    }

    #[test]
    fn test_restoration_weight() {
        assert_eq!(restoration_weight(1), 0.5);
        assert_eq!(restoration_weight(2), 1.0);
        assert_eq!(restoration_weight(4), 1.0);
    }

    #[test]
    fn test_sharpen_leaves_flat_regions_alone() {
        let flat = Frame::from_pixel(20, 20, image::Rgb([90, 120, 200]));
        assert_eq!(sharpen(&flat), flat);
    }

    #[test]
    fn test_sharpen_boosts_edges() {
        let (frame, _) = frame_with_face();
        let sharp = sharpen(&frame);
        // Just outside the face block the dark side gets darker.
        assert!(sharp.get_pixel(19, 25).0[0] < frame.get_pixel(19, 25).0[0]);
        assert_eq!(sharp.get_pixel(21, 25).0[0], 255);
    }

    #[test]
    fn test_native_scale_uses_half_weight_without_sharpening() {
        let factory = FakeFactory::default();
        let weights = factory.weights.clone();
        let mut sessions = SessionManager::new(factory);
        let (frame, faces) = frame_with_face();

        let out = EnhancementStage.enhance(&mut sessions, &frame, &faces, 1);

        assert_eq!(*weights.borrow(), vec![0.5]);
        assert_eq!(out, frame);
    }

    #[test]
    fn test_upscale_without_background_sharpens_at_native_size() {
        let factory = FakeFactory::default();
        let weights = factory.weights.clone();
        let mut sessions = SessionManager::new(factory);
        let (frame, faces) = frame_with_face();

        let out = EnhancementStage.enhance(&mut sessions, &frame, &faces, 2);

        assert_eq!(*weights.borrow(), vec![1.0]);
        assert_eq!(out.dimensions(), frame.dimensions());
        assert_ne!(out, frame);
    }

    #[test]
    fn test_upscale_with_background_enlarges_frame() {
        let factory = FakeFactory {
            background: true,
            ..FakeFactory::default()
        };
        let mut sessions = SessionManager::new(factory);
        let (frame, faces) = frame_with_face();

        let out = EnhancementStage.enhance(&mut sessions, &frame, &faces, 2);
        assert_eq!(out.dimensions(), (160, 120));
    }

    #[test]
    fn test_missing_enhancer_returns_input() {
        let factory = FakeFactory {
            missing_enhancer: true,
            ..FakeFactory::default()
        };
        let mut sessions = SessionManager::new(factory);
        let (frame, faces) = frame_with_face();

        assert_eq!(EnhancementStage.enhance(&mut sessions, &frame, &faces, 2), frame);
    }

    #[test]
    fn test_restore_failure_returns_input() {
        let factory = FakeFactory {
            enhance_fails: true,
            background: true,
            ..FakeFactory::default()
        };
        let mut sessions = SessionManager::new(factory);
        let (frame, faces) = frame_with_face();

        assert_eq!(EnhancementStage.enhance(&mut sessions, &frame, &faces, 2), frame);
    }
}
