//! ONNX Runtime implementations of the adapter interfaces.

use crate::adapter::{AdapterFactory, AdapterResult, FaceAnalyzer, FaceEnhancer, FaceSwapper};
use crate::detector::ScrfdDetector;
use crate::recognizer::ArcFaceRecognizer;
use crate::restorer::GfpganRestorer;
use crate::swapper::InswapperSwapper;
use crate::types::{DetectedFace, Embedding, Frame};
use crate::upsampler::RealEsrganUpsampler;
use std::path::{Path, PathBuf};

/// Locations of the model files, relative to one model directory.
#[derive(Debug, Clone)]
pub struct ModelPaths {
    pub detector: PathBuf,
    pub recognizer: PathBuf,
    pub swapper: PathBuf,
    pub restorer: PathBuf,
    pub background_upsampler: PathBuf,
}

impl ModelPaths {
    pub fn in_dir(model_dir: &Path) -> Self {
        Self {
            detector: model_dir.join("det_10g.onnx"),
            recognizer: model_dir.join("w600k_r50.onnx"),
            swapper: model_dir.join("inswapper_128.onnx"),
            restorer: model_dir.join("GFPGANv1.4.onnx"),
            background_upsampler: model_dir.join("RealESRGAN_x2plus.onnx"),
        }
    }
}

/// SCRFD detection + ArcFace recognition behind one analyzer.
pub struct OrtFaceAnalyzer {
    detector: ScrfdDetector,
    recognizer: ArcFaceRecognizer,
}

impl FaceAnalyzer for OrtFaceAnalyzer {
    fn detect(&mut self, frame: &Frame, input_size: u32, threshold: f32) -> AdapterResult<Vec<DetectedFace>> {
        self.detector.detect(frame, input_size, threshold)
    }

    fn embed(&mut self, frame: &Frame, face: &DetectedFace) -> AdapterResult<Embedding> {
        self.recognizer.extract(frame, face)
    }
}

/// GFPGAN restoration with an optional Real-ESRGAN background pass.
pub struct OrtEnhancer {
    restorer: GfpganRestorer,
    background: Option<RealEsrganUpsampler>,
    upscale: u32,
}

impl FaceEnhancer for OrtEnhancer {
    fn upscale(&self) -> u32 {
        self.upscale
    }

    fn has_background_upsampler(&self) -> bool {
        self.background.is_some()
    }

    fn upscale_background(&mut self, frame: &Frame) -> AdapterResult<Frame> {
        match self.background.as_mut() {
            Some(upsampler) => upsampler.upscale(frame, self.upscale),
            None => Ok(frame.clone()),
        }
    }

    fn restore_faces(&mut self, frame: &Frame, faces: &[DetectedFace], weight: f32) -> AdapterResult<Frame> {
        self.restorer.restore(frame, faces, weight)
    }
}

/// Creates ONNX Runtime sessions from model files on disk.
pub struct OrtAdapterFactory {
    paths: ModelPaths,
    intra_threads: usize,
}

impl OrtAdapterFactory {
    pub fn new(paths: ModelPaths, intra_threads: usize) -> Self {
        Self {
            paths,
            intra_threads: intra_threads.max(1),
        }
    }
}

impl AdapterFactory for OrtAdapterFactory {
    fn create_analyzer(&self) -> AdapterResult<Box<dyn FaceAnalyzer>> {
        let detector = ScrfdDetector::load(&self.paths.detector, self.intra_threads)?;
        let recognizer = ArcFaceRecognizer::load(&self.paths.recognizer, self.intra_threads)?;
        Ok(Box::new(OrtFaceAnalyzer { detector, recognizer }))
    }

    fn create_swapper(&self) -> AdapterResult<Box<dyn FaceSwapper>> {
        Ok(Box::new(InswapperSwapper::load(&self.paths.swapper, self.intra_threads)?))
    }

    fn create_enhancer(&self, upscale: u32) -> AdapterResult<Box<dyn FaceEnhancer>> {
        let restorer = GfpganRestorer::load(&self.paths.restorer, self.intra_threads)?;

        let background = if upscale > 1 {
            match RealEsrganUpsampler::load(&self.paths.background_upsampler, self.intra_threads) {
                Ok(upsampler) => {
                    tracing::info!(
                        path = %self.paths.background_upsampler.display(),
                        "background upsampler initialized"
                    );
                    Some(upsampler)
                }
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        "background upsampler unavailable; background will not be upscaled"
                    );
                    None
                }
            }
        } else {
            None
        };

        Ok(Box::new(OrtEnhancer {
            restorer,
            background,
            upscale,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::AdapterError;

    #[test]
    fn test_model_paths_in_dir() {
        let paths = ModelPaths::in_dir(Path::new("/opt/models"));
        assert_eq!(paths.detector, PathBuf::from("/opt/models/det_10g.onnx"));
        assert_eq!(paths.swapper, PathBuf::from("/opt/models/inswapper_128.onnx"));
        assert_eq!(paths.restorer, PathBuf::from("/opt/models/GFPGANv1.4.onnx"));
    }

    #[test]
    fn test_missing_models_fail_at_creation() {
        let dir = tempfile::tempdir().unwrap();
        let factory = OrtAdapterFactory::new(ModelPaths::in_dir(dir.path()), 1);

        assert!(matches!(factory.create_analyzer(), Err(AdapterError::ModelNotFound(_))));
        assert!(matches!(factory.create_swapper(), Err(AdapterError::ModelNotFound(_))));
        assert!(matches!(factory.create_enhancer(2), Err(AdapterError::ModelNotFound(_))));
    }
}
