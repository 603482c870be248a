//! Identity model construction and persistence.
//!
//! An identity is the mean of the dominant face's embedding across a set of
//! sample photos, normalized to unit length after averaging. The model is a
//! small JSON record; a crop of the first usable face is written next to it
//! as a preview.

use crate::adapter::{AdapterError, AdapterFactory, FaceAnalyzer};
use crate::adaptive::AdaptiveDetector;
use crate::error::{PipelineError, Result};
use crate::media::{self, SAMPLE_EXTENSIONS};
use crate::report::TrainResult;
use crate::session::SessionManager;
use crate::types::{DetectedFace, Embedding, Frame, IdentityModel, IDENTITY_MODEL_VERSION};
use image::imageops;
use std::fs;
use std::path::{Path, PathBuf};

/// Pixels added on every side of the face box for the preview crop.
pub const DEFAULT_PREVIEW_MARGIN: u32 = 50;

/// Maximum distance from unit length accepted when loading a model.
const LOAD_NORM_TOLERANCE: f32 = 1e-3;

/// Path of the preview image belonging to a model file.
pub fn preview_path(model_path: &Path) -> PathBuf {
    model_path.with_extension("jpg")
}

/// Face with the largest box area; the first one wins a tie.
pub fn dominant_face(faces: &[DetectedFace]) -> Option<&DetectedFace> {
    faces.iter().fold(None, |best: Option<&DetectedFace>, face| match best {
        Some(b) if b.bbox.area() >= face.bbox.area() => Some(b),
        _ => Some(face),
    })
}

#[derive(Debug, Clone)]
pub struct IdentityModelBuilder {
    detector: AdaptiveDetector,
    preview_margin: u32,
}

impl Default for IdentityModelBuilder {
    fn default() -> Self {
        Self::new(AdaptiveDetector::default(), DEFAULT_PREVIEW_MARGIN)
    }
}

impl IdentityModelBuilder {
    pub fn new(detector: AdaptiveDetector, preview_margin: u32) -> Self {
        Self {
            detector,
            preview_margin,
        }
    }

    /// Build an identity from the samples in `sample_dir` and persist it at
    /// `output_path`. Nothing is written when no sample yields an embedding.
    pub fn build<F: AdapterFactory>(
        &self,
        sessions: &mut SessionManager<F>,
        sample_dir: &Path,
        output_path: &Path,
        name: &str,
    ) -> Result<TrainResult> {
        let files = media::list_files(sample_dir, SAMPLE_EXTENSIONS)?;
        tracing::info!(dir = %sample_dir.display(), files = files.len(), "building identity");

        let analyzer = sessions.analyzer()?;
        let mut embeddings = Vec::new();
        let mut preview: Option<Frame> = None;

        for path in &files {
            let frame = match media::read_image(path) {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::debug!(error = %e, "skipping sample");
                    continue;
                }
            };

            let faces = self.detector.detect(analyzer, &frame);
            let Some(face) = dominant_face(&faces) else {
                tracing::debug!(file = %path.display(), "no face in sample");
                continue;
            };

            match face_embedding(analyzer, &frame, face) {
                Ok(embedding) => embeddings.push(embedding),
                Err(e) => {
                    tracing::warn!(file = %path.display(), error = %e, "embedding extraction failed")
                }
            }

            if preview.is_none() {
                preview = self.preview_crop(&frame, face);
            }
        }

        if embeddings.is_empty() {
            return Err(PipelineError::NoFacesFound);
        }

        let mean = Embedding::mean(&embeddings).ok_or_else(|| {
            AdapterError::InvalidModel("sample embeddings differ in dimension".into())
        })?;
        let embedding = mean.normalized();
        if embedding.norm() == 0.0 {
            return Err(AdapterError::InvalidModel("mean embedding is zero".into()).into());
        }

        let model = IdentityModel {
            name: name.to_string(),
            created_at: chrono::Local::now().to_rfc3339(),
            embedding: embedding.values,
            version: IDENTITY_MODEL_VERSION.to_string(),
            source_images_count: embeddings.len(),
        };
        save_model(output_path, &model)?;

        let preview_file = preview_path(output_path);
        if let Some(crop) = &preview {
            media::write_image(&preview_file, crop)?;
        }

        tracing::info!(
            path = %output_path.display(),
            faces_used = model.source_images_count,
            "identity model saved"
        );

        Ok(TrainResult {
            success: true,
            model_path: output_path.display().to_string(),
            preview_path: preview_file.display().to_string(),
            faces_used: model.source_images_count,
        })
    }

    fn preview_crop(&self, frame: &Frame, face: &DetectedFace) -> Option<Frame> {
        let (x, y, w, h) = face
            .bbox
            .padded_crop(self.preview_margin, frame.width(), frame.height());
        if w == 0 || h == 0 {
            return None;
        }
        Some(imageops::crop_imm(frame, x, y, w, h).to_image())
    }
}

fn face_embedding(
    analyzer: &mut dyn FaceAnalyzer,
    frame: &Frame,
    face: &DetectedFace,
) -> std::result::Result<Embedding, AdapterError> {
    match &face.embedding {
        Some(embedding) => Ok(embedding.clone()),
        None => analyzer.embed(frame, face),
    }
}

/// Write `model` as JSON, creating parent directories.
pub fn save_model(path: &Path, model: &IdentityModel) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, serde_json::to_vec_pretty(model)?)?;
    Ok(())
}

/// Read and validate a persisted identity model.
pub fn load_model(path: &Path) -> Result<IdentityModel> {
    let failure = |reason: String| PipelineError::ModelLoadFailure {
        path: path.display().to_string(),
        reason,
    };

    let bytes = fs::read(path).map_err(|e| failure(e.to_string()))?;
    let model: IdentityModel =
        serde_json::from_slice(&bytes).map_err(|e| failure(e.to_string()))?;

    if model.embedding.is_empty() {
        return Err(failure("embedding is empty".into()));
    }
    let norm = Embedding::new(model.embedding.clone()).norm();
    if !norm.is_finite() || (norm - 1.0).abs() > LOAD_NORM_TOLERANCE {
        return Err(failure(format!("embedding is not unit length (norm {norm})")));
    }
    if model.source_images_count == 0 {
        return Err(failure("source_images_count is zero".into()));
    }

    tracing::debug!(name = %model.name, dim = model.embedding.len(), "identity model loaded");
    Ok(model)
}
