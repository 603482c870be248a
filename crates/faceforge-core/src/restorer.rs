//! GFPGAN face restoration via ONNX Runtime.

use crate::adapter::{AdapterError, AdapterResult};
use crate::alignment;
use crate::types::{DetectedFace, Frame};
use image::Rgb;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;

const GFPGAN_INPUT_SIZE: u32 = 512;
const PASTE_FEATHER: f32 = 24.0;

/// GFPGAN v1.4 restorer working on FFHQ-aligned 512×512 crops.
pub struct GfpganRestorer {
    session: Session,
}

impl GfpganRestorer {
    pub fn load(model_path: &Path, intra_threads: usize) -> AdapterResult<Self> {
        if !model_path.exists() {
            return Err(AdapterError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(intra_threads)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded GFPGAN model"
        );

        Ok(Self { session })
    }

    /// Restore every face that carries landmarks; others are left untouched.
    ///
    /// `weight` blends the restored crop over the original crop before it is
    /// pasted back: 1.0 is fully restored, 0.0 leaves the face unchanged.
    pub fn restore(&mut self, frame: &Frame, faces: &[DetectedFace], weight: f32) -> AdapterResult<Frame> {
        let mut result = frame.clone();
        let weight = weight.clamp(0.0, 1.0);

        for face in faces {
            let Some(landmarks) = face.landmarks.as_ref() else {
                tracing::debug!(confidence = face.confidence, "skipping restoration: face has no landmarks");
                continue;
            };

            let (aligned, matrix) = alignment::align_face(
                &result,
                landmarks,
                &alignment::FFHQ_TEMPLATE_512,
                GFPGAN_INPUT_SIZE,
            );
            let input = preprocess(&aligned);

            let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
            let (_, data) = outputs[0]
                .try_extract_tensor::<f32>()
                .map_err(|e| AdapterError::InferenceFailed(format!("restoration output: {e}")))?;

            let restored = postprocess(data, GFPGAN_INPUT_SIZE)?;
            let blended = blend(&restored, &aligned, weight);
            alignment::paste_back(&mut result, &blended, &matrix, PASTE_FEATHER);
        }

        Ok(result)
    }
}

/// RGB crop → NCHW tensor in [-1, 1].
fn preprocess(aligned: &Frame) -> Array4<f32> {
    let (w, h) = (aligned.width() as usize, aligned.height() as usize);
    let mut tensor = Array4::<f32>::zeros((1, 3, h, w));
    for (x, y, pixel) in aligned.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = (pixel.0[c] as f32 / 255.0 - 0.5) / 0.5;
        }
    }
    tensor
}

/// NCHW [-1, 1] output → RGB crop.
fn postprocess(data: &[f32], size: u32) -> AdapterResult<Frame> {
    let plane = (size * size) as usize;
    if data.len() != 3 * plane {
        return Err(AdapterError::InferenceFailed(format!(
            "expected {} output values, got {}",
            3 * plane,
            data.len()
        )));
    }

    Ok(Frame::from_fn(size, size, |x, y| {
        let idx = (y * size + x) as usize;
        Rgb(std::array::from_fn(|c| {
            let v = data[c * plane + idx].clamp(-1.0, 1.0);
            ((v * 0.5 + 0.5) * 255.0).round() as u8
        }))
    }))
}

/// Per-pixel `weight × restored + (1 − weight) × original`.
fn blend(restored: &Frame, original: &Frame, weight: f32) -> Frame {
    Frame::from_fn(restored.width(), restored.height(), |x, y| {
        let r = restored.get_pixel(x, y).0;
        let o = original.get_pixel(x, y).0;
        Rgb(std::array::from_fn(|c| {
            (r[c] as f32 * weight + o[c] as f32 * (1.0 - weight))
                .round()
                .clamp(0.0, 255.0) as u8
        }))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blend_weights() {
        let restored = Frame::from_pixel(4, 4, Rgb([200, 100, 0]));
        let original = Frame::from_pixel(4, 4, Rgb([100, 100, 100]));

        assert_eq!(blend(&restored, &original, 1.0).get_pixel(0, 0).0, [200, 100, 0]);
        assert_eq!(blend(&restored, &original, 0.5).get_pixel(0, 0).0, [150, 100, 50]);
        assert_eq!(blend(&restored, &original, 0.0).get_pixel(0, 0).0, [100, 100, 100]);
    }

    #[test]
    fn test_preprocess_range() {
        let crop = Frame::from_pixel(8, 8, Rgb([0, 255, 0]));
        let tensor = preprocess(&crop);
        assert!((tensor[[0, 0, 0, 0]] + 1.0).abs() < 1e-6);
        assert!((tensor[[0, 1, 0, 0]] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_postprocess_clamps_out_of_range() {
        let mut data = vec![0.0f32; 3 * 4];
        data[0] = 3.0; // R of pixel (0,0), above range
        data[4] = -3.0; // G of pixel (0,0), below range
        let crop = postprocess(&data, 2).unwrap();
        assert_eq!(crop.get_pixel(0, 0).0, [255, 0, 128]);
    }
}
