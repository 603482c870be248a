//! inswapper_128 face swapper via ONNX Runtime.
//!
//! Aligns each target face to a 128×128 crop, conditions the model on the
//! source identity latent, and pastes the generated face back into the frame.

use crate::adapter::{AdapterError, AdapterResult, FaceSwapper};
use crate::alignment;
use crate::swap::SourceIdentity;
use crate::types::{DetectedFace, Frame};
use image::Rgb;
use ndarray::{Array2, Array4, ArrayView1};
use ort::session::Session;
use ort::value::TensorRef;
use prost::bytes::Bytes;
use prost::Message;
use std::path::{Path, PathBuf};

const INSWAPPER_INPUT_SIZE: u32 = 128;
const INSWAPPER_STD: f32 = 255.0;
/// Crop pixels over which the pasted face fades into the frame.
const PASTE_FEATHER: f32 = 8.0;

/// ONNX `TensorProto.DataType.FLOAT`.
const ONNX_FLOAT: i32 = 1;

/// The slice of the ONNX protobuf schema needed to read graph initializers.
/// Every other field is skipped while decoding.
mod onnx {
    use prost::bytes::Bytes;

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct ModelProto {
        #[prost(message, optional, tag = "7")]
        pub graph: Option<GraphProto>,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct GraphProto {
        #[prost(message, repeated, tag = "5")]
        pub initializer: Vec<TensorProto>,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct TensorProto {
        #[prost(int64, repeated, tag = "1")]
        pub dims: Vec<i64>,
        #[prost(int32, tag = "2")]
        pub data_type: i32,
        #[prost(float, repeated, tag = "4")]
        pub float_data: Vec<f32>,
        #[prost(string, tag = "8")]
        pub name: String,
        #[prost(bytes = "bytes", tag = "9")]
        pub raw_data: Bytes,
    }
}

/// inswapper_128 session plus its latent projection matrix.
pub struct InswapperSwapper {
    session: Session,
    /// Projection from ArcFace embedding (rows) to swap latent (columns).
    emap: Option<Array2<f32>>,
    /// Input order discovered at load: true when the identity input comes first.
    source_first: bool,
}

impl InswapperSwapper {
    /// Load the swap model and its latent projection.
    pub fn load(model_path: &Path, intra_threads: usize) -> AdapterResult<Self> {
        if !model_path.exists() {
            return Err(AdapterError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(intra_threads)?
            .commit_from_file(model_path)?;

        let input_names: Vec<String> = session.inputs().iter().map(|i| i.name().to_string()).collect();
        tracing::info!(
            path = %model_path.display(),
            inputs = ?input_names,
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded inswapper model"
        );

        if input_names.len() != 2 {
            return Err(AdapterError::InvalidModel(format!(
                "swap model requires 2 inputs (target, source), got {}",
                input_names.len()
            )));
        }
        let source_first = input_names[0] == "source";

        let emap = load_emap(model_path)?;
        if emap.is_none() {
            tracing::warn!(
                path = %model_path.display(),
                "swap latent projection not found; using normalized embedding as latent"
            );
        }

        Ok(Self {
            session,
            emap,
            source_first,
        })
    }

    /// Project the identity embedding into the swap model's latent space.
    fn latent(&self, source: &SourceIdentity) -> AdapterResult<Array2<f32>> {
        let embedding = &source.normed_embedding.values;
        let projected = match &self.emap {
            Some(emap) => project(embedding, emap)?,
            None => embedding.clone(),
        };

        let norm = projected.iter().map(|v| v * v).sum::<f32>().sqrt();
        let latent: Vec<f32> = if norm > 0.0 {
            projected.iter().map(|v| v / norm).collect()
        } else {
            projected
        };

        let dim = latent.len();
        Array2::from_shape_vec((1, dim), latent)
            .map_err(|e| AdapterError::InferenceFailed(format!("latent shape: {e}")))
    }
}

impl FaceSwapper for InswapperSwapper {
    fn swap(
        &mut self,
        frame: &Frame,
        target: &DetectedFace,
        source: &SourceIdentity,
    ) -> AdapterResult<Frame> {
        let landmarks = target.landmarks.as_ref().ok_or(AdapterError::MissingLandmarks)?;
        let template = alignment::arcface_template(INSWAPPER_INPUT_SIZE);
        let (aligned, matrix) = alignment::align_face(frame, landmarks, &template, INSWAPPER_INPUT_SIZE);

        let target_tensor = preprocess(&aligned);
        let latent = self.latent(source)?;

        let target_value = TensorRef::from_array_view(target_tensor.view())?;
        let source_value = TensorRef::from_array_view(latent.view())?;
        let outputs = if self.source_first {
            self.session.run(ort::inputs![source_value, target_value])?
        } else {
            self.session.run(ort::inputs![target_value, source_value])?
        };

        let (_, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| AdapterError::InferenceFailed(format!("swap output: {e}")))?;

        let swapped = postprocess(data, INSWAPPER_INPUT_SIZE)?;

        let mut result = frame.clone();
        alignment::paste_back(&mut result, &swapped, &matrix, PASTE_FEATHER);
        Ok(result)
    }
}

/// The latent projection: a `<model>.emap` file beside the model overrides
/// the matrix stored as the model graph's last initializer.
fn load_emap(model_path: &Path) -> AdapterResult<Option<Array2<f32>>> {
    let sidecar = emap_sidecar_path(model_path);
    if let Ok(bytes) = std::fs::read(&sidecar) {
        let emap = parse_emap(&bytes)?;
        tracing::info!(path = %sidecar.display(), dim = emap.nrows(), "loaded swap latent projection override");
        return Ok(Some(emap));
    }

    let bytes = std::fs::read(model_path)
        .map_err(|e| AdapterError::InvalidModel(format!("{}: {e}", model_path.display())))?;
    let emap = emap_from_model(Bytes::from(bytes))?;
    if let Some(emap) = &emap {
        tracing::info!(
            path = %model_path.display(),
            shape = ?emap.shape(),
            "loaded swap latent projection from model initializer"
        );
    }
    Ok(emap)
}

fn emap_sidecar_path(model_path: &Path) -> PathBuf {
    model_path.with_extension("emap")
}

/// Decode the model protobuf and take its last graph initializer when that is
/// a 2-D float matrix.
fn emap_from_model(model: Bytes) -> AdapterResult<Option<Array2<f32>>> {
    let model = onnx::ModelProto::decode(model)
        .map_err(|e| AdapterError::InvalidModel(format!("decoding model protobuf: {e}")))?;
    let Some(tensor) = model.graph.and_then(|g| g.initializer.into_iter().last()) else {
        return Ok(None);
    };

    let [rows, cols] = tensor.dims[..] else {
        tracing::debug!(name = %tensor.name, dims = ?tensor.dims, "last initializer is not a matrix");
        return Ok(None);
    };
    if tensor.data_type != ONNX_FLOAT || rows <= 0 || cols <= 0 {
        tracing::debug!(name = %tensor.name, data_type = tensor.data_type, "last initializer is not a float matrix");
        return Ok(None);
    }

    let values = if tensor.raw_data.is_empty() {
        tensor.float_data
    } else {
        le_floats(&tensor.raw_data)?
    };
    Array2::from_shape_vec((rows as usize, cols as usize), values)
        .map(Some)
        .map_err(|e| AdapterError::InvalidModel(format!("initializer {}: {e}", tensor.name)))
}

fn le_floats(bytes: &[u8]) -> AdapterResult<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(AdapterError::InvalidModel(format!(
            "float data of {} bytes is not a multiple of 4",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

/// Parse a square little-endian f32 matrix.
fn parse_emap(bytes: &[u8]) -> AdapterResult<Array2<f32>> {
    let values = le_floats(bytes)?;
    let dim = (values.len() as f64).sqrt().round() as usize;
    if dim == 0 || dim * dim != values.len() {
        return Err(AdapterError::InvalidModel(format!(
            "emap with {} values is not a square matrix",
            values.len()
        )));
    }
    Array2::from_shape_vec((dim, dim), values)
        .map_err(|e| AdapterError::InvalidModel(format!("emap shape: {e}")))
}

/// Row vector × matrix.
fn project(vector: &[f32], matrix: &Array2<f32>) -> AdapterResult<Vec<f32>> {
    if vector.len() != matrix.nrows() {
        return Err(AdapterError::InferenceFailed(format!(
            "identity has {} dims, swap latent expects {}",
            vector.len(),
            matrix.nrows()
        )));
    }
    Ok(ArrayView1::from(vector).dot(matrix).to_vec())
}

/// RGB crop → NCHW tensor in [0, 1].
fn preprocess(aligned: &Frame) -> Array4<f32> {
    let (w, h) = (aligned.width() as usize, aligned.height() as usize);
    let mut tensor = Array4::<f32>::zeros((1, 3, h, w));
    for (x, y, pixel) in aligned.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = pixel.0[c] as f32 / INSWAPPER_STD;
        }
    }
    tensor
}

/// NCHW [0, 1] output → RGB crop.
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
            (data[c * plane + idx] * INSWAPPER_STD).round().clamp(0.0, 255.0) as u8
        }))
    }))
}
