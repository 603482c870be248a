//! Real-ESRGAN background upsampler via ONNX Runtime.
//!
//! Runs the model over overlapping tiles so memory stays bounded on large
//! frames, then resamples to the requested factor when it differs from the
//! model's native scale.

use crate::adapter::{AdapterError, AdapterResult};
use crate::types::Frame;
use image::imageops::{self, FilterType};
use image::Rgb;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;

/// RealESRGAN_x2plus upscales by two.
const NATIVE_SCALE: u32 = 2;
const DEFAULT_TILE: u32 = 400;
const DEFAULT_TILE_PAD: u32 = 10;

/// One tile of the input frame: the region written to the output and the
/// padded region fed to the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Tile {
    x: u32,
    y: u32,
    width: u32,
    height: u32,
    pad_x: u32,
    pad_y: u32,
    pad_width: u32,
    pad_height: u32,
}

pub struct RealEsrganUpsampler {
    session: Session,
    tile: u32,
    tile_pad: u32,
}

impl RealEsrganUpsampler {
    pub fn load(model_path: &Path, intra_threads: usize) -> AdapterResult<Self> {
        if !model_path.exists() {
            return Err(AdapterError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(intra_threads)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            tile = DEFAULT_TILE,
            "loaded Real-ESRGAN model"
        );

        Ok(Self {
            session,
            tile: DEFAULT_TILE,
            tile_pad: DEFAULT_TILE_PAD,
        })
    }

    /// Upscale `frame` by `factor` (≥ 1).
    pub fn upscale(&mut self, frame: &Frame, factor: u32) -> AdapterResult<Frame> {
        let factor = factor.max(1);
        let (w, h) = frame.dimensions();
        let mut native = Frame::new(w * NATIVE_SCALE, h * NATIVE_SCALE);

        for tile in plan_tiles(w, h, self.tile, self.tile_pad) {
            let padded = imageops::crop_imm(frame, tile.pad_x, tile.pad_y, tile.pad_width, tile.pad_height)
                .to_image();
            let upscaled = self.run_tile(&padded)?;

            // Drop the overlap margin before writing the tile into place.
            let inner = imageops::crop_imm(
                &upscaled,
                (tile.x - tile.pad_x) * NATIVE_SCALE,
                (tile.y - tile.pad_y) * NATIVE_SCALE,
                tile.width * NATIVE_SCALE,
                tile.height * NATIVE_SCALE,
            )
            .to_image();
            imageops::replace(
                &mut native,
                &inner,
                (tile.x * NATIVE_SCALE) as i64,
                (tile.y * NATIVE_SCALE) as i64,
            );
        }

        if factor == NATIVE_SCALE {
            Ok(native)
        } else {
            Ok(imageops::resize(&native, w * factor, h * factor, FilterType::Lanczos3))
        }
    }

    fn run_tile(&mut self, tile: &Frame) -> AdapterResult<Frame> {
        let (w, h) = tile.dimensions();
        let mut input = Array4::<f32>::zeros((1, 3, h as usize, w as usize));
        for (x, y, pixel) in tile.enumerate_pixels() {
            for c in 0..3 {
                input[[0, c, y as usize, x as usize]] = pixel.0[c] as f32 / 255.0;
            }
        }

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| AdapterError::InferenceFailed(format!("upsampler output: {e}")))?;

        let (ow, oh) = (w * NATIVE_SCALE, h * NATIVE_SCALE);
        let plane = (ow * oh) as usize;
        if data.len() != 3 * plane {
            return Err(AdapterError::InferenceFailed(format!(
                "expected {}x{} output tile, got {} values",
                ow,
                oh,
                data.len()
            )));
        }

        Ok(Frame::from_fn(ow, oh, |x, y| {
            let idx = (y * ow + x) as usize;
            Rgb(std::array::from_fn(|c| {
                (data[c * plane + idx] * 255.0).round().clamp(0.0, 255.0) as u8
            }))
        }))
    }
}

/// Split a `width × height` frame into `tile`-sized tiles, each padded by
/// `pad` pixels of context on every side (clamped to the frame).
fn plan_tiles(width: u32, height: u32, tile: u32, pad: u32) -> Vec<Tile> {
    let tile = tile.max(1);
    let mut tiles = Vec::new();

    for y in (0..height).step_by(tile as usize) {
        for x in (0..width).step_by(tile as usize) {
            let tw = tile.min(width - x);
            let th = tile.min(height - y);
            let pad_x = x.saturating_sub(pad);
            let pad_y = y.saturating_sub(pad);
            let pad_x2 = (x + tw + pad).min(width);
            let pad_y2 = (y + th + pad).min(height);
            tiles.push(Tile {
                x,
                y,
                width: tw,
                height: th,
                pad_x,
                pad_y,
                pad_width: pad_x2 - pad_x,
                pad_height: pad_y2 - pad_y,
            });
        }
    }

    tiles
}
