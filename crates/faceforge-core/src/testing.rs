//! Deterministic stand-ins for the inference adapters.
//!
//! A "face" in a test frame is a solid block whose red channel is 255; each
//! distinct color is one face. The fake analyzer finds those blocks, derives
//! embeddings from their colors, and the fake swapper paints the swapped
//! region with a color derived from the source identity.

use crate::adapter::{
    AdapterError, AdapterFactory, AdapterResult, FaceAnalyzer, FaceEnhancer, FaceSwapper,
};
use crate::swap::SourceIdentity;
use crate::types::{BoundingBox, DetectedFace, Embedding, Frame, IdentityModel, IDENTITY_MODEL_VERSION};
use image::imageops::{self, FilterType};
use image::Rgb;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

pub const BACKGROUND: Rgb<u8> = Rgb([30, 30, 30]);

#[derive(Debug, Clone, Copy)]
pub struct FakeFace {
    pub x: u32,
    pub y: u32,
    pub size: u32,
    pub color: [u8; 3],
}

impl FakeFace {
    pub fn new(x: u32, y: u32, size: u32, color: [u8; 3]) -> Self {
        assert_eq!(color[0], 255, "fake faces are marked by a saturated red channel");
        Self { x, y, size, color }
    }
}

/// A background frame with the given faces painted in.
pub fn face_frame(width: u32, height: u32, faces: &[FakeFace]) -> Frame {
    let mut frame = Frame::from_pixel(width, height, BACKGROUND);
    for face in faces {
        for y in face.y..(face.y + face.size).min(height) {
            for x in face.x..(face.x + face.size).min(width) {
                frame.put_pixel(x, y, Rgb(face.color));
            }
        }
    }
    frame
}

/// A small unit-length identity.
pub fn sample_identity() -> IdentityModel {
    IdentityModel {
        name: "alice".into(),
        created_at: "2026-01-01T00:00:00".into(),
        embedding: vec![0.6, 0.8, 0.0],
        version: IDENTITY_MODEL_VERSION.into(),
        source_images_count: 3,
    }
}

/// The embedding the fake analyzer reports for a face of `color`.
pub fn fake_embedding(color: [u8; 3]) -> Embedding {
    Embedding::new(vec![color[1] as f32 + 1.0, color[2] as f32 + 1.0, 10.0])
}

/// The color the fake swapper paints for `source`.
pub fn swap_color(source: &SourceIdentity) -> Rgb<u8> {
    let byte = |v: f32| (v.abs() * 255.0).round().min(255.0) as u8;
    let e = &source.normed_embedding.values;
    Rgb([0, byte(e[0]), byte(e.get(1).copied().unwrap_or(0.0))])
}

fn find_faces(frame: &Frame) -> Vec<DetectedFace> {
    let mut blocks: Vec<([u8; 3], u32, u32, u32, u32)> = Vec::new();
    for (x, y, pixel) in frame.enumerate_pixels() {
        if pixel.0[0] != 255 {
            continue;
        }
        match blocks.iter_mut().find(|b| b.0 == pixel.0) {
            Some(block) => {
                block.1 = block.1.min(x);
                block.2 = block.2.min(y);
                block.3 = block.3.max(x);
                block.4 = block.4.max(y);
            }
            None => blocks.push((pixel.0, x, y, x, y)),
        }
    }

    blocks
        .into_iter()
        .map(|(_, x1, y1, x2, y2)| {
            let bbox = BoundingBox::new(x1 as f32, y1 as f32, (x2 + 1) as f32, (y2 + 1) as f32);
            let (w, h) = (bbox.width(), bbox.height());
            let mut face = DetectedFace::new(bbox, 0.9);
            face.landmarks = Some([
                (bbox.x1 + 0.3 * w, bbox.y1 + 0.4 * h),
                (bbox.x1 + 0.7 * w, bbox.y1 + 0.4 * h),
                (bbox.x1 + 0.5 * w, bbox.y1 + 0.6 * h),
                (bbox.x1 + 0.35 * w, bbox.y1 + 0.8 * h),
                (bbox.x1 + 0.65 * w, bbox.y1 + 0.8 * h),
            ]);
            face
        })
        .collect()
}

#[derive(Default)]
pub struct FakeAnalyzer {
    /// Sizes at which faces are visible; `None` means every size.
    pub visible_sizes: Option<Vec<u32>>,
    /// Sizes at which detection returns a provider error.
    pub failing_sizes: Vec<u32>,
    pub embed_fails: bool,
    pub calls: Rc<RefCell<Vec<u32>>>,
    pub thresholds: Rc<RefCell<Vec<f32>>>,
}

impl FaceAnalyzer for FakeAnalyzer {
    fn detect(&mut self, frame: &Frame, input_size: u32, threshold: f32) -> AdapterResult<Vec<DetectedFace>> {
        self.calls.borrow_mut().push(input_size);
        self.thresholds.borrow_mut().push(threshold);

        if self.failing_sizes.contains(&input_size) {
            return Err(AdapterError::InferenceFailed(format!("fake failure at {input_size}")));
        }
        if let Some(sizes) = &self.visible_sizes {
            if !sizes.contains(&input_size) {
                return Ok(Vec::new());
            }
        }
        Ok(find_faces(frame))
    }

    fn embed(&mut self, frame: &Frame, face: &DetectedFace) -> AdapterResult<Embedding> {
        if self.embed_fails {
            return Err(AdapterError::InferenceFailed("fake embedding failure".into()));
        }
        let cx = ((face.bbox.x1 + face.bbox.x2) / 2.0) as u32;
        let cy = ((face.bbox.y1 + face.bbox.y2) / 2.0) as u32;
        Ok(fake_embedding(frame.get_pixel(cx, cy).0))
    }
}

pub struct FakeSwapper {
    pub fail: bool,
    pub swaps: Rc<Cell<usize>>,
}

impl FaceSwapper for FakeSwapper {
    fn swap(&mut self, frame: &Frame, target: &DetectedFace, source: &SourceIdentity) -> AdapterResult<Frame> {
        if self.fail {
            return Err(AdapterError::InferenceFailed("fake swap failure".into()));
        }
        self.swaps.set(self.swaps.get() + 1);

        let mut result = frame.clone();
        let color = swap_color(source);
        let b = target.bbox;
        for y in b.y1 as u32..(b.y2 as u32).min(frame.height()) {
            for x in b.x1 as u32..(b.x2 as u32).min(frame.width()) {
                result.put_pixel(x, y, color);
            }
        }
        Ok(result)
    }
}

pub struct FakeEnhancer {
    pub upscale: u32,
    pub background: bool,
    pub fail: bool,
    pub weights: Rc<RefCell<Vec<f32>>>,
}

impl FaceEnhancer for FakeEnhancer {
    fn upscale(&self) -> u32 {
        self.upscale
    }

    fn has_background_upsampler(&self) -> bool {
        self.background
    }

    fn upscale_background(&mut self, frame: &Frame) -> AdapterResult<Frame> {
        let (w, h) = frame.dimensions();
        Ok(imageops::resize(frame, w * self.upscale, h * self.upscale, FilterType::Nearest))
    }

    fn restore_faces(&mut self, frame: &Frame, _faces: &[DetectedFace], weight: f32) -> AdapterResult<Frame> {
        if self.fail {
            return Err(AdapterError::InferenceFailed("fake restoration failure".into()));
        }
        self.weights.borrow_mut().push(weight);
        Ok(frame.clone())
    }
}

#[derive(Default)]
pub struct FakeCounters {
    pub analyzers: Cell<usize>,
    pub swappers: Cell<usize>,
    pub enhancers: Cell<usize>,
}

#[derive(Default)]
pub struct FakeFactory {
    pub counters: Rc<FakeCounters>,
    pub visible_sizes: Option<Vec<u32>>,
    pub failing_sizes: Vec<u32>,
    pub embed_fails: bool,
    pub swap_fails: bool,
    pub enhance_fails: bool,
    pub background: bool,
    pub missing_analyzer: bool,
    pub missing_swapper: bool,
    pub missing_enhancer: bool,
    pub detect_calls: Rc<RefCell<Vec<u32>>>,
    pub swaps: Rc<Cell<usize>>,
    pub weights: Rc<RefCell<Vec<f32>>>,
}

impl AdapterFactory for FakeFactory {
    fn create_analyzer(&self) -> AdapterResult<Box<dyn FaceAnalyzer>> {
        if self.missing_analyzer {
            return Err(AdapterError::ModelNotFound("det_10g.onnx".into()));
        }
        self.counters.analyzers.set(self.counters.analyzers.get() + 1);
        Ok(Box::new(FakeAnalyzer {
            visible_sizes: self.visible_sizes.clone(),
            failing_sizes: self.failing_sizes.clone(),
            embed_fails: self.embed_fails,
            calls: self.detect_calls.clone(),
            thresholds: Rc::default(),
        }))
    }

    fn create_swapper(&self) -> AdapterResult<Box<dyn FaceSwapper>> {
        if self.missing_swapper {
            return Err(AdapterError::ModelNotFound("inswapper_128.onnx".into()));
        }
        self.counters.swappers.set(self.counters.swappers.get() + 1);
        Ok(Box::new(FakeSwapper {
            fail: self.swap_fails,
            swaps: self.swaps.clone(),
        }))
    }

    fn create_enhancer(&self, upscale: u32) -> AdapterResult<Box<dyn FaceEnhancer>> {
        if self.missing_enhancer {
            return Err(AdapterError::ModelNotFound("GFPGANv1.4.onnx".into()));
        }
        self.counters.enhancers.set(self.counters.enhancers.get() + 1);
        Ok(Box::new(FakeEnhancer {
            upscale,
            background: self.background,
            fail: self.enhance_fails,
            weights: self.weights.clone(),
        }))
    }
}
