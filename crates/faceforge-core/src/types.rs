use serde::{Deserialize, Serialize};

/// Frames flow through the pipeline as packed 8-bit RGB.
pub type Frame = image::RgbImage;

/// Axis-aligned face box in frame pixel coordinates: `(x1, y1)` top-left, `(x2, y2)` bottom-right.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    /// Intersection-over-Union with another box.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let x1 = self.x1.max(other.x1);
        let y1 = self.y1.max(other.y1);
        let x2 = self.x2.min(other.x2);
        let y2 = self.y2.min(other.y2);

        let inter_area = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
        let union_area = self.area() + other.area() - inter_area;

        if union_area > 0.0 {
            inter_area / union_area
        } else {
            0.0
        }
    }

    /// Integer crop rectangle `(x, y, width, height)`: the box grown by `margin`
    /// pixels on every side, clamped to a `width × height` image.
    pub fn padded_crop(&self, margin: u32, width: u32, height: u32) -> (u32, u32, u32, u32) {
        let m = margin as i64;
        let x1 = (self.x1 as i64 - m).clamp(0, width as i64);
        let y1 = (self.y1 as i64 - m).clamp(0, height as i64);
        let x2 = (self.x2 as i64 + m).clamp(0, width as i64);
        let y2 = (self.y2 as i64 + m).clamp(0, height as i64);
        (
            x1 as u32,
            y1 as u32,
            (x2 - x1).max(0) as u32,
            (y2 - y1).max(0) as u32,
        )
    }

    /// The same box in a frame scaled uniformly by `factor`.
    pub fn scaled(&self, factor: f32) -> Self {
        Self {
            x1: self.x1 * factor,
            y1: self.y1 * factor,
            x2: self.x2 * factor,
            y2: self.y2 * factor,
        }
    }
}

/// A face found by one detection call. Not persisted.
#[derive(Debug, Clone)]
pub struct DetectedFace {
    pub bbox: BoundingBox,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
    pub embedding: Option<Embedding>,
}

impl DetectedFace {
    pub fn new(bbox: BoundingBox, confidence: f32) -> Self {
        Self {
            bbox,
            confidence,
            landmarks: None,
            embedding: None,
        }
    }

    /// Landmarks and box mapped into a frame scaled by `factor`.
    pub fn scaled(&self, factor: f32) -> Self {
        Self {
            bbox: self.bbox.scaled(factor),
            confidence: self.confidence,
            landmarks: self
                .landmarks
                .map(|lms| lms.map(|(x, y)| (x * factor, y * factor))),
            embedding: self.embedding.clone(),
        }
    }
}

/// Face embedding vector (512-dimensional for ArcFace w600k_r50).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    /// Euclidean (L2) norm.
    pub fn norm(&self) -> f32 {
        self.values.iter().map(|v| v * v).sum::<f32>().sqrt()
    }

    /// Unit-length copy. A zero vector is returned unchanged.
    pub fn normalized(&self) -> Embedding {
        let norm = self.norm();
        if norm > 0.0 {
            Embedding::new(self.values.iter().map(|v| v / norm).collect())
        } else {
            self.clone()
        }
    }

    /// Element-wise mean of equally sized embeddings.
    ///
    /// Returns `None` for an empty slice or when dimensions disagree.
    pub fn mean(embeddings: &[Embedding]) -> Option<Embedding> {
        let dim = embeddings.first()?.values.len();
        if embeddings.iter().any(|e| e.values.len() != dim) {
            return None;
        }

        let mut sum = vec![0.0f64; dim];
        for embedding in embeddings {
            for (acc, v) in sum.iter_mut().zip(&embedding.values) {
                *acc += *v as f64;
            }
        }
        let count = embeddings.len() as f64;
        Some(Embedding::new(
            sum.into_iter().map(|v| (v / count) as f32).collect(),
        ))
    }
}

/// Version tag written into every identity model.
pub const IDENTITY_MODEL_VERSION: &str = "1.0";

/// A persisted identity: the normalized mean embedding of a person's sample faces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityModel {
    pub name: String,
    /// ISO-8601 creation timestamp.
    pub created_at: String,
    /// Unit-length identity vector.
    pub embedding: Vec<f32>,
    pub version: String,
    pub source_images_count: usize,
}

/// Per-job processing options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineConfig {
    pub enhance: bool,
    /// Upscale factor for enhancement, always ≥ 1.
    pub upscale: u32,
}

impl PipelineConfig {
    pub fn new(enhance: bool, upscale: u32) -> Self {
        Self {
            enhance,
            upscale: upscale.max(1),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::new(false, 1)
    }
}
