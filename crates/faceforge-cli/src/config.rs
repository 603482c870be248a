use anyhow::{Context, Result};
use faceforge_core::ffmpeg::FfmpegSettings;
use faceforge_core::{AdaptiveDetector, ModelPaths, PipelineOptions};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Runtime configuration: defaults, then the TOML file named by
/// `FACEFORGE_CONFIG`, then `FACEFORGE_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    /// Minimum detector score for a face.
    pub detection_threshold: f32,
    /// Detector input sizes, tried in order.
    pub detection_sizes: Vec<u32>,
    /// Padding around the preview crop written next to a trained model.
    pub preview_margin: u32,
    /// Processed video frames between progress events.
    pub progress_interval: usize,
    /// ONNX Runtime intra-op threads per session.
    pub intra_threads: usize,
    pub ffmpeg_path: PathBuf,
    pub ffprobe_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        let options = PipelineOptions::default();
        Self {
            model_dir: faceforge_core::default_model_dir(),
            detection_threshold: options.detector.threshold(),
            detection_sizes: options.detector.sizes().to_vec(),
            preview_margin: options.preview_margin,
            progress_interval: options.progress_interval,
            intra_threads: 4,
            ffmpeg_path: options.ffmpeg.ffmpeg,
            ffprobe_path: options.ffmpeg.ffprobe,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let mut config = match std::env::var("FACEFORGE_CONFIG") {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(dir) = lookup("FACEFORGE_MODEL_DIR") {
            self.model_dir = PathBuf::from(dir);
        }
        self.detection_threshold =
            env_parse(&lookup, "FACEFORGE_DETECTION_THRESHOLD", self.detection_threshold);
        if let Some(sizes) = lookup("FACEFORGE_DETECTION_SIZES").and_then(|v| parse_sizes(&v)) {
            self.detection_sizes = sizes;
        }
        self.preview_margin = env_parse(&lookup, "FACEFORGE_PREVIEW_MARGIN", self.preview_margin);
        self.progress_interval =
            env_parse(&lookup, "FACEFORGE_PROGRESS_INTERVAL", self.progress_interval);
        self.intra_threads = env_parse(&lookup, "FACEFORGE_INTRA_THREADS", self.intra_threads);
        if let Some(path) = lookup("FACEFORGE_FFMPEG") {
            self.ffmpeg_path = PathBuf::from(path);
        }
        if let Some(path) = lookup("FACEFORGE_FFPROBE") {
            self.ffprobe_path = PathBuf::from(path);
        }
    }

    pub fn model_paths(&self) -> ModelPaths {
        ModelPaths::in_dir(&self.model_dir)
    }

    pub fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            detector: AdaptiveDetector::new(self.detection_sizes.clone(), self.detection_threshold),
            preview_margin: self.preview_margin,
            progress_interval: self.progress_interval,
            ffmpeg: FfmpegSettings {
                ffmpeg: self.ffmpeg_path.clone(),
                ffprobe: self.ffprobe_path.clone(),
                ..FfmpegSettings::default()
            },
        }
    }
}

fn env_parse<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> T {
    lookup(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

/// Comma-separated positive sizes, e.g. `640,320,1280`.
fn parse_sizes(value: &str) -> Option<Vec<u32>> {
    let sizes: Vec<u32> = value
        .split(',')
        .map(|s| s.trim().parse().ok().filter(|&n: &u32| n > 0))
        .collect::<Option<_>>()?;
    (!sizes.is_empty()).then_some(sizes)
}
