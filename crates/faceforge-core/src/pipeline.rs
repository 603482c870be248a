//! The orchestrator behind every command.

use crate::adapter::AdapterFactory;
use crate::adaptive::AdaptiveDetector;
use crate::batch::BatchDriver;
use crate::error::{PipelineError, Result};
use crate::ffmpeg::{FfmpegDecoder, FfmpegEncoder, FfmpegSettings};
use crate::identity::{self, IdentityModelBuilder, DEFAULT_PREVIEW_MARGIN};
use crate::media::{self, SAMPLE_EXTENSIONS};
use crate::processor::FrameProcessor;
use crate::progress::ProgressSink;
use crate::report::{BatchSummary, DetectionReport, FileDetection, SwapResult, TrainResult};
use crate::session::SessionManager;
use crate::swap::SwapEngine;
use crate::types::PipelineConfig;
use crate::video::{FrameSource, VideoDriver, DEFAULT_PROGRESS_INTERVAL};
use std::path::Path;

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub detector: AdaptiveDetector,
    pub preview_margin: u32,
    /// Processed video frames between progress events.
    pub progress_interval: usize,
    pub ffmpeg: FfmpegSettings,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            detector: AdaptiveDetector::default(),
            preview_margin: DEFAULT_PREVIEW_MARGIN,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            ffmpeg: FfmpegSettings::default(),
        }
    }
}

/// Owns the adapter cache for one process and runs jobs against it.
pub struct FacePipeline<F: AdapterFactory> {
    sessions: SessionManager<F>,
    options: PipelineOptions,
}

impl<F: AdapterFactory> FacePipeline<F> {
    pub fn new(factory: F, options: PipelineOptions) -> Self {
        Self {
            sessions: SessionManager::new(factory),
            options,
        }
    }

    pub fn sessions(&mut self) -> &mut SessionManager<F> {
        &mut self.sessions
    }

    fn processor(&self) -> FrameProcessor {
        FrameProcessor::new(SwapEngine::new(self.options.detector.clone()))
    }

    /// Per-file face counts for the samples in `dataset`.
    ///
    /// Undecodable files count towards `total_images` but get no entry.
    pub fn detect_faces(&mut self, dataset: &Path) -> Result<DetectionReport> {
        if !dataset.is_dir() {
            return Err(PipelineError::InputUnavailable(format!(
                "dataset path does not exist: {}",
                dataset.display()
            )));
        }
        let files = media::list_files(dataset, SAMPLE_EXTENSIONS)?;
        let analyzer = self.sessions.analyzer()?;

        let mut results = Vec::with_capacity(files.len());
        for path in &files {
            let Ok(frame) = media::read_image(path) else {
                tracing::debug!(file = %path.display(), "skipping undecodable file");
                continue;
            };
            let file = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();

            let entry = match self.options.detector.detect_with_report(analyzer, &frame) {
                Ok(faces) => FileDetection::Ok {
                    file,
                    faces_count: faces.len(),
                },
                Err(e) => {
                    tracing::warn!(file = %file, reason = ?e.reason(), error = %e, "detection failed");
                    FileDetection::Error {
                        file,
                        message: e.to_string(),
                    }
                }
            };
            results.push(entry);
        }

        Ok(DetectionReport {
            results,
            total_images: files.len(),
        })
    }

    pub fn train(&mut self, dataset: &Path, output: &Path, name: &str) -> Result<TrainResult> {
        let builder = IdentityModelBuilder::new(
            self.options.detector.clone(),
            self.options.preview_margin,
        );
        builder.build(&mut self.sessions, dataset, output, name)
    }

    /// Swap the identity in `model_path` into one image.
    pub fn swap_image(
        &mut self,
        model_path: &Path,
        target: &Path,
        output: &Path,
        config: PipelineConfig,
    ) -> Result<SwapResult> {
        let model = identity::load_model(model_path)?;
        let frame = media::read_image_oriented(target)?;

        let result = self.processor().process(&mut self.sessions, &model, &frame, config)?;
        media::write_image(output, &result)?;
        tracing::info!(output = %output.display(), "swap saved");

        Ok(SwapResult {
            success: true,
            output_path: output.display().to_string(),
        })
    }

    pub fn batch_swap(
        &mut self,
        model_path: &Path,
        input_dir: &Path,
        output_dir: &Path,
        config: PipelineConfig,
        progress: &mut dyn ProgressSink,
    ) -> Result<BatchSummary> {
        let model = identity::load_model(model_path)?;
        BatchDriver::new(self.processor()).run(
            &mut self.sessions,
            &model,
            input_dir,
            output_dir,
            config,
            progress,
        )
    }

    pub fn video_swap(
        &mut self,
        model_path: &Path,
        input: &Path,
        output: &Path,
        config: PipelineConfig,
        progress: &mut dyn ProgressSink,
    ) -> Result<BatchSummary> {
        let model = identity::load_model(model_path)?;
        let mut decoder = FfmpegDecoder::open(&self.options.ffmpeg, input)?;
        let mut encoder = FfmpegEncoder::new(
            self.options.ffmpeg.clone(),
            input,
            output,
            decoder.info().frame_rate,
        );
        let filename = input
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let driver = VideoDriver::new(self.processor(), self.options.progress_interval);
        let count = driver.run(
            &mut self.sessions,
            &model,
            &mut decoder,
            &mut encoder,
            config,
            &filename,
            progress,
        )?;

        Ok(BatchSummary {
            success: true,
            count,
            output_dir: output.display().to_string(),
        })
    }
}
