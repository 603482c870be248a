//! Directory-wide image swapping.

use crate::adapter::AdapterFactory;
use crate::error::{PipelineError, Result};
use crate::media::{self, BATCH_EXTENSIONS};
use crate::processor::FrameProcessor;
use crate::progress::{ProgressEvent, ProgressSink, ProgressStatus};
use crate::report::BatchSummary;
use crate::session::SessionManager;
use crate::types::{IdentityModel, PipelineConfig};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Prefix of every batch output file name.
pub const OUTPUT_PREFIX: &str = "swap_";

pub fn output_path_for(input: &Path, output_dir: &Path) -> PathBuf {
    let name = input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    output_dir.join(format!("{OUTPUT_PREFIX}{name}"))
}

#[derive(Debug, Clone, Default)]
pub struct BatchDriver {
    processor: FrameProcessor,
}

impl BatchDriver {
    pub fn new(processor: FrameProcessor) -> Self {
        Self { processor }
    }

    /// Swap every eligible image in `input_dir` into `output_dir`.
    ///
    /// Items that fail are logged and skipped; only an unreadable or empty
    /// input directory fails the job.
    pub fn run<F: AdapterFactory>(
        &self,
        sessions: &mut SessionManager<F>,
        identity: &IdentityModel,
        input_dir: &Path,
        output_dir: &Path,
        config: PipelineConfig,
        progress: &mut dyn ProgressSink,
    ) -> Result<BatchSummary> {
        let files = media::list_files(input_dir, BATCH_EXTENSIONS)?;
        if files.is_empty() {
            return Err(PipelineError::InputUnavailable(format!(
                "no images found in {}",
                input_dir.display()
            )));
        }
        fs::create_dir_all(output_dir)?;
        self.processor.prepare(sessions)?;

        let total = files.len();
        tracing::info!(total, dir = %input_dir.display(), "starting batch");

        let started = Instant::now();
        let mut processed = 0;
        for input in &files {
            let output = output_path_for(input, output_dir);
            let result = media::read_image_oriented(input)
                .and_then(|frame| self.processor.process(sessions, identity, &frame, config))
                .and_then(|frame| media::write_image(&output, &frame));

            match result {
                Ok(()) => {
                    processed += 1;
                    let filename = input
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_default();
                    let status = if processed == total {
                        ProgressStatus::Completed
                    } else {
                        ProgressStatus::Processing
                    };
                    progress.emit(&ProgressEvent::new(
                        processed,
                        total,
                        started.elapsed(),
                        filename,
                        status,
                    ));
                }
                Err(e) => {
                    tracing::warn!(file = %input.display(), reason = ?e.reason(), error = %e, "skipping item");
                }
            }
        }

        tracing::info!(processed, total, "batch finished");
        Ok(BatchSummary {
            success: true,
            count: processed,
            output_dir: output_dir.display().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{face_frame, sample_identity, FakeFace, FakeFactory};

    fn run(input: &Path, output: &Path, events: &mut Vec<ProgressEvent>) -> Result<BatchSummary> {
        let mut sessions = SessionManager::new(FakeFactory::default());
        BatchDriver::default().run(
            &mut sessions,
            &sample_identity(),
            input,
            output,
            PipelineConfig::default(),
            events,
        )
    }

    #[test]
    fn test_output_name_has_prefix() {
        assert_eq!(
            output_path_for(Path::new("/in/a.webp"), Path::new("/out")),
            PathBuf::from("/out/swap_a.webp")
        );
    }

    #[test]
    fn test_unreadable_and_faceless_items_are_skipped() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        let out_dir = output.path().join("results");

        for name in ["a.png", "b.png", "c.png"] {
            let frame = face_frame(80, 80, &[FakeFace::new(10, 10, 30, [255, 0, 0])]);
            media::write_image(&input.path().join(name), &frame).unwrap();
        }
        media::write_image(&input.path().join("empty.png"), &face_frame(80, 80, &[])).unwrap();
        fs::write(input.path().join("x.jpg"), b"broken").unwrap();
        fs::write(input.path().join("y.webp"), b"broken").unwrap();

        let mut events = Vec::new();
        let summary = run(input.path(), &out_dir, &mut events).unwrap();

        assert!(summary.success);
        assert_eq!(summary.count, 3);
        assert!(out_dir.join("swap_a.png").exists());
        assert!(!out_dir.join("swap_empty.png").exists());

        let currents: Vec<usize> = events.iter().map(|e| e.current).collect();
        assert_eq!(currents, vec![1, 2, 3]);
        assert!(events.iter().all(|e| e.total == 6));
    }

    #[test]
    fn test_last_item_completes_the_job() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        for name in ["a.png", "b.png"] {
            let frame = face_frame(60, 60, &[FakeFace::new(5, 5, 30, [255, 0, 0])]);
            media::write_image(&input.path().join(name), &frame).unwrap();
        }

        let mut events = Vec::new();
        run(input.path(), output.path(), &mut events).unwrap();

        let statuses: Vec<ProgressStatus> = events.iter().map(|e| e.status).collect();
        assert_eq!(statuses, vec![ProgressStatus::Processing, ProgressStatus::Completed]);
        assert_eq!(events[1].progress, 100);
    }

    #[test]
    fn test_empty_dir_is_job_error() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        fs::write(input.path().join("readme.txt"), b"no images").unwrap();

        let err = run(input.path(), output.path(), &mut Vec::new()).unwrap_err();
        assert!(matches!(err, PipelineError::InputUnavailable(_)));
    }

    #[test]
    fn test_missing_dir_is_job_error() {
        let output = tempfile::tempdir().unwrap();
        let err = run(&output.path().join("absent"), output.path(), &mut Vec::new()).unwrap_err();
        assert!(matches!(err, PipelineError::InputUnavailable(_)));
    }
}
