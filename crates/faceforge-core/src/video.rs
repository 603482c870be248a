//! Frame-by-frame video swapping.
//!
//! Decoding and encoding sit behind [`FrameSource`] and [`FrameSink`]; the
//! ffmpeg-backed implementations live in [`crate::ffmpeg`].

use crate::adapter::AdapterFactory;
use crate::error::{PipelineError, Result};
use crate::processor::FrameProcessor;
use crate::progress::{ProgressEvent, ProgressSink, ProgressStatus};
use crate::session::SessionManager;
use crate::types::{Frame, IdentityModel, PipelineConfig};
use image::imageops::{self, FilterType};
use std::time::Instant;

/// Default number of processed frames between progress events.
pub const DEFAULT_PROGRESS_INTERVAL: usize = 5;

#[derive(Debug, Clone, PartialEq)]
pub struct VideoInfo {
    pub width: u32,
    pub height: u32,
    pub frame_rate: f64,
    /// Seconds; zero when the container does not say.
    pub duration: f64,
}

impl VideoInfo {
    /// Expected frame count, estimated from duration and frame rate.
    pub fn estimated_frames(&self) -> usize {
        (self.duration * self.frame_rate).round().max(0.0) as usize
    }
}

/// Decoded frames in presentation order.
pub trait FrameSource {
    fn info(&self) -> &VideoInfo;

    /// The next frame, or `None` at end of stream.
    fn next_frame(&mut self) -> Result<Option<Frame>>;
}

pub trait FrameSink {
    fn write_frame(&mut self, frame: &Frame) -> Result<()>;

    /// Flush and close the output. Called once after the last frame.
    fn finish(&mut self) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct VideoDriver {
    processor: FrameProcessor,
    progress_interval: usize,
}

impl Default for VideoDriver {
    fn default() -> Self {
        Self::new(FrameProcessor::default(), DEFAULT_PROGRESS_INTERVAL)
    }
}

impl VideoDriver {
    pub fn new(processor: FrameProcessor, progress_interval: usize) -> Self {
        Self {
            processor,
            progress_interval: progress_interval.max(1),
        }
    }

    /// Swap every frame of `source` into `sink`, returning the number of
    /// frames written.
    ///
    /// Frames without a face, or whose processing fails, are written
    /// unchanged.
    #[allow(clippy::too_many_arguments)]
    pub fn run<F: AdapterFactory>(
        &self,
        sessions: &mut SessionManager<F>,
        identity: &IdentityModel,
        source: &mut dyn FrameSource,
        sink: &mut dyn FrameSink,
        config: PipelineConfig,
        filename: &str,
        progress: &mut dyn ProgressSink,
    ) -> Result<usize> {
        self.processor.prepare(sessions)?;

        let total = source.info().estimated_frames();
        tracing::info!(total, fps = source.info().frame_rate, "starting video");

        let started = Instant::now();
        let mut processed = 0;
        let mut last_reported = None;
        let mut frame_size = None;

        while let Some(frame) = source.next_frame()? {
            let mut output = match self.processor.process(sessions, identity, &frame, config) {
                Ok(swapped) => swapped,
                Err(PipelineError::NoFaceDetected) => frame,
                Err(e) => {
                    tracing::warn!(frame = processed + 1, reason = ?e.reason(), error = %e, "frame passed through");
                    frame
                }
            };

            let (w, h) = *frame_size.get_or_insert(output.dimensions());
            if output.dimensions() != (w, h) {
                output = imageops::resize(&output, w, h, FilterType::Triangle);
            }
            sink.write_frame(&output)?;
            processed += 1;

            if processed % self.progress_interval == 0 {
                let status = if processed >= total {
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
                last_reported = Some((processed, status));
            }
        }

        if processed == 0 {
            return Err(PipelineError::Video("no frames decoded".into()));
        }
        sink.finish()?;

        // The frame count is estimated from the container duration, so the
        // last interval event may still be short of 100%.
        if last_reported != Some((processed, ProgressStatus::Completed)) {
            progress.emit(&ProgressEvent {
                progress: 100,
                current: processed,
                total,
                eta_seconds: 0,
                filename: filename.to_string(),
                status: ProgressStatus::Completed,
            });
        }

        tracing::info!(processed, "video finished");
        Ok(processed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{face_frame, sample_identity, FakeFace, FakeFactory, BACKGROUND};

    struct MemorySource {
        info: VideoInfo,
        frames: std::vec::IntoIter<Frame>,
    }

    impl MemorySource {
        fn new(frames: Vec<Frame>, frame_rate: f64) -> Self {
            let (width, height) = frames.first().map(|f| f.dimensions()).unwrap_or((0, 0));
            Self {
                info: VideoInfo {
                    width,
                    height,
                    frame_rate,
                    duration: frames.len() as f64 / frame_rate,
                },
                frames: frames.into_iter(),
            }
        }
    }

    impl FrameSource for MemorySource {
        fn info(&self) -> &VideoInfo {
            &self.info
        }

        fn next_frame(&mut self) -> Result<Option<Frame>> {
            Ok(self.frames.next())
        }
    }

    #[derive(Default)]
    struct MemorySink {
        frames: Vec<Frame>,
        finished: bool,
    }

    impl FrameSink for MemorySink {
        fn write_frame(&mut self, frame: &Frame) -> Result<()> {
            self.frames.push(frame.clone());
            Ok(())
        }

        fn finish(&mut self) -> Result<()> {
            self.finished = true;
            Ok(())
        }
    }

    fn run_source(
        factory: FakeFactory,
        mut source: MemorySource,
        interval: usize,
    ) -> (MemorySink, Vec<ProgressEvent>) {
        let mut sessions = SessionManager::new(factory);
        let mut sink = MemorySink::default();
        let mut events = Vec::new();

        VideoDriver::new(FrameProcessor::default(), interval)
            .run(
                &mut sessions,
                &sample_identity(),
                &mut source,
                &mut sink,
                PipelineConfig::default(),
                "clip.mp4",
                &mut events,
            )
            .unwrap();
        (sink, events)
    }

    fn run_frames(frames: Vec<Frame>, interval: usize) -> (MemorySink, Vec<ProgressEvent>) {
        run_source(FakeFactory::default(), MemorySource::new(frames, 30.0), interval)
    }

    fn face() -> Frame {
        face_frame(64, 48, &[FakeFace::new(10, 10, 20, [255, 0, 0])])
    }

    #[test]
    fn test_estimated_frames() {
        let info = VideoInfo {
            width: 1,
            height: 1,
            frame_rate: 29.97,
            duration: 2.0,
        };
        assert_eq!(info.estimated_frames(), 60);
    }

    #[test]
    fn test_sixty_frames_report_every_fifth() {
        let (sink, events) = run_frames(vec![face(); 60], 5);

        let currents: Vec<usize> = events.iter().map(|e| e.current).collect();
        assert_eq!(currents, (1..=12).map(|i| i * 5).collect::<Vec<_>>());
        let last = events.last().unwrap();
        assert_eq!(last.progress, 100);
        assert_eq!(last.status, ProgressStatus::Completed);
        assert!(events.iter().all(|e| e.total == 60));
        assert_eq!(sink.frames.len(), 60);
        assert!(sink.finished);
    }

    #[test]
    fn test_unreported_tail_gets_final_event() {
        let (_, events) = run_frames(vec![face(); 12], 5);

        let currents: Vec<usize> = events.iter().map(|e| e.current).collect();
        assert_eq!(currents, vec![5, 10, 12]);
        assert_eq!(events[2].progress, 100);
        assert_eq!(events[2].status, ProgressStatus::Completed);
    }

    #[test]
    fn test_overestimated_length_still_completes() {
        let mut source = MemorySource::new(vec![face(); 60], 30.0);
        source.info.duration = 2.07;
        let (sink, events) = run_source(FakeFactory::default(), source, 5);

        assert_eq!(sink.frames.len(), 60);
        let [.., boundary, last] = &events[..] else {
            panic!("expected at least two events");
        };
        assert_eq!((boundary.current, boundary.total), (60, 62));
        assert_eq!(boundary.status, ProgressStatus::Processing);
        assert_eq!((last.current, last.progress), (60, 100));
        assert_eq!(last.status, ProgressStatus::Completed);
    }

    #[test]
    fn test_failed_swap_passes_frame_through() {
        let factory = FakeFactory {
            swap_fails: true,
            ..FakeFactory::default()
        };
        let frames = vec![face(); 3];
        let (sink, events) = run_source(factory, MemorySource::new(frames.clone(), 30.0), 5);

        assert_eq!(sink.frames, frames);
        assert!(sink.finished);
        assert_eq!(events.last().map(|e| e.status), Some(ProgressStatus::Completed));
    }

    #[test]
    fn test_faceless_frames_pass_through() {
        let empty = face_frame(64, 48, &[]);
        let (sink, _) = run_frames(vec![face(), empty.clone()], 5);

        assert_ne!(sink.frames[0], face());
        assert_eq!(sink.frames[1], empty);
        assert_eq!(*sink.frames[1].get_pixel(20, 20), BACKGROUND);
    }

    #[test]
    fn test_frames_resized_to_first_size() {
        let (sink, _) = run_frames(vec![face(), face_frame(32, 24, &[])], 5);
        assert_eq!(sink.frames[1].dimensions(), (64, 48));
    }

    #[test]
    fn test_empty_stream_is_error() {
        let mut sessions = SessionManager::new(FakeFactory::default());
        let mut source = MemorySource::new(Vec::new(), 25.0);
        let mut sink = MemorySink::default();

        let err = VideoDriver::default()
            .run(
                &mut sessions,
                &sample_identity(),
                &mut source,
                &mut sink,
                PipelineConfig::default(),
                "empty.mp4",
                &mut Vec::new(),
            )
            .unwrap_err();
        assert!(matches!(err, PipelineError::Video(_)));
    }
}
