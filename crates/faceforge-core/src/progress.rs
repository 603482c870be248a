//! Progress events for long-running jobs.

use serde::{Deserialize, Serialize};
use std::io::Write;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStatus {
    Downloading,
    Processing,
    Completed,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Percent complete, 0 to 100.
    pub progress: u32,
    pub current: usize,
    pub total: usize,
    pub eta_seconds: u64,
    pub filename: String,
    pub status: ProgressStatus,
}

impl ProgressEvent {
    /// Event for `current` of `total` items done after `elapsed`.
    pub fn new(
        current: usize,
        total: usize,
        elapsed: Duration,
        filename: impl Into<String>,
        status: ProgressStatus,
    ) -> Self {
        Self {
            progress: percent(current, total),
            current,
            total,
            eta_seconds: estimate_eta(elapsed, current, total),
            filename: filename.into(),
            status,
        }
    }
}

/// `current / total` as a whole percentage, capped at 100.
pub fn percent(current: usize, total: usize) -> u32 {
    if total == 0 {
        return 100;
    }
    ((current as f64 / total as f64) * 100.0).min(100.0) as u32
}

/// Remaining items times the average time per item so far, in whole seconds.
pub fn estimate_eta(elapsed: Duration, done: usize, total: usize) -> u64 {
    if done == 0 {
        return 0;
    }
    let remaining = total.saturating_sub(done) as f64;
    (remaining * elapsed.as_secs_f64() / done as f64) as u64
}

/// Receiver of a job's progress events, in emission order.
pub trait ProgressSink {
    fn emit(&mut self, event: &ProgressEvent);
}

/// Writes each event as one JSON line and flushes, so a host reading the
/// stream sees events as they happen.
pub struct JsonLinesSink<W: Write> {
    writer: W,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> ProgressSink for JsonLinesSink<W> {
    fn emit(&mut self, event: &ProgressEvent) {
        let written = serde_json::to_writer(&mut self.writer, event)
            .map_err(std::io::Error::from)
            .and_then(|_| self.writer.write_all(b"\n"))
            .and_then(|_| self.writer.flush());
        if let Err(e) = written {
            tracing::warn!(error = %e, "failed to write progress event");
        }
    }
}

impl ProgressSink for Vec<ProgressEvent> {
    fn emit(&mut self, event: &ProgressEvent) {
        self.push(event.clone());
    }
}
