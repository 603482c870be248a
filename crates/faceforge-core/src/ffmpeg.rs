//! Video I/O through the `ffprobe` and `ffmpeg` executables.
//!
//! Frames travel as raw `rgb24` over the child processes' pipes. The encoder
//! is started on the first frame so its size matches what the pipeline
//! actually produces (enhancement may upscale).

use crate::error::{PipelineError, Result};
use crate::types::Frame;
use crate::video::{FrameSink, FrameSource, VideoInfo};
use serde::Deserialize;
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

#[derive(Debug, Clone)]
pub struct FfmpegSettings {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
    pub video_codec: String,
    pub pixel_format: String,
    pub audio_codec: String,
}

impl Default for FfmpegSettings {
    fn default() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
            video_codec: "libx264".into(),
            pixel_format: "yuv420p".into(),
            audio_codec: "aac".into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    duration: Option<String>,
    #[serde(default)]
    side_data_list: Vec<ProbeSideData>,
    tags: Option<ProbeTags>,
}

#[derive(Debug, Deserialize)]
struct ProbeSideData {
    rotation: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ProbeTags {
    rotate: Option<String>,
}

impl ProbeStream {
    /// Display rotation in degrees, normalized to [0, 360).
    fn rotation(&self) -> i64 {
        let degrees = self
            .side_data_list
            .iter()
            .find_map(|d| d.rotation)
            .or_else(|| {
                self.tags
                    .as_ref()
                    .and_then(|t| t.rotate.as_deref())
                    .and_then(|r| r.trim().parse().ok())
            })
            .unwrap_or(0.0);
        (degrees.round() as i64).rem_euclid(360)
    }
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

/// Parse an ffprobe rate such as `30000/1001` or `25`.
pub fn parse_frame_rate(rate: &str) -> Option<f64> {
    let value = match rate.split_once('/') {
        Some((num, den)) => {
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num.trim().parse::<f64>().ok()? / den
        }
        None => rate.trim().parse().ok()?,
    };
    (value.is_finite() && value > 0.0).then_some(value)
}

fn parse_probe(json: &[u8]) -> Result<VideoInfo> {
    let probe: ProbeOutput = serde_json::from_slice(json)?;
    let stream = probe
        .streams
        .into_iter()
        .next()
        .ok_or_else(|| PipelineError::Video("no video stream".into()))?;

    let (width, height) = match (stream.width, stream.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
        _ => return Err(PipelineError::Video("video stream has no dimensions".into())),
    };
    // The decoder applies the display rotation, so quarter turns swap the axes.
    let (width, height) = match stream.rotation() {
        90 | 270 => (height, width),
        _ => (width, height),
    };
    let frame_rate = stream
        .r_frame_rate
        .as_deref()
        .and_then(parse_frame_rate)
        .ok_or_else(|| PipelineError::Video("video stream has no frame rate".into()))?;
    let duration = stream
        .duration
        .or_else(|| probe.format.and_then(|f| f.duration))
        .and_then(|d| d.parse::<f64>().ok())
        .unwrap_or(0.0);

    Ok(VideoInfo {
        width,
        height,
        frame_rate,
        duration,
    })
}

/// Read stream metadata of the first video stream in `path`.
pub fn probe(settings: &FfmpegSettings, path: &Path) -> Result<VideoInfo> {
    if !path.exists() {
        return Err(PipelineError::InputUnavailable(format!(
            "video not found: {}",
            path.display()
        )));
    }

    let output = Command::new(&settings.ffprobe)
        .args(["-v", "error", "-select_streams", "v:0"])
        .args([
            "-show_entries",
            "stream=width,height,r_frame_rate,duration:stream_side_data=rotation:stream_tags=rotate:format=duration",
        ])
        .args(["-of", "json"])
        .arg(path)
        .output()
        .map_err(|e| spawn_failure(&settings.ffprobe, e))?;

    if !output.status.success() {
        return Err(PipelineError::InputUnavailable(format!(
            "ffprobe failed on {}: {}",
            path.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    let info = parse_probe(&output.stdout)?;
    tracing::info!(
        width = info.width,
        height = info.height,
        fps = info.frame_rate,
        duration = info.duration,
        "probed video"
    );
    Ok(info)
}

fn spawn_failure(program: &Path, e: std::io::Error) -> PipelineError {
    PipelineError::Video(format!("cannot run {}: {e}", program.display()))
}

pub struct FfmpegDecoder {
    child: Child,
    stdout: ChildStdout,
    info: VideoInfo,
    frame_len: usize,
}

impl FfmpegDecoder {
    pub fn open(settings: &FfmpegSettings, path: &Path) -> Result<Self> {
        let info = probe(settings, path)?;

        let mut child = Command::new(&settings.ffmpeg)
            .args(["-v", "error", "-nostdin", "-i"])
            .arg(path)
            .args(["-map", "0:v:0", "-f", "rawvideo", "-pix_fmt", "rgb24", "-"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| spawn_failure(&settings.ffmpeg, e))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| PipelineError::Video("decoder stdout unavailable".into()))?;
        let frame_len = info.width as usize * info.height as usize * 3;

        Ok(Self {
            child,
            stdout,
            info,
            frame_len,
        })
    }
}

impl FrameSource for FfmpegDecoder {
    fn info(&self) -> &VideoInfo {
        &self.info
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let mut buf = vec![0u8; self.frame_len];
        let mut filled = 0;
        while filled < buf.len() {
            match self.stdout.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        if filled == 0 {
            return Ok(None);
        }
        if filled < buf.len() {
            tracing::warn!(bytes = filled, "dropping truncated final frame");
            return Ok(None);
        }

        Frame::from_raw(self.info.width, self.info.height, buf)
            .map(Some)
            .ok_or_else(|| PipelineError::Video("decoded frame has wrong size".into()))
    }
}

impl Drop for FfmpegDecoder {
    fn drop(&mut self) {
        // Stop a decoder that is still producing when the job ends early.
        if let Ok(None) = self.child.try_wait() {
            let _ = self.child.kill();
        }
        let _ = self.child.wait();
    }
}

struct EncoderProcess {
    child: Child,
    stdin: ChildStdin,
    width: u32,
    height: u32,
}

/// H.264 encoder muxing in the audio of the source video, if it has any.
pub struct FfmpegEncoder {
    settings: FfmpegSettings,
    audio_source: PathBuf,
    output: PathBuf,
    frame_rate: f64,
    process: Option<EncoderProcess>,
}

impl FfmpegEncoder {
    pub fn new(settings: FfmpegSettings, audio_source: &Path, output: &Path, frame_rate: f64) -> Self {
        Self {
            settings,
            audio_source: audio_source.to_path_buf(),
            output: output.to_path_buf(),
            frame_rate,
            process: None,
        }
    }

    fn spawn(&self, width: u32, height: u32) -> Result<EncoderProcess> {
        if let Some(parent) = self.output.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let size = format!("{width}x{height}");
        let rate = format!("{}", self.frame_rate);
        let mut child = Command::new(&self.settings.ffmpeg)
            .args(["-v", "error", "-y"])
            .args(["-f", "rawvideo", "-pix_fmt", "rgb24", "-s", size.as_str(), "-r", rate.as_str(), "-i", "-"])
            .arg("-i")
            .arg(&self.audio_source)
            .args(["-map", "0:v:0", "-map", "1:a?"])
            .args(["-c:v", self.settings.video_codec.as_str(), "-pix_fmt", self.settings.pixel_format.as_str()])
            .args(["-c:a", self.settings.audio_codec.as_str(), "-shortest"])
            .arg(&self.output)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| spawn_failure(&self.settings.ffmpeg, e))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| PipelineError::Video("encoder stdin unavailable".into()))?;

        tracing::info!(size = %size, fps = %rate, output = %self.output.display(), "encoder started");
        Ok(EncoderProcess {
            child,
            stdin,
            width,
            height,
        })
    }
}

impl FrameSink for FfmpegEncoder {
    fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        if self.process.is_none() {
            self.process = Some(self.spawn(frame.width(), frame.height())?);
        }
        let Some(process) = self.process.as_mut() else {
            return Err(PipelineError::Video("encoder not running".into()));
        };

        if frame.dimensions() != (process.width, process.height) {
            return Err(PipelineError::Video(format!(
                "frame is {}x{}, encoder expects {}x{}",
                frame.width(),
                frame.height(),
                process.width,
                process.height
            )));
        }
        process
            .stdin
            .write_all(frame.as_raw())
            .map_err(|e| PipelineError::Video(format!("encoder pipe closed: {e}")))
    }

    fn finish(&mut self) -> Result<()> {
        let Some(EncoderProcess { mut child, stdin, .. }) = self.process.take() else {
            return Ok(());
        };
        drop(stdin);

        let status = child.wait()?;
        if !status.success() {
            return Err(PipelineError::Video(format!("ffmpeg exited with {status}")));
        }
        tracing::info!(output = %self.output.display(), "video encoded");
        Ok(())
    }
}
