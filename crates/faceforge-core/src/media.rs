//! Image files on disk.

use crate::error::{PipelineError, Result};
use crate::types::Frame;
use image::{DynamicImage, ImageDecoder, ImageReader};
use std::fs;
use std::path::{Path, PathBuf};

/// Sample formats accepted for identity training.
pub const SAMPLE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

/// Target formats accepted for batch swapping.
pub const BATCH_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp"];

pub fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| extensions.iter().any(|x| x.eq_ignore_ascii_case(e)))
        .unwrap_or(false)
}

/// Regular files in `dir` with one of `extensions`, in directory-listing order.
pub fn list_files(dir: &Path, extensions: &[&str]) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(dir).map_err(|e| {
        PipelineError::InputUnavailable(format!("{}: {e}", dir.display()))
    })?;

    let mut files = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.is_file() && has_extension(&path, extensions) {
            files.push(path);
        }
    }
    Ok(files)
}

/// Decode `path` as RGB, ignoring EXIF orientation.
pub fn read_image(path: &Path) -> Result<Frame> {
    image::open(path)
        .map(|img| img.to_rgb8())
        .map_err(|e| read_failure(path, e))
}

/// Decode `path` as RGB with the EXIF orientation applied.
pub fn read_image_oriented(path: &Path) -> Result<Frame> {
    let decode = || -> image::ImageResult<DynamicImage> {
        let mut decoder = ImageReader::open(path)?.with_guessed_format()?.into_decoder()?;
        let orientation = decoder.orientation()?;
        let mut img = DynamicImage::from_decoder(decoder)?;
        img.apply_orientation(orientation);
        Ok(img)
    };
    decode()
        .map(|img| img.to_rgb8())
        .map_err(|e| read_failure(path, e))
}

/// Encode `frame` to `path` (format from the extension), creating parent
/// directories as needed.
pub fn write_image(path: &Path, frame: &Frame) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    frame.save(path)?;
    Ok(())
}

fn read_failure(path: &Path, e: impl std::fmt::Display) -> PipelineError {
    PipelineError::ImageReadFailure {
        path: path.display().to_string(),
        reason: e.to_string(),
    }
}
