//! Numbered image files, one per frame.

use super::VideoSink;
use crate::error::{AppResult, CameraError};
use image::{ImageFormat, RgbImage};
use std::path::{Path, PathBuf};

/// Writes `frame_000001.png`, `frame_000002.png`, ... into one directory.
#[derive(Debug)]
pub struct ImageSequenceSink {
    dir: PathBuf,
    format: ImageFormat,
    next: u64,
}

impl ImageSequenceSink {
    /// Create `dir` (and parents) and write into it.
    pub fn create(dir: impl Into<PathBuf>, format: ImageFormat) -> AppResult<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            format,
            next: 1,
        })
    }

    fn extension(&self) -> &'static str {
        match self.format {
            ImageFormat::Png => "png",
            ImageFormat::Tiff => "tiff",
            _ => "img",
        }
    }

    /// Path of the `n`th frame, counted from 1.
    pub fn frame_path(&self, n: u64) -> PathBuf {
        self.dir.join(format!("frame_{n:06}.{}", self.extension()))
    }
}

impl VideoSink for ImageSequenceSink {
    fn write_frame(&mut self, frame: &RgbImage) -> AppResult<()> {
        let path = self.frame_path(self.next);
        frame
            .save_with_format(&path, self.format)
            .map_err(|e| CameraError::Sink(format!("failed to write {}: {e}", path.display())))?;
        self.next += 1;
        Ok(())
    }

    fn finish(&mut self) -> AppResult<()> {
        tracing::debug!(dir = %self.dir.display(), frames = self.next - 1, "Image sequence closed");
        Ok(())
    }

    fn location(&self) -> Option<&Path> {
        Some(&self.dir)
    }
}
