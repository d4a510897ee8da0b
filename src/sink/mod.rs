//! Video sinks.
//!
//! A [`VideoSink`] consumes colour frames and produces some artifact: an MP4
//! file through ffmpeg, a directory of numbered images, or frames kept in
//! memory. [`VideoArtifact`] wraps a sink with the ordering and close-once
//! rules every recording must follow.

pub mod ffmpeg;
pub mod image_sequence;
pub mod memory;

pub use ffmpeg::FfmpegSink;
pub use image_sequence::ImageSequenceSink;
pub use memory::{MemorySink, MemorySinkHandle};

use crate::config::{RecordingConfig, SinkKind};
use crate::error::{AppResult, CameraError};
use chrono::{DateTime, Utc};
use image::{ImageFormat, RgbImage};
use std::path::{Path, PathBuf};

/// Destination for recorded frames.
pub trait VideoSink: Send {
    /// Append one frame. Frames arrive in capture order.
    fn write_frame(&mut self, frame: &RgbImage) -> AppResult<()>;

    /// Flush and finalize the artifact. Called exactly once.
    fn finish(&mut self) -> AppResult<()>;

    /// Where the artifact lives, if it is on disk.
    fn location(&self) -> Option<&Path>;
}

/// An open recording.
///
/// Frames must be appended with strictly increasing source indices. The sink
/// is finished exactly once, by [`VideoArtifact::close`] or on drop.
pub struct VideoArtifact {
    sink: Box<dyn VideoSink>,
    last_index: Option<u64>,
    written: u64,
    closed: bool,
}

impl VideoArtifact {
    /// Wrap `sink`; nothing is written until the first append.
    pub fn new(sink: Box<dyn VideoSink>) -> Self {
        Self {
            sink,
            last_index: None,
            written: 0,
            closed: false,
        }
    }

    /// Write the frame with source index `index`. Indices must increase.
    pub fn append(&mut self, index: u64, frame: &RgbImage) -> AppResult<()> {
        if self.closed {
            return Err(CameraError::Sink("recording is already closed".to_string()));
        }
        if let Some(last) = self.last_index {
            if index <= last {
                return Err(CameraError::Sink(format!(
                    "frame {index} appended after frame {last}"
                )));
            }
        }
        self.sink.write_frame(frame)?;
        self.last_index = Some(index);
        self.written += 1;
        Ok(())
    }

    /// Frames appended so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Finish the sink and return the artifact's location.
    pub fn close(&mut self) -> AppResult<Option<PathBuf>> {
        if self.closed {
            return Ok(self.sink.location().map(Path::to_path_buf));
        }
        self.closed = true;
        self.sink.finish()?;
        Ok(self.sink.location().map(Path::to_path_buf))
    }
}

impl Drop for VideoArtifact {
    fn drop(&mut self) {
        if !self.closed {
            self.closed = true;
            if let Err(e) = self.sink.finish() {
                tracing::warn!(error = %e, "Failed to finish recording on drop");
            }
        }
    }
}

/// `{prefix}{%Y%m%d_%H%M%S}{extension}`.
pub fn recording_name(prefix: &str, at: DateTime<Utc>, extension: &str) -> String {
    format!("{prefix}{}{extension}", at.format("%Y%m%d_%H%M%S"))
}

/// Open the configured sink for a `width` x `height` recording.
pub fn open_sink(
    config: &RecordingConfig,
    width: u32,
    height: u32,
    at: DateTime<Utc>,
) -> AppResult<Box<dyn VideoSink>> {
    std::fs::create_dir_all(&config.output_dir)?;
    let sink: Box<dyn VideoSink> = match config.sink {
        SinkKind::Ffmpeg => {
            let path = config
                .output_dir
                .join(recording_name(&config.file_prefix, at, ".mp4"));
            Box::new(FfmpegSink::spawn(
                &config.ffmpeg_program,
                &path,
                width,
                height,
                config.video_fps,
            )?)
        }
        SinkKind::Png | SinkKind::Tiff => {
            let format = if config.sink == SinkKind::Png {
                ImageFormat::Png
            } else {
                ImageFormat::Tiff
            };
            let dir = config
                .output_dir
                .join(recording_name(&config.file_prefix, at, ""));
            Box::new(ImageSequenceSink::create(dir, format)?)
        }
    };
    Ok(sink)
}
