//! MP4 output through an external ffmpeg process.
//!
//! Raw BGR24 frames are piped to ffmpeg's stdin; ffmpeg encodes them to
//! H.264 in an MP4 container. ffmpeg's diagnostics are forwarded to tracing.

use super::VideoSink;
use crate::error::{AppResult, CameraError};
use image::RgbImage;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};

/// Streams frames to an ffmpeg child process.
#[derive(Debug)]
pub struct FfmpegSink {
    child: Child,
    stdin: Option<ChildStdin>,
    path: PathBuf,
    width: u32,
    height: u32,
    scratch: Vec<u8>,
}

/// Command-line arguments for encoding `width` x `height` BGR24 frames to `path`.
pub fn encoder_args(path: &Path, width: u32, height: u32, fps: u32) -> Vec<String> {
    vec![
        "-hide_banner".into(),
        "-loglevel".into(),
        "error".into(),
        "-f".into(),
        "rawvideo".into(),
        "-pix_fmt".into(),
        "bgr24".into(),
        "-s".into(),
        format!("{width}x{height}"),
        "-r".into(),
        fps.to_string(),
        "-i".into(),
        "-".into(),
        "-an".into(),
        "-c:v".into(),
        "libx264".into(),
        "-pix_fmt".into(),
        "yuv420p".into(),
        "-y".into(),
        path.to_string_lossy().into_owned(),
    ]
}

impl FfmpegSink {
    /// Start ffmpeg writing to `path`.
    pub fn spawn(
        program: &Path,
        path: &Path,
        width: u32,
        height: u32,
        fps: u32,
    ) -> AppResult<Self> {
        let mut command = Command::new(program);
        command.args(encoder_args(path, width, height, fps));
        Self::from_command(command, path, width, height)
            .map_err(|e| CameraError::Sink(format!("failed to start {}: {e}", program.display())))
    }

    fn from_command(
        mut command: Command,
        path: &Path,
        width: u32,
        height: u32,
    ) -> std::io::Result<Self> {
        let mut child = command
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()?;

        if let Some(stderr) = child.stderr.take() {
            std::thread::spawn(move || {
                for line in BufReader::new(stderr).lines().map_while(Result::ok) {
                    tracing::warn!(target: "ffmpeg", "{line}");
                }
            });
        }

        tracing::info!(path = %path.display(), width, height, "Started ffmpeg encoder");
        Ok(Self {
            stdin: child.stdin.take(),
            child,
            path: path.to_path_buf(),
            width,
            height,
            scratch: Vec::with_capacity(width as usize * height as usize * 3),
        })
    }
}

impl VideoSink for FfmpegSink {
    fn write_frame(&mut self, frame: &RgbImage) -> AppResult<()> {
        if frame.dimensions() != (self.width, self.height) {
            return Err(CameraError::Sink(format!(
                "frame is {}x{}, encoder expects {}x{}",
                frame.width(),
                frame.height(),
                self.width,
                self.height
            )));
        }
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| CameraError::Sink("ffmpeg input is closed".to_string()))?;

        self.scratch.clear();
        for pixel in frame.pixels() {
            let [r, g, b] = pixel.0;
            self.scratch.extend_from_slice(&[b, g, r]);
        }
        stdin
            .write_all(&self.scratch)
            .map_err(|e| CameraError::Sink(format!("ffmpeg stopped accepting frames: {e}")))
    }

    fn finish(&mut self) -> AppResult<()> {
        drop(self.stdin.take());
        let status = self.child.wait()?;
        if status.success() {
            tracing::info!(path = %self.path.display(), "Video written");
            Ok(())
        } else {
            Err(CameraError::Sink(format!(
                "ffmpeg exited with {status} while writing {}",
                self.path.display()
            )))
        }
    }

    fn location(&self) -> Option<&Path> {
        Some(&self.path)
    }
}
