//! In-memory sink.

use super::VideoSink;
use crate::error::AppResult;
use image::RgbImage;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Default)]
struct Recorded {
    frames: Vec<RgbImage>,
    finished: usize,
}

/// Keeps every frame in memory; the paired handle reads them back.
#[derive(Debug)]
pub struct MemorySink {
    recorded: Arc<Mutex<Recorded>>,
}

/// Read side of a [`MemorySink`].
#[derive(Debug, Clone)]
pub struct MemorySinkHandle {
    recorded: Arc<Mutex<Recorded>>,
}

impl MemorySink {
    /// Sink plus the handle that reads it back.
    pub fn new() -> (Self, MemorySinkHandle) {
        let recorded = Arc::new(Mutex::new(Recorded::default()));
        (
            Self {
                recorded: Arc::clone(&recorded),
            },
            MemorySinkHandle { recorded },
        )
    }
}

impl MemorySinkHandle {
    /// Frames written so far.
    pub fn frames(&self) -> Vec<RgbImage> {
        self.recorded.lock().frames.clone()
    }

    /// Whether the sink was finished.
    pub fn is_closed(&self) -> bool {
        self.recorded.lock().finished > 0
    }

    /// How many times the sink was finished.
    pub fn finish_count(&self) -> usize {
        self.recorded.lock().finished
    }
}

impl VideoSink for MemorySink {
    fn write_frame(&mut self, frame: &RgbImage) -> AppResult<()> {
        self.recorded.lock().frames.push(frame.clone());
        Ok(())
    }

    fn finish(&mut self) -> AppResult<()> {
        self.recorded.lock().finished += 1;
        Ok(())
    }

    fn location(&self) -> Option<&Path> {
        None
    }
}
