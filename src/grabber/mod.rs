//! Frame grabber device contract.
//!
//! The grabber owns a ring region of `capacity` frames. Frames are addressed
//! by a logical index that starts at 1 and only ever increases; storage wraps
//! modulo `capacity`. Index 0 means "nothing captured yet".
//!
//! The trait mirrors the vendor SDK, which is synchronous: every call returns
//! promptly and capture itself happens in the background on the device.

use crate::error::AppResult;
use crate::frame::Frame;
use std::fmt;

/// Grabber-side parameters that follow camera settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GrabberParameter {
    /// Window width.
    Width,
    /// Window height.
    Height,
    /// Frame rate the grabber expects from the camera.
    FramesPerSec,
}

impl GrabberParameter {
    /// SDK name of the parameter.
    pub fn sdk_name(self) -> &'static str {
        match self {
            GrabberParameter::Width => "FG_WIDTH",
            GrabberParameter::Height => "FG_HEIGHT",
            GrabberParameter::FramesPerSec => "FG_FRAMESPERSEC",
        }
    }
}

impl fmt::Display for GrabberParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.sdk_name())
    }
}

/// How many frames an acquisition should capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameCount {
    /// Stop after this many frames.
    Frames(u64),
    /// Capture until stopped, overwriting the oldest frames.
    Infinite,
}

/// Exclusive handle to an allocated ring region.
///
/// Not `Clone`: exactly one owner may free it.
#[derive(Debug, PartialEq, Eq)]
pub struct BufferHandle {
    id: u64,
}

impl BufferHandle {
    /// Wrap a device-assigned buffer id.
    pub fn new(id: u64) -> Self {
        Self { id }
    }

    /// Device-assigned id.
    pub fn id(&self) -> u64 {
        self.id
    }
}

/// Hardware-facing frame grabber operations.
pub trait FrameGrabber: Send + Sync {
    /// Reserve `frame_bytes * capacity` bytes of ring storage.
    fn allocate(&self, frame_bytes: u64, capacity: u64) -> AppResult<BufferHandle>;

    /// Start background capture into `handle`; returns immediately.
    fn acquire(&self, handle: &BufferHandle, count: FrameCount) -> AppResult<()>;

    /// Frame at logical `index`, or `None` for index 0 and frames not yet captured.
    fn frame_at(&self, handle: &BufferHandle, index: u64) -> AppResult<Option<Frame>>;

    /// Most recently completed logical index; 0 before the first frame.
    fn last_index(&self, handle: &BufferHandle) -> AppResult<u64>;

    /// Halt background capture. Stopping a stopped buffer is a no-op.
    fn stop(&self, handle: &BufferHandle) -> AppResult<()>;

    /// Release the ring region. The buffer must not be acquiring.
    fn free(&self, handle: BufferHandle) -> AppResult<()>;

    /// Push one grabber parameter.
    fn set_parameter(&self, parameter: GrabberParameter, value: u32) -> AppResult<()>;
}
