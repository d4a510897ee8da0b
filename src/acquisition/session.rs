//! Acquisition session state machine.
//!
//! ```text
//! Idle --start--> BufferAllocated --acquire--> Acquiring --stop--> Stopped
//!   ^                                                                 |
//!   +------------------------- clear_buffer --------------------------+
//! ```
//!
//! `start` from any state stops and frees the previous buffer first, so at
//! most one ring region is ever held. Dropping the session stops and frees it.

use crate::drain::DrainBound;
use crate::error::{AppResult, CameraError};
use crate::events::{ControllerEvent, EventSender};
use crate::frame::Frame;
use crate::grabber::{BufferHandle, FrameCount, FrameGrabber};
use crate::settings::FrameWindow;
use serde::Serialize;
use std::fmt;
use std::ops::Range;
use std::sync::Arc;

/// Lifecycle state of the ring buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AcquisitionState {
    /// No ring allocated.
    Idle,
    /// Ring allocated, capture not started.
    BufferAllocated,
    /// Capture running on the device.
    Acquiring,
    /// Capture halted; contents remain readable.
    Stopped,
}

impl fmt::Display for AcquisitionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AcquisitionState::Idle => "idle",
            AcquisitionState::BufferAllocated => "buffer_allocated",
            AcquisitionState::Acquiring => "acquiring",
            AcquisitionState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
struct ActiveBuffer {
    handle: BufferHandle,
    window: FrameWindow,
    capacity: u64,
    /// Frame count of a counted acquisition; `None` for continuous capture.
    target: Option<u64>,
}

/// Owns the grabber's ring buffer for one camera.
pub struct AcquisitionSession {
    grabber: Arc<dyn FrameGrabber>,
    max_buffer_bytes: u64,
    /// Cap on the continuous ring, in frames
    live_frames: Option<u64>,
    state: AcquisitionState,
    buffer: Option<ActiveBuffer>,
    events: Option<EventSender>,
}

impl fmt::Debug for AcquisitionSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AcquisitionSession")
            .field("state", &self.state)
            .field("max_buffer_bytes", &self.max_buffer_bytes)
            .field("buffer", &self.buffer)
            .finish()
    }
}

impl AcquisitionSession {
    /// Session over `grabber`; continuous rings stay within `max_buffer_bytes`.
    pub fn new(grabber: Arc<dyn FrameGrabber>, max_buffer_bytes: u64) -> Self {
        Self {
            grabber,
            max_buffer_bytes,
            live_frames: None,
            state: AcquisitionState::Idle,
            buffer: None,
            events: None,
        }
    }

    /// Publish an [`ControllerEvent::AcquisitionStateChanged`] on every transition.
    pub fn with_events(mut self, events: EventSender) -> Self {
        self.events = Some(events);
        self
    }

    /// Limit the continuous ring to `frames`; takes effect on the next `start`.
    pub fn set_live_frames(&mut self, frames: Option<u64>) {
        self.live_frames = frames;
    }

    /// Frame cap for continuous rings, if set.
    pub fn live_frames(&self) -> Option<u64> {
        self.live_frames
    }

    /// Current lifecycle state.
    pub fn state(&self) -> AcquisitionState {
        self.state
    }

    /// Whether the device is capturing right now.
    pub fn is_acquiring(&self) -> bool {
        self.state == AcquisitionState::Acquiring
    }

    /// Window the current buffer was allocated for.
    pub fn window(&self) -> Option<FrameWindow> {
        self.buffer.as_ref().map(|b| b.window)
    }

    /// Ring capacity in frames; 0 without a buffer.
    pub fn capacity(&self) -> u64 {
        self.buffer.as_ref().map_or(0, |b| b.capacity)
    }

    /// Requested frame count of a counted acquisition.
    pub fn target(&self) -> Option<u64> {
        self.buffer.as_ref().and_then(|b| b.target)
    }

    /// Allocate a fresh buffer for `window` and begin capturing.
    ///
    /// `Some(n)` captures exactly `n` frames into an `n`-frame ring. `None`
    /// captures continuously into as many frames as the memory budget allows,
    /// or the live frame cap when that is smaller.
    pub fn start(&mut self, frames: Option<u64>, window: FrameWindow) -> AppResult<()> {
        if frames == Some(0) {
            return Err(CameraError::InvalidState(
                "a counted acquisition needs at least one frame".to_string(),
            ));
        }
        self.stop()?;
        self.release()?;

        let frame_bytes = window.frame_bytes();
        let capacity = match frames {
            Some(n) => n,
            None => {
                let budget = self.max_buffer_bytes / frame_bytes.max(1);
                self.live_frames.map_or(budget, |cap| cap.min(budget))
            }
        };
        if capacity == 0 {
            return Err(CameraError::Allocation {
                requested_bytes: frame_bytes,
                capacity,
                reason: format!("budget of {} bytes holds no frame", self.max_buffer_bytes),
            });
        }

        let handle = self.grabber.allocate(frame_bytes, capacity).map_err(|e| {
            tracing::error!(frame_bytes, capacity, error = %e, "Ring buffer allocation failed");
            e
        })?;
        self.buffer = Some(ActiveBuffer {
            handle,
            window,
            capacity,
            target: frames,
        });
        self.transition(AcquisitionState::BufferAllocated);

        let count = frames.map_or(FrameCount::Infinite, FrameCount::Frames);
        let acquired = match &self.buffer {
            Some(buffer) => self.grabber.acquire(&buffer.handle, count),
            None => Ok(()),
        };
        if let Err(e) = acquired {
            tracing::error!(error = %e, "Acquisition failed to start");
            if let Some(buffer) = self.buffer.take() {
                if let Err(free_err) = self.grabber.free(buffer.handle) {
                    tracing::warn!(error = %free_err, "Failed to free buffer after acquire error");
                }
            }
            self.transition(AcquisitionState::Idle);
            return Err(e);
        }

        tracing::info!(
            width = window.width,
            height = window.height,
            capacity,
            frames = ?frames,
            "Acquisition started"
        );
        self.transition(AcquisitionState::Acquiring);
        Ok(())
    }

    /// Halt capture. A no-op unless acquiring.
    pub fn stop(&mut self) -> AppResult<()> {
        if self.state != AcquisitionState::Acquiring {
            return Ok(());
        }
        if let Some(buffer) = &self.buffer {
            self.grabber.stop(&buffer.handle)?;
        }
        tracing::debug!("Acquisition stopped");
        self.transition(AcquisitionState::Stopped);
        Ok(())
    }

    /// Free the ring buffer and return to idle.
    pub fn clear_buffer(&mut self) -> AppResult<()> {
        if self.state == AcquisitionState::Acquiring {
            return Err(CameraError::InvalidState(
                "cannot clear the buffer while acquiring".to_string(),
            ));
        }
        self.release()
    }

    /// Stop and free everything.
    pub fn shutdown(&mut self) -> AppResult<()> {
        self.stop()?;
        self.clear_buffer()
    }

    fn release(&mut self) -> AppResult<()> {
        if let Some(buffer) = self.buffer.take() {
            self.grabber.free(buffer.handle)?;
            tracing::debug!("Ring buffer freed");
        }
        self.transition(AcquisitionState::Idle);
        Ok(())
    }

    fn transition(&mut self, next: AcquisitionState) {
        if self.state == next {
            return;
        }
        tracing::trace!(from = %self.state, to = %next, "Acquisition state change");
        self.state = next;
        if let Some(events) = &self.events {
            let _ = events.send(ControllerEvent::AcquisitionStateChanged { state: next });
        }
    }

    /// Most recently captured logical index; 0 when nothing was captured.
    pub fn last_index(&self) -> AppResult<u64> {
        match &self.buffer {
            Some(buffer) => self.grabber.last_index(&buffer.handle),
            None => Ok(0),
        }
    }

    /// True once a counted acquisition has captured all its frames.
    pub fn is_complete(&self) -> AppResult<bool> {
        match self.target() {
            Some(target) => Ok(self.last_index()? >= target),
            None => Ok(false),
        }
    }

    /// Frame at logical `index`; `None` when the ring does not hold it.
    pub fn frame_at(&self, index: u64) -> AppResult<Option<Frame>> {
        match &self.buffer {
            Some(buffer) => self.grabber.frame_at(&buffer.handle, index),
            None => Ok(None),
        }
    }

    /// Latest captured frame, for live view.
    pub fn current_frame(&self) -> AppResult<Option<Frame>> {
        match self.last_index()? {
            0 => Ok(None),
            index => self.frame_at(index),
        }
    }

    /// Logical indices a drain should read.
    ///
    /// Starts at 1, or at the oldest frame still held once a continuous ring
    /// has wrapped. Index 0 is never part of the range.
    pub fn captured_range(&self, bound: DrainBound) -> AppResult<Range<u64>> {
        let Some(buffer) = &self.buffer else {
            return Ok(1..1);
        };
        let last = self.grabber.last_index(&buffer.handle)?;
        let newest = buffer.target.map_or(last, |target| last.min(target));
        if newest == 0 {
            return Ok(1..1);
        }
        let first = newest.saturating_sub(buffer.capacity - 1).max(1);
        Ok(match bound {
            DrainBound::Exclusive => first..newest,
            DrainBound::Inclusive => first..newest + 1,
        })
    }
}

impl Drop for AcquisitionSession {
    fn drop(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            if self.state == AcquisitionState::Acquiring {
                if let Err(e) = self.grabber.stop(&buffer.handle) {
                    tracing::warn!(error = %e, "Failed to stop acquisition on drop");
                }
            }
            if let Err(e) = self.grabber.free(buffer.handle) {
                tracing::warn!(error = %e, "Failed to free ring buffer on drop");
            }
        }
    }
}
