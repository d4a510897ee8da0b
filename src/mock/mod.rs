//! Simulated camera and frame grabber.
//!
//! Both devices reproduce the observable contracts of the real hardware
//! (ACK/NAK replies, device-computed maxima, ring-buffer indexing) so the
//! controller can be exercised without a Camera Link board. A shared
//! [`DeviceLog`] records every device-side call in order.

pub mod camera;
pub mod grabber;

pub use camera::{CameraModel, SimulatedCamera};
pub use grabber::SimulatedGrabber;

use crate::grabber::{FrameCount, GrabberParameter};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Operational modes for mock devices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MockMode {
    /// Zero delays, deterministic - for unit tests
    #[default]
    Instant,
    /// Frames arrive at the configured frame rate
    Realistic,
}

/// One device-side call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    /// A ring was allocated.
    Allocate { frame_bytes: u64, capacity: u64 },
    /// Capture started.
    Acquire { count: FrameCount },
    /// Capture stopped.
    Stop,
    /// A ring was freed.
    Free,
    /// A frame was fetched from a buffer.
    FrameRead { index: u64 },
    /// A grabber parameter was written.
    GrabberParameter { parameter: GrabberParameter, value: u32 },
    /// A command line reached the simulated camera.
    CameraCommand(String),
}

/// Ordered record of device calls, shareable between simulated devices.
#[derive(Debug, Clone, Default)]
pub struct DeviceLog {
    events: Arc<Mutex<Vec<DeviceEvent>>>,
}

impl DeviceLog {
    /// Empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one event.
    pub fn push(&self, event: DeviceEvent) {
        self.events.lock().push(event);
    }

    /// Events so far, oldest first.
    pub fn events(&self) -> Vec<DeviceEvent> {
        self.events.lock().clone()
    }

    /// Forget everything recorded so far.
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}
