//! Controller events.
//!
//! Everything observers may want to render (live frames, recording progress,
//! rejected settings) is published on one broadcast channel. Slow receivers
//! lag and skip events; they never block the controller.

use crate::acquisition::AcquisitionState;
use crate::drain::DrainReport;
use crate::frame::Frame;
use crate::settings::Adjustment;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Buffered events per receiver before it starts lagging.
pub const EVENT_CAPACITY: usize = 256;

/// Publishing side of the event channel.
pub type EventSender = broadcast::Sender<ControllerEvent>;
/// Subscribing side of the event channel.
pub type EventReceiver = broadcast::Receiver<ControllerEvent>;

/// Notifications published by the controller.
#[derive(Debug, Clone)]
pub enum ControllerEvent {
    /// Latest frame for live view.
    Frame(Arc<Frame>),
    /// A recording drain wrote frame `index`.
    Progress { index: u64, written: u64, total: u64 },
    /// A recording was fully written.
    RecordingFinished { report: DrainReport },
    /// The camera refused a value; the previous value is still in effect.
    SettingRejected {
        name: String,
        attempted: String,
        reason: String,
    },
    /// A value was clamped on its way to the device.
    SettingAdjusted(Adjustment),
    /// Seconds left in a timed recording.
    Countdown { remaining_secs: u64 },
    /// The acquisition session changed state.
    AcquisitionStateChanged { state: AcquisitionState },
}

/// New event channel with [`EVENT_CAPACITY`] slots.
pub fn channel() -> (EventSender, EventReceiver) {
    broadcast::channel(EVENT_CAPACITY)
}
