//! Ring buffer lifecycle on top of a [`crate::grabber::FrameGrabber`].

pub mod session;

pub use session::{AcquisitionSession, AcquisitionState};
