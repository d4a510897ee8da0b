//! # hscam
//!
//! Acquisition controller for a high-speed Camera Link camera behind a frame
//! grabber. The camera is configured over a line-oriented command channel;
//! frames are captured by the grabber into a ring buffer and drained into a
//! video file after a timed recording.
//!
//! ## Crate Structure
//!
//! - **`channel`**: the command channel (vendor shell, serial port or any
//!   async stream) with one request/response exchange per command.
//! - **`settings`**: the settings registry. Typed parameters, their
//!   constraints and the settings file formats, current and legacy.
//! - **`grabber`**: the frame grabber contract; **`mock`** provides simulated
//!   camera and grabber devices.
//! - **`acquisition`**: the ring buffer and acquisition session state machine.
//! - **`drain`** and **`sink`**: writing captured frames into a video artifact
//!   (ffmpeg MP4 or numbered image files).
//! - **`recording`**, **`scheduler`**: timed recordings, countdown and live view.
//! - **`controller`**: ties everything together behind high-level intents.
//! - **`config`**, **`logging`**, **`error`**, **`events`**: ambient plumbing.

pub mod acquisition;
pub mod channel;
pub mod config;
pub mod controller;
pub mod drain;
pub mod error;
pub mod events;
pub mod frame;
pub mod grabber;
pub mod logging;
pub mod mock;
pub mod recording;
pub mod scheduler;
pub mod settings;
pub mod sink;

pub use controller::Controller;
pub use error::{AppResult, CameraError};
