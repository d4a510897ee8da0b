//! Custom error types for the acquisition controller.
//!
//! `CameraError` is the single error type returned by every public operation of
//! the crate. It is built with `thiserror` and groups failures by how callers
//! are expected to react:
//!
//! - **`Validation`**: a requested value violates a static constraint. Nothing
//!   was sent to the device and the registry still holds the previous value.
//! - **`SettingRejected`**: the camera answered a set-command with its rejection
//!   token. The previous value is kept.
//! - **`Channel`**: the command channel failed (timeout, closed shell, malformed
//!   reply). The operation is aborted; the channel stays poisoned after
//!   transport failures.
//! - **`Allocation`**: the frame grabber could not provide a ring buffer of the
//!   requested size. The acquisition session is left `Idle`.
//! - **`Drain`**: a frame could not be fetched while writing a recording. The
//!   partial artifact has been closed and `last_good_index` names the last
//!   frame that made it into the artifact.
//!
//! - **`Busy`**: a recording owns the acquisition session. Nothing was changed;
//!   retry once the recording has finished.
//!
//! The remaining variants cover configuration, persistence and I/O problems.
//! `?` works across the crate through the `#[from]` conversions.

use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type AppResult<T> = std::result::Result<T, CameraError>;

/// Top-level error for camera, grabber and recording operations.
#[derive(Error, Debug)]
pub enum CameraError {
    /// A value breaks a static constraint. Nothing was sent.
    #[error("Invalid value {attempted} for '{parameter}': {reason}")]
    Validation {
        parameter: String,
        attempted: String,
        reason: String,
    },

    /// The camera NAKed a value; the previous one is still in effect.
    #[error("Camera rejected {parameter} = {attempted}")]
    SettingRejected { parameter: String, attempted: String },

    /// Command channel failure.
    #[error("Command channel error: {0}")]
    Channel(#[from] ChannelError),

    /// The grabber could not reserve ring storage.
    #[error("Failed to allocate {requested_bytes} bytes ({capacity} frames): {reason}")]
    Allocation {
        requested_bytes: u64,
        capacity: u64,
        reason: String,
    },

    /// Fetching a frame failed mid-drain; frames up to `last_good_index` were written.
    #[error("Recording aborted after frame {last_good_index}: {reason}")]
    Drain { last_good_index: u64, reason: String },

    /// The grabber SDK reported an error.
    #[error("Frame grabber error: {0}")]
    Grabber(String),

    /// The operation needs a different acquisition state.
    #[error("Invalid acquisition state: {0}")]
    InvalidState(String),

    /// A recording owns the session.
    #[error("Busy: {0}")]
    Busy(String),

    /// A video sink could not be opened or written.
    #[error("Video sink error: {0}")]
    Sink(String),

    /// No settable parameter has this name.
    #[error("Unknown parameter '{0}'")]
    UnknownParameter(String),

    /// A settings file could not be parsed or holds bad values.
    #[error("Settings file error: {0}")]
    SettingsFormat(String),

    /// Configuration sources could not be loaded.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Loaded configuration failed validation.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Filesystem or process I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CameraError {
    pub(crate) fn validation(
        parameter: impl Into<String>,
        attempted: impl ToString,
        reason: impl Into<String>,
    ) -> Self {
        CameraError::Validation {
            parameter: parameter.into(),
            attempted: attempted.to_string(),
            reason: reason.into(),
        }
    }

    /// Whether the controller is still fully usable after this error.
    ///
    /// Validation and rejection errors leave every component in its previous
    /// committed state. Channel, allocation and I/O failures leave the last
    /// known-good state but usually need operator attention.
    pub fn is_recoverable(&self) -> bool {
        match self {
            CameraError::Validation { .. }
            | CameraError::SettingRejected { .. }
            | CameraError::UnknownParameter(_)
            | CameraError::InvalidState(_)
            | CameraError::Busy(_) => true,
            CameraError::Channel(err) => err.is_recoverable(),
            CameraError::Allocation { .. }
            | CameraError::Drain { .. }
            | CameraError::Grabber(_)
            | CameraError::Sink(_)
            | CameraError::SettingsFormat(_)
            | CameraError::Config(_)
            | CameraError::Configuration(_)
            | CameraError::Io(_) => false,
        }
    }
}

impl From<figment::Error> for CameraError {
    fn from(err: figment::Error) -> Self {
        CameraError::Config(Box::new(err))
    }
}

/// Failures of a single request/response exchange on the command channel.
#[derive(Error, Debug)]
pub enum ChannelError {
    /// The peer went away.
    #[error("Command channel is closed")]
    Closed,

    /// No reply arrived in time.
    #[error("No reply to '{command}' within {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    /// The reply could not be parsed.
    #[error("Malformed reply to '{command}': {reply:?}")]
    Malformed { command: String, reply: String },

    /// The device answered with NAK.
    #[error("Device rejected '{command}'")]
    Rejected { command: String },

    /// Reading or writing the transport failed.
    #[error("Command channel I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ChannelError {
    /// Rejections and malformed replies do not poison the channel.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ChannelError::Rejected { .. } | ChannelError::Malformed { .. }
        )
    }
}
