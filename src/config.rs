//! Controller configuration using Figment.
//!
//! Configuration is layered:
//! 1. built-in defaults (`ControllerConfig::default()`),
//! 2. `config/hscam.toml` (or the file given on the command line),
//! 3. environment variables prefixed with `HSCAM_`, nested keys separated by
//!    a double underscore, e.g. `HSCAM_CHANNEL__TIMEOUT_MS=5000`.
//!
//! # Example
//! ```no_run
//! use hscam::config::ControllerConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ControllerConfig::load()?;
//! config.validate()?;
//! println!("Sensor: {}x{}", config.sensor.width, config.sensor.height);
//! # Ok(())
//! # }
//! ```

use crate::drain::{DrainBound, ProgressMode};
use crate::error::{AppResult, CameraError};
use crate::mock::MockMode;
use crate::recording::StopTrigger;
use crate::settings::WidthPolicy;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level controller configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Application name and logging
    #[serde(default)]
    pub application: ApplicationConfig,
    /// How the camera is reached
    #[serde(default)]
    pub channel: ChannelConfig,
    /// Sensor size and width rule
    #[serde(default)]
    pub sensor: SensorConfig,
    /// Frame grabber board and ring budget
    #[serde(default)]
    pub grabber: GrabberConfig,
    /// Recording output and live view
    #[serde(default)]
    pub recording: RecordingConfig,
    /// Settings file applied on startup, if any.
    #[serde(default)]
    pub settings_file: Option<PathBuf>,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

/// How the camera command channel is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transport {
    /// Vendor command shell spawned as a child process.
    Shell,
    /// Direct serial port (requires the `serial` feature).
    Serial,
    /// In-process simulated camera.
    Simulated,
}

/// Command channel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Transport used for camera commands
    #[serde(default = "default_transport")]
    pub transport: Transport,
    /// Command shell executable
    #[serde(default = "default_shell_program")]
    pub program: PathBuf,
    /// Arguments passed to the shell
    #[serde(default = "default_shell_args")]
    pub args: Vec<String>,
    /// Banner lines the shell prints before accepting commands
    #[serde(default = "default_preamble_lines")]
    pub preamble_lines: usize,
    /// Serial device path, for the serial transport
    #[serde(default = "default_serial_port")]
    pub serial_port: String,
    /// Serial line speed
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Per-line read timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Whether the transport echoes each command line
    #[serde(default = "default_true")]
    pub echo: bool,
    /// Line ending sent after each command
    #[serde(default = "default_line_terminator")]
    pub line_terminator: String,
    /// Line sent to the shell before closing it
    #[serde(default = "default_quit_command")]
    pub quit_command: String,
}

/// Sensor geometry and width rules
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorConfig {
    /// Sensor width in pixels
    #[serde(default = "default_sensor_side")]
    pub width: u32,
    /// Sensor height in pixels
    #[serde(default = "default_sensor_side")]
    pub height: u32,
    /// Rule that accepted frame widths must follow
    #[serde(default)]
    pub width_policy: WidthPolicy,
}

/// Frame grabber configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrabberConfig {
    /// Board index on the host
    #[serde(default)]
    pub board: u32,
    /// Camera port on the board
    #[serde(default)]
    pub port: u32,
    /// Memory budget for continuous capture
    #[serde(default = "default_max_buffer_bytes")]
    pub max_buffer_bytes: u64,
    /// Cap on the continuous ring in frames; the budget alone decides when unset
    #[serde(default)]
    pub live_buffer_frames: Option<u64>,
    /// Timing model of the simulated grabber
    #[serde(default)]
    pub simulation: MockMode,
}

/// Video sink selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkKind {
    /// MP4 through an external ffmpeg process
    Ffmpeg,
    /// Numbered PNG files
    Png,
    /// Numbered TIFF files
    Tiff,
}

/// Recording and live-view configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingConfig {
    /// Directory recordings are written to
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// File name prefix; a `%Y%m%d_%H%M%S` timestamp is appended
    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,
    /// Output format
    #[serde(default = "default_sink")]
    pub sink: SinkKind,
    /// ffmpeg executable for MP4 output
    #[serde(default = "default_ffmpeg_program")]
    pub ffmpeg_program: PathBuf,
    /// Output frame rate of the video container
    #[serde(default = "default_video_fps")]
    pub video_fps: u32,
    /// What ends the capture phase of a recording
    #[serde(default)]
    pub stop_trigger: StopTrigger,
    /// Whether the newest captured frame is written
    #[serde(default)]
    pub drain_bound: DrainBound,
    /// How often drain progress is published
    #[serde(default)]
    pub progress: ProgressMode,
    /// Restart continuous capture once a recording is written
    #[serde(default = "default_true")]
    pub resume_live: bool,
    /// Live view publishing period in milliseconds
    #[serde(default = "default_live_view_interval_ms")]
    pub live_view_interval_ms: u64,
    /// Extra time allowed for a counted recording to reach its frame count
    #[serde(default = "default_stall_grace_ms")]
    pub stall_grace_ms: u64,
    /// Frames captured after a trigger before live capture stops
    #[serde(default)]
    pub frames_after_trigger: u64,
}

// Default value functions
fn default_name() -> String {
    "hscam".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_transport() -> Transport {
    Transport::Shell
}

fn default_shell_program() -> PathBuf {
    PathBuf::from("/opt/SiliconSoftware/Runtime5.7.0/bin/clshell")
}

fn default_shell_args() -> Vec<String> {
    vec!["-a".to_string(), "-i".to_string()]
}

fn default_preamble_lines() -> usize {
    5
}

fn default_serial_port() -> String {
    "/dev/ttyS0".to_string()
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_timeout_ms() -> u64 {
    2000
}

fn default_true() -> bool {
    true
}

fn default_line_terminator() -> String {
    "\n".to_string()
}

fn default_quit_command() -> String {
    "##quit".to_string()
}

fn default_sensor_side() -> u32 {
    1024
}

fn default_max_buffer_bytes() -> u64 {
    4_000_000_000
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("recordings")
}

fn default_file_prefix() -> String {
    "recording_".to_string()
}

fn default_sink() -> SinkKind {
    SinkKind::Ffmpeg
}

fn default_ffmpeg_program() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_video_fps() -> u32 {
    30
}

fn default_live_view_interval_ms() -> u64 {
    30
}

fn default_stall_grace_ms() -> u64 {
    5000
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            transport: default_transport(),
            program: default_shell_program(),
            args: default_shell_args(),
            preamble_lines: default_preamble_lines(),
            serial_port: default_serial_port(),
            baud_rate: default_baud_rate(),
            timeout_ms: default_timeout_ms(),
            echo: true,
            line_terminator: default_line_terminator(),
            quit_command: default_quit_command(),
        }
    }
}

impl ChannelConfig {
    /// Per-line read timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            width: default_sensor_side(),
            height: default_sensor_side(),
            width_policy: WidthPolicy::default(),
        }
    }
}

impl Default for GrabberConfig {
    fn default() -> Self {
        Self {
            board: 0,
            port: 0,
            max_buffer_bytes: default_max_buffer_bytes(),
            live_buffer_frames: None,
            simulation: MockMode::default(),
        }
    }
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            file_prefix: default_file_prefix(),
            sink: default_sink(),
            ffmpeg_program: default_ffmpeg_program(),
            video_fps: default_video_fps(),
            stop_trigger: StopTrigger::default(),
            drain_bound: DrainBound::default(),
            progress: ProgressMode::default(),
            resume_live: true,
            live_view_interval_ms: default_live_view_interval_ms(),
            stall_grace_ms: default_stall_grace_ms(),
            frames_after_trigger: 0,
        }
    }
}

impl RecordingConfig {
    /// Live view publishing period.
    pub fn live_view_interval(&self) -> Duration {
        Duration::from_millis(self.live_view_interval_ms)
    }

    /// Grace period for a stalled counted capture.
    pub fn stall_grace(&self) -> Duration {
        Duration::from_millis(self.stall_grace_ms)
    }
}

impl ControllerConfig {
    /// Default location of the configuration file.
    pub const DEFAULT_PATH: &'static str = "config/hscam.toml";

    /// Load configuration from `config/hscam.toml` and environment variables
    ///
    /// Environment variables can override configuration with prefix HSCAM_
    /// Example: HSCAM_APPLICATION__LOG_LEVEL=debug
    pub fn load() -> AppResult<Self> {
        Self::load_from(Self::DEFAULT_PATH)
    }

    /// Load configuration from a specific file path
    ///
    /// A missing file is not an error; defaults and environment still apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let config = Figment::from(Serialized::defaults(ControllerConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("HSCAM_").split("__"))
            .extract()?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(CameraError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        let valid_formats = ["pretty", "compact", "json"];
        if !valid_formats.contains(&self.application.log_format.to_lowercase().as_str()) {
            return Err(CameraError::Configuration(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.application.log_format,
                valid_formats.join(", ")
            )));
        }

        if self.sensor.width == 0 || self.sensor.height == 0 {
            return Err(CameraError::Configuration(
                "Sensor width and height must be non-zero".to_string(),
            ));
        }

        let frame_bytes = u64::from(self.sensor.width) * u64::from(self.sensor.height);
        if self.grabber.max_buffer_bytes < frame_bytes {
            return Err(CameraError::Configuration(format!(
                "max_buffer_bytes {} cannot hold a single {}x{} frame",
                self.grabber.max_buffer_bytes, self.sensor.width, self.sensor.height
            )));
        }

        if self.channel.timeout_ms == 0 {
            return Err(CameraError::Configuration(
                "Channel timeout_ms must be greater than zero".to_string(),
            ));
        }

        if self.grabber.live_buffer_frames == Some(0) {
            return Err(CameraError::Configuration(
                "live_buffer_frames must be greater than zero when set".to_string(),
            ));
        }

        if self.recording.live_view_interval_ms == 0 {
            return Err(CameraError::Configuration(
                "live_view_interval_ms must be greater than zero".to_string(),
            ));
        }

        if self.recording.video_fps == 0 {
            return Err(CameraError::Configuration(
                "video_fps must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}
