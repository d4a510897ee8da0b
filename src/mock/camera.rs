//! Simulated camera command interface.
//!
//! Serves the camera's command grammar over an in-memory stream: every line is
//! echoed back, then answered with an ACK, a payload or a NAK. Frame rate and
//! exposure maxima are computed from the current window the way the sensor
//! does: readout time grows with the number of lines.

use super::{DeviceEvent, DeviceLog};
use crate::channel::command::format_reply;
use crate::channel::{Command, CommandChannel, Opcode, Reply};
use crate::settings::{Gain, SensorGeometry};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};

/// Lines per second the sensor can read out.
const LINE_RATE: u32 = 520_000;
/// Microseconds the sensor needs between exposures.
const READOUT_GAP_US: u32 = 2;
/// Highest frame rate for any window.
const FRAMERATE_CAP: u32 = 40_000;

/// Register state of the simulated camera.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraModel {
    /// Sensor the model was built for
    pub sensor: SensorGeometry,
    /// Gain as a multiplier
    pub gain: f64,
    /// FPN correction enabled
    pub fpn_correction: bool,
    /// Black level
    pub blacklevel: u32,
    /// Window left edge
    pub x: u32,
    /// Window top edge
    pub y: u32,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Frames per second
    pub framerate: u32,
    /// Exposure in microseconds
    pub exposure: u32,
    /// Dual-slope mode
    pub dualslope: bool,
    /// Dual-slope time
    pub dualslope_time: u32,
    /// Triple-slope mode
    pub tripleslope: bool,
    /// Triple-slope time
    pub tripleslope_time: u32,
}

impl CameraModel {
    /// Power-on registers for a camera with `sensor`.
    pub fn new(sensor: SensorGeometry) -> Self {
        Self {
            sensor,
            gain: 2.0,
            fpn_correction: true,
            blacklevel: 100,
            x: 0,
            y: 0,
            width: sensor.width,
            height: sensor.height,
            framerate: 30,
            exposure: 15_000,
            dualslope: false,
            dualslope_time: 1,
            tripleslope: false,
            tripleslope_time: 1,
        }
    }

    /// Highest frame rate for the current window height.
    pub fn max_framerate(&self) -> u32 {
        (LINE_RATE / self.height.max(1)).min(FRAMERATE_CAP)
    }

    /// Longest exposure in microseconds at the current frame rate.
    pub fn max_exposure(&self) -> u32 {
        (1_000_000 / self.framerate.max(1)).saturating_sub(READOUT_GAP_US)
    }

    /// Answer one command line.
    pub fn handle(&mut self, line: &str) -> Reply {
        match Command::parse(line) {
            Some(command) => self.apply(&command).unwrap_or(Reply::Nak),
            None => Reply::Nak,
        }
    }

    fn apply(&mut self, command: &Command) -> Option<Reply> {
        let args = command.args();
        let single = || -> Option<f64> {
            match args {
                [value] => value.parse().ok(),
                _ => None,
            }
        };
        let int = || single().filter(|v| v.fract() == 0.0 && *v >= 0.0).map(|v| v as u32);
        let flag = || int().filter(|v| *v <= 1).map(|v| v == 1);

        match command.opcode() {
            Opcode::Gain => {
                let gain = single()?;
                Gain::from_f64(gain)?;
                self.gain = gain;
            }
            Opcode::FpnCorrection => self.fpn_correction = flag()?,
            Opcode::BlackLevel => self.blacklevel = int().filter(|v| *v <= 255)?,
            Opcode::DualSlope => self.dualslope = flag()?,
            Opcode::TripleSlope => self.tripleslope = flag()?,
            Opcode::DualSlopeTime => self.dualslope_time = int().filter(|v| *v >= 1)?,
            Opcode::TripleSlopeTime => self.tripleslope_time = int().filter(|v| *v >= 1)?,
            Opcode::FrameFormat => {
                let values: Vec<u32> = args.iter().map(|a| a.parse().ok()).collect::<Option<_>>()?;
                let &[x, y, width, height] = values.as_slice() else {
                    return None;
                };
                if width == 0
                    || height == 0
                    || x.saturating_add(width) > self.sensor.width
                    || y.saturating_add(height) > self.sensor.height
                {
                    return None;
                }
                self.x = x;
                self.y = y;
                self.width = width;
                self.height = height;
                self.framerate = self.framerate.min(self.max_framerate());
                self.exposure = self.exposure.min(self.max_exposure());
            }
            Opcode::FrameRate => {
                let rate = int().filter(|v| *v >= 1 && *v <= self.max_framerate())?;
                self.framerate = rate;
                self.exposure = self.exposure.min(self.max_exposure());
            }
            Opcode::Exposure => {
                self.exposure = int().filter(|v| *v >= 1 && *v <= self.max_exposure())?;
            }
            Opcode::MaxExposure => return Some(Reply::Value(self.max_exposure().to_string())),
            Opcode::MaxFrameRate => return Some(Reply::Value(self.max_framerate().to_string())),
        }
        Some(Reply::Ack)
    }
}

#[derive(Debug)]
struct Shared {
    model: CameraModel,
    rejected: HashSet<Opcode>,
    silent: bool,
    received: Vec<String>,
}

/// Handle to a simulated camera; clones share the same device.
#[derive(Debug, Clone)]
pub struct SimulatedCamera {
    shared: Arc<Mutex<Shared>>,
    log: Option<DeviceLog>,
}

impl SimulatedCamera {
    /// Camera in its power-on state.
    pub fn new(sensor: SensorGeometry) -> Self {
        Self {
            shared: Arc::new(Mutex::new(Shared {
                model: CameraModel::new(sensor),
                rejected: HashSet::new(),
                silent: false,
                received: Vec::new(),
            })),
            log: None,
        }
    }

    /// Record every received command into `log`.
    pub fn with_log(mut self, log: DeviceLog) -> Self {
        self.log = Some(log);
        self
    }

    /// Open a command channel to this camera.
    ///
    /// Must be called from within a Tokio runtime; the device side runs as a
    /// spawned task until the channel is dropped.
    pub fn connect(&self) -> CommandChannel {
        let (host, device) = tokio::io::duplex(4096);
        tokio::spawn(serve(device, self.clone()));
        CommandChannel::from_stream(host)
    }

    /// NAK every future command with `opcode`.
    pub fn reject(&self, opcode: Opcode) {
        self.shared.lock().rejected.insert(opcode);
    }

    /// Undo [`SimulatedCamera::reject`].
    pub fn accept(&self, opcode: Opcode) {
        self.shared.lock().rejected.remove(&opcode);
    }

    /// Stop answering altogether, like a camera that lost power.
    pub fn go_silent(&self) {
        self.shared.lock().silent = true;
    }

    /// Command lines received so far, in order.
    pub fn received(&self) -> Vec<String> {
        self.shared.lock().received.clone()
    }

    /// Snapshot of the registers.
    pub fn model(&self) -> CameraModel {
        self.shared.lock().model.clone()
    }

    fn answer(&self, line: &str) -> Option<Reply> {
        if let Some(log) = &self.log {
            log.push(DeviceEvent::CameraCommand(line.to_string()));
        }
        let mut shared = self.shared.lock();
        shared.received.push(line.to_string());
        if shared.silent {
            return None;
        }
        let rejected = Command::parse(line).is_some_and(|c| shared.rejected.contains(&c.opcode()));
        if rejected {
            return Some(Reply::Nak);
        }
        Some(shared.model.handle(line))
    }
}

async fn serve(device: DuplexStream, camera: SimulatedCamera) {
    let (read, mut write) = tokio::io::split(device);
    let mut lines = BufReader::new(read).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(error = %e, "Simulated camera stream failed");
                break;
            }
        };
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }
        let Some(reply) = camera.answer(&line) else {
            continue;
        };
        let out = format!("{line}\r\n{}\r\n", format_reply(&reply));
        if write.write_all(out.as_bytes()).await.is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::CameraLink;
    use crate::error::ChannelError;
    use std::time::Duration;

    #[test]
    fn maxima_follow_window_and_rate() {
        let mut model = CameraModel::new(SensorGeometry::default());
        assert_eq!(model.max_framerate(), 507);
        assert_eq!(model.max_exposure(), 33_331);

        assert_eq!(model.handle("#R(0,0,1024,512)"), Reply::Ack);
        assert_eq!(model.max_framerate(), 1015);
        assert_eq!(model.handle("#r(1000)"), Reply::Ack);
        assert_eq!(model.max_exposure(), 998);
        assert_eq!(model.exposure, 998);
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let mut model = CameraModel::new(SensorGeometry::default());
        assert_eq!(model.handle("#G(7)"), Reply::Nak);
        assert_eq!(model.handle("#G(2.25)"), Reply::Ack);
        assert_eq!(model.handle("#r(600)"), Reply::Nak);
        assert_eq!(model.handle("#R(16,0,1024,1024)"), Reply::Nak);
        assert_eq!(model.handle("#F(2)"), Reply::Nak);
        assert_eq!(model.handle("#Q"), Reply::Nak);
    }

    #[tokio::test]
    async fn channel_round_trip() {
        let camera = SimulatedCamera::new(SensorGeometry::default());
        let mut channel = camera.connect();

        channel.send(&Command::set(Opcode::Gain, 3), false).await.unwrap();
        let max = channel.query_limit(Opcode::MaxFrameRate).await.unwrap();

        assert_eq!(max, 507);
        assert_eq!(camera.model().gain, 3.0);
        assert_eq!(camera.received(), vec!["#G(3)", "#A"]);
    }

    #[tokio::test]
    async fn rejected_opcode_naks() {
        let camera = SimulatedCamera::new(SensorGeometry::default());
        camera.reject(Opcode::Exposure);
        let mut channel = camera.connect();

        let result = channel.send(&Command::set(Opcode::Exposure, 100), false).await;
        assert!(matches!(result, Err(ChannelError::Rejected { .. })));
        assert_eq!(camera.model().exposure, 15_000);
    }

    #[tokio::test]
    async fn silent_camera_times_out() {
        let camera = SimulatedCamera::new(SensorGeometry::default());
        camera.go_silent();
        let mut channel = camera.connect().with_timeout(Duration::from_millis(30));

        let result = channel.send(&Command::set(Opcode::Gain, 2), false).await;
        assert!(matches!(result, Err(ChannelError::Timeout { .. })));
    }
}
