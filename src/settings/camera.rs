//! Camera settings values.

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Analog gain steps supported by the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Gain {
    /// 1x
    X1,
    /// 1.5x
    X1_5,
    /// 2x
    X2,
    /// 2.25x
    X2_25,
    /// 3x
    X3,
    /// 4x
    X4,
}

impl Gain {
    /// Every step, lowest first.
    pub const ALL: [Gain; 6] = [Gain::X1, Gain::X1_5, Gain::X2, Gain::X2_25, Gain::X3, Gain::X4];

    /// Multiplier value.
    pub fn as_f64(self) -> f64 {
        match self {
            Gain::X1 => 1.0,
            Gain::X1_5 => 1.5,
            Gain::X2 => 2.0,
            Gain::X2_25 => 2.25,
            Gain::X3 => 3.0,
            Gain::X4 => 4.0,
        }
    }

    /// Position in [`Gain::ALL`], as stored by legacy command tables.
    pub fn index(self) -> usize {
        match self {
            Gain::X1 => 0,
            Gain::X1_5 => 1,
            Gain::X2 => 2,
            Gain::X2_25 => 3,
            Gain::X3 => 4,
            Gain::X4 => 5,
        }
    }

    /// Exact lookup; the supported steps are all representable in binary.
    pub fn from_f64(value: f64) -> Option<Self> {
        Self::ALL.into_iter().find(|g| g.as_f64() == value)
    }
}

impl Default for Gain {
    fn default() -> Self {
        Gain::X2
    }
}

/// `2`, `1.5`, `2.25`: integral steps print without a fraction.
impl fmt::Display for Gain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let v = self.as_f64();
        if v.fract() == 0.0 {
            write!(f, "{}", v as u32)
        } else {
            write!(f, "{v}")
        }
    }
}

impl Serialize for Gain {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let v = self.as_f64();
        if v.fract() == 0.0 {
            serializer.serialize_u64(v as u64)
        } else {
            serializer.serialize_f64(v)
        }
    }
}

impl<'de> Deserialize<'de> for Gain {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let v = f64::deserialize(deserializer)?;
        Gain::from_f64(v).ok_or_else(|| {
            de::Error::custom(format!("unsupported gain {v}, expected one of 1, 1.5, 2, 2.25, 3, 4"))
        })
    }
}

/// 0/1 on disk, `bool` in memory.
mod flag {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &bool, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(u8::from(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
        match u8::deserialize(deserializer)? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(de::Error::custom(format!("expected 0 or 1, got {other}"))),
        }
    }
}

/// Position and size of the readout window on the sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameWindow {
    /// Left edge in pixels
    pub x: u32,
    /// Top edge in pixels
    pub y: u32,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
}

impl FrameWindow {
    /// Bytes per 8-bit monochrome frame.
    pub fn frame_bytes(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

/// Complete camera configuration.
///
/// Field order is the on-disk key order of the settings file. Keys missing
/// from a file take their default value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraSettings {
    /// Analog gain
    pub gain: Gain,
    /// Window width in pixels
    pub width: u32,
    /// Window height in pixels
    pub height: u32,
    /// Frames per second
    pub framerate: u32,
    /// Exposure time in microseconds
    pub exposure: u32,
    /// Fixed pattern noise correction
    #[serde(with = "flag")]
    pub fpn_correction: bool,
    /// Black level
    pub blacklevel: u32,
    /// Dual-slope mode
    #[serde(with = "flag")]
    pub dualslope: bool,
    /// Triple-slope mode
    #[serde(with = "flag")]
    pub tripleslope: bool,
    /// Dual-slope time
    pub dualslope_time: u32,
    /// Triple-slope time
    pub tripleslope_time: u32,
    /// Window left edge
    pub x: u32,
    /// Window top edge
    pub y: u32,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            gain: Gain::X2,
            width: 1024,
            height: 1024,
            framerate: 30,
            exposure: 15000,
            fpn_correction: true,
            blacklevel: 100,
            dualslope: false,
            tripleslope: false,
            dualslope_time: 1,
            tripleslope_time: 1,
            x: 0,
            y: 0,
        }
    }
}

impl CameraSettings {
    /// Readout window described by these settings.
    pub fn window(&self) -> FrameWindow {
        FrameWindow {
            x: self.x,
            y: self.y,
            width: self.width,
            height: self.height,
        }
    }

    /// Copy position and size from `window`.
    pub fn set_window(&mut self, window: FrameWindow) {
        self.x = window.x;
        self.y = window.y;
        self.width = window.width;
        self.height = window.height;
    }
}
