//! Typed parameter table.
//!
//! Each camera parameter has one [`CommandSpec`] record naming the camera
//! opcode that carries it and, where the frame grabber must follow the same
//! value, the grabber-side parameter.

use crate::channel::Opcode;
use crate::error::CameraError;
use crate::grabber::GrabberParameter;
use std::fmt;
use std::str::FromStr;

/// Settable camera parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Parameter {
    /// Analog gain step.
    Gain,
    /// Fixed pattern noise correction.
    FpnCorrection,
    /// Sensor black level.
    BlackLevel,
    /// Window width.
    Width,
    /// Window height.
    Height,
    /// Window left edge.
    XOffset,
    /// Window top edge.
    YOffset,
    /// Frames per second.
    FrameRate,
    /// Exposure in microseconds.
    Exposure,
    /// Dual-slope mode.
    DualSlope,
    /// Dual-slope time.
    DualSlopeTime,
    /// Triple-slope mode.
    TripleSlope,
    /// Triple-slope time.
    TripleSlopeTime,
}

/// Where a parameter value goes when it is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandSpec {
    /// Camera opcode that sets the value.
    pub opcode: Opcode,
    /// Grabber parameter kept in step, if any.
    pub grabber: Option<GrabberParameter>,
    /// Opcode answering the device-computed upper bound, if any.
    pub limit_query: Option<Opcode>,
}

impl Parameter {
    /// Order in which a full configuration is pushed to the camera.
    pub const APPLY_ORDER: [Parameter; 13] = [
        Parameter::Gain,
        Parameter::FpnCorrection,
        Parameter::Width,
        Parameter::Height,
        Parameter::XOffset,
        Parameter::YOffset,
        Parameter::FrameRate,
        Parameter::Exposure,
        Parameter::BlackLevel,
        Parameter::DualSlope,
        Parameter::DualSlopeTime,
        Parameter::TripleSlope,
        Parameter::TripleSlopeTime,
    ];

    /// Key used in settings files and intents.
    pub fn name(self) -> &'static str {
        match self {
            Parameter::Gain => "gain",
            Parameter::FpnCorrection => "fpn_correction",
            Parameter::BlackLevel => "blacklevel",
            Parameter::Width => "width",
            Parameter::Height => "height",
            Parameter::XOffset => "x",
            Parameter::YOffset => "y",
            Parameter::FrameRate => "framerate",
            Parameter::Exposure => "exposure",
            Parameter::DualSlope => "dualslope",
            Parameter::DualSlopeTime => "dualslope_time",
            Parameter::TripleSlope => "tripleslope",
            Parameter::TripleSlopeTime => "tripleslope_time",
        }
    }

    /// How this parameter is applied.
    pub fn spec(self) -> CommandSpec {
        let (opcode, grabber, limit_query) = match self {
            Parameter::Gain => (Opcode::Gain, None, None),
            Parameter::FpnCorrection => (Opcode::FpnCorrection, None, None),
            Parameter::BlackLevel => (Opcode::BlackLevel, None, None),
            Parameter::Width => (Opcode::FrameFormat, Some(GrabberParameter::Width), None),
            Parameter::Height => (Opcode::FrameFormat, Some(GrabberParameter::Height), None),
            Parameter::XOffset | Parameter::YOffset => (Opcode::FrameFormat, None, None),
            Parameter::FrameRate => (
                Opcode::FrameRate,
                Some(GrabberParameter::FramesPerSec),
                Some(Opcode::MaxFrameRate),
            ),
            Parameter::Exposure => (Opcode::Exposure, None, Some(Opcode::MaxExposure)),
            Parameter::DualSlope => (Opcode::DualSlope, None, None),
            Parameter::DualSlopeTime => (Opcode::DualSlopeTime, None, None),
            Parameter::TripleSlope => (Opcode::TripleSlope, None, None),
            Parameter::TripleSlopeTime => (Opcode::TripleSlopeTime, None, None),
        };
        CommandSpec {
            opcode,
            grabber,
            limit_query,
        }
    }

    /// The parameter whose value bounds this one from above, if any.
    pub fn bounded_by(self) -> Option<Parameter> {
        match self {
            Parameter::DualSlopeTime => Some(Parameter::Exposure),
            Parameter::TripleSlopeTime => Some(Parameter::DualSlopeTime),
            Parameter::XOffset => Some(Parameter::Width),
            Parameter::YOffset => Some(Parameter::Height),
            _ => None,
        }
    }

    /// Parameters whose change alters the frame geometry.
    pub fn is_geometry(self) -> bool {
        matches!(
            self,
            Parameter::Width | Parameter::Height | Parameter::XOffset | Parameter::YOffset
        )
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Parameter {
    type Err = CameraError;

    /// Accepts the settings-file keys plus the older command-table names.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parameter = match s.trim().to_lowercase().as_str() {
            "gain" => Parameter::Gain,
            "fpn_correction" | "fpn" => Parameter::FpnCorrection,
            "blacklevel" | "black_level" => Parameter::BlackLevel,
            "width" => Parameter::Width,
            "height" => Parameter::Height,
            "x" | "x_offset" | "xoffset" => Parameter::XOffset,
            "y" | "y_offset" | "yoffset" => Parameter::YOffset,
            "framerate" | "frame_rate" => Parameter::FrameRate,
            "exposure" | "exptime" => Parameter::Exposure,
            "dualslope" => Parameter::DualSlope,
            "dualslope_time" | "dualslopetime" => Parameter::DualSlopeTime,
            "tripleslope" => Parameter::TripleSlope,
            "tripleslope_time" | "tripleslopetime" => Parameter::TripleSlopeTime,
            _ => return Err(CameraError::UnknownParameter(s.to_string())),
        };
        Ok(parameter)
    }
}

/// Static constraint on a parameter value.
///
/// Upper bounds that depend on other parameters or on the device are
/// resolved by the registry before checking.
#[derive(Debug, Clone, PartialEq)]
pub enum Constraint {
    /// Allowed discrete values
    Choices(Vec<f64>),
    /// Inclusive integer range
    Range { min: u32, max: u32 },
    /// Integer with a lower bound; the upper bound comes from the camera or
    /// from another parameter and is clamped to, never rejected
    AtLeast { min: u32 },
    /// Multiple of `step` in `step..=max`
    Multiple { step: u32, max: u32 },
    /// Decided by the configured width policy
    Width,
}

impl Constraint {
    /// Check a value against the constraint. `Width` and `AtLeast` upper
    /// bounds are resolved by the registry.
    pub fn check(&self, value: f64) -> Result<(), String> {
        match self {
            Constraint::Choices(choices) => {
                if choices.iter().any(|c| *c == value) {
                    Ok(())
                } else {
                    let listed: Vec<String> = choices.iter().map(|c| c.to_string()).collect();
                    Err(format!("must be one of {}", listed.join(", ")))
                }
            }
            Constraint::Range { min, max } => {
                require_integer(value)?;
                if value < f64::from(*min) || value > f64::from(*max) {
                    Err(format!("must be in {min}..={max}"))
                } else {
                    Ok(())
                }
            }
            Constraint::AtLeast { min } => {
                require_integer(value)?;
                if value < f64::from(*min) {
                    Err(format!("must be at least {min}"))
                } else {
                    Ok(())
                }
            }
            Constraint::Multiple { step, max } => {
                require_integer(value)?;
                let v = value as u64;
                if v == 0 || v % u64::from(*step) != 0 {
                    Err(format!("must be a positive multiple of {step}"))
                } else if v > u64::from(*max) {
                    Err(format!("must not exceed {max}"))
                } else {
                    Ok(())
                }
            }
            Constraint::Width => require_integer(value),
        }
    }
}

fn require_integer(value: f64) -> Result<(), String> {
    if value.is_finite() && value.fract() == 0.0 && value >= 0.0 && value <= f64::from(u32::MAX) {
        Ok(())
    } else {
        Err("must be a non-negative integer".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip_through_from_str() {
        for p in Parameter::APPLY_ORDER {
            assert_eq!(p.name().parse::<Parameter>().unwrap(), p);
        }
        assert_eq!("exptime".parse::<Parameter>().unwrap(), Parameter::Exposure);
        assert!(matches!(
            "zoom".parse::<Parameter>(),
            Err(CameraError::UnknownParameter(_))
        ));
    }

    #[test]
    fn grabber_projection_only_for_geometry_and_rate() {
        let projected: Vec<Parameter> = Parameter::APPLY_ORDER
            .into_iter()
            .filter(|p| p.spec().grabber.is_some())
            .collect();
        assert_eq!(
            projected,
            [Parameter::Width, Parameter::Height, Parameter::FrameRate]
        );
    }

    #[test]
    fn range_and_multiple_checks() {
        let range = Constraint::Range { min: 0, max: 255 };
        assert!(range.check(255.0).is_ok());
        assert!(range.check(256.0).is_err());
        assert!(range.check(1.5).is_err());

        let even = Constraint::Multiple { step: 2, max: 1024 };
        assert!(even.check(480.0).is_ok());
        assert!(even.check(481.0).is_err());
        assert!(even.check(0.0).is_err());
        assert!(even.check(1026.0).is_err());
    }

    #[test]
    fn choices_check() {
        let gains = Constraint::Choices(vec![1.0, 1.5, 2.0]);
        assert!(gains.check(1.5).is_ok());
        assert!(gains.check(2.5).unwrap_err().contains("1.5"));
    }
}
