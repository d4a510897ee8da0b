//! Validated in-memory camera configuration.
//!
//! The registry is the single source of truth for what the camera and the
//! frame grabber have been told. It performs no I/O: the controller asks it to
//! validate a request, builds the next configuration from the committed one,
//! transmits it, and only then calls [`SettingsRegistry::commit`].

use super::camera::{CameraSettings, FrameWindow, Gain};
use super::parameter::{Constraint, Parameter};
use super::policy::WidthPolicy;
use crate::error::{AppResult, CameraError};
use serde::{Deserialize, Serialize};

/// Lowest frame rate the camera accepts.
pub const MIN_FRAMERATE: u32 = 20;

/// Full sensor size in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorGeometry {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
}

impl Default for SensorGeometry {
    fn default() -> Self {
        Self {
            width: 1024,
            height: 1024,
        }
    }
}

/// A value that was changed on the way to the device.
#[derive(Debug, Clone, PartialEq)]
pub struct Adjustment {
    /// Parameter affected
    pub parameter: Parameter,
    /// Value asked for
    pub requested: f64,
    /// Value actually committed
    pub applied: f64,
}

/// Result of a successful set operation.
#[derive(Debug, Clone, PartialEq)]
pub struct SetOutcome {
    /// Parameter affected
    pub parameter: Parameter,
    /// Value asked for
    pub requested: f64,
    /// Value committed after clamping
    pub applied: f64,
    /// Dependent parameters that were clamped as a consequence.
    pub adjustments: Vec<Adjustment>,
}

impl SetOutcome {
    /// Whether the committed value differs from the request.
    pub fn was_clamped(&self) -> bool {
        self.requested != self.applied
    }
}

/// Committed camera configuration plus the rules that govern it.
#[derive(Debug, Clone)]
pub struct SettingsRegistry {
    settings: CameraSettings,
    sensor: SensorGeometry,
    width_policy: WidthPolicy,
}

impl SettingsRegistry {
    /// Registry holding the default settings, fitted to the sensor.
    pub fn new(sensor: SensorGeometry, width_policy: WidthPolicy) -> Self {
        let mut settings = CameraSettings::default();
        settings.width = settings.width.min(sensor.width);
        settings.height = settings.height.min(sensor.height);
        Self {
            settings,
            sensor,
            width_policy,
        }
    }

    /// Registry starting from loaded settings; every static constraint must hold.
    pub fn with_settings(
        settings: CameraSettings,
        sensor: SensorGeometry,
        width_policy: WidthPolicy,
    ) -> AppResult<Self> {
        let registry = Self {
            settings: CameraSettings::default(),
            sensor,
            width_policy,
        };
        registry.validate_settings(&settings)?;
        Ok(Self {
            settings,
            ..registry
        })
    }

    /// Committed settings.
    pub fn settings(&self) -> &CameraSettings {
        &self.settings
    }

    /// Sensor the settings are checked against.
    pub fn sensor(&self) -> SensorGeometry {
        self.sensor
    }

    /// Width rule in force.
    pub fn width_policy(&self) -> WidthPolicy {
        self.width_policy
    }

    /// Current value of one parameter, as a number.
    pub fn value(&self, parameter: Parameter) -> f64 {
        value_of(&self.settings, parameter)
    }

    /// Static constraint for `parameter` given the committed geometry.
    pub fn constraint(&self, parameter: Parameter) -> Constraint {
        let (max_x, max_y) = self.offset_limits(self.settings.width, self.settings.height);
        match parameter {
            Parameter::Gain => Constraint::Choices(Gain::ALL.iter().map(|g| g.as_f64()).collect()),
            Parameter::FpnCorrection | Parameter::DualSlope | Parameter::TripleSlope => {
                Constraint::Choices(vec![0.0, 1.0])
            }
            Parameter::BlackLevel => Constraint::Range { min: 0, max: 255 },
            Parameter::Width => Constraint::Width,
            Parameter::Height => Constraint::Multiple {
                step: 2,
                max: self.sensor.height,
            },
            Parameter::XOffset => Constraint::Range { min: 0, max: max_x },
            Parameter::YOffset => Constraint::Range { min: 0, max: max_y },
            Parameter::FrameRate => Constraint::AtLeast { min: MIN_FRAMERATE },
            Parameter::Exposure | Parameter::DualSlopeTime | Parameter::TripleSlopeTime => {
                Constraint::AtLeast { min: 1 }
            }
        }
    }

    /// Check `value` against the static constraint of `parameter`.
    pub fn validate(&self, parameter: Parameter, value: f64) -> AppResult<()> {
        self.constraint(parameter)
            .check(value)
            .and_then(|()| match parameter {
                Parameter::Width => self.width_policy.check(value as u32, self.sensor.width),
                _ => Ok(()),
            })
            .map_err(|reason| CameraError::validation(parameter.name(), format_value(value), reason))
    }

    /// Largest x and y offsets that keep a `width` x `height` window on the sensor.
    pub fn offset_limits(&self, width: u32, height: u32) -> (u32, u32) {
        (
            self.sensor.width.saturating_sub(width),
            self.sensor.height.saturating_sub(height),
        )
    }

    /// Window for new dimensions, with the committed offsets clamped to fit.
    pub fn plan_window(&self, width: u32, height: u32) -> (FrameWindow, Vec<Adjustment>) {
        let (max_x, max_y) = self.offset_limits(width, height);
        let mut adjustments = Vec::new();
        let x = clamp_reported(Parameter::XOffset, self.settings.x, max_x, &mut adjustments);
        let y = clamp_reported(Parameter::YOffset, self.settings.y, max_y, &mut adjustments);
        (
            FrameWindow {
                x,
                y,
                width,
                height,
            },
            adjustments,
        )
    }

    /// Every static constraint of a complete configuration, e.g. one read from disk.
    ///
    /// Dependent upper bounds (slope times) are not checked here; they are
    /// clamped when the configuration is applied.
    pub fn validate_settings(&self, settings: &CameraSettings) -> AppResult<()> {
        let geometry = Self {
            settings: settings.clone(),
            sensor: self.sensor,
            width_policy: self.width_policy,
        };
        for parameter in Parameter::APPLY_ORDER {
            geometry.validate(parameter, value_of(settings, parameter))?;
        }
        Ok(())
    }

    /// Replace the committed configuration after it reached the device.
    pub fn commit(&mut self, settings: CameraSettings) {
        if settings != self.settings {
            tracing::debug!(?settings, "Committed camera settings");
        }
        self.settings = settings;
    }
}

/// Clamp slope times below their bounding parameters, in cascade order.
///
/// Dualslope time is bounded by exposure, tripleslope time by dualslope time.
pub fn clamp_dependents(settings: &mut CameraSettings) -> Vec<Adjustment> {
    let mut adjustments = Vec::new();
    settings.dualslope_time = clamp_reported(
        Parameter::DualSlopeTime,
        settings.dualslope_time,
        settings.exposure,
        &mut adjustments,
    );
    settings.tripleslope_time = clamp_reported(
        Parameter::TripleSlopeTime,
        settings.tripleslope_time,
        settings.dualslope_time,
        &mut adjustments,
    );
    adjustments
}

fn clamp_reported(
    parameter: Parameter,
    value: u32,
    max: u32,
    adjustments: &mut Vec<Adjustment>,
) -> u32 {
    if value > max {
        adjustments.push(Adjustment {
            parameter,
            requested: f64::from(value),
            applied: f64::from(max),
        });
        max
    } else {
        value
    }
}

/// Numeric view of one field of `settings`.
pub fn value_of(settings: &CameraSettings, parameter: Parameter) -> f64 {
    match parameter {
        Parameter::Gain => settings.gain.as_f64(),
        Parameter::FpnCorrection => f64::from(u8::from(settings.fpn_correction)),
        Parameter::BlackLevel => f64::from(settings.blacklevel),
        Parameter::Width => f64::from(settings.width),
        Parameter::Height => f64::from(settings.height),
        Parameter::XOffset => f64::from(settings.x),
        Parameter::YOffset => f64::from(settings.y),
        Parameter::FrameRate => f64::from(settings.framerate),
        Parameter::Exposure => f64::from(settings.exposure),
        Parameter::DualSlope => f64::from(u8::from(settings.dualslope)),
        Parameter::DualSlopeTime => f64::from(settings.dualslope_time),
        Parameter::TripleSlope => f64::from(u8::from(settings.tripleslope)),
        Parameter::TripleSlopeTime => f64::from(settings.tripleslope_time),
    }
}

/// Write a validated value into `settings`.
///
/// Callers validate first; out-of-type values are ignored.
pub fn assign(settings: &mut CameraSettings, parameter: Parameter, value: f64) {
    let int = value as u32;
    match parameter {
        Parameter::Gain => {
            if let Some(gain) = Gain::from_f64(value) {
                settings.gain = gain;
            }
        }
        Parameter::FpnCorrection => settings.fpn_correction = int != 0,
        Parameter::BlackLevel => settings.blacklevel = int,
        Parameter::Width => settings.width = int,
        Parameter::Height => settings.height = int,
        Parameter::XOffset => settings.x = int,
        Parameter::YOffset => settings.y = int,
        Parameter::FrameRate => settings.framerate = int,
        Parameter::Exposure => settings.exposure = int,
        Parameter::DualSlope => settings.dualslope = int != 0,
        Parameter::DualSlopeTime => settings.dualslope_time = int,
        Parameter::TripleSlope => settings.tripleslope = int != 0,
        Parameter::TripleSlopeTime => settings.tripleslope_time = int,
    }
}

fn format_value(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> SettingsRegistry {
        SettingsRegistry::new(SensorGeometry::default(), WidthPolicy::MultipleOf16)
    }

    #[test]
    fn width_must_be_multiple_of_16() {
        let reg = registry();
        let err = reg.validate(Parameter::Width, 1000.0).unwrap_err();
        assert!(matches!(err, CameraError::Validation { ref parameter, .. } if parameter == "width"));
        assert!(reg.validate(Parameter::Width, 512.0).is_ok());
    }

    #[test]
    fn offset_range_follows_width() {
        let mut reg = registry();
        let mut next = reg.settings().clone();
        next.width = 640;
        reg.commit(next);

        assert_eq!(
            reg.constraint(Parameter::XOffset),
            Constraint::Range { min: 0, max: 384 }
        );
        assert!(reg.validate(Parameter::XOffset, 384.0).is_ok());
        assert!(reg.validate(Parameter::XOffset, 385.0).is_err());
    }

    #[test]
    fn full_width_forces_offset_to_zero() {
        let mut reg = registry();
        let mut next = reg.settings().clone();
        next.width = 512;
        next.x = 200;
        reg.commit(next);

        let (window, adjustments) = reg.plan_window(1024, 1024);
        assert_eq!(window.x, 0);
        assert_eq!(
            adjustments,
            vec![Adjustment {
                parameter: Parameter::XOffset,
                requested: 200.0,
                applied: 0.0
            }]
        );
    }

    #[test]
    fn dependents_clamp_in_cascade_order() {
        let mut settings = CameraSettings {
            exposure: 500,
            dualslope_time: 800,
            tripleslope_time: 700,
            ..CameraSettings::default()
        };
        let adjustments = clamp_dependents(&mut settings);
        assert_eq!(settings.dualslope_time, 500);
        assert_eq!(settings.tripleslope_time, 500);
        assert_eq!(adjustments.len(), 2);
        assert_eq!(adjustments[0].parameter, Parameter::DualSlopeTime);
        assert_eq!(adjustments[1].parameter, Parameter::TripleSlopeTime);
    }

    #[test]
    fn slope_time_below_one_is_invalid() {
        let reg = registry();
        assert!(reg.validate(Parameter::DualSlopeTime, 0.0).is_err());
        assert!(reg.validate(Parameter::TripleSlopeTime, 1.0).is_ok());
    }

    #[test]
    fn framerate_has_a_floor() {
        let reg = registry();
        assert!(reg.validate(Parameter::FrameRate, 19.0).is_err());
        assert!(reg.validate(Parameter::FrameRate, 100_000.0).is_ok());
    }

    #[test]
    fn loaded_settings_must_fit_the_sensor() {
        let settings = CameraSettings {
            width: 512,
            x: 600,
            ..CameraSettings::default()
        };
        let result = SettingsRegistry::with_settings(
            settings,
            SensorGeometry::default(),
            WidthPolicy::MultipleOf16,
        );
        assert!(matches!(result, Err(CameraError::Validation { .. })));
    }

    #[test]
    fn assign_and_value_agree() {
        let mut settings = CameraSettings::default();
        for (parameter, value) in [
            (Parameter::Gain, 2.25),
            (Parameter::BlackLevel, 42.0),
            (Parameter::DualSlope, 1.0),
            (Parameter::TripleSlopeTime, 3.0),
        ] {
            assign(&mut settings, parameter, value);
            assert_eq!(value_of(&settings, parameter), value);
        }
    }
}
