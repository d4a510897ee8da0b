//! Frame width rules.
//!
//! Two firmware generations disagree on which widths the camera accepts, so the
//! rule is a configuration choice rather than a constant.

use serde::{Deserialize, Serialize};

/// Which widths the camera accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WidthPolicy {
    /// Any positive multiple of 16 up to the sensor width.
    #[default]
    #[serde(rename = "multiple_of_16")]
    MultipleOf16,
    /// Multiples of both 16 and 24, or the full 1280-pixel line.
    #[serde(rename = "legacy1280")]
    Legacy1280,
}

impl WidthPolicy {
    /// Width of a full line on the legacy sensor.
    pub const LEGACY_FULL_WIDTH: u32 = 1280;

    /// Check `width` against this rule and the sensor width.
    pub fn check(self, width: u32, sensor_width: u32) -> Result<(), String> {
        if width == 0 {
            return Err("must be positive".to_string());
        }
        if width > sensor_width {
            return Err(format!("must not exceed the sensor width {sensor_width}"));
        }
        match self {
            WidthPolicy::MultipleOf16 if width % 16 != 0 => {
                Err("must be a multiple of 16".to_string())
            }
            WidthPolicy::Legacy1280
                if width != Self::LEGACY_FULL_WIDTH && (width % 16 != 0 || width % 24 != 0) =>
            {
                Err("must be a multiple of 16 and 24, or exactly 1280".to_string())
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multiple_of_16() {
        let policy = WidthPolicy::MultipleOf16;
        assert!(policy.check(1024, 1024).is_ok());
        assert!(policy.check(16, 1024).is_ok());
        assert!(policy.check(1000, 1024).is_err());
        assert!(policy.check(1040, 1024).is_err());
        assert!(policy.check(0, 1024).is_err());
    }

    #[test]
    fn legacy_1280() {
        let policy = WidthPolicy::Legacy1280;
        assert!(policy.check(1280, 1280).is_ok());
        assert!(policy.check(960, 1280).is_ok());
        assert!(policy.check(48, 1280).is_ok());
        // multiple of 16 but not of 24
        assert!(policy.check(1024, 1280).is_err());
        assert!(policy.check(1296, 1280).is_err());
    }
}
