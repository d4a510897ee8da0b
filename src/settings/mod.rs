//! Settings registry: camera parameters, their constraints and persistence.

pub mod camera;
pub mod legacy;
pub mod parameter;
pub mod policy;
pub mod registry;
pub mod store;

pub use camera::{CameraSettings, FrameWindow, Gain};
pub use parameter::{CommandSpec, Constraint, Parameter};
pub use policy::WidthPolicy;
pub use registry::{Adjustment, SensorGeometry, SetOutcome, SettingsRegistry, MIN_FRAMERATE};
pub use store::{load_settings, save_settings, LoadedSettings, SettingsSource};
