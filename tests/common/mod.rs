//! Shared test rig: a controller wired to a simulated camera and grabber
//! that record every device-side call into one log.

#![allow(dead_code)]

use hscam::config::ControllerConfig;
use hscam::mock::{DeviceLog, MockMode, SimulatedCamera, SimulatedGrabber};
use hscam::settings::SensorGeometry;
use hscam::Controller;
use std::sync::Arc;
use std::time::Duration;

pub struct Rig {
    pub controller: Controller,
    pub camera: SimulatedCamera,
    pub grabber: SimulatedGrabber,
    pub log: DeviceLog,
}

pub fn rig_with(config: ControllerConfig) -> Rig {
    let log = DeviceLog::new();
    let sensor = SensorGeometry {
        width: config.sensor.width,
        height: config.sensor.height,
    };
    let camera = SimulatedCamera::new(sensor).with_log(log.clone());
    let grabber = SimulatedGrabber::new(MockMode::Instant).with_log(log.clone());
    let link = camera.connect().with_timeout(Duration::from_millis(200));
    let controller = Controller::new(config, Box::new(link), Arc::new(grabber.clone()));
    Rig {
        controller,
        camera,
        grabber,
        log,
    }
}

/// Rig after the startup configuration was pushed and live capture started.
/// The device log is cleared.
pub async fn connected_with(config: ControllerConfig) -> Rig {
    let mut rig = rig_with(config);
    rig.controller.connect().await.unwrap();
    rig.log.clear();
    rig
}

pub async fn connected() -> Rig {
    connected_with(ControllerConfig::default()).await
}
