//! Integration tests for the controller against simulated devices
//!
//! The simulated camera and grabber share one device log, so these tests can
//! check both the resulting state and the exact order of device calls.

mod common;

use common::{connected, rig_with};
use hscam::acquisition::AcquisitionState;
use hscam::channel::Opcode;
use hscam::config::ControllerConfig;
use hscam::error::{CameraError, ChannelError};
use hscam::events::ControllerEvent;
use hscam::grabber::{FrameCount, GrabberParameter};
use hscam::mock::DeviceEvent;
use hscam::settings::{Gain, Parameter};

// =============================================================================
// Startup
// =============================================================================

#[tokio::test]
async fn test_connect_pushes_configuration_in_order() {
    let mut rig = rig_with(ControllerConfig::default());
    let adjustments = rig.controller.connect().await.unwrap();
    assert!(adjustments.is_empty());

    assert_eq!(
        rig.camera.received(),
        vec![
            "#G(2)",
            "#F(1)",
            "#R(0,0,1024,1024)",
            "#A",
            "#r(30)",
            "#a",
            "#e(15000)",
            "#z(100)",
            "#D(0)",
            "#d(1)",
            "#T(0)",
            "#t(1)",
        ]
    );

    let session = rig.controller.session();
    let session = session.lock().await;
    assert_eq!(session.state(), AcquisitionState::Acquiring);
    assert_eq!(session.target(), None);
    assert_eq!(rig.grabber.parameter(GrabberParameter::FramesPerSec), 30);
}

// =============================================================================
// Plain parameters
// =============================================================================

#[tokio::test]
async fn test_gain_round_trip() {
    let mut rig = connected().await;
    let outcome = rig.controller.set_gain(Gain::X2_25).await.unwrap();

    assert!(!outcome.was_clamped());
    assert_eq!(rig.controller.settings().gain, Gain::X2_25);
    assert_eq!(rig.camera.model().gain, 2.25);
    assert_eq!(
        rig.log.events(),
        vec![DeviceEvent::CameraCommand("#G(2.25)".to_string())]
    );
}

#[tokio::test]
async fn test_set_by_name() {
    let mut rig = connected().await;
    rig.controller.set_parameter("blacklevel", 42.0).await.unwrap();
    rig.controller.set_parameter("fpn", 0.0).await.unwrap();

    assert_eq!(rig.controller.settings().blacklevel, 42);
    assert!(!rig.controller.settings().fpn_correction);
    assert_eq!(rig.camera.model().blacklevel, 42);
    assert!(!rig.camera.model().fpn_correction);
}

#[tokio::test]
async fn test_exposure_is_clamped_to_device_maximum() {
    let mut rig = connected().await;
    let mut events = rig.controller.subscribe();

    let outcome = rig.controller.set_exposure(50_000).await.unwrap();
    assert_eq!(outcome.applied, 33_331.0);
    assert_eq!(rig.controller.settings().exposure, 33_331);
    assert_eq!(rig.camera.model().exposure, 33_331);

    match events.try_recv().unwrap() {
        ControllerEvent::SettingAdjusted(adjustment) => {
            assert_eq!(adjustment.parameter, Parameter::Exposure);
            assert_eq!(adjustment.requested, 50_000.0);
            assert_eq!(adjustment.applied, 33_331.0);
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn test_framerate_change_cascades_to_exposure_and_slopes() {
    let mut rig = connected().await;
    rig.controller.set_dualslope_time(10_000).await.unwrap();
    rig.controller.set_tripleslope_time(5_000).await.unwrap();
    let mut events = rig.controller.subscribe();

    let outcome = rig.controller.set_framerate(1000).await.unwrap();
    assert_eq!(outcome.applied, 507.0);

    let settings = rig.controller.settings();
    assert_eq!(settings.framerate, 507);
    assert_eq!(settings.exposure, 1970);
    assert_eq!(settings.dualslope_time, 1970);
    assert_eq!(settings.tripleslope_time, 1970);

    let model = rig.camera.model();
    assert_eq!(model.framerate, 507);
    assert_eq!(model.exposure, 1970);
    assert_eq!(model.dualslope_time, 1970);
    assert_eq!(model.tripleslope_time, 1970);
    assert_eq!(rig.grabber.parameter(GrabberParameter::FramesPerSec), 507);

    let mut adjusted = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let ControllerEvent::SettingAdjusted(adjustment) = event {
            adjusted.push(adjustment.parameter);
        }
    }
    assert_eq!(
        adjusted,
        vec![
            Parameter::FrameRate,
            Parameter::Exposure,
            Parameter::DualSlopeTime,
            Parameter::TripleSlopeTime,
        ]
    );
}

#[tokio::test]
async fn test_tripleslope_time_bounded_by_dualslope_time() {
    let mut rig = connected().await;
    rig.controller.set_dualslope_time(300).await.unwrap();

    let outcome = rig.controller.set_tripleslope_time(400).await.unwrap();
    assert_eq!(outcome.applied, 300.0);
    assert_eq!(rig.controller.settings().tripleslope_time, 300);
}

// =============================================================================
// Rejections
// =============================================================================

#[tokio::test]
async fn test_invalid_width_is_rejected_without_device_traffic() {
    let mut rig = connected().await;
    let mut events = rig.controller.subscribe();

    let err = rig.controller.set_width(1000).await.unwrap_err();
    assert!(matches!(err, CameraError::Validation { ref parameter, .. } if parameter == "width"));
    assert_eq!(rig.controller.settings().width, 1024);
    assert!(rig.log.events().is_empty());

    match events.try_recv().unwrap() {
        ControllerEvent::SettingRejected { name, attempted, .. } => {
            assert_eq!(name, "width");
            assert_eq!(attempted, "1000");
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn test_unsupported_gain_is_rejected() {
    let mut rig = connected().await;
    let err = rig.controller.set_parameter("gain", 2.5).await.unwrap_err();
    assert!(matches!(err, CameraError::Validation { .. }));
    assert_eq!(rig.controller.settings().gain, Gain::X2);
}

#[tokio::test]
async fn test_camera_rejection_keeps_previous_value() {
    let mut rig = connected().await;
    rig.camera.reject(Opcode::BlackLevel);
    let mut events = rig.controller.subscribe();

    let err = rig.controller.set_blacklevel(50).await.unwrap_err();
    assert!(matches!(err, CameraError::SettingRejected { .. }));
    assert!(err.is_recoverable());
    assert_eq!(rig.controller.settings().blacklevel, 100);

    match events.try_recv().unwrap() {
        ControllerEvent::SettingRejected { name, attempted, .. } => {
            assert_eq!(name, "blacklevel");
            assert_eq!(attempted, "50");
        }
        other => panic!("unexpected event {other:?}"),
    }

    // The channel survives a rejection.
    rig.camera.accept(Opcode::BlackLevel);
    rig.controller.set_blacklevel(50).await.unwrap();
    assert_eq!(rig.controller.settings().blacklevel, 50);
}

#[tokio::test]
async fn test_silent_camera_fails_the_channel() {
    let mut rig = connected().await;
    rig.camera.go_silent();

    let err = rig.controller.set_gain(Gain::X3).await.unwrap_err();
    assert!(matches!(
        err,
        CameraError::Channel(ChannelError::Timeout { .. })
    ));
    assert!(!err.is_recoverable());
    assert_eq!(rig.controller.settings().gain, Gain::X2);

    let again = rig.controller.set_gain(Gain::X3).await.unwrap_err();
    assert!(matches!(again, CameraError::Channel(ChannelError::Closed)));
}

// =============================================================================
// Frame geometry
// =============================================================================

#[tokio::test]
async fn test_width_change_rebuilds_ring_buffer_in_order() {
    let mut rig = connected().await;
    rig.controller.set_width(512).await.unwrap();

    let events = rig.log.events();
    assert!(events.len() >= 7, "too few device calls: {events:?}");
    assert_eq!(events[0], DeviceEvent::Stop);
    assert_eq!(events[1], DeviceEvent::Free);
    assert_eq!(
        events[2],
        DeviceEvent::CameraCommand("#R(0,0,512,1024)".to_string())
    );
    assert_eq!(
        events[3],
        DeviceEvent::GrabberParameter {
            parameter: GrabberParameter::Width,
            value: 512,
        }
    );
    assert_eq!(
        events[4],
        DeviceEvent::GrabberParameter {
            parameter: GrabberParameter::Height,
            value: 1024,
        }
    );
    assert!(matches!(
        events[5],
        DeviceEvent::Allocate {
            frame_bytes: 524_288,
            ..
        }
    ));
    assert_eq!(
        events[6],
        DeviceEvent::Acquire {
            count: FrameCount::Infinite
        }
    );

    assert_eq!(rig.controller.settings().width, 512);
    assert_eq!(rig.camera.model().width, 512);
    let session = rig.controller.session();
    assert_eq!(session.lock().await.window().map(|w| w.width), Some(512));
}

#[tokio::test]
async fn test_smaller_height_allows_higher_framerate() {
    let mut rig = connected().await;
    rig.controller.set_height(512).await.unwrap();

    let outcome = rig.controller.set_framerate(1000).await.unwrap();
    assert!(!outcome.was_clamped());
    assert_eq!(rig.controller.settings().framerate, 1000);
    assert_eq!(rig.controller.settings().exposure, 998);
}

#[tokio::test]
async fn test_height_increase_clamps_framerate() {
    let mut rig = connected().await;
    rig.controller.set_height(512).await.unwrap();
    rig.controller.set_framerate(1000).await.unwrap();

    let outcome = rig.controller.set_height(1024).await.unwrap();
    assert!(outcome
        .adjustments
        .iter()
        .any(|a| a.parameter == Parameter::FrameRate && a.applied == 507.0));
    assert_eq!(rig.controller.settings().framerate, 507);
    assert_eq!(rig.camera.model().framerate, 507);
}

#[tokio::test]
async fn test_offsets_follow_window_size() {
    let mut rig = connected().await;

    // Full-width window leaves no room to move.
    let err = rig.controller.set_x(16).await.unwrap_err();
    assert!(matches!(err, CameraError::Validation { .. }));

    rig.controller.set_width(512).await.unwrap();
    rig.log.clear();
    rig.controller.set_x(512).await.unwrap();
    assert!(rig.controller.set_x(513).await.is_err());

    // Moving the window does not touch the ring buffer.
    assert_eq!(
        rig.log.events(),
        vec![DeviceEvent::CameraCommand("#R(512,0,512,1024)".to_string())]
    );
    assert_eq!(rig.camera.model().x, 512);

    let outcome = rig.controller.set_width(1024).await.unwrap();
    assert!(outcome
        .adjustments
        .iter()
        .any(|a| a.parameter == Parameter::XOffset && a.applied == 0.0));
    assert_eq!(rig.controller.settings().x, 0);
    assert_eq!(rig.camera.model().x, 0);
}

#[tokio::test]
async fn test_rejected_frame_format_restores_capture() {
    let mut rig = connected().await;
    rig.camera.reject(Opcode::FrameFormat);

    let err = rig.controller.set_width(512).await.unwrap_err();
    assert!(matches!(err, CameraError::SettingRejected { .. }));
    assert_eq!(rig.controller.settings().width, 1024);
    assert_eq!(rig.grabber.parameter(GrabberParameter::Width), 1024);

    let session = rig.controller.session();
    let session = session.lock().await;
    assert!(session.is_acquiring());
    assert_eq!(session.window().map(|w| w.width), Some(1024));

    let events = rig.log.events();
    assert!(matches!(
        events.last(),
        Some(DeviceEvent::Acquire {
            count: FrameCount::Infinite
        })
    ));
}

#[tokio::test]
async fn test_failed_reallocation_restores_previous_window() {
    let mut rig = connected().await;
    rig.controller.set_width(512).await.unwrap();
    rig.controller.set_height(512).await.unwrap();
    rig.log.clear();

    // Device memory no longer holds a full ring of either size.
    let _limited = rig.grabber.clone().with_memory_limit(262_144);

    let err = rig.controller.set_width(1024).await.unwrap_err();
    assert!(matches!(err, CameraError::Allocation { .. }));
    assert_eq!(rig.controller.settings().width, 512);
    assert_eq!(rig.camera.model().width, 512);
    assert_eq!(rig.grabber.parameter(GrabberParameter::Width), 512);

    let session = rig.controller.session();
    assert_eq!(session.lock().await.state(), AcquisitionState::Idle);
}

// =============================================================================
// Shutdown
// =============================================================================

#[tokio::test]
async fn test_shutdown_releases_buffer() {
    let rig = connected().await;
    assert_eq!(rig.grabber.buffer_count(), 1);
    rig.controller.shutdown().await.unwrap();

    assert_eq!(rig.grabber.buffer_count(), 0);
    let events = rig.log.events();
    assert_eq!(&events[..2], &[DeviceEvent::Stop, DeviceEvent::Free]);
}
