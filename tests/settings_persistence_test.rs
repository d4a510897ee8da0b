//! Integration tests for loading and saving settings files through the
//! controller, in both the JSON and the legacy command-table generation.

mod common;

use common::{connected, rig_with};
use hscam::config::ControllerConfig;
use hscam::error::CameraError;
use hscam::mock::DeviceEvent;
use hscam::settings::{store, Gain, Parameter};
use std::fs;

const LEGACY: &str = "{'gain': ['#G', None, 0, [0, 1]], 'fpn': ['#F', None, 1, [0, 1]], \
'frameformat': ['#R', ['FG_XOFFSET', 'FG_YOFFSET', 'FG_WIDTH', 'FG_HEIGHT'], [0, 0, 512, 512], \
[[0, 1024], [0, 1024], [1, 1024], [1, 1024]]], 'framerate': ['#r', 'FG_FRAMESPERSEC', 400, [20, None]], \
'exptime': ['#e', 'FG_EXPOSURE', 1000, [1, None]], 'dualslope': ['#D', None, 0, [0, 1]], \
'dualslopetime': ['#d', None, 1, [1, 1000]], 'tripleslope': ['#T', None, 0, [0, 1]], \
'tripleslopetime': ['#t', None, 1, [1, 150]], 'blacklevel': ['#z', None, 100, [0, 255]], \
'numpicsbuffer': [None, None, 1000, [1, None]], 'picsaftertrigger': [None, None, 0, [None, None]]}\n";

#[tokio::test]
async fn test_json_settings_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("camera.json");

    let mut rig = connected().await;
    rig.controller.set_gain(Gain::X1_5).await.unwrap();
    rig.controller.set_width(512).await.unwrap();
    rig.controller.set_exposure(2000).await.unwrap();
    rig.controller.save_settings(&path).unwrap();

    let text = fs::read_to_string(&path).unwrap();
    assert!(text.starts_with(r#"{"gain": 1.5, "width": 512"#));
    assert!(store::geometry_path(&path).exists());

    let mut other = connected().await;
    let adjustments = other.controller.load_settings(&path).await.unwrap();
    assert!(adjustments.is_empty());
    assert_eq!(other.controller.settings(), rig.controller.settings());
    assert_eq!(other.camera.model().width, 512);
    assert_eq!(other.camera.model().exposure, 2000);

    // Saving what was loaded reproduces the file.
    other.controller.save_settings(&path).unwrap();
    assert_eq!(fs::read_to_string(&path).unwrap(), text);
}

#[tokio::test]
async fn test_loaded_values_are_clamped_to_device_limits() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fast.json");
    fs::write(
        &path,
        r#"{"gain": 2, "width": 1024, "height": 1024, "framerate": 2000, "exposure": 30000, "dualslope_time": 20000}"#,
    )
    .unwrap();

    let mut rig = connected().await;
    let adjustments = rig.controller.load_settings(&path).await.unwrap();

    let adjusted: Vec<Parameter> = adjustments.iter().map(|a| a.parameter).collect();
    assert_eq!(
        adjusted,
        vec![
            Parameter::FrameRate,
            Parameter::Exposure,
            Parameter::DualSlopeTime
        ]
    );
    let settings = rig.controller.settings();
    assert_eq!(settings.framerate, 507);
    assert_eq!(settings.exposure, 1970);
    assert_eq!(settings.dualslope_time, 1970);
    assert_eq!(rig.camera.model().dualslope_time, 1970);
}

#[tokio::test]
async fn test_invalid_settings_file_changes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.json");
    fs::write(&path, r#"{"gain": 2, "width": 1000}"#).unwrap();

    let mut rig = connected().await;
    let err = rig.controller.load_settings(&path).await.unwrap_err();
    assert!(matches!(err, CameraError::Validation { .. }));
    assert_eq!(rig.controller.settings().width, 1024);
    assert!(rig.log.events().is_empty());
}

#[tokio::test]
async fn test_legacy_settings_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("camera.ccf");
    fs::write(&path, LEGACY).unwrap();

    let mut rig = connected().await;
    rig.controller.load_settings(&path).await.unwrap();

    let settings = rig.controller.settings();
    assert_eq!(settings.gain, Gain::X1);
    assert_eq!((settings.width, settings.height), (512, 512));
    assert_eq!(settings.framerate, 400);
    assert_eq!(settings.exposure, 1000);
    assert_eq!(rig.camera.model().framerate, 400);

    // Unchanged settings save byte for byte.
    rig.controller.save_settings(&path).unwrap();
    assert_eq!(fs::read_to_string(&path).unwrap(), LEGACY);

    // Changed values are written back into the legacy table.
    rig.controller.set_exposure(750).await.unwrap();
    rig.controller.save_settings(&path).unwrap();
    let text = fs::read_to_string(&path).unwrap();
    assert!(text.contains("'exptime': ['#e', 'FG_EXPOSURE', 750, [1, None]]"));
    assert!(text.contains("'framerate': ['#r', 'FG_FRAMESPERSEC', 400, [20, None]]"));
}

#[tokio::test]
async fn test_legacy_gain_survives_save_and_reload() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("camera.ccf");

    for gain in [Gain::X1_5, Gain::X2, Gain::X3] {
        fs::write(&path, LEGACY).unwrap();
        let mut rig = connected().await;
        rig.controller.load_settings(&path).await.unwrap();
        rig.controller.set_gain(gain).await.unwrap();
        rig.controller.save_settings(&path).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let slot = format!("'gain': ['#G', None, {}, [0, 1]]", gain.index());
        assert!(text.contains(&slot), "{gain}: {text}");

        let mut other = connected().await;
        other.controller.load_settings(&path).await.unwrap();
        assert_eq!(other.controller.settings().gain, gain);
        assert_eq!(other.camera.model().gain, gain.as_f64());
    }
}

#[tokio::test]
async fn test_legacy_ring_size_applies_to_live_capture() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("camera.ccf");
    fs::write(&path, LEGACY).unwrap();

    let mut rig = connected().await;
    rig.controller.load_settings(&path).await.unwrap();

    assert!(rig.log.events().contains(&DeviceEvent::Allocate {
        frame_bytes: 262_144,
        capacity: 1000,
    }));
    let session = rig.controller.session();
    assert_eq!(session.lock().await.capacity(), 1000);
}

#[tokio::test]
async fn test_startup_settings_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("startup.json");
    fs::write(&path, r#"{"gain": 3, "blacklevel": 12}"#).unwrap();

    let config = ControllerConfig {
        settings_file: Some(path),
        ..ControllerConfig::default()
    };
    let mut rig = rig_with(config);
    rig.controller.connect().await.unwrap();

    assert_eq!(rig.controller.settings().gain, Gain::X3);
    assert_eq!(rig.controller.settings().blacklevel, 12);
    assert_eq!(rig.camera.model().gain, 3.0);
    assert_eq!(rig.camera.model().blacklevel, 12);
}
