//! Settings files on disk.
//!
//! Two generations are supported:
//! - JSON parameter map (`{"gain": 2, "width": 1024, ...}`) written next to a
//!   derived grabber-geometry file `<stem>.grabber.toml`,
//! - the legacy `.ccf` command table (see [`super::legacy`]).
//!
//! Saving right after loading reproduces the file byte for byte in both
//! generations.

use super::camera::CameraSettings;
use super::legacy::{LegacyDocument, LegacyExtras};
use crate::error::{AppResult, CameraError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Which generation a settings file belongs to.
#[derive(Debug, Clone, PartialEq)]
pub enum SettingsSource {
    /// `settings.json`.
    Json,
    /// A `.ccf` command table, kept whole so unknown keys survive a save.
    Legacy {
        document: LegacyDocument,
        extras: LegacyExtras,
    },
}

/// Settings read from disk, with enough context to write them back.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedSettings {
    /// Parsed settings
    pub settings: CameraSettings,
    /// Where the settings came from
    pub source: SettingsSource,
}

/// Frame grabber view of the configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrabberGeometry {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Horizontal offset
    pub x_offset: u32,
    /// Vertical offset
    pub y_offset: u32,
    /// Frame rate
    pub frames_per_sec: u32,
}

impl From<&CameraSettings> for GrabberGeometry {
    fn from(settings: &CameraSettings) -> Self {
        Self {
            width: settings.width,
            height: settings.height,
            x_offset: settings.x,
            y_offset: settings.y,
            frames_per_sec: settings.framerate,
        }
    }
}

/// `settings.json` -> `settings.grabber.toml`
pub fn geometry_path(settings_path: &Path) -> PathBuf {
    let stem = settings_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "settings".to_string());
    settings_path.with_file_name(format!("{stem}.grabber.toml"))
}

/// Load either generation; the format is detected from the content.
pub fn load_settings(path: &Path) -> AppResult<LoadedSettings> {
    let text = fs::read_to_string(path)?;
    let loaded = parse_settings(&text)?;

    if loaded.source == SettingsSource::Json {
        check_geometry_file(path, &loaded.settings);
    }

    tracing::info!(
        path = %path.display(),
        legacy = matches!(loaded.source, SettingsSource::Legacy { .. }),
        "Loaded camera settings"
    );
    Ok(loaded)
}

/// Parse settings text of either generation.
pub fn parse_settings(text: &str) -> AppResult<LoadedSettings> {
    match serde_json::from_str::<CameraSettings>(text) {
        Ok(settings) => Ok(LoadedSettings {
            settings,
            source: SettingsSource::Json,
        }),
        Err(json_err) => {
            let document = LegacyDocument::parse(text).map_err(|legacy_err| {
                CameraError::SettingsFormat(format!(
                    "neither JSON ({json_err}) nor legacy format ({legacy_err})"
                ))
            })?;
            let (settings, extras) = document.to_settings()?;
            Ok(LoadedSettings {
                settings,
                source: SettingsSource::Legacy { document, extras },
            })
        }
    }
}

/// Save `settings` in the generation it was loaded from.
pub fn save_settings(path: &Path, settings: &CameraSettings, source: &SettingsSource) -> AppResult<()> {
    match source {
        SettingsSource::Json => {
            fs::write(path, to_json(settings)?)?;
            let geometry = toml::to_string(&GrabberGeometry::from(settings))
                .map_err(|e| CameraError::SettingsFormat(e.to_string()))?;
            fs::write(geometry_path(path), geometry)?;
        }
        SettingsSource::Legacy { document, .. } => {
            let mut document = document.clone();
            document.update_from(settings);
            fs::write(path, document.render())?;
        }
    }
    tracing::info!(path = %path.display(), "Saved camera settings");
    Ok(())
}

/// JSON text in the spacing the settings files have always used:
/// `{"gain": 2, "width": 1024}` on a single line.
pub fn to_json(settings: &CameraSettings) -> AppResult<String> {
    let mut out = Vec::new();
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, SpacedFormatter);
    settings
        .serialize(&mut serializer)
        .map_err(|e| CameraError::SettingsFormat(e.to_string()))?;
    String::from_utf8(out).map_err(|e| CameraError::SettingsFormat(e.to_string()))
}

fn check_geometry_file(path: &Path, settings: &CameraSettings) {
    let geometry_file = geometry_path(path);
    let Ok(text) = fs::read_to_string(&geometry_file) else {
        return;
    };
    match toml::from_str::<GrabberGeometry>(&text) {
        Ok(geometry) if geometry == GrabberGeometry::from(settings) => {}
        Ok(geometry) => tracing::warn!(
            file = %geometry_file.display(),
            ?geometry,
            "Grabber geometry file disagrees with camera settings; it will be rewritten on save"
        ),
        Err(e) => tracing::warn!(file = %geometry_file.display(), error = %e, "Unreadable grabber geometry file"),
    }
}

/// Compact JSON with a space after every `:` and `,`.
struct SpacedFormatter;

impl serde_json::ser::Formatter for SpacedFormatter {
    fn begin_object_key<W: ?Sized + io::Write>(&mut self, writer: &mut W, first: bool) -> io::Result<()> {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        writer.write_all(b": ")
    }

    fn begin_array_value<W: ?Sized + io::Write>(&mut self, writer: &mut W, first: bool) -> io::Result<()> {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::Gain;

    #[test]
    fn json_uses_the_historical_spacing() {
        let json = to_json(&CameraSettings::default()).unwrap();
        assert_eq!(
            json,
            r#"{"gain": 2, "width": 1024, "height": 1024, "framerate": 30, "exposure": 15000, "fpn_correction": 1, "blacklevel": 100, "dualslope": 0, "tripleslope": 0, "dualslope_time": 1, "tripleslope_time": 1, "x": 0, "y": 0}"#
        );
    }

    #[test]
    fn detects_generation_from_content() {
        let json = parse_settings(r#"{"gain": 1.5, "width": 512}"#).unwrap();
        assert_eq!(json.source, SettingsSource::Json);
        assert_eq!(json.settings.gain, Gain::X1_5);
        assert_eq!(json.settings.width, 512);
        assert_eq!(json.settings.height, 1024);

        let legacy = parse_settings("{'exptime': ['#e', 'FG_EXPOSURE', 900, [1, None]]}\n").unwrap();
        assert!(matches!(legacy.source, SettingsSource::Legacy { .. }));
        assert_eq!(legacy.settings.exposure, 900);
    }

    #[test]
    fn garbage_is_a_format_error() {
        assert!(matches!(
            parse_settings("exposure = 12"),
            Err(CameraError::SettingsFormat(_))
        ));
    }

    #[test]
    fn geometry_file_sits_next_to_settings() {
        assert_eq!(
            geometry_path(Path::new("/opt/config/current.json")),
            PathBuf::from("/opt/config/current.grabber.toml")
        );
    }

    #[test]
    fn save_writes_settings_and_geometry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("current.json");
        let settings = CameraSettings {
            width: 640,
            x: 16,
            ..CameraSettings::default()
        };

        save_settings(&path, &settings, &SettingsSource::Json).unwrap();

        let loaded = load_settings(&path).unwrap();
        assert_eq!(loaded.settings, settings);

        let geometry: GrabberGeometry =
            toml::from_str(&fs::read_to_string(geometry_path(&path)).unwrap()).unwrap();
        assert_eq!(geometry.width, 640);
        assert_eq!(geometry.x_offset, 16);
        assert_eq!(geometry.frames_per_sec, 30);
    }
}
