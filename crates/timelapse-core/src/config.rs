use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::geometry::REFERENCE_DPI;
use crate::types::ImageFormat;

/// Directory name under the platform config / data directories.
pub const APP_DIR_NAME: &str = "screen-timelapse";

/// Application configuration, persisted as TOML.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimelapseConfig {
    pub capture: CaptureConfig,
    pub encoder: EncoderConfig,
    pub display: DisplayConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Root under which session directories are created.
    pub output_dir: PathBuf,
    /// Initial value of the seconds-per-frame field.
    pub seconds_per_frame: f64,
    /// Initial value of the output frame rate field.
    pub output_fps: u32,
    pub image_format: ImageFormat,
    /// How long Stop waits for the capture thread before moving on without it.
    pub stop_timeout_ms: u64,
    /// Stop early when free disk space drops below this. 0 disables the check.
    pub min_free_mb: u64,
    /// End the session after this many frames. 0 means unlimited.
    pub max_frames: u64,
    /// Camera indices probed during discovery are `0..camera_probe_limit`.
    pub camera_probe_limit: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            output_dir:         PathBuf::from("timelapses"),
            seconds_per_frame:  1.0,
            output_fps:         30,
            image_format:       ImageFormat::Png,
            stop_timeout_ms:    3_000,
            min_free_mb:        256,
            max_frames:         0,
            camera_probe_limit: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    /// Explicit ffmpeg binary. Skips discovery when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    pub codec: String,
    pub pixel_format: String,
    /// Where to fetch an ffmpeg binary from when none is installed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            path:         None,
            codec:        "libx264".to_owned(),
            pixel_format: "yuv420p".to_owned(),
            download_url: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Physical diagonal of the monitor. When set, the DPI scale is derived
    /// from it instead of the platform-reported factor.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagonal_inches: Option<f32>,
    pub reference_dpi: f32,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self { diagonal_inches: None, reference_dpi: REFERENCE_DPI }
    }
}

impl TimelapseConfig {
    /// Load from the user config file, falling back to defaults.
    ///
    /// A missing file is created with the defaults so the user has
    /// something to edit. Environment overrides are applied last.
    pub fn load() -> Self {
        let mut config = match config_path() {
            Some(path) => Self::load_from_path(&path),
            None => {
                warn!("No platform config directory, using defaults");
                Self::default()
            }
        };
        config.apply_env();
        config
    }

    pub fn load_from_path(path: &Path) -> Self {
        if path.exists() {
            match std::fs::read_to_string(path) {
                Ok(content) => match toml::from_str(&content) {
                    Ok(config) => {
                        info!("Loaded config from {}", path.display());
                        return config;
                    }
                    Err(e) => error!("Failed to parse config file {}: {}", path.display(), e),
                },
                Err(e) => error!("Failed to read config file {}: {}", path.display(), e),
            }
            return Self::default();
        }

        let config = Self::default();
        if let Err(e) = config.save_to_path(path) {
            warn!("Could not write default config to {}: {}", path.display(), e);
        }
        config
    }

    pub fn save_to_path(&self, path: &Path) -> std::io::Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)
    }

    /// `TIMELAPSE_OUTPUT_DIR`, `TIMELAPSE_FFMPEG`, `TIMELAPSE_CAMERA_PROBE`.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(dir) = var("TIMELAPSE_OUTPUT_DIR").filter(|s| !s.is_empty()) {
            self.capture.output_dir = PathBuf::from(dir);
        }
        if let Some(ffmpeg) = var("TIMELAPSE_FFMPEG").filter(|s| !s.is_empty()) {
            self.encoder.path = Some(PathBuf::from(ffmpeg));
        }
        if let Some(limit) = var("TIMELAPSE_CAMERA_PROBE").and_then(|s| s.parse::<u32>().ok()) {
            self.capture.camera_probe_limit = limit.clamp(1, 32);
        }
    }
}

/// `<config_dir>/screen-timelapse/config.toml`
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join(APP_DIR_NAME).join("config.toml"))
}

/// `<data_local_dir>/screen-timelapse`, used for the downloaded encoder.
pub fn data_dir() -> Option<PathBuf> {
    dirs::data_local_dir().map(|p| p.join(APP_DIR_NAME))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = TimelapseConfig::default();
        assert_eq!(cfg.capture.output_dir, PathBuf::from("timelapses"));
        assert_eq!(cfg.capture.output_fps, 30);
        assert_eq!(cfg.capture.stop_timeout_ms, 3_000);
        assert_eq!(cfg.encoder.codec, "libx264");
        assert_eq!(cfg.encoder.pixel_format, "yuv420p");
        assert_eq!(cfg.display.reference_dpi, 96.0);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let cfg: TimelapseConfig = toml::from_str(
            r#"
            [capture]
            seconds_per_frame = 5.0
            image_format = "jpeg"

            [encoder]
            path = "/opt/ffmpeg/bin/ffmpeg"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.capture.seconds_per_frame, 5.0);
        assert_eq!(cfg.capture.image_format, ImageFormat::Jpeg);
        assert_eq!(cfg.capture.output_fps, 30);
        assert_eq!(cfg.encoder.path, Some(PathBuf::from("/opt/ffmpeg/bin/ffmpeg")));
        assert_eq!(cfg.encoder.codec, "libx264");
    }

    #[test]
    fn missing_file_writes_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("config.toml");
        let cfg = TimelapseConfig::load_from_path(&path);
        assert_eq!(cfg, TimelapseConfig::default());
        assert!(path.exists());
        assert_eq!(TimelapseConfig::load_from_path(&path), cfg);
    }

    #[test]
    fn unparsable_file_falls_back_to_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "capture = 12").unwrap();
        assert_eq!(TimelapseConfig::load_from_path(&path), TimelapseConfig::default());
    }

    #[test]
    fn env_overrides_apply() {
        let mut cfg = TimelapseConfig::default();
        cfg.apply_overrides(|key| match key {
            "TIMELAPSE_OUTPUT_DIR" => Some("/data/tl".to_owned()),
            "TIMELAPSE_CAMERA_PROBE" => Some("99".to_owned()),
            _ => None,
        });
        assert_eq!(cfg.capture.output_dir, PathBuf::from("/data/tl"));
        assert_eq!(cfg.capture.camera_probe_limit, 32);
        assert_eq!(cfg.encoder.path, None);
    }
}
