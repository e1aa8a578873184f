use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;

// MARK: - CaptureRegion

/// Rectangle of the display to capture, in physical pixels.
///
/// Width and height are kept even; the yuv420p output format cannot encode
/// odd dimensions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CaptureRegion {
    pub left:   i32,
    pub top:    i32,
    pub width:  u32,
    pub height: u32,
}

impl CaptureRegion {
    pub fn new(left: i32, top: i32, width: u32, height: u32) -> Self {
        Self { left, top, width: floor_even(width), height: floor_even(height) }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn right(&self) -> i64 {
        self.left as i64 + self.width as i64
    }

    pub fn bottom(&self) -> i64 {
        self.top as i64 + self.height as i64
    }
}

impl std::fmt::Display for CaptureRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}×{} at ({}, {})", self.width, self.height, self.left, self.top)
    }
}

/// Round down to the nearest even integer.
#[inline]
pub fn floor_even(v: u32) -> u32 {
    v & !1
}

// MARK: - SourceSelection

/// Where frames come from for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceSelection {
    Region { region: CaptureRegion },
    Camera { index: u32 },
}

impl SourceSelection {
    /// A region source with zero area cannot produce frames.
    pub fn is_usable(&self) -> bool {
        match self {
            Self::Region { region } => !region.is_empty(),
            Self::Camera { .. } => true,
        }
    }
}

impl std::fmt::Display for SourceSelection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Region { region } => write!(f, "screen region {region}"),
            Self::Camera { index } => write!(f, "camera {index}"),
        }
    }
}

// MARK: - ImageFormat

/// On-disk format of captured frames.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    #[default]
    Png,
    Jpeg,
}

impl ImageFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
        }
    }

    /// Accepts both `jpg` and `jpeg`.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "png" => Some(Self::Png),
            "jpg" | "jpeg" => Some(Self::Jpeg),
            _ => None,
        }
    }
}

// MARK: - CaptureSettings

/// Timing parameters of a session, validated from user input.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CaptureSettings {
    pub seconds_per_frame: f64,
    pub output_fps:        u32,
}

impl CaptureSettings {
    /// Parse the two text fields of the control surface.
    pub fn parse(seconds_per_frame: &str, output_fps: &str) -> Result<Self, ConfigError> {
        let spf = seconds_per_frame.trim();
        let seconds_per_frame = spf
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite() && *v > 0.0)
            .ok_or_else(|| ConfigError::InvalidInterval(spf.to_owned()))?;

        let fps = output_fps.trim();
        let output_fps = fps
            .parse::<u32>()
            .ok()
            .filter(|v| *v > 0)
            .ok_or_else(|| ConfigError::InvalidFrameRate(fps.to_owned()))?;

        Ok(Self { seconds_per_frame, output_fps })
    }

    pub fn interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.seconds_per_frame).unwrap_or(Duration::MAX)
    }
}

// MARK: - SessionInfo

/// One start-to-stop capture run.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionInfo {
    pub directory:   PathBuf,
    pub started_at:  DateTime<Local>,
    pub frame_count: u64,
    pub settings:    CaptureSettings,
    pub source:      SourceSelection,
    pub format:      ImageFormat,
}

impl SessionInfo {
    pub fn new(
        directory: PathBuf,
        started_at: DateTime<Local>,
        settings: CaptureSettings,
        source: SourceSelection,
        format: ImageFormat,
    ) -> Self {
        Self { directory, started_at, frame_count: 0, settings, source, format }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_dimensions_are_even() {
        let r = CaptureRegion::new(10, 20, 641, 481);
        assert_eq!((r.width, r.height), (640, 480));
        assert_eq!(CaptureRegion::new(0, 0, 1, 5).width, 0);
    }

    #[test]
    fn empty_region_is_not_usable() {
        let src = SourceSelection::Region { region: CaptureRegion::new(0, 0, 0, 100) };
        assert!(!src.is_usable());
        assert!(SourceSelection::Camera { index: 0 }.is_usable());
    }

    #[test]
    fn parses_valid_settings() {
        let s = CaptureSettings::parse(" 0.5 ", "30").unwrap();
        assert_eq!(s.seconds_per_frame, 0.5);
        assert_eq!(s.output_fps, 30);
        assert_eq!(s.interval(), Duration::from_millis(500));
    }

    #[test]
    fn rejects_bad_interval() {
        for bad in ["", "abc", "0", "-1", "NaN", "inf"] {
            assert!(
                matches!(CaptureSettings::parse(bad, "30"), Err(ConfigError::InvalidInterval(_))),
                "accepted {bad:?}"
            );
        }
    }

    #[test]
    fn rejects_bad_frame_rate() {
        for bad in ["", "0", "-5", "29.97"] {
            assert!(
                matches!(CaptureSettings::parse("1", bad), Err(ConfigError::InvalidFrameRate(_))),
                "accepted {bad:?}"
            );
        }
    }

    #[test]
    fn source_selection_serializes_tagged() {
        let json = serde_json::to_string(&SourceSelection::Camera { index: 2 }).unwrap();
        assert_eq!(json, r#"{"kind":"camera","index":2}"#);
    }
}
