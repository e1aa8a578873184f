//! timelapse-capture: frame sources for screen-timelapse.
//!
//! # Backends
//!
//! | Source  | Crate  | Feature  |
//! |---------|--------|----------|
//! | Screen region | `xcap`   | `screen` (default) |
//! | Camera        | `nokhwa` | `camera` |
//!
//! With a feature disabled, the matching `open` returns
//! [`CaptureError::Unsupported`] and camera discovery finds nothing.
//!
//! # Usage
//!
//! ```rust,no_run
//! use timelapse_capture::open_source;
//! use timelapse_core::{CaptureRegion, SourceSelection};
//!
//! let selection = SourceSelection::Region { region: CaptureRegion::new(0, 0, 640, 480) };
//! let mut source = open_source(&selection)?;
//! let frame = source.next_frame()?; // image::RgbImage
//! # Ok::<(), timelapse_capture::CaptureError>(())
//! ```

use image::RgbImage;
use timelapse_core::SourceSelection;

pub mod convert;

pub use convert::{to_rgb, PixelFormat, RawFrame};

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("{backend} capture is not compiled into this build")]
    Unsupported { backend: &'static str },

    #[error("Failed to enumerate monitors: {0}")]
    MonitorEnumeration(String),

    #[error("No monitor contains point ({x}, {y})")]
    NoMonitor { x: i32, y: i32 },

    #[error(
        "Region ({},{} {}x{}) exceeds monitor bounds ({}x{})",
        requested.0, requested.1, requested.2, requested.3,
        monitor_size.0, monitor_size.1
    )]
    OutOfBounds {
        requested:    (i64, i64, u32, u32),
        monitor_size: (u32, u32),
    },

    #[error("Region has zero width or height")]
    ZeroDimension,

    #[error("Camera {index} unavailable: {reason}")]
    CameraUnavailable { index: u32, reason: String },

    #[error("Screen capture failed: {0}")]
    CaptureFailed(String),

    #[error("Frame buffer of {len} bytes does not fit {width}x{height} {format:?}")]
    BadFrame { len: usize, width: u32, height: u32, format: PixelFormat },
}

pub type Result<T> = std::result::Result<T, CaptureError>;

// ── FrameSource ───────────────────────────────────────────────────────────────

/// A producer of raster frames for the capture loop.
pub trait FrameSource {
    /// Grab the next frame as interleaved RGB.
    fn next_frame(&mut self) -> Result<RgbImage>;

    /// Human-readable name for logs.
    fn describe(&self) -> String;
}

// ── Platform split ────────────────────────────────────────────────────────────

#[cfg(feature = "screen")]
mod screen;
#[cfg(feature = "screen")]
pub use screen::RegionSource;

#[cfg(feature = "camera")]
mod camera;
#[cfg(feature = "camera")]
pub use camera::{probe_cameras, CameraSource};

#[cfg(any(not(feature = "screen"), not(feature = "camera")))]
mod stub;
#[cfg(not(feature = "camera"))]
pub use stub::{probe_cameras, CameraSource};
#[cfg(not(feature = "screen"))]
pub use stub::RegionSource;

/// Open the source described by `selection`.
///
/// Backends may hold thread-affine OS handles, so call this on the thread
/// that will pull frames.
pub fn open_source(selection: &SourceSelection) -> Result<Box<dyn FrameSource>> {
    match selection {
        SourceSelection::Region { region } => Ok(Box::new(RegionSource::open(*region)?)),
        SourceSelection::Camera { index } => Ok(Box::new(CameraSource::open(*index)?)),
    }
}
