//! Stand-ins for backends compiled out of this build.

use image::RgbImage;

use crate::{CaptureError, FrameSource, Result};

#[cfg(not(feature = "screen"))]
use timelapse_core::CaptureRegion;

#[cfg(not(feature = "screen"))]
pub struct RegionSource;

#[cfg(not(feature = "screen"))]
impl RegionSource {
    pub fn open(region: CaptureRegion) -> Result<Self> {
        tracing::warn!("RegionSource::open stub: screen capture disabled ({region})");
        Err(CaptureError::Unsupported { backend: "screen" })
    }
}

#[cfg(not(feature = "screen"))]
impl FrameSource for RegionSource {
    fn next_frame(&mut self) -> Result<RgbImage> {
        Err(CaptureError::Unsupported { backend: "screen" })
    }

    fn describe(&self) -> String {
        "screen (unsupported)".to_owned()
    }
}

#[cfg(not(feature = "camera"))]
pub struct CameraSource;

#[cfg(not(feature = "camera"))]
impl CameraSource {
    pub fn open(index: u32) -> Result<Self> {
        tracing::warn!("CameraSource::open stub: camera capture disabled (index {index})");
        Err(CaptureError::Unsupported { backend: "camera" })
    }
}

#[cfg(not(feature = "camera"))]
impl FrameSource for CameraSource {
    fn next_frame(&mut self) -> Result<RgbImage> {
        Err(CaptureError::Unsupported { backend: "camera" })
    }

    fn describe(&self) -> String {
        "camera (unsupported)".to_owned()
    }
}

/// Without the camera backend there is nothing to probe.
#[cfg(not(feature = "camera"))]
pub fn probe_cameras(_limit: u32) -> Vec<u32> {
    tracing::debug!("probe_cameras stub: camera capture disabled");
    Vec::new()
}
