//! Camera capture using the `nokhwa` crate.
//!
//! Frames are decoded to RGB by nokhwa and copied into our own `RgbImage`
//! through the raw buffer, so the two crates do not need to agree on an
//! `image` version.

use image::RgbImage;
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{CameraIndex, RequestedFormat, RequestedFormatType};
use nokhwa::Camera;
use tracing::{debug, info, warn};

use crate::convert::{to_rgb, PixelFormat, RawFrame};
use crate::{CaptureError, FrameSource, Result};

pub struct CameraSource {
    index:  u32,
    camera: Camera,
}

impl CameraSource {
    /// Open camera `index` at its highest resolution and start its stream.
    pub fn open(index: u32) -> Result<Self> {
        Self::open_with(index, recording_format())
    }

    fn open_with(index: u32, kind: RequestedFormatType) -> Result<Self> {
        let unavailable = |e: nokhwa::NokhwaError| CaptureError::CameraUnavailable {
            index,
            reason: e.to_string(),
        };

        let format = RequestedFormat::new::<RgbFormat>(kind);
        let mut camera = Camera::new(CameraIndex::Index(index), format).map_err(unavailable)?;
        camera.open_stream().map_err(unavailable)?;

        info!("Camera {} open: {}", index, camera.info().human_name());
        Ok(Self { index, camera })
    }
}

impl FrameSource for CameraSource {
    fn next_frame(&mut self) -> Result<RgbImage> {
        let index = self.index;
        let failed = |e: nokhwa::NokhwaError| CaptureError::CameraUnavailable {
            index,
            reason: e.to_string(),
        };

        let buffer = self.camera.frame().map_err(failed)?;
        let decoded = buffer.decode_image::<RgbFormat>().map_err(failed)?;
        let (w, h) = (decoded.width(), decoded.height());

        to_rgb(&RawFrame::packed(decoded.into_raw(), w, h, PixelFormat::Rgb))
    }

    fn describe(&self) -> String {
        format!("camera {}", self.index)
    }
}

impl Drop for CameraSource {
    fn drop(&mut self) {
        if let Err(e) = self.camera.stop_stream() {
            warn!("Camera {} stop_stream: {}", self.index, e);
        }
    }
}

/// Sessions record at the best resolution the device offers.
fn recording_format() -> RequestedFormatType {
    RequestedFormatType::AbsoluteHighestResolution
}

/// Discovery takes whatever mode the driver starts in; high-resolution
/// negotiation can take seconds per device.
fn discovery_format() -> RequestedFormatType {
    RequestedFormatType::None
}

/// Indices in `0..limit` that open and deliver one frame.
///
/// Any failure for an index means "device absent". The frame is not decoded.
pub fn probe_cameras(limit: u32) -> Vec<u32> {
    (0..limit)
        .filter(|&index| match grab_raw(index) {
            Ok(_) => {
                debug!("Camera {} present", index);
                true
            }
            Err(e) => {
                debug!("Camera {} absent: {}", index, e);
                false
            }
        })
        .collect()
}

fn grab_raw(index: u32) -> Result<()> {
    let mut source = CameraSource::open_with(index, discovery_format())?;
    source
        .camera
        .frame()
        .map(|_| ())
        .map_err(|e| CaptureError::CameraUnavailable { index, reason: e.to_string() })
}
