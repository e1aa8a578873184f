//! Screen-region capture using the `xcap` crate.
//!
//! This is the infrastructure layer; it talks to the OS. The monitors the
//! region touches are resolved once at open time. Every frame grabs each of
//! them and pastes its share of the region onto one canvas, so a region may
//! straddle displays. Parts covered by no monitor stay black.

use image::imageops;
use image::{RgbImage, RgbaImage};
use timelapse_core::CaptureRegion;
use tracing::{debug, info, warn};
use xcap::Monitor;

use crate::convert::{to_rgb, PixelFormat, RawFrame};
use crate::{CaptureError, FrameSource, Result};

// MARK: - Geometry

/// Rectangle in physical desktop pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Rect {
    x:      i64,
    y:      i64,
    width:  u32,
    height: u32,
}

impl Rect {
    fn of_region(region: &CaptureRegion) -> Self {
        Self { x: region.left as i64, y: region.top as i64, width: region.width, height: region.height }
    }
}

/// The part of a region one monitor supplies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Piece {
    /// Offset inside the monitor image.
    src_x:  u32,
    src_y:  u32,
    /// Offset inside the output frame.
    dst_x:  u32,
    dst_y:  u32,
    width:  u32,
    height: u32,
}

fn overlap(region: Rect, monitor: Rect) -> Option<Piece> {
    let left = region.x.max(monitor.x);
    let top = region.y.max(monitor.y);
    let right = (region.x + region.width as i64).min(monitor.x + monitor.width as i64);
    let bottom = (region.y + region.height as i64).min(monitor.y + monitor.height as i64);
    if right <= left || bottom <= top {
        return None;
    }
    Some(Piece {
        src_x:  (left - monitor.x) as u32,
        src_y:  (top - monitor.y) as u32,
        dst_x:  (left - region.x) as u32,
        dst_y:  (top - region.y) as u32,
        width:  (right - left) as u32,
        height: (bottom - top) as u32,
    })
}

/// Physical origin of a monitor whose image is `image_width` pixels wide.
/// xcap reports geometry in logical units on scaled displays.
fn physical_origin(logical: (i32, i32), logical_width: u32, image_width: u32) -> (i64, i64) {
    let ratio = if logical_width > 0 { image_width as f64 / logical_width as f64 } else { 1.0 };
    ((logical.0 as f64 * ratio).round() as i64, (logical.1 as f64 * ratio).round() as i64)
}

// MARK: - RegionSource

struct Area {
    monitor: Monitor,
    origin:  (i64, i64),
}

pub struct RegionSource {
    region: CaptureRegion,
    areas:  Vec<Area>,
}

impl RegionSource {
    pub fn open(region: CaptureRegion) -> Result<Self> {
        if region.is_empty() {
            return Err(CaptureError::ZeroDimension);
        }

        let monitors = Monitor::all().map_err(|e| CaptureError::MonitorEnumeration(e.to_string()))?;
        let wanted = Rect::of_region(&region);
        let mut areas = Vec::new();
        for monitor in monitors {
            let logical = (
                monitor.x().map_err(|e| CaptureError::MonitorEnumeration(e.to_string()))?,
                monitor.y().map_err(|e| CaptureError::MonitorEnumeration(e.to_string()))?,
            );
            let logical_width = monitor
                .width()
                .map_err(|e| CaptureError::MonitorEnumeration(e.to_string()))?;
            // One grab to learn the physical size.
            let image = match monitor.capture_image() {
                Ok(image) => image,
                Err(e) => {
                    warn!("Skipping monitor {}: {}", monitor.name().unwrap_or_default(), e);
                    continue;
                }
            };
            let origin = physical_origin(logical, logical_width, image.width());
            let rect = Rect { x: origin.0, y: origin.1, width: image.width(), height: image.height() };
            if overlap(wanted, rect).is_some() {
                info!(
                    "RegionSource: {} uses monitor {} at ({}, {}) {}x{}",
                    region,
                    monitor.name().unwrap_or_default(),
                    origin.0,
                    origin.1,
                    image.width(),
                    image.height()
                );
                areas.push(Area { monitor, origin });
            }
        }

        if areas.is_empty() {
            return Err(CaptureError::NoMonitor { x: region.left, y: region.top });
        }
        Ok(Self { region, areas })
    }
}

impl FrameSource for RegionSource {
    fn next_frame(&mut self) -> Result<RgbImage> {
        let wanted = Rect::of_region(&self.region);
        let mut canvas = RgbaImage::new(wanted.width, wanted.height);
        let mut covered = false;
        let mut last_size = (0, 0);

        for area in &self.areas {
            let full = area
                .monitor
                .capture_image()
                .map_err(|e| CaptureError::CaptureFailed(e.to_string()))?;
            last_size = (full.width(), full.height());
            let rect = Rect { x: area.origin.0, y: area.origin.1, width: full.width(), height: full.height() };
            let Some(piece) = overlap(wanted, rect) else { continue };
            let part = imageops::crop_imm(&full, piece.src_x, piece.src_y, piece.width, piece.height).to_image();
            imageops::replace(&mut canvas, &part, piece.dst_x as i64, piece.dst_y as i64);
            covered = true;
        }

        // Monitors changed since open and none still reaches the region.
        if !covered {
            return Err(CaptureError::OutOfBounds {
                requested:    (wanted.x, wanted.y, wanted.width, wanted.height),
                monitor_size: last_size,
            });
        }

        debug!("Grabbed {}x{} region from {} monitor(s)", wanted.width, wanted.height, self.areas.len());
        to_rgb(&RawFrame::packed(canvas.into_raw(), wanted.width, wanted.height, PixelFormat::Rgba))
    }

    fn describe(&self) -> String {
        format!("screen region {}", self.region)
    }
}
