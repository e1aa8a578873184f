//! Native capture formats → interleaved RGB.
//!
//! Frames are persisted as RGB regardless of what the backend hands out;
//! the alpha / padding byte of 4-byte formats is dropped.

use image::RgbImage;

use crate::{CaptureError, Result};

/// Pixel layout of a raw captured buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// 4 bytes per pixel: Blue, Green, Red, unused.
    Bgrx,
    /// 4 bytes per pixel: Blue, Green, Red, Alpha.
    Bgra,
    /// 4 bytes per pixel: Red, Green, Blue, Alpha.
    Rgba,
    /// 3 bytes per pixel: Red, Green, Blue.
    Rgb,
}

impl PixelFormat {
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            Self::Bgrx | Self::Bgra | Self::Rgba => 4,
            Self::Rgb => 3,
        }
    }
}

/// A raw frame as delivered by a capture backend.
#[derive(Debug)]
pub struct RawFrame {
    pub data:   Vec<u8>,
    pub width:  u32,
    pub height: u32,
    /// Bytes per row, including any padding.
    pub stride: usize,
    pub format: PixelFormat,
}

impl RawFrame {
    /// A buffer with no row padding.
    pub fn packed(data: Vec<u8>, width: u32, height: u32, format: PixelFormat) -> Self {
        let stride = width as usize * format.bytes_per_pixel();
        Self { data, width, height, stride, format }
    }
}

/// Convert a raw frame to an RGB raster.
pub fn to_rgb(frame: &RawFrame) -> Result<RgbImage> {
    let bpp = frame.format.bytes_per_pixel();
    let (w, h) = (frame.width as usize, frame.height as usize);
    let row_bytes = w * bpp;

    let needed = if h == 0 { 0 } else { frame.stride * (h - 1) + row_bytes };
    if frame.stride < row_bytes || frame.data.len() < needed {
        return Err(CaptureError::BadFrame {
            len:    frame.data.len(),
            width:  frame.width,
            height: frame.height,
            format: frame.format,
        });
    }

    let mut out = Vec::with_capacity(w * h * 3);
    for row in 0..h {
        let start = row * frame.stride;
        let line = &frame.data[start..start + row_bytes];
        match frame.format {
            PixelFormat::Rgb => out.extend_from_slice(line),
            PixelFormat::Rgba => {
                for px in line.chunks_exact(4) {
                    out.extend_from_slice(&px[..3]);
                }
            }
            PixelFormat::Bgrx | PixelFormat::Bgra => {
                for px in line.chunks_exact(4) {
                    out.extend_from_slice(&[px[2], px[1], px[0]]);
                }
            }
        }
    }

    RgbImage::from_raw(frame.width, frame.height, out).ok_or(CaptureError::BadFrame {
        len:    frame.data.len(),
        width:  frame.width,
        height: frame.height,
        format: frame.format,
    })
}
