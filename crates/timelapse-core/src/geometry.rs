//! Screen-space → device-pixel conversion for region selection.
//!
//! The overlay window reports its rectangle in logical (scaled) screen
//! coordinates. Capture backends work in physical pixels, so the final
//! rectangle is multiplied by the scale of the monitor it sits on:
//!
//! ```text
//! scale = monitor_diagonal_px / monitor_diagonal_inches / reference_dpi
//! ```
//!
//! and width/height are floored to even integers.

use crate::types::{floor_even, CaptureRegion};

/// Reference density at which one logical pixel equals one physical pixel.
pub const REFERENCE_DPI: f32 = 96.0;

// MARK: - ScreenRect

/// Rectangle in logical screen coordinates, as reported by the windowing system.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScreenRect {
    pub left:   f32,
    pub top:    f32,
    pub right:  f32,
    pub bottom: f32,
}

impl ScreenRect {
    pub fn new(left: f32, top: f32, right: f32, bottom: f32) -> Self {
        Self { left, top, right, bottom }
    }

    pub fn from_origin_size(left: f32, top: f32, width: f32, height: f32) -> Self {
        Self { left, top, right: left + width, bottom: top + height }
    }

    /// Swap edges so that `left <= right` and `top <= bottom`.
    pub fn normalized(&self) -> Self {
        Self {
            left:   self.left.min(self.right),
            top:    self.top.min(self.bottom),
            right:  self.left.max(self.right),
            bottom: self.top.max(self.bottom),
        }
    }

    pub fn width(&self) -> f32 {
        self.right - self.left
    }

    pub fn height(&self) -> f32 {
        self.bottom - self.top
    }
}

// MARK: - DisplayScale

/// Logical → physical pixel multiplier of one monitor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisplayScale(f32);

impl Default for DisplayScale {
    fn default() -> Self {
        Self(1.0)
    }
}

impl DisplayScale {
    /// Use a factor reported by the platform (pixels per point).
    /// Non-finite or non-positive values fall back to 1.0.
    pub fn from_factor(factor: f32) -> Self {
        if factor.is_finite() && factor > 0.0 {
            Self(factor)
        } else {
            Self::default()
        }
    }

    /// Derive the scale from the monitor's physical size.
    ///
    /// Returns `None` when the inputs cannot describe a real monitor.
    pub fn from_diagonal(
        width_px: u32,
        height_px: u32,
        diagonal_inches: f32,
        reference_dpi: f32,
    ) -> Option<Self> {
        if width_px == 0 || height_px == 0 || diagonal_inches <= 0.0 || reference_dpi <= 0.0 {
            return None;
        }
        let diagonal_px = ((width_px as f64).powi(2) + (height_px as f64).powi(2)).sqrt();
        let scale = diagonal_px / diagonal_inches as f64 / reference_dpi as f64;
        (scale.is_finite() && scale > 0.0).then_some(Self(scale as f32))
    }

    pub fn factor(&self) -> f32 {
        self.0
    }

    /// Convert a logical rectangle to a device-pixel capture region.
    pub fn to_device_region(&self, rect: &ScreenRect) -> CaptureRegion {
        let r = rect.normalized();
        let s = self.0 as f64;

        let left = (r.left as f64 * s).round();
        let top = (r.top as f64 * s).round();
        let width = to_pixels(r.width() as f64 * s);
        let height = to_pixels(r.height() as f64 * s);

        CaptureRegion {
            left:   left.clamp(i32::MIN as f64, i32::MAX as f64) as i32,
            top:    top.clamp(i32::MIN as f64, i32::MAX as f64) as i32,
            width:  floor_even(width),
            height: floor_even(height),
        }
    }
}

fn to_pixels(v: f64) -> u32 {
    if v.is_finite() && v > 0.0 {
        v.floor().min(u32::MAX as f64) as u32
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_scale_keeps_even_rect() {
        let region = DisplayScale::default().to_device_region(&ScreenRect::new(10.0, 20.0, 210.0, 120.0));
        assert_eq!(region, CaptureRegion { left: 10, top: 20, width: 200, height: 100 });
    }

    #[test]
    fn fractional_scale_floors_to_even() {
        // 201 * 1.25 = 251.25 → 251 → 250
        let region = DisplayScale::from_factor(1.25)
            .to_device_region(&ScreenRect::from_origin_size(0.0, 0.0, 201.0, 99.0));
        assert_eq!(region.width, 250);
        assert_eq!(region.height, 122);
    }

    #[test]
    fn width_and_height_always_even() {
        let scales = [0.5_f32, 0.75, 1.0, 1.1, 1.25, 1.5, 1.75, 2.0, 2.5, 3.0];
        for &s in &scales {
            let scale = DisplayScale::from_factor(s);
            for w in 0..80 {
                for h in (0..80).step_by(7) {
                    let rect = ScreenRect::from_origin_size(3.3, 7.7, w as f32 + 0.4, h as f32 + 0.9);
                    let region = scale.to_device_region(&rect);
                    assert_eq!(region.width % 2, 0, "scale {s} w {w}");
                    assert_eq!(region.height % 2, 0, "scale {s} h {h}");
                }
            }
        }
    }

    #[test]
    fn inverted_rect_is_normalized() {
        let region = DisplayScale::default().to_device_region(&ScreenRect::new(100.0, 100.0, 0.0, 0.0));
        assert_eq!(region, CaptureRegion { left: 0, top: 0, width: 100, height: 100 });
    }

    #[test]
    fn diagonal_scale_matches_formula() {
        // 3840×2160 on a 23" panel: 4406 px / 23 in / 96 dpi ≈ 1.9956
        let scale = DisplayScale::from_diagonal(3840, 2160, 23.0, REFERENCE_DPI).unwrap();
        assert!((scale.factor() - 1.9956).abs() < 0.001, "{}", scale.factor());
    }

    #[test]
    fn diagonal_rejects_degenerate_monitor() {
        assert!(DisplayScale::from_diagonal(0, 1080, 24.0, REFERENCE_DPI).is_none());
        assert!(DisplayScale::from_diagonal(1920, 1080, 0.0, REFERENCE_DPI).is_none());
    }

    #[test]
    fn bad_factor_falls_back_to_one() {
        assert_eq!(DisplayScale::from_factor(f32::NAN).factor(), 1.0);
        assert_eq!(DisplayScale::from_factor(-2.0).factor(), 1.0);
    }
}
