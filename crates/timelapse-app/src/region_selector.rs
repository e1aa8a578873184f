//! Region selector overlay.
//!
//! A translucent, undecorated, always-on-top viewport that the user drags
//! over the area to record:
//!
//! ```text
//! ┌──────────────────────────────┐
//! │ [Cancel] [Move ⇄] [Finish]   │   drag anywhere else:
//! │                              │     Move mode   → window follows pointer
//! │        (see-through)         │     Resize mode → bottom-right corner follows
//! │                              │
//! └──────────────────────────────┘
//! ```
//!
//! [`RegionSelector`] holds the geometry and is independent of egui;
//! [`show_overlay`] drives it from an immediate viewport.

use eframe::egui::{self, Color32, RichText};
use timelapse_core::config::DisplayConfig;
use timelapse_core::{CaptureRegion, DisplayScale, ScreenRect};
use tracing::{debug, info};

/// Initial overlay size in logical pixels.
pub const INITIAL_SIZE: f32 = 200.0;

/// Smallest overlay while resizing, logical pixels.
pub const MIN_SIZE: f32 = 40.0;

// ── Pure geometry ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DragMode {
    Move,
    Resize,
}

impl DragMode {
    pub fn label(&self) -> &str {
        match self {
            DragMode::Move   => "Move",
            DragMode::Resize => "Resize",
        }
    }
}

/// New window geometry to apply, in global logical coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowUpdate {
    pub left:   f32,
    pub top:    f32,
    pub width:  f32,
    pub height: f32,
}

#[derive(Debug, Clone, Copy)]
struct Grab {
    /// Pointer position inside the window when the drag began.
    local: (f32, f32),
    /// Window geometry when the drag began.
    start: ScreenRect,
}

#[derive(Debug, Clone)]
pub struct RegionSelector {
    window: ScreenRect,
    mode:   DragMode,
    grab:   Option<Grab>,
}

impl RegionSelector {
    /// Overlay of [`INITIAL_SIZE`] centred in a monitor of `monitor_size`.
    pub fn centered(monitor_origin: (f32, f32), monitor_size: (f32, f32)) -> Self {
        let left = monitor_origin.0 + (monitor_size.0 - INITIAL_SIZE) / 2.0;
        let top = monitor_origin.1 + (monitor_size.1 - INITIAL_SIZE) / 2.0;
        Self {
            window: ScreenRect::from_origin_size(left.max(0.0), top.max(0.0), INITIAL_SIZE, INITIAL_SIZE),
            mode:   DragMode::Move,
            grab:   None,
        }
    }

    pub fn window(&self) -> ScreenRect {
        self.window
    }

    pub fn mode(&self) -> DragMode {
        self.mode
    }

    pub fn toggle_mode(&mut self) {
        self.mode = match self.mode {
            DragMode::Move => DragMode::Resize,
            DragMode::Resize => DragMode::Move,
        };
        self.grab = None;
        debug!("Region selector mode: {:?}", self.mode);
    }

    /// Mouse-down at `local_pointer` (window-relative).
    pub fn press(&mut self, local_pointer: (f32, f32)) {
        self.grab = Some(Grab { local: local_pointer, start: self.window });
    }

    pub fn release(&mut self) {
        self.grab = None;
    }

    /// Pointer moved to `global_pointer` while held.
    pub fn drag(&mut self, global_pointer: (f32, f32)) -> Option<WindowUpdate> {
        let grab = self.grab?;
        let (gx, gy) = global_pointer;
        let start = grab.start;

        self.window = match self.mode {
            DragMode::Move => ScreenRect::from_origin_size(
                gx - grab.local.0,
                gy - grab.local.1,
                start.width(),
                start.height(),
            ),
            DragMode::Resize => {
                // Keep the grab point's distance to the bottom-right corner.
                let width = gx - start.left + (start.width() - grab.local.0);
                let height = gy - start.top + (start.height() - grab.local.1);
                ScreenRect::from_origin_size(start.left, start.top, width.max(MIN_SIZE), height.max(MIN_SIZE))
            }
        };

        Some(WindowUpdate {
            left:   self.window.left,
            top:    self.window.top,
            width:  self.window.width(),
            height: self.window.height(),
        })
    }

    /// Device-pixel region under the overlay.
    pub fn finish(&self, scale: DisplayScale) -> CaptureRegion {
        let region = scale.to_device_region(&self.window);
        info!("Region selected: {} (scale {:.2})", region, scale.factor());
        region
    }

    pub fn cancel(&mut self) {
        self.grab = None;
        debug!("Region selection cancelled");
    }
}

// ── Overlay viewport ──────────────────────────────────────────────────────────

/// What the user did with the overlay this frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OverlayResult {
    Finished(CaptureRegion),
    Cancelled,
}

/// Pick the logical → physical scale for the overlay's monitor.
pub fn display_scale(display: &DisplayConfig, native_ppp: Option<f32>, monitor_points: Option<egui::Vec2>) -> DisplayScale {
    let platform = DisplayScale::from_factor(native_ppp.unwrap_or(1.0));
    let (Some(diagonal), Some(size)) = (display.diagonal_inches, monitor_points) else {
        return platform;
    };
    let ppp = platform.factor();
    let width_px = (size.x * ppp).round().max(0.0) as u32;
    let height_px = (size.y * ppp).round().max(0.0) as u32;
    DisplayScale::from_diagonal(width_px, height_px, diagonal, display.reference_dpi).unwrap_or(platform)
}

/// Render the overlay for one frame. Returns `Some` once the user is done.
pub fn show_overlay(
    ctx: &egui::Context,
    selector: &mut RegionSelector,
    display: &DisplayConfig,
) -> Option<OverlayResult> {
    let window = selector.window();
    let builder = egui::ViewportBuilder::default()
        .with_title("Select region")
        .with_decorations(false)
        .with_transparent(true)
        .with_always_on_top()
        .with_resizable(false)
        .with_position([window.left, window.top])
        .with_inner_size([window.width(), window.height()]);

    ctx.show_viewport_immediate(egui::ViewportId::from_hash_of("region_selector"), builder, |ctx, _class| {
        let mut result = None;

        let frame = egui::Frame::none()
            .fill(Color32::from_rgba_unmultiplied(40, 120, 220, 60))
            .stroke(egui::Stroke::new(2.0, Color32::from_rgb(40, 120, 220)));

        egui::CentralPanel::default().frame(frame).show(ctx, |ui| {
            let background = ui.interact(ui.max_rect(), ui.id().with("region_drag"), egui::Sense::drag());

            ui.horizontal(|ui| {
                if ui.button("Cancel").clicked() {
                    selector.cancel();
                    result = Some(OverlayResult::Cancelled);
                }
                let toggle = format!("{} ⇄", selector.mode().label());
                if ui.button(toggle).clicked() {
                    selector.toggle_mode();
                }
                if ui.button(RichText::new("Finish").strong()).clicked() {
                    let scale = ctx.input(|i| {
                        display_scale(display, i.viewport().native_pixels_per_point, i.viewport().monitor_size)
                    });
                    result = Some(OverlayResult::Finished(selector.finish(scale)));
                }
            });

            if background.drag_started() {
                if let Some(p) = background.interact_pointer_pos() {
                    selector.press((p.x, p.y));
                }
            }
            if background.dragged() {
                let inner = ctx.input(|i| i.viewport().inner_rect);
                if let (Some(p), Some(inner)) = (background.interact_pointer_pos(), inner) {
                    if let Some(update) = selector.drag((inner.min.x + p.x, inner.min.y + p.y)) {
                        ctx.send_viewport_cmd(egui::ViewportCommand::OuterPosition(egui::pos2(update.left, update.top)));
                        ctx.send_viewport_cmd(egui::ViewportCommand::InnerSize(egui::vec2(update.width, update.height)));
                    }
                }
            }
            if background.drag_stopped() {
                selector.release();
            }
        });

        if ctx.input(|i| i.viewport().close_requested()) {
            selector.cancel();
            result = Some(OverlayResult::Cancelled);
        }
        result
    })
}
