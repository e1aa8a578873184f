//! egui control surface.
//!
//! # Layout
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │  Screen Timelapse                             │
//! ├───────────────────────────────────────────────┤
//! │  Source   [Screen region ▼] [⟳ Rescan]        │
//! │  Region   [Select…]  120,80 640x480           │
//! │  Seconds per frame [1.0__]  Output FPS [30_]  │
//! ├───────────────────────────────────────────────┤
//! │  [ ▶  Start ]                      [ Quit ]   │
//! ├───────────────────────────────────────────────┤
//! │  ● Capturing   42 frames                      │
//! │  Last session  timelapses/2024-05-01_14-03-12 │
//! │  Last encode   2024-05-01_15-10-47.mp4 (…)    │
//! └───────────────────────────────────────────────┘
//! ```

use std::time::Duration;

use eframe::egui::{self, Color32, RichText};
use timelapse_core::{CaptureRegion, SourceSelection};
use tracing::{error, info};

use crate::controller::{Phase, SessionController, StartOutcome, StartRequest, StopReport};
use crate::region_selector::{show_overlay, OverlayResult, RegionSelector};

/// Source picked in the combo box.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SourceChoice {
    ScreenRegion,
    Camera(u32),
}

// ── TimelapseApp ──────────────────────────────────────────────────────────────

pub struct TimelapseApp {
    controller: SessionController,

    // ── Configuration fields ──
    choice:            SourceChoice,
    cameras:           Vec<u32>,
    region:            Option<CaptureRegion>,
    seconds_per_frame: String,
    output_fps:        String,

    // ── Overlay ──
    selector: Option<RegionSelector>,

    // ── Last results ──
    last_session: Option<String>,
    last_encode:  Option<String>,
    last_error:   Option<String>,
}

impl TimelapseApp {
    pub fn new(controller: SessionController, _cc: &eframe::CreationContext<'_>) -> Self {
        let capture = &controller.config().capture;
        let seconds_per_frame = capture.seconds_per_frame.to_string();
        let output_fps = capture.output_fps.to_string();
        let mut app = Self {
            controller,
            choice: SourceChoice::ScreenRegion,
            cameras: Vec::new(),
            region: None,
            seconds_per_frame,
            output_fps,
            selector: None,
            last_session: None,
            last_encode: None,
            last_error: None,
        };
        app.rescan_cameras();
        app
    }

    fn rescan_cameras(&mut self) {
        let limit = self.controller.config().capture.camera_probe_limit;
        self.cameras = timelapse_capture::probe_cameras(limit);
        info!("Cameras found: {:?}", self.cameras);
        if let SourceChoice::Camera(idx) = self.choice {
            if !self.cameras.contains(&idx) {
                self.choice = SourceChoice::ScreenRegion;
            }
        }
    }

    fn selection(&self) -> Option<SourceSelection> {
        match self.choice {
            SourceChoice::ScreenRegion => self.region.map(|region| SourceSelection::Region { region }),
            SourceChoice::Camera(index) => Some(SourceSelection::Camera { index }),
        }
    }

    fn start(&mut self) {
        let request = StartRequest {
            source:            self.selection(),
            seconds_per_frame: &self.seconds_per_frame,
            output_fps:        &self.output_fps,
        };
        match self.controller.start(request) {
            Ok(StartOutcome::Started(dir)) => {
                self.last_error = None;
                self.last_session = Some(dir.display().to_string());
            }
            Ok(StartOutcome::Refused(_)) | Ok(StartOutcome::AlreadyRunning) => {}
            Ok(StartOutcome::PreviousStillStopping) => {
                self.last_error = Some("Previous capture is still finishing, try again shortly".into());
            }
            Err(e) => {
                error!("Could not start session: {:#}", e);
                self.last_error = Some(format!("{e:#}"));
            }
        }
    }

    fn record(&mut self, report: Option<StopReport>) {
        if let Some(report) = report {
            self.last_session = Some(report.session.directory.display().to_string());
            self.last_encode = Some(report.encode.to_string());
        }
    }

    fn quit(&mut self, ctx: &egui::Context) {
        let report = self.controller.quit();
        self.record(report);
        ctx.send_viewport_cmd(egui::ViewportCommand::Close);
    }

    fn open_selector(&mut self, ctx: &egui::Context) {
        let monitor = ctx
            .input(|i| i.viewport().monitor_size)
            .unwrap_or(egui::vec2(1920.0, 1080.0));
        self.selector = Some(RegionSelector::centered((0.0, 0.0), (monitor.x, monitor.y)));
    }

    fn show_selector(&mut self, ctx: &egui::Context) {
        let display = self.controller.config().display.clone();
        let Some(selector) = self.selector.as_mut() else {
            return;
        };
        match show_overlay(ctx, selector, &display) {
            Some(OverlayResult::Finished(region)) => {
                self.region = Some(region);
                self.selector = None;
            }
            Some(OverlayResult::Cancelled) => self.selector = None,
            None => {}
        }
    }
}

fn phase_color(phase: Phase) -> Color32 {
    match phase {
        Phase::Idle     => Color32::from_rgb(160, 160, 160),
        Phase::Running  => Color32::from_rgb(60, 200, 80),
        Phase::Stopping => Color32::from_rgb(230, 185, 50),
    }
}

impl eframe::App for TimelapseApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        let report = self.controller.poll();
        self.record(report);

        if ctx.input(|i| i.viewport().close_requested()) {
            let report = self.controller.quit();
            self.record(report);
        }

        if self.controller.phase() != Phase::Idle {
            ctx.request_repaint_after(Duration::from_millis(250));
        }

        self.show_selector(ctx);

        egui::CentralPanel::default().show(ctx, |ui| {
            ui.spacing_mut().item_spacing = egui::vec2(8.0, 6.0);

            // ── Title ─────────────────────────────────────────────────────
            ui.heading("Screen Timelapse");
            ui.separator();

            // ── Settings ──────────────────────────────────────────────────
            let idle = self.controller.phase() == Phase::Idle;
            ui.add_enabled_ui(idle, |ui| {
                egui::Grid::new("settings_grid")
                    .num_columns(2)
                    .spacing([8.0, 4.0])
                    .show(ui, |ui| {
                        ui.label("Source:");
                        ui.horizontal(|ui| {
                            let selected = match self.choice {
                                SourceChoice::ScreenRegion => "Screen region".to_owned(),
                                SourceChoice::Camera(i) => format!("Camera {i}"),
                            };
                            egui::ComboBox::from_id_salt("source")
                                .selected_text(selected)
                                .width(140.0)
                                .show_ui(ui, |ui| {
                                    ui.selectable_value(&mut self.choice, SourceChoice::ScreenRegion, "Screen region");
                                    for &i in &self.cameras {
                                        ui.selectable_value(&mut self.choice, SourceChoice::Camera(i), format!("Camera {i}"));
                                    }
                                });
                            if ui.button("⟳ Rescan").clicked() {
                                self.rescan_cameras();
                            }
                        });
                        ui.end_row();

                        ui.label("Region:");
                        ui.horizontal(|ui| {
                            let label = if self.selector.is_some() { "Selecting…" } else { "Select…" };
                            if ui.add_enabled(self.selector.is_none(), egui::Button::new(label)).clicked() {
                                self.open_selector(ctx);
                            }
                            match self.region {
                                Some(r) if !r.is_empty() => {
                                    ui.label(r.to_string());
                                }
                                _ => {
                                    ui.label(RichText::new("none").color(Color32::GRAY));
                                }
                            }
                        });
                        ui.end_row();

                        ui.label("Seconds per frame:");
                        ui.add(egui::TextEdit::singleline(&mut self.seconds_per_frame).desired_width(70.0));
                        ui.end_row();

                        ui.label("Output FPS:");
                        ui.add(egui::TextEdit::singleline(&mut self.output_fps).desired_width(70.0));
                        ui.end_row();
                    });
            });

            ui.separator();

            // ── Action buttons ────────────────────────────────────────────
            ui.horizontal(|ui| {
                if self.controller.phase() == Phase::Idle {
                    let ready = self.selection().is_some_and(|s| s.is_usable()) && self.controller.can_start();
                    if ui
                        .add_enabled(ready, egui::Button::new("▶  Start").min_size(egui::vec2(120.0, 32.0)))
                        .clicked()
                    {
                        self.start();
                    }
                } else if ui
                    .add_sized([120.0, 32.0], egui::Button::new("■  Stop"))
                    .clicked()
                {
                    let report = self.controller.stop();
                    self.record(report);
                }

                ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                    if ui.button("Quit").clicked() {
                        self.quit(ctx);
                    }
                });
            });

            ui.separator();

            // ── Status ────────────────────────────────────────────────────
            let phase = self.controller.phase();
            ui.horizontal(|ui| {
                ui.label(RichText::new(format!("● {}", phase.label())).color(phase_color(phase)));
                if let Some(session) = self.controller.session() {
                    ui.label(format!("{} frames", session.frame_count));
                }
            });
            if let Some(dir) = &self.last_session {
                ui.label(format!("Last session: {dir}"));
            }
            if let Some(encode) = &self.last_encode {
                ui.label(format!("Last encode: {encode}"));
            }
            if let Some(err) = &self.last_error {
                ui.label(RichText::new(format!("✗ {err}")).color(Color32::RED));
            }

            // ── Footer ────────────────────────────────────────────────────
            ui.with_layout(egui::Layout::bottom_up(egui::Align::LEFT), |ui| {
                ui.small(concat!("screen-timelapse v", env!("CARGO_PKG_VERSION")));
            });
        });
    }
}
