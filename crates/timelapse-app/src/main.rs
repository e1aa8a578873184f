mod controller;
mod encoder;
mod recorder;
mod region_selector;
mod storage;
mod ui;

use std::sync::Arc;

use timelapse_core::{SourceSelection, TimelapseConfig};
use tracing::info;

use controller::{SessionController, SourceOpener};
use encoder::FfmpegEncoder;

fn main() -> anyhow::Result<()> {
    // ── Logging ───────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .compact()
        .init();

    info!("screen-timelapse v{}", env!("CARGO_PKG_VERSION"));

    // ── Configuration ─────────────────────────────────────────────────────
    let config = TimelapseConfig::load();
    info!("Output root: {}", config.capture.output_dir.display());

    let encoder = Box::new(FfmpegEncoder::new(config.encoder.clone()));
    let opener: SourceOpener = Arc::new(|selection: &SourceSelection| timelapse_capture::open_source(selection));
    let controller = SessionController::new(config, encoder, opener);

    // ── Window options ────────────────────────────────────────────────────
    let window_options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_title(concat!("Screen Timelapse v", env!("CARGO_PKG_VERSION")))
            .with_inner_size([460.0, 340.0])
            .with_min_inner_size([380.0, 280.0])
            .with_resizable(true),
        ..Default::default()
    };

    eframe::run_native(
        "Screen Timelapse",
        window_options,
        Box::new(|cc| Ok(Box::new(ui::TimelapseApp::new(controller, cc)))),
    )
    .map_err(|e| anyhow::anyhow!("UI terminated: {e}"))
}
