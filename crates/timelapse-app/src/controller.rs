//! Session controller: the Idle → Running → Stopping → Idle state machine.
//!
//! Owned by the control (UI) thread. The capture thread only talks to it
//! through [`CaptureEvent`]s, drained by [`SessionController::poll`].

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use chrono::Local;
use timelapse_capture::FrameSource;
use timelapse_core::{create_session, CaptureSettings, ConfigError, SessionInfo, SourceSelection, TimelapseConfig};
use tracing::{debug, info, warn};

use crate::encoder::{EncodeOutcome, VideoEncoder};
use crate::recorder::{spawn_capture, CaptureEvent, CaptureHandle, CaptureJob, FinishReason};
use crate::storage;

/// Opens a frame source on the capture thread.
pub type SourceOpener =
    Arc<dyn Fn(&SourceSelection) -> timelapse_capture::Result<Box<dyn FrameSource>> + Send + Sync>;

// ── Phase ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Phase {
    #[default]
    Idle,
    Running,
    Stopping,
}

impl Phase {
    pub fn label(&self) -> &str {
        match self {
            Phase::Idle     => "Idle",
            Phase::Running  => "Capturing",
            Phase::Stopping => "Stopping…",
        }
    }
}

// ── Requests & results ────────────────────────────────────────────────────────

/// Raw values from the control surface.
#[derive(Debug, Clone)]
pub struct StartRequest<'a> {
    pub source:            Option<SourceSelection>,
    pub seconds_per_frame: &'a str,
    pub output_fps:        &'a str,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StartOutcome {
    Started(PathBuf),
    /// Invalid configuration. Nothing was created.
    Refused(ConfigError),
    AlreadyRunning,
    /// The previous capture thread has not exited yet.
    PreviousStillStopping,
}

/// What a finished session left behind.
#[derive(Debug, Clone)]
pub struct StopReport {
    pub session: SessionInfo,
    /// `None` when the capture thread did not finish within the timeout.
    pub finish:  Option<FinishReason>,
    pub encode:  EncodeOutcome,
}

struct ActiveSession {
    info:     SessionInfo,
    handle:   CaptureHandle,
    finished: Option<FinishReason>,
}

// ── SessionController ─────────────────────────────────────────────────────────

pub struct SessionController {
    config:  TimelapseConfig,
    encoder: Box<dyn VideoEncoder>,
    opener:  SourceOpener,
    phase:   Phase,
    active:  Option<ActiveSession>,
    /// Capture thread that missed the stop timeout, kept until it exits.
    lingering: Option<CaptureHandle>,
}

impl SessionController {
    pub fn new(config: TimelapseConfig, encoder: Box<dyn VideoEncoder>, opener: SourceOpener) -> Self {
        Self { config, encoder, opener, phase: Phase::Idle, active: None, lingering: None }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn config(&self) -> &TimelapseConfig {
        &self.config
    }

    /// The running session, if any.
    pub fn session(&self) -> Option<&SessionInfo> {
        self.active.as_ref().map(|a| &a.info)
    }

    /// Begin a session.
    ///
    /// Invalid input is a quiet refusal. Filesystem and thread errors are
    /// returned.
    pub fn start(&mut self, request: StartRequest<'_>) -> anyhow::Result<StartOutcome> {
        if self.phase != Phase::Idle {
            return Ok(StartOutcome::AlreadyRunning);
        }
        if !self.reap_lingering() {
            debug!("Start refused: previous capture thread still running");
            return Ok(StartOutcome::PreviousStillStopping);
        }

        let source = match request.source.filter(|s| s.is_usable()) {
            Some(source) => source,
            None => return Ok(self.refuse(ConfigError::NoSource)),
        };
        let settings = match CaptureSettings::parse(request.seconds_per_frame, request.output_fps) {
            Ok(settings) => settings,
            Err(e) => return Ok(self.refuse(e)),
        };

        let started_at = Local::now();
        let directory = create_session(&self.config.capture.output_dir, &started_at)?;
        let format = self.config.capture.image_format;

        let job = CaptureJob {
            directory:      directory.clone(),
            format,
            interval:       settings.interval(),
            max_frames:     self.config.capture.max_frames,
            min_free_bytes: self.config.capture.min_free_mb.saturating_mul(1024 * 1024),
            free_space:     storage::available_space,
        };
        let opener = Arc::clone(&self.opener);
        let handle = spawn_capture(job, move || opener(&source)).context("Failed to spawn capture thread")?;

        info!(
            "Session started: {} every {}s → {}",
            source,
            settings.seconds_per_frame,
            directory.display()
        );
        self.active = Some(ActiveSession {
            info: SessionInfo::new(directory.clone(), started_at, settings, source, format),
            handle,
            finished: None,
        });
        self.phase = Phase::Running;
        Ok(StartOutcome::Started(directory))
    }

    /// Join a timed-out capture thread if it has exited since.
    /// Returns `false` while it is still running.
    fn reap_lingering(&mut self) -> bool {
        match self.lingering.take() {
            None => true,
            Some(handle) if handle.is_finished() => {
                info!("Previous capture thread exited");
                handle.join();
                true
            }
            Some(handle) => {
                self.lingering = Some(handle);
                false
            }
        }
    }

    /// Whether a new session can start right now.
    pub fn can_start(&mut self) -> bool {
        self.phase == Phase::Idle && self.reap_lingering()
    }

    fn refuse(&self, reason: ConfigError) -> StartOutcome {
        debug!("Start refused: {}", reason);
        StartOutcome::Refused(reason)
    }

    /// Drain capture events. Returns a report when the capture thread ended
    /// on its own and the stop sequence ran as a result.
    pub fn poll(&mut self) -> Option<StopReport> {
        let active = self.active.as_mut()?;
        while let Some(event) = active.handle.try_event() {
            apply_event(active, event);
        }
        if self.phase == Phase::Running && active.finished.is_some() {
            info!("Capture ended on its own ({:?})", active.finished);
            return self.stop();
        }
        None
    }

    /// Stop the running session and encode what it captured.
    ///
    /// Returns `None` when idle. Always leaves the controller idle.
    pub fn stop(&mut self) -> Option<StopReport> {
        let mut active = self.active.take()?;
        self.phase = Phase::Stopping;
        active.handle.request_stop();

        let timeout = Duration::from_millis(self.config.capture.stop_timeout_ms);
        let deadline = Instant::now() + timeout;
        while active.finished.is_none() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match active.handle.recv_timeout(remaining) {
                Ok(event) => apply_event(&mut active, event),
                Err(e) => {
                    warn!("Capture thread did not finish within {:?} ({}), leaving it to exit", timeout, e);
                    break;
                }
            }
        }

        let finish = active.finished;
        if finish.is_some() {
            active.handle.join();
        } else {
            self.lingering = Some(active.handle);
        }
        self.phase = Phase::Idle;

        let info = active.info;
        info!("Session stopped with {} frames in {}", info.frame_count, info.directory.display());
        let encode = self.encoder.encode(&info.directory, info.settings.output_fps);
        info!("Encode result: {}", encode);

        Some(StopReport { session: info, finish, encode })
    }

    /// Stop if running. Safe to call any number of times.
    pub fn quit(&mut self) -> Option<StopReport> {
        if self.phase == Phase::Idle && self.active.is_none() {
            debug!("Quit with no active session");
            return None;
        }
        info!("Quit requested while {}", self.phase.label());
        self.stop()
    }
}

fn apply_event(active: &mut ActiveSession, event: CaptureEvent) {
    match event {
        CaptureEvent::FrameWritten { index } => active.info.frame_count = index + 1,
        CaptureEvent::SourceFailed(reason) => warn!("Frame source failed: {}", reason),
        CaptureEvent::Finished { frames, reason } => {
            active.info.frame_count = frames;
            active.finished = Some(reason);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use image::RgbImage;
    use timelapse_capture::CaptureError;
    use timelapse_core::{list_frames, CaptureRegion};

    /// Records every encode call.
    #[derive(Default, Clone)]
    struct CountingEncoder {
        calls: Arc<AtomicUsize>,
        seen:  Arc<Mutex<Vec<(PathBuf, usize)>>>,
    }

    impl VideoEncoder for CountingEncoder {
        fn encode(&self, directory: &Path, fps: u32) -> EncodeOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let frames = list_frames(directory).map(|f| f.len()).unwrap_or(usize::MAX);
            self.seen.lock().unwrap().push((directory.to_path_buf(), frames));
            EncodeOutcome::Encoded { output: directory.join(format!("{fps}.mp4")), frames }
        }
    }

    /// `fail_after` frames, then an error. `delay` before each frame.
    struct FakeSource {
        produced:   u64,
        fail_after: Option<u64>,
        delay:      Duration,
    }

    impl FrameSource for FakeSource {
        fn next_frame(&mut self) -> timelapse_capture::Result<RgbImage> {
            std::thread::sleep(self.delay);
            if self.fail_after.is_some_and(|n| self.produced >= n) {
                return Err(CaptureError::CaptureFailed("display went away".into()));
            }
            self.produced += 1;
            Ok(RgbImage::new(2, 2))
        }

        fn describe(&self) -> String {
            "fake".into()
        }
    }

    fn opener(fail_after: Option<u64>, delay: Duration) -> SourceOpener {
        Arc::new(move |_sel: &SourceSelection| -> timelapse_capture::Result<Box<dyn FrameSource>> {
            Ok(Box::new(FakeSource { produced: 0, fail_after, delay }))
        })
    }

    fn config(root: &Path) -> TimelapseConfig {
        let mut config = TimelapseConfig::default();
        config.capture.output_dir = root.join("timelapses");
        config.capture.min_free_mb = 0;
        config.capture.stop_timeout_ms = 2_000;
        config
    }

    fn region() -> Option<SourceSelection> {
        Some(SourceSelection::Region { region: CaptureRegion::new(0, 0, 64, 48) })
    }

    fn request(source: Option<SourceSelection>) -> StartRequest<'static> {
        StartRequest { source, seconds_per_frame: "0.01", output_fps: "30" }
    }

    fn wait_for_frames(ctl: &mut SessionController, n: u64) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while ctl.session().map_or(0, |s| s.frame_count) < n {
            assert!(Instant::now() < deadline, "timed out waiting for {n} frames");
            assert!(ctl.poll().is_none());
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn refusal_creates_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let enc = CountingEncoder::default();
        let mut ctl = SessionController::new(config(tmp.path()), Box::new(enc.clone()), opener(None, Duration::ZERO));

        let empty = Some(SourceSelection::Region { region: CaptureRegion::new(5, 5, 0, 0) });
        assert_eq!(ctl.start(request(empty)).unwrap(), StartOutcome::Refused(ConfigError::NoSource));
        assert_eq!(ctl.start(request(None)).unwrap(), StartOutcome::Refused(ConfigError::NoSource));

        let bad_rate = StartRequest { source: region(), seconds_per_frame: "1", output_fps: "0" };
        assert!(matches!(ctl.start(bad_rate).unwrap(), StartOutcome::Refused(ConfigError::InvalidFrameRate(_))));
        let bad_spf = StartRequest { source: region(), seconds_per_frame: "-2", output_fps: "30" };
        assert!(matches!(ctl.start(bad_spf).unwrap(), StartOutcome::Refused(ConfigError::InvalidInterval(_))));

        assert_eq!(ctl.phase(), Phase::Idle);
        assert!(!tmp.path().join("timelapses").exists());
        assert!(ctl.stop().is_none());
        assert_eq!(enc.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn stop_encodes_captured_frames() {
        let tmp = tempfile::tempdir().unwrap();
        let enc = CountingEncoder::default();
        let mut ctl = SessionController::new(config(tmp.path()), Box::new(enc.clone()), opener(None, Duration::ZERO));

        let StartOutcome::Started(dir) = ctl.start(request(region())).unwrap() else {
            panic!("session did not start");
        };
        assert_eq!(ctl.phase(), Phase::Running);
        assert_eq!(ctl.start(request(region())).unwrap(), StartOutcome::AlreadyRunning);

        wait_for_frames(&mut ctl, 3);
        let report = ctl.stop().unwrap();

        assert_eq!(ctl.phase(), Phase::Idle);
        assert_eq!(report.finish, Some(FinishReason::Stopped));
        assert_eq!(report.session.directory, dir);
        let on_disk = list_frames(&dir).unwrap().len() as u64;
        assert_eq!(report.session.frame_count, on_disk);
        assert_eq!(enc.seen.lock().unwrap().as_slice(), [(dir, on_disk as usize)]);

        assert!(ctl.stop().is_none());
        assert_eq!(enc.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn source_failure_stops_implicitly() {
        let tmp = tempfile::tempdir().unwrap();
        let enc = CountingEncoder::default();
        let mut ctl = SessionController::new(config(tmp.path()), Box::new(enc.clone()), opener(Some(3), Duration::ZERO));
        ctl.start(request(region())).unwrap();

        let deadline = Instant::now() + Duration::from_secs(10);
        let report = loop {
            if let Some(report) = ctl.poll() {
                break report;
            }
            assert!(Instant::now() < deadline, "no implicit stop");
            std::thread::sleep(Duration::from_millis(5));
        };

        assert_eq!(ctl.phase(), Phase::Idle);
        assert_eq!(report.finish, Some(FinishReason::SourceFailed));
        assert_eq!(report.session.frame_count, 3);
        assert_eq!(enc.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn open_failure_is_an_implicit_stop_with_no_frames() {
        let tmp = tempfile::tempdir().unwrap();
        let enc = CountingEncoder::default();
        let failing: SourceOpener = Arc::new(|_sel: &SourceSelection| -> timelapse_capture::Result<Box<dyn FrameSource>> {
            Err(CaptureError::Unsupported { backend: "camera" })
        });
        let mut ctl = SessionController::new(config(tmp.path()), Box::new(enc.clone()), failing);

        ctl.start(request(Some(SourceSelection::Camera { index: 4 }))).unwrap();
        let deadline = Instant::now() + Duration::from_secs(10);
        let report = loop {
            if let Some(report) = ctl.poll() {
                break report;
            }
            assert!(Instant::now() < deadline);
            std::thread::sleep(Duration::from_millis(5));
        };
        assert_eq!(report.finish, Some(FinishReason::OpenFailed));
        assert_eq!(report.session.frame_count, 0);
    }

    #[test]
    fn join_timeout_still_returns_to_idle() {
        let tmp = tempfile::tempdir().unwrap();
        let mut cfg = config(tmp.path());
        cfg.capture.stop_timeout_ms = 50;
        let enc = CountingEncoder::default();
        let mut ctl = SessionController::new(cfg, Box::new(enc.clone()), opener(None, Duration::from_secs(2)));
        ctl.start(request(region())).unwrap();

        let started = Instant::now();
        let report = ctl.stop().unwrap();

        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(report.finish, None);
        assert_eq!(ctl.phase(), Phase::Idle);
        assert_eq!(enc.calls.load(Ordering::SeqCst), 1);
    }

    /// Slow source that counts how many instances are inside `next_frame` at once.
    struct OverlapSource {
        inside:  Arc<AtomicUsize>,
        peak:    Arc<AtomicUsize>,
        alive:   Arc<AtomicUsize>,
    }

    impl FrameSource for OverlapSource {
        fn next_frame(&mut self) -> timelapse_capture::Result<RgbImage> {
            let now = self.inside.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(800));
            self.inside.fetch_sub(1, Ordering::SeqCst);
            Ok(RgbImage::new(2, 2))
        }

        fn describe(&self) -> String {
            "overlap".into()
        }
    }

    impl Drop for OverlapSource {
        fn drop(&mut self) {
            self.alive.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn restart_waits_for_timed_out_capture_thread() {
        let tmp = tempfile::tempdir().unwrap();
        let mut cfg = config(tmp.path());
        cfg.capture.stop_timeout_ms = 50;
        let inside = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let alive = Arc::new(AtomicUsize::new(0));
        let slow: SourceOpener = {
            let (inside, peak, alive) = (inside.clone(), peak.clone(), alive.clone());
            Arc::new(move |_sel: &SourceSelection| -> timelapse_capture::Result<Box<dyn FrameSource>> {
                alive.fetch_add(1, Ordering::SeqCst);
                Ok(Box::new(OverlapSource { inside: inside.clone(), peak: peak.clone(), alive: alive.clone() }))
            })
        };
        let mut ctl = SessionController::new(cfg, Box::new(CountingEncoder::default()), slow);

        ctl.start(request(region())).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while inside.load(Ordering::SeqCst) == 0 {
            assert!(Instant::now() < deadline, "capture never began");
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(ctl.stop().unwrap().finish, None);
        assert_eq!(ctl.phase(), Phase::Idle);

        assert_eq!(ctl.start(request(region())).unwrap(), StartOutcome::PreviousStillStopping);
        assert!(!ctl.can_start());

        let deadline = Instant::now() + Duration::from_secs(5);
        while alive.load(Ordering::SeqCst) > 0 {
            assert!(Instant::now() < deadline, "old capture thread never exited");
            std::thread::sleep(Duration::from_millis(10));
        }
        // Dropping the source precedes the thread's exit by a moment.
        let deadline = Instant::now() + Duration::from_secs(5);
        while !ctl.can_start() {
            assert!(Instant::now() < deadline, "old capture thread never reaped");
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(matches!(ctl.start(request(region())).unwrap(), StartOutcome::Started(_)));
        ctl.stop();

        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn quit_while_running_stops_once() {
        let tmp = tempfile::tempdir().unwrap();
        let enc = CountingEncoder::default();
        let mut ctl = SessionController::new(config(tmp.path()), Box::new(enc.clone()), opener(None, Duration::ZERO));
        ctl.start(request(region())).unwrap();
        wait_for_frames(&mut ctl, 1);

        assert!(ctl.quit().is_some());
        assert!(ctl.quit().is_none());
        assert!(ctl.stop().is_none());
        assert_eq!(enc.calls.load(Ordering::SeqCst), 1);
        assert_eq!(ctl.phase(), Phase::Idle);
    }

    #[test]
    fn new_session_after_stop_gets_fresh_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let enc = CountingEncoder::default();
        let mut ctl = SessionController::new(config(tmp.path()), Box::new(enc), opener(None, Duration::ZERO));

        let StartOutcome::Started(first) = ctl.start(request(region())).unwrap() else { panic!() };
        ctl.stop();
        let StartOutcome::Started(second) = ctl.start(request(region())).unwrap() else { panic!() };
        ctl.stop();
        assert_ne!(first, second);
    }
}
