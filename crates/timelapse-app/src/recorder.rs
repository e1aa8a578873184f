//! Capture loop: one background thread per session.
//!
//! ```text
//! control thread                      capture thread ("timelapse-capture")
//! ──────────────                      ─────────────────────────────────────
//! spawn_capture(job, opener) ───────► opener() → Box<dyn FrameSource>
//!                                     loop {
//!                                       token? ─► exit
//!                                       next_frame() → 000042.png
//!   poll(): try_recv ◄──────────────────── FrameWritten { index }
//!                                       token.sleep(seconds_per_frame)
//!                                     }
//!   stop(): token.stop()              ──► Finished { frames, reason }
//!           recv_timeout(...)  ◄────────┘
//! ```
//!
//! Frames are only counted after a successful write, so the files on disk
//! are always `0..frames` with no gaps.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use image::RgbImage;
use timelapse_capture::FrameSource;
use timelapse_core::{frame_path, ImageFormat};
use tracing::{debug, info, warn};

use crate::storage;

/// Longest uninterrupted sleep between stop-token checks.
const SLEEP_SLICE: Duration = Duration::from_millis(50);

/// Free space is re-checked every this many frames.
const DISK_CHECK_EVERY: u64 = 50;

// ── StopToken ─────────────────────────────────────────────────────────────────

/// Cooperative cancellation shared between the control and capture threads.
#[derive(Debug, Clone, Default)]
pub struct StopToken(Arc<AtomicBool>);

impl StopToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Sleep for `duration`, waking early if stopped.
    /// Returns `false` when the token was raised.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_stopped() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep((deadline - now).min(SLEEP_SLICE));
        }
    }
}

// ── Events ────────────────────────────────────────────────────────────────────

/// Why a capture loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    /// The stop token was raised.
    Stopped,
    /// The source could not be opened.
    OpenFailed,
    /// The source failed mid-session.
    SourceFailed,
    /// A frame could not be written.
    WriteFailed,
    /// Free space fell below the configured minimum.
    DiskLow,
    /// The configured frame limit was reached.
    FrameLimit,
}

/// Message from the capture thread to the control thread.
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureEvent {
    FrameWritten { index: u64 },
    SourceFailed(String),
    Finished { frames: u64, reason: FinishReason },
}

// ── CaptureJob ────────────────────────────────────────────────────────────────

/// Everything the capture thread needs besides the source.
#[derive(Debug, Clone)]
pub struct CaptureJob {
    pub directory:      PathBuf,
    pub format:         ImageFormat,
    pub interval:       Duration,
    /// 0 means unlimited.
    pub max_frames:     u64,
    /// 0 disables the disk check.
    pub min_free_bytes: u64,
    /// Free bytes on the volume holding a path.
    pub free_space:     fn(&Path) -> Option<u64>,
}

// ── CaptureHandle ─────────────────────────────────────────────────────────────

/// Control-thread side of a running capture thread.
pub struct CaptureHandle {
    token:  StopToken,
    events: Receiver<CaptureEvent>,
    thread: Option<JoinHandle<()>>,
}

impl CaptureHandle {
    /// Request a cooperative stop (non-blocking).
    pub fn request_stop(&self) {
        self.token.stop();
    }

    pub fn try_event(&self) -> Option<CaptureEvent> {
        match self.events.try_recv() {
            Ok(ev) => Some(ev),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<CaptureEvent, RecvTimeoutError> {
        self.events.recv_timeout(timeout)
    }

    /// Join the thread. Only call after `Finished` was received.
    pub fn join(mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Capture thread panicked");
            }
        }
    }

    /// Whether the thread has exited. A handle that gave up waiting can
    /// be joined without blocking once this is true.
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, |t| t.is_finished())
    }
}

/// Start the capture thread.
///
/// `opener` runs on the new thread so that thread-affine camera handles
/// never cross threads.
pub fn spawn_capture<O>(job: CaptureJob, opener: O) -> std::io::Result<CaptureHandle>
where
    O: FnOnce() -> timelapse_capture::Result<Box<dyn FrameSource>> + Send + 'static,
{
    let token = StopToken::new();
    let (tx, rx) = mpsc::channel::<CaptureEvent>();
    let thread_token = token.clone();

    let thread = std::thread::Builder::new()
        .name("timelapse-capture".into())
        .spawn(move || {
            let (frames, reason) = match opener() {
                Ok(mut source) => {
                    info!("Capturing from {} into {}", source.describe(), job.directory.display());
                    run_capture_loop(source.as_mut(), &job, &thread_token, &tx)
                }
                Err(e) => {
                    warn!("Failed to open frame source: {}", e);
                    let _ = tx.send(CaptureEvent::SourceFailed(e.to_string()));
                    (0, FinishReason::OpenFailed)
                }
            };
            info!("Capture loop finished: {} frames ({:?})", frames, reason);
            let _ = tx.send(CaptureEvent::Finished { frames, reason });
        })?;

    Ok(CaptureHandle { token, events: rx, thread: Some(thread) })
}

// ── Loop ──────────────────────────────────────────────────────────────────────

/// Pull frames until stopped or something fails. Returns the number of
/// frames on disk and why the loop ended.
pub fn run_capture_loop(
    source: &mut dyn FrameSource,
    job: &CaptureJob,
    token: &StopToken,
    events: &Sender<CaptureEvent>,
) -> (u64, FinishReason) {
    let mut index: u64 = 0;

    loop {
        if token.is_stopped() {
            return (index, FinishReason::Stopped);
        }

        if job.min_free_bytes > 0 && index % DISK_CHECK_EVERY == 0 {
            let available = (job.free_space)(&job.directory);
            if storage::is_low(available, job.min_free_bytes) {
                warn!(
                    "Free space {} bytes below minimum {}, stopping capture",
                    available.unwrap_or(0),
                    job.min_free_bytes
                );
                return (index, FinishReason::DiskLow);
            }
        }

        let frame = match source.next_frame() {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Frame source failed after {} frames: {}", index, e);
                let _ = events.send(CaptureEvent::SourceFailed(e.to_string()));
                return (index, FinishReason::SourceFailed);
            }
        };

        // Stopped while grabbing: the encoder may already be reading the directory.
        if token.is_stopped() {
            return (index, FinishReason::Stopped);
        }

        let path = frame_path(&job.directory, index, job.format);
        if let Err(e) = save_frame(&frame, &path, job.format) {
            warn!("Failed to write {}: {}", path.display(), e);
            return (index, FinishReason::WriteFailed);
        }
        debug!("Wrote {}", path.display());

        let _ = events.send(CaptureEvent::FrameWritten { index });
        index += 1;

        if job.max_frames > 0 && index >= job.max_frames {
            return (index, FinishReason::FrameLimit);
        }
        if token.is_stopped() || !token.sleep(job.interval) {
            return (index, FinishReason::Stopped);
        }
    }
}

/// `000042.png.tmp`. Frame listings ignore it until it is renamed.
fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Encode next to `path`, then rename into place so a frame name never
/// points at a partial image.
fn save_frame(frame: &RgbImage, path: &Path, format: ImageFormat) -> std::io::Result<()> {
    let format = match format {
        ImageFormat::Png => image::ImageFormat::Png,
        ImageFormat::Jpeg => image::ImageFormat::Jpeg,
    };
    let staging = staging_path(path);
    let written = frame
        .save_with_format(&staging, format)
        .map_err(std::io::Error::other)
        .and_then(|()| std::fs::rename(&staging, path));
    if written.is_err() {
        let _ = std::fs::remove_file(&staging);
    }
    written
}
