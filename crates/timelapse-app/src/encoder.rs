//! Encoder invoker. Turns a session directory into `<timestamp>.mp4`.
//!
//! ```text
//! 000000.png ─┐
//! 000001.png ─┼─► ffmpeg -f image2pipe -i - … ─► 2024-05-01_15-10-47.mp4
//! …          ─┘     (stdin, ascending index)
//! ```
//!
//! Frames are piped in index order rather than globbed by ffmpeg, so the
//! ordering never depends on the encoder's filename handling.

use std::collections::VecDeque;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use anyhow::{bail, Context};
use chrono::Local;
use timelapse_core::config::{data_dir, EncoderConfig};
use timelapse_core::{list_frames, video_file_name, ImageFormat};
use tracing::{debug, error, info, warn};

/// Lines of ffmpeg stderr kept for the failure log.
const STDERR_TAIL_LINES: usize = 20;

#[cfg(windows)]
const FFMPEG_BIN: &str = "ffmpeg.exe";
#[cfg(not(windows))]
const FFMPEG_BIN: &str = "ffmpeg";

// ── Job & outcome ─────────────────────────────────────────────────────────────

/// One encode: frames in display order and where the video goes.
#[derive(Debug, Clone)]
pub struct EncodeJob {
    pub frames:       Vec<PathBuf>,
    pub fps:          u32,
    pub output:       PathBuf,
    pub input_format: ImageFormat,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EncodeOutcome {
    Encoded { output: PathBuf, frames: usize },
    /// ffmpeg ran and exited non-zero (`None` when killed by a signal).
    Failed { code: Option<i32> },
    /// Nothing was run; the frames stay on disk.
    Skipped(String),
}

impl std::fmt::Display for EncodeOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Encoded { output, frames } => write!(f, "{} ({} frames)", output.display(), frames),
            Self::Failed { code: Some(code) } => write!(f, "ffmpeg exited with status {code}"),
            Self::Failed { code: None } => write!(f, "ffmpeg terminated by signal"),
            Self::Skipped(reason) => write!(f, "not encoded: {reason}"),
        }
    }
}

/// Seam between the session controller and the external encoder.
pub trait VideoEncoder: Send {
    /// Encode all frames in `directory` at `fps`. Blocks until done.
    fn encode(&self, directory: &Path, fps: u32) -> EncodeOutcome;
}

// ── Arguments ─────────────────────────────────────────────────────────────────

/// ffmpeg command line for `job`, input options first.
pub fn build_ffmpeg_args(job: &EncodeJob, config: &EncoderConfig) -> Vec<String> {
    let input_codec = match job.input_format {
        ImageFormat::Png => "png",
        ImageFormat::Jpeg => "mjpeg",
    };

    vec![
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-y".to_string(),
        "-f".to_string(),
        "image2pipe".to_string(),
        "-c:v".to_string(),
        input_codec.to_string(),
        "-framerate".to_string(),
        job.fps.to_string(),
        "-i".to_string(),
        "-".to_string(),
        "-c:v".to_string(),
        config.codec.clone(),
        "-pix_fmt".to_string(),
        config.pixel_format.clone(),
        "-movflags".to_string(),
        "+faststart".to_string(),
        "-frames:v".to_string(),
        job.frames.len().to_string(),
        job.output.to_string_lossy().into_owned(),
    ]
}

// ── FfmpegEncoder ─────────────────────────────────────────────────────────────

pub struct FfmpegEncoder {
    config: EncoderConfig,
}

impl FfmpegEncoder {
    pub fn new(config: EncoderConfig) -> Self {
        Self { config }
    }

    fn prepare(&self, directory: &Path, fps: u32) -> Result<Option<EncodeJob>, String> {
        let frames = list_frames(directory).map_err(|e| e.to_string())?;
        let Some(first) = frames.first() else {
            return Ok(None);
        };
        let input_format = first
            .extension()
            .and_then(|e| e.to_str())
            .and_then(ImageFormat::from_extension)
            .unwrap_or_default();

        Ok(Some(EncodeJob {
            frames,
            fps,
            output: directory.join(video_file_name(&Local::now())),
            input_format,
        }))
    }
}

impl VideoEncoder for FfmpegEncoder {
    fn encode(&self, directory: &Path, fps: u32) -> EncodeOutcome {
        let job = match self.prepare(directory, fps) {
            Ok(Some(job)) => job,
            Ok(None) => {
                info!("No frames in {}, skipping encode", directory.display());
                return EncodeOutcome::Skipped("no frames captured".into());
            }
            Err(reason) => {
                warn!("Cannot encode {}: {}", directory.display(), reason);
                return EncodeOutcome::Skipped(reason);
            }
        };

        let ffmpeg = match resolve_ffmpeg(&self.config) {
            Ok(path) => path,
            Err(e) => {
                warn!("ffmpeg unavailable, frames left in {}: {:#}", directory.display(), e);
                return EncodeOutcome::Skipped(format!("{e:#}"));
            }
        };

        match run_ffmpeg(&ffmpeg, &job, &self.config) {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Encoding {} failed: {:#}", directory.display(), e);
                EncodeOutcome::Skipped(format!("{e:#}"))
            }
        }
    }
}

/// Spawn ffmpeg, feed it every frame in order, and wait for it.
pub fn run_ffmpeg(ffmpeg: &Path, job: &EncodeJob, config: &EncoderConfig) -> anyhow::Result<EncodeOutcome> {
    let args = build_ffmpeg_args(job, config);
    info!(
        "Encoding {} frames at {} fps → {}",
        job.frames.len(),
        job.fps,
        job.output.display()
    );
    debug!("{} {}", ffmpeg.display(), args.join(" "));

    let mut child = Command::new(ffmpeg)
        .args(&args)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("Failed to start {}", ffmpeg.display()))?;

    let stderr = child.stderr.take().context("ffmpeg stderr not captured")?;
    let tail_reader = std::thread::Builder::new()
        .name("ffmpeg-stderr".into())
        .spawn(move || {
            let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
            for line in BufReader::new(stderr).lines().map_while(Result::ok) {
                if tail.len() == STDERR_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
            tail
        })
        .context("Failed to spawn stderr reader")?;

    let fed = match child.stdin.take() {
        Some(stdin) => feed_frames(stdin, &job.frames),
        None => Err(anyhow::anyhow!("ffmpeg stdin not captured")),
    };

    if let Err(e) = fed {
        // Input is incomplete: whatever ffmpeg would finish is a truncated video.
        if let Err(kill_err) = child.kill() {
            debug!("ffmpeg already exited: {}", kill_err);
        }
        let _ = child.wait();
        let _ = tail_reader.join();
        if job.output.exists() {
            let _ = std::fs::remove_file(&job.output);
        }
        return Err(e);
    }

    let status = child.wait().context("Failed to wait for ffmpeg")?;
    let tail = tail_reader.join().unwrap_or_default();

    if status.success() {
        info!("Encoded {}", job.output.display());
        return Ok(EncodeOutcome::Encoded { output: job.output.clone(), frames: job.frames.len() });
    }

    error!("ffmpeg exited with {}", status);
    for line in &tail {
        error!("  ffmpeg: {}", line);
    }
    Ok(EncodeOutcome::Failed { code: status.code() })
}

/// Write every frame to ffmpeg's stdin in order, then close it.
///
/// A closed pipe just ends the feed early; a frame that cannot be read is
/// an error.
fn feed_frames(stdin: std::process::ChildStdin, frames: &[PathBuf]) -> anyhow::Result<usize> {
    let mut writer = BufWriter::with_capacity(8 * 1024 * 1024, stdin);
    let mut fed = 0usize;
    for frame in frames {
        let bytes = std::fs::read(frame).with_context(|| format!("Failed to read {}", frame.display()))?;
        if let Err(e) = writer.write_all(&bytes) {
            // ffmpeg closed its input; its exit status tells the rest.
            warn!("ffmpeg stopped reading after {} frames: {}", fed, e);
            break;
        }
        fed += 1;
    }
    if let Err(e) = writer.flush() {
        warn!("Flushing ffmpeg input: {}", e);
    }
    Ok(fed)
}

// ── Locating ffmpeg ───────────────────────────────────────────────────────────

/// Find an ffmpeg binary, fetching one if allowed and nothing is installed.
pub fn resolve_ffmpeg(config: &EncoderConfig) -> anyhow::Result<PathBuf> {
    if let Some(path) = locate_ffmpeg(config) {
        return Ok(path);
    }
    match (&config.download_url, cached_ffmpeg_path()) {
        (Some(url), Some(dest)) => {
            fetch_ffmpeg(url, &dest)?;
            Ok(dest)
        }
        (Some(_), None) => bail!("no data directory to store a downloaded ffmpeg"),
        (None, _) => bail!("ffmpeg not found and encoder.download_url is not set"),
    }
}

/// Configured path → PATH → working directory → cached download.
pub fn locate_ffmpeg(config: &EncoderConfig) -> Option<PathBuf> {
    if let Some(path) = &config.path {
        if path.is_file() {
            debug!("Using configured ffmpeg {}", path.display());
            return Some(path.clone());
        }
        warn!("Configured ffmpeg {} does not exist, searching", path.display());
    }

    if let Ok(path) = which::which("ffmpeg") {
        debug!("Found ffmpeg on PATH: {}", path.display());
        return Some(path);
    }

    let local = PathBuf::from(FFMPEG_BIN);
    if local.is_file() {
        debug!("Found ffmpeg in working directory");
        return Some(local);
    }

    cached_ffmpeg_path().filter(|p| p.is_file())
}

/// `<data_dir>/bin/ffmpeg`
pub fn cached_ffmpeg_path() -> Option<PathBuf> {
    data_dir().map(|d| d.join("bin").join(FFMPEG_BIN))
}

/// Download `url` to `dest` on a private current-thread runtime.
pub fn fetch_ffmpeg(url: &str, dest: &Path) -> anyhow::Result<()> {
    info!("Downloading ffmpeg from {}", url);
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build download runtime")?;
    rt.block_on(download(url, dest))?;
    mark_executable(dest)?;
    info!("ffmpeg saved to {}", dest.display());
    Ok(())
}

async fn download(url: &str, dest: &Path) -> anyhow::Result<()> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let partial = dest.with_extension("partial");

    let mut resp = reqwest::Client::new()
        .get(url)
        .send()
        .await
        .context("Download request failed")?;
    if !resp.status().is_success() {
        bail!("Download returned HTTP {}", resp.status());
    }

    let mut file = std::fs::File::create(&partial)
        .with_context(|| format!("Failed to create {}", partial.display()))?;
    let mut downloaded: u64 = 0;
    while let Some(chunk) = resp.chunk().await.context("Download interrupted")? {
        file.write_all(&chunk).context("Failed to write download")?;
        downloaded += chunk.len() as u64;
    }
    file.flush()?;
    drop(file);
    debug!("Downloaded {} bytes", downloaded);

    std::fs::rename(&partial, dest).with_context(|| format!("Failed to move download to {}", dest.display()))?;
    Ok(())
}

#[cfg(unix)]
fn mark_executable(path: &Path) -> anyhow::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = std::fs::metadata(path)?.permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(path, perms).with_context(|| format!("chmod {}", path.display()))
}

#[cfg(not(unix))]
fn mark_executable(_path: &Path) -> anyhow::Result<()> {
    Ok(())
}
