//! Session directory layout.
//!
//! ```text
//! <output_root>/
//!   2024-05-01_14-03-12/
//!     000000.png
//!     000001.png
//!     …
//!     2024-05-01_15-10-47.mp4
//! ```
//!
//! Frame names carry a zero-padded index; the index order is the display
//! order of the final video.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone};
use tracing::{debug, info};

use crate::errors::TimelapseError;
use crate::types::ImageFormat;

/// Timestamp format used for session directories and video files.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// Digits in a frame file name.
pub const FRAME_INDEX_WIDTH: usize = 6;

/// Give up on collision suffixes after this many attempts.
const MAX_COLLISION_SUFFIX: u32 = 1000;

/// Create a fresh, timestamp-named session directory under `root`.
///
/// Intermediate components are created as needed. When a directory with the
/// same second-resolution name already exists, `-1`, `-2`, … is appended.
pub fn create_session<Tz>(root: &Path, now: &DateTime<Tz>) -> Result<PathBuf, TimelapseError>
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    std::fs::create_dir_all(root).map_err(|source| TimelapseError::SessionDirectory {
        path: root.to_path_buf(),
        source,
    })?;

    let base = now.format(TIMESTAMP_FORMAT).to_string();
    for attempt in 0..MAX_COLLISION_SUFFIX {
        let name = if attempt == 0 { base.clone() } else { format!("{base}-{attempt}") };
        let candidate = root.join(name);
        match std::fs::create_dir(&candidate) {
            Ok(()) => {
                info!("Session directory created: {}", candidate.display());
                return Ok(candidate);
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                debug!("Session directory {} exists, trying next suffix", candidate.display());
            }
            Err(source) => {
                return Err(TimelapseError::SessionDirectory { path: candidate, source });
            }
        }
    }

    Err(TimelapseError::SessionDirectory {
        path: root.join(base),
        source: std::io::Error::new(ErrorKind::AlreadyExists, "too many sessions in the same second"),
    })
}

/// `000042.png`
pub fn frame_file_name(index: u64, format: ImageFormat) -> String {
    format!("{:0width$}.{}", index, format.extension(), width = FRAME_INDEX_WIDTH)
}

pub fn frame_path(dir: &Path, index: u64, format: ImageFormat) -> PathBuf {
    dir.join(frame_file_name(index, format))
}

/// `2024-05-01_15-10-47.mp4`
pub fn video_file_name<Tz>(now: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    format!("{}.mp4", now.format(TIMESTAMP_FORMAT))
}

/// Parse the index out of a frame file name, if it is one.
pub fn parse_frame_index(path: &Path) -> Option<u64> {
    let ext = path.extension()?.to_str()?;
    ImageFormat::from_extension(ext)?;
    let stem = path.file_stem()?.to_str()?;
    if stem.len() < FRAME_INDEX_WIDTH || !stem.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    stem.parse().ok()
}

/// All frames in `dir`, in ascending index order.
///
/// Fails with [`TimelapseError::FrameGap`] when the indices are not exactly
/// `0..n`; an encoder fed such a sequence would produce a wrong timeline.
pub fn list_frames(dir: &Path) -> Result<Vec<PathBuf>, TimelapseError> {
    let mut frames: Vec<(u64, PathBuf)> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter_map(|path| parse_frame_index(&path).map(|idx| (idx, path)))
        .collect();

    frames.sort_by_key(|(idx, _)| *idx);

    for (expected, (found, _)) in frames.iter().enumerate() {
        if *found != expected as u64 {
            return Err(TimelapseError::FrameGap {
                dir: dir.to_path_buf(),
                expected: expected as u64,
                found: *found,
            });
        }
    }

    Ok(frames.into_iter().map(|(_, path)| path).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Local, TimeZone, Utc};

    fn fixed_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 14, 3, 12).unwrap()
    }

    #[test]
    fn frame_names_are_zero_padded() {
        assert_eq!(frame_file_name(0, ImageFormat::Png), "000000.png");
        assert_eq!(frame_file_name(42, ImageFormat::Jpeg), "000042.jpg");
        assert_eq!(frame_file_name(1_234_567, ImageFormat::Png), "1234567.png");
    }

    #[test]
    fn video_name_uses_timestamp() {
        assert_eq!(video_file_name(&fixed_time()), "2024-05-01_14-03-12.mp4");
    }

    #[test]
    fn creates_nested_session_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("a").join("timelapses");
        let dir = create_session(&root, &fixed_time()).unwrap();
        assert!(dir.is_dir());
        assert_eq!(dir.file_name().unwrap(), "2024-05-01_14-03-12");
    }

    #[test]
    fn same_second_sessions_do_not_collide() {
        let tmp = tempfile::tempdir().unwrap();
        let first = create_session(tmp.path(), &fixed_time()).unwrap();
        let second = create_session(tmp.path(), &fixed_time()).unwrap();
        let third = create_session(tmp.path(), &fixed_time()).unwrap();
        assert_ne!(first, second);
        assert_eq!(second.file_name().unwrap(), "2024-05-01_14-03-12-1");
        assert_eq!(third.file_name().unwrap(), "2024-05-01_14-03-12-2");
    }

    #[test]
    fn create_session_fails_when_root_is_a_file() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("not-a-dir");
        std::fs::write(&file, b"x").unwrap();
        let err = create_session(&file, &Local::now()).unwrap_err();
        assert!(matches!(err, TimelapseError::SessionDirectory { .. }));
    }

    #[test]
    fn lists_frames_in_index_order() {
        let tmp = tempfile::tempdir().unwrap();
        for idx in [2u64, 0, 10, 1, 3, 4, 5, 6, 7, 8, 9] {
            std::fs::write(frame_path(tmp.path(), idx, ImageFormat::Png), b"").unwrap();
        }
        std::fs::write(tmp.path().join("2024-05-01_14-03-12.mp4"), b"").unwrap();
        std::fs::write(tmp.path().join("notes.txt"), b"").unwrap();

        let frames = list_frames(tmp.path()).unwrap();
        let names: Vec<_> = frames
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 11);
        assert_eq!(names[0], "000000.png");
        assert_eq!(names[10], "000010.png");
    }

    #[test]
    fn gap_in_sequence_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        for idx in [0u64, 1, 3] {
            std::fs::write(frame_path(tmp.path(), idx, ImageFormat::Png), b"").unwrap();
        }
        let err = list_frames(tmp.path()).unwrap_err();
        assert!(matches!(err, TimelapseError::FrameGap { expected: 2, found: 3, .. }));
    }

    #[test]
    fn ignores_non_frame_files() {
        assert_eq!(parse_frame_index(Path::new("000007.png")), Some(7));
        assert_eq!(parse_frame_index(Path::new("000007.jpeg")), Some(7));
        assert_eq!(parse_frame_index(Path::new("7.png")), None);
        assert_eq!(parse_frame_index(Path::new("2024-05-01.mp4")), None);
        assert_eq!(parse_frame_index(Path::new("00000a.png")), None);
    }
}
