use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TimelapseError {
    #[error("Configuration invalid: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to create session directory {path}: {source}")]
    SessionDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Frame sequence broken in {dir}: expected index {expected}, found {found}")]
    FrameGap { dir: PathBuf, expected: u64, found: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Reasons a start request is refused. Never surfaced beyond a log line.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("No capture source: region is empty and no camera is selected")]
    NoSource,

    #[error("Seconds per frame must be a positive number, got {0:?}")]
    InvalidInterval(String),

    #[error("Output frame rate must be a positive integer, got {0:?}")]
    InvalidFrameRate(String),
}
