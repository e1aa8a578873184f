pub mod config;
pub mod errors;
pub mod geometry;
pub mod session;
pub mod types;

pub use config::TimelapseConfig;
pub use errors::{ConfigError, TimelapseError};
pub use geometry::{DisplayScale, ScreenRect};
pub use session::{create_session, frame_file_name, frame_path, list_frames, video_file_name};
pub use types::*;
