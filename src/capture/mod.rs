//! Capture process command construction

pub mod ffmpeg;
pub mod traits;

pub use ffmpeg::{record_headers, record_url, FfmpegCommandBuilder};
pub use traits::{CaptureRequest, CommandBuilder};
