//! Capture command trait definitions
//!
//! A `CommandBuilder` turns a `CaptureRequest` into the argument vector of an
//! external capture process. The output path is always the last element.

use crate::recorder::state::RecordFormat;
use std::path::PathBuf;

/// Everything needed to build one capture command
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureRequest {
    /// Playable media URL (m3u8/flv)
    pub media_url: String,

    pub format: RecordFormat,

    /// Segment length in seconds, `None` for a single file
    pub segment_time: Option<u64>,

    /// Output file, or a `%03d` pattern when segmenting
    pub output_path: PathBuf,

    pub proxy: Option<String>,

    /// Extra request header, e.g. `origin:https://...`
    pub headers: Option<String>,

    /// Use longer network timeouts and larger buffers
    pub overseas: bool,
}

impl CaptureRequest {
    pub fn new(media_url: impl Into<String>, format: RecordFormat, output_path: PathBuf) -> Self {
        Self {
            media_url: media_url.into(),
            format,
            segment_time: None,
            output_path,
            proxy: None,
            headers: None,
            overseas: false,
        }
    }

    pub fn is_segmented(&self) -> bool {
        self.segment_time.is_some() && self.format.supports_segments()
    }
}

pub trait CommandBuilder: Send + Sync {
    /// Build the full argument vector, program first
    fn build(&self, request: &CaptureRequest) -> Vec<String>;
}
