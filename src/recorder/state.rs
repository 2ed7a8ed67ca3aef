//! Recording state management
//!
//! Status values of the per-recording state machine and the persisted
//! configuration of a monitored source.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Current status of one recording
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordingStatus {
    /// Monitoring switched off by the user
    StoppedMonitoring,
    /// Waiting for the next live check
    Monitoring,
    /// A live check is in flight
    StatusChecking,
    /// Scheduled recording, current time outside the window
    NotInScheduledWindow,
    /// Live detected, capture being started
    PreparingRecording,
    /// Capture process running
    Recording,
    /// Last capture exited abnormally
    RecordingError,
    /// Free disk space below threshold
    NoDiskSpace,
    /// Last live check failed
    LiveCheckError,
}

impl RecordingStatus {
    /// Status on load
    pub fn initial(monitor_enabled: bool) -> Self {
        if monitor_enabled {
            Self::Monitoring
        } else {
            Self::StoppedMonitoring
        }
    }
}

/// Requested capture quality tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum VideoQuality {
    /// Original
    #[default]
    OD,
    UHD,
    HD,
    SD,
    LD,
}

impl VideoQuality {
    pub fn label(&self) -> &'static str {
        match self {
            VideoQuality::OD => "OD",
            VideoQuality::UHD => "UHD",
            VideoQuality::HD => "HD",
            VideoQuality::SD => "SD",
            VideoQuality::LD => "LD",
        }
    }
}

/// Output container format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordFormat {
    #[default]
    Ts,
    Mkv,
    Mp4,
    Flv,
    Mov,
    Mp3,
    M4a,
    Wav,
    Aac,
    Wma,
}

impl RecordFormat {
    /// File extension for this format
    pub fn extension(&self) -> &'static str {
        match self {
            RecordFormat::Ts => "ts",
            RecordFormat::Mkv => "mkv",
            RecordFormat::Mp4 => "mp4",
            RecordFormat::Flv => "flv",
            RecordFormat::Mov => "mov",
            RecordFormat::Mp3 => "mp3",
            RecordFormat::M4a => "m4a",
            RecordFormat::Wav => "wav",
            RecordFormat::Aac => "aac",
            RecordFormat::Wma => "wma",
        }
    }

    pub fn is_audio_only(&self) -> bool {
        matches!(
            self,
            RecordFormat::Mp3 | RecordFormat::M4a | RecordFormat::Wav | RecordFormat::Aac | RecordFormat::Wma
        )
    }

    /// Whether segmented capture writes numbered files
    pub fn supports_segments(&self) -> bool {
        !matches!(self, RecordFormat::Flv)
    }
}

/// Persisted configuration of one monitored source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingConfig {
    /// Stable identifier, generated once and never reused
    pub rec_id: String,

    pub url: String,

    /// Display name; replaced by the resolved anchor name while it is the placeholder
    #[serde(default)]
    pub streamer_name: String,

    #[serde(default)]
    pub record_format: RecordFormat,

    #[serde(default)]
    pub quality: VideoQuality,

    #[serde(default)]
    pub segment_record: bool,

    /// Segment length in seconds
    #[serde(default = "default_segment_time")]
    pub segment_time: u64,

    #[serde(default = "default_monitor_status")]
    pub monitor_status: bool,

    #[serde(default)]
    pub scheduled_recording: bool,

    /// `HH:MM:SS` or `HH:MM`
    #[serde(default)]
    pub scheduled_start_time: Option<String>,

    #[serde(default)]
    pub monitor_hours: Option<f64>,

    /// Output directory override
    #[serde(default)]
    pub recording_dir: Option<PathBuf>,

    #[serde(default)]
    pub enabled_message_push: bool,

    #[serde(default)]
    pub platform: Option<String>,

    #[serde(default)]
    pub platform_key: Option<String>,

    #[serde(default)]
    pub title: Option<String>,

    #[serde(default)]
    pub display_title: Option<String>,

    /// Length of the last completed capture in seconds
    #[serde(default)]
    pub last_duration: Option<f64>,
}

/// Placeholder streamer name used until a resolver reports the real one
pub const PLACEHOLDER_NAME: &str = "live_room";

fn default_segment_time() -> u64 {
    1800
}

fn default_monitor_status() -> bool {
    true
}

impl RecordingConfig {
    /// Create a configuration with a fresh id
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            rec_id: uuid::Uuid::new_v4().to_string(),
            url: url.into(),
            streamer_name: PLACEHOLDER_NAME.to_string(),
            record_format: RecordFormat::default(),
            quality: VideoQuality::default(),
            segment_record: false,
            segment_time: default_segment_time(),
            monitor_status: true,
            scheduled_recording: false,
            scheduled_start_time: None,
            monitor_hours: None,
            recording_dir: None,
            enabled_message_push: false,
            platform: None,
            platform_key: None,
            title: None,
            display_title: None,
            last_duration: None,
        }
    }

    /// Whether the streamer name is still the placeholder
    pub fn has_placeholder_name(&self) -> bool {
        let name = self.streamer_name.trim();
        name.is_empty() || name == PLACEHOLDER_NAME
    }

    /// `"{streamer} - {quality}"`
    pub fn default_title(&self) -> String {
        format!("{} - {}", self.streamer_name, self.quality.label())
    }
}
