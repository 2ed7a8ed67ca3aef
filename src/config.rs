//! User settings
//!
//! Settings are a flat JSON document. Every field has a serde default so that
//! older files keep loading after new options are added.

use crate::utils::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Environment variable overriding the settings file location
pub const CONFIG_PATH_ENV: &str = "STREAM_RECORDER_CONFIG";

/// Opaque per-platform credentials handed to resolvers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformCredentials {
    #[serde(default)]
    pub cookies: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub account_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    /// Minimum seconds between two live checks of the same recording
    #[serde(default = "default_loop_time_seconds")]
    pub loop_time_seconds: u64,

    /// Scheduler sweep period
    #[serde(default = "default_check_interval_seconds")]
    pub check_interval_seconds: u64,

    #[serde(default = "default_space_threshold")]
    pub recording_space_threshold_gb: f64,

    #[serde(default = "default_video_save_path")]
    pub video_save_path: PathBuf,

    #[serde(default = "default_true")]
    pub folder_name_platform: bool,

    #[serde(default = "default_true")]
    pub folder_name_author: bool,

    #[serde(default)]
    pub folder_name_time: bool,

    #[serde(default)]
    pub folder_name_title: bool,

    #[serde(default = "default_true")]
    pub filename_includes_title: bool,

    #[serde(default = "default_true")]
    pub remove_emojis: bool,

    #[serde(default)]
    pub force_https_recording: bool,

    #[serde(default)]
    pub enable_proxy: bool,

    #[serde(default)]
    pub proxy_address: Option<String>,

    /// Comma separated platform keys that go through the proxy
    #[serde(default)]
    pub default_platform_with_proxy: String,

    #[serde(default)]
    pub convert_to_mp4: bool,

    #[serde(default = "default_true")]
    pub delete_original: bool,

    #[serde(default)]
    pub execute_custom_script: bool,

    #[serde(default)]
    pub custom_script_command: Option<String>,

    #[serde(default)]
    pub stream_start_notification_enabled: bool,

    #[serde(default)]
    pub stream_end_notification_enabled: bool,

    #[serde(default)]
    pub only_notify_no_record: bool,

    #[serde(default = "default_notify_loop_time")]
    pub notify_loop_time: u64,

    #[serde(default)]
    pub custom_notification_title: Option<String>,

    #[serde(default)]
    pub custom_stream_start_content: Option<String>,

    #[serde(default)]
    pub custom_stream_end_content: Option<String>,

    #[serde(default = "default_single_stop_timeout")]
    pub single_stop_timeout_seconds: u64,

    #[serde(default = "default_shutdown_stop_timeout")]
    pub shutdown_stop_timeout_seconds: u64,

    #[serde(default = "default_resolve_timeout")]
    pub resolve_timeout_seconds: u64,

    /// Where the recording list lives; defaults to `recordings.json` next to the settings
    #[serde(default)]
    pub recordings_path: Option<PathBuf>,

    #[serde(default)]
    pub credentials: HashMap<String, PlatformCredentials>,
}

fn default_loop_time_seconds() -> u64 {
    300
}

fn default_check_interval_seconds() -> u64 {
    180
}

fn default_space_threshold() -> f64 {
    1.0
}

fn default_video_save_path() -> PathBuf {
    PathBuf::from("downloads")
}

fn default_true() -> bool {
    true
}

fn default_notify_loop_time() -> u64 {
    3600
}

fn default_single_stop_timeout() -> u64 {
    10
}

fn default_shutdown_stop_timeout() -> u64 {
    5
}

fn default_resolve_timeout() -> u64 {
    30
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            loop_time_seconds: default_loop_time_seconds(),
            check_interval_seconds: default_check_interval_seconds(),
            recording_space_threshold_gb: default_space_threshold(),
            video_save_path: default_video_save_path(),
            folder_name_platform: true,
            folder_name_author: true,
            folder_name_time: false,
            folder_name_title: false,
            filename_includes_title: true,
            remove_emojis: true,
            force_https_recording: false,
            enable_proxy: false,
            proxy_address: None,
            default_platform_with_proxy: String::new(),
            convert_to_mp4: false,
            delete_original: true,
            execute_custom_script: false,
            custom_script_command: None,
            stream_start_notification_enabled: false,
            stream_end_notification_enabled: false,
            only_notify_no_record: false,
            notify_loop_time: default_notify_loop_time(),
            custom_notification_title: None,
            custom_stream_start_content: None,
            custom_stream_end_content: None,
            single_stop_timeout_seconds: default_single_stop_timeout(),
            shutdown_stop_timeout_seconds: default_shutdown_stop_timeout(),
            resolve_timeout_seconds: default_resolve_timeout(),
            recordings_path: None,
            credentials: HashMap::new(),
        }
    }
}

impl Settings {
    /// Load settings from the default location, creating the file if missing
    pub fn load() -> AppResult<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load settings from an explicit path, creating the file if missing
    pub fn load_from(config_path: &Path) -> AppResult<Self> {
        if !config_path.exists() {
            tracing::info!(
                "Settings file not found at {:?}, creating default settings",
                config_path
            );
            let mut settings = Self::default();
            settings.save_to(config_path)?;
            settings.recordings_path = config_path.parent().map(|dir| dir.join("recordings.json"));
            return Ok(settings);
        }

        let contents = std::fs::read_to_string(config_path)?;
        let mut settings: Self = serde_json::from_str(&contents)?;
        if settings.recordings_path.is_none() {
            settings.recordings_path = config_path.parent().map(|dir| dir.join("recordings.json"));
        }

        tracing::info!("Loaded settings from {:?}", config_path);
        Ok(settings)
    }

    /// Save settings to an explicit path
    pub fn save_to(&self, config_path: &Path) -> AppResult<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(config_path, contents)?;

        tracing::info!("Saved settings to {:?}", config_path);
        Ok(())
    }

    /// Resolve the settings file path
    pub fn config_path() -> AppResult<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            return Ok(PathBuf::from(path));
        }

        let config_dir = if let Ok(dir) = std::env::var("XDG_CONFIG_HOME") {
            PathBuf::from(dir)
        } else {
            let home = std::env::var("HOME")
                .map_err(|_| AppError::InvalidConfig("HOME environment variable not set".into()))?;
            PathBuf::from(home).join(".config")
        };

        Ok(config_dir.join("stream-recorder").join("settings.json"))
    }

    /// Path of the recording list
    pub fn recordings_file(&self) -> PathBuf {
        self.recordings_path
            .clone()
            .unwrap_or_else(|| PathBuf::from("recordings.json"))
    }

    /// Validate the settings
    pub fn validate(&self) -> AppResult<()> {
        if self.loop_time_seconds == 0 {
            return Err(AppError::InvalidConfig("loop_time_seconds must be positive".into()));
        }

        if self.check_interval_seconds == 0 {
            return Err(AppError::InvalidConfig(
                "check_interval_seconds must be positive".into(),
            ));
        }

        if self.recording_space_threshold_gb < 0.0 {
            return Err(AppError::InvalidConfig(
                "recording_space_threshold_gb cannot be negative".into(),
            ));
        }

        if self.execute_custom_script
            && self
                .custom_script_command
                .as_deref()
                .map_or(true, |cmd| cmd.trim().is_empty())
        {
            return Err(AppError::InvalidConfig(
                "execute_custom_script needs custom_script_command".into(),
            ));
        }

        Ok(())
    }

    /// Proxy address for a platform, if proxying is enabled for it
    pub fn proxy_for(&self, platform_key: &str) -> Option<String> {
        if !self.enable_proxy {
            return None;
        }

        let listed = self
            .default_platform_with_proxy
            .replace('，', ",")
            .split(',')
            .map(str::trim)
            .any(|key| !key.is_empty() && key == platform_key);

        if !listed {
            return None;
        }

        self.proxy_address.as_deref().and_then(normalize_proxy)
    }
}

/// Prefix bare `host:port` proxies with a scheme
pub fn normalize_proxy(address: &str) -> Option<String> {
    let address = address.trim();
    if address.is_empty() {
        None
    } else if address.starts_with("http") {
        Some(address.to_string())
    } else {
        Some(format!("http://{}", address))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.loop_time_seconds, 300);
        assert_eq!(settings.check_interval_seconds, 180);
        assert_eq!(settings.notify_loop_time, 3600);
        assert!(settings.delete_original);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_load_creates_default_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");

        let settings = Settings::load_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(settings.check_interval_seconds, 180);

        let reloaded = Settings::load_from(&path).unwrap();
        assert_eq!(
            reloaded.recordings_path,
            Some(dir.path().join("nested").join("recordings.json"))
        );
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"loop_time_seconds": 60, "convert_to_mp4": true}"#).unwrap();

        let settings = Settings::load_from(&path).unwrap();
        assert_eq!(settings.loop_time_seconds, 60);
        assert!(settings.convert_to_mp4);
        assert_eq!(settings.shutdown_stop_timeout_seconds, 5);
    }

    #[test]
    fn test_validate_rejects_script_without_command() {
        let mut settings = Settings::default();
        settings.execute_custom_script = true;
        assert!(settings.validate().is_err());

        settings.custom_script_command = Some("./after.sh".into());
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_proxy_only_for_listed_platforms() {
        let mut settings = Settings::default();
        settings.enable_proxy = true;
        settings.proxy_address = Some("127.0.0.1:7890".into());
        settings.default_platform_with_proxy = "tiktok， twitch".into();

        assert_eq!(settings.proxy_for("tiktok").as_deref(), Some("http://127.0.0.1:7890"));
        assert_eq!(settings.proxy_for("twitch").as_deref(), Some("http://127.0.0.1:7890"));
        assert_eq!(settings.proxy_for("douyin"), None);

        settings.enable_proxy = false;
        assert_eq!(settings.proxy_for("tiktok"), None);
    }
}
