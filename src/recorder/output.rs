//! Output location rules
//!
//! Pure functions of the settings, the recording configuration and the
//! resolved stream. Nothing here touches the filesystem except
//! `OutputPlan::create_dir`.

use super::state::{RecordingConfig, PLACEHOLDER_NAME};
use crate::config::Settings;
use crate::resolver::StreamData;
use crate::utils::naming::{clean_name, truncate_title};
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq)]
pub struct OutputPlan {
    /// Directory the capture writes into
    pub dir: PathBuf,
    /// File stem without suffix
    pub filename: String,
    /// Full output path, a `%03d` pattern when segmenting
    pub save_path: PathBuf,
    /// Name the files are recorded under
    pub record_name: String,
    /// Whether `dir` differs from the stored override and should be persisted
    pub dir_changed: bool,
}

impl OutputPlan {
    pub fn create_dir(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.dir)
    }
}

/// Author name used for folders and files
pub fn author_name(config: &RecordingConfig, stream: &StreamData) -> String {
    if !config.has_placeholder_name() {
        return config.streamer_name.clone();
    }
    clean_name(&stream.anchor_name, Some(PLACEHOLDER_NAME)).unwrap_or_else(|| PLACEHOLDER_NAME.to_string())
}

fn cleaned_title(stream: &StreamData) -> Option<String> {
    clean_name(&stream.title, None).and_then(|title| truncate_title(&title))
}

/// Directory for a new capture
pub fn output_dir(
    settings: &Settings,
    config: &RecordingConfig,
    author: &str,
    platform: &str,
    title: Option<&str>,
    now: DateTime<Local>,
) -> PathBuf {
    let date = now.format("%Y-%m-%d").to_string();

    if let Some(dir) = &config.recording_dir {
        let stale = settings.folder_name_time && !dir.to_string_lossy().contains(&date);
        if !stale {
            return dir.clone();
        }
    }

    let mut dir = settings.video_save_path.clone();
    if settings.folder_name_platform {
        dir.push(platform);
    }
    if settings.folder_name_author {
        dir.push(author);
    }
    if settings.folder_name_time {
        dir.push(&date);
    }
    if let Some(title) = title.filter(|_| settings.folder_name_title) {
        if settings.folder_name_time {
            dir.push(format!("{}_{}", title, author));
        } else {
            dir.push(format!("{}_{}", date, title));
        }
    }
    dir
}

/// `{author}_{title?}_{YYYY-MM-DD_HH-MM-SS}`
pub fn file_stem(author: &str, title: Option<&str>, now: DateTime<Local>) -> String {
    let stamp = now.format("%Y-%m-%d_%H-%M-%S").to_string();
    [Some(author), title, Some(stamp.as_str())]
        .into_iter()
        .flatten()
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}

/// Output path with the container suffix; spaces become underscores
pub fn save_path(dir: &Path, stem: &str, config: &RecordingConfig) -> PathBuf {
    let ext = config.record_format.extension();
    let name = if config.segment_record && config.record_format.supports_segments() {
        format!("{}_%03d.{}", stem, ext)
    } else {
        format!("{}.{}", stem, ext)
    };
    dir.join(name.replace(' ', "_"))
}

/// Compute where a capture starting at `now` writes to
pub fn plan_output(
    settings: &Settings,
    config: &RecordingConfig,
    stream: &StreamData,
    platform: &str,
    now: DateTime<Local>,
) -> OutputPlan {
    let author = author_name(config, stream);
    let title = cleaned_title(stream);

    let file_title = title.as_deref().filter(|_| settings.filename_includes_title);
    let dir = output_dir(settings, config, &author, platform, title.as_deref(), now);
    let filename = file_stem(&author, file_title, now);
    let save_path = save_path(&dir, &filename, config);
    let dir_changed = config.recording_dir.as_deref() != Some(dir.as_path());

    OutputPlan {
        dir,
        filename,
        save_path,
        record_name: author,
        dir_changed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::state::RecordFormat;
    use chrono::TimeZone;

    fn now() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 5, 17, 20, 15, 30).unwrap()
    }

    fn stream(anchor: &str, title: &str) -> StreamData {
        StreamData {
            is_live: true,
            anchor_name: anchor.to_string(),
            title: title.to_string(),
            media_url: "https://cdn/x.m3u8".to_string(),
        }
    }

    fn settings() -> Settings {
        Settings {
            video_save_path: PathBuf::from("/videos"),
            ..Settings::default()
        }
    }

    #[test]
    fn test_default_layout() {
        let config = RecordingConfig::new("https://example.com/room");
        let plan = plan_output(&settings(), &config, &stream("Alice", "Late night stream"), "Twitch", now());

        assert_eq!(plan.dir, PathBuf::from("/videos/Twitch/Alice"));
        assert_eq!(plan.filename, "Alice_Late_night_stream_2024-05-17_20-15-30");
        assert_eq!(
            plan.save_path,
            PathBuf::from("/videos/Twitch/Alice/Alice_Late_night_stream_2024-05-17_20-15-30.ts")
        );
        assert!(plan.dir_changed);
    }

    #[test]
    fn test_configured_name_wins_over_anchor() {
        let mut config = RecordingConfig::new("https://example.com/room");
        config.streamer_name = "Bob".into();
        let plan = plan_output(&settings(), &config, &stream("Alice", ""), "Twitch", now());
        assert_eq!(plan.record_name, "Bob");
        assert_eq!(plan.filename, "Bob_2024-05-17_20-15-30");
    }

    #[test]
    fn test_date_and_title_folders() {
        let mut s = settings();
        s.folder_name_platform = false;
        s.folder_name_time = true;
        s.folder_name_title = true;
        let config = RecordingConfig::new("https://example.com/room");
        let plan = plan_output(&s, &config, &stream("Alice", "Chess"), "Twitch", now());
        assert_eq!(plan.dir, PathBuf::from("/videos/Alice/2024-05-17/Chess_Alice"));

        s.folder_name_time = false;
        let plan = plan_output(&s, &config, &stream("Alice", "Chess"), "Twitch", now());
        assert_eq!(plan.dir, PathBuf::from("/videos/Alice/2024-05-17_Chess"));
    }

    #[test]
    fn test_override_kept_unless_stale_date() {
        let mut config = RecordingConfig::new("https://example.com/room");
        config.recording_dir = Some(PathBuf::from("/custom/2024-05-16"));

        let plan = plan_output(&settings(), &config, &stream("Alice", ""), "Twitch", now());
        assert_eq!(plan.dir, PathBuf::from("/custom/2024-05-16"));
        assert!(!plan.dir_changed);

        let mut s = settings();
        s.folder_name_time = true;
        let plan = plan_output(&s, &config, &stream("Alice", ""), "Twitch", now());
        assert_eq!(plan.dir, PathBuf::from("/videos/Twitch/Alice/2024-05-17"));
        assert!(plan.dir_changed);
    }

    #[test]
    fn test_segment_suffix() {
        let mut config = RecordingConfig::new("https://example.com/room");
        config.streamer_name = "Bob Smith".into();
        config.segment_record = true;
        let path = save_path(Path::new("/v"), "Bob Smith_2024", &config);
        assert_eq!(path, PathBuf::from("/v/Bob_Smith_2024_%03d.ts"));

        config.record_format = RecordFormat::Flv;
        let path = save_path(Path::new("/v"), "Bob_2024", &config);
        assert_eq!(path, PathBuf::from("/v/Bob_2024.flv"));
    }
}
