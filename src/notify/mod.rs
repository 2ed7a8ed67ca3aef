//! Stream start/end notifications
//!
//! Messages are rendered from templates with `[room_name]` and `[time]`
//! placeholders and handed to a `Notifier`. Delivery is fire-and-forget.

use crate::config::Settings;
use async_trait::async_trait;
use chrono::{DateTime, Local};
use std::sync::Arc;

pub const DEFAULT_TITLE: &str = "Live status notification";
pub const DEFAULT_START_CONTENT: &str = "[room_name] went live at [time]";
pub const DEFAULT_END_CONTENT: &str = "[room_name] ended the stream at [time]";

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, title: &str, body: &str) -> Result<(), String>;
}

/// Writes notifications to the log
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, title: &str, body: &str) -> Result<(), String> {
        tracing::info!("[{}] {}", title, body);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEvent {
    Started,
    Ended,
}

/// A rendered notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageTemplate {
    pub title: String,
    pub body: String,
}

impl MessageTemplate {
    /// Render the message for `room_name`, honoring custom title and content
    pub fn render(settings: &Settings, event: StreamEvent, room_name: &str, at: DateTime<Local>) -> Self {
        let custom = match event {
            StreamEvent::Started => settings.custom_stream_start_content.as_deref(),
            StreamEvent::Ended => settings.custom_stream_end_content.as_deref(),
        };
        let template = custom.map(str::trim).filter(|s| !s.is_empty()).unwrap_or(match event {
            StreamEvent::Started => DEFAULT_START_CONTENT,
            StreamEvent::Ended => DEFAULT_END_CONTENT,
        });

        let title = settings
            .custom_notification_title
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_TITLE);

        let time = at.format("%Y-%m-%d %H:%M:%S").to_string();
        Self {
            title: title.to_string(),
            body: template.replace("[room_name]", room_name).replace("[time]", &time),
        }
    }
}

/// Whether `event` notifications are switched on globally
pub fn enabled_for(settings: &Settings, event: StreamEvent) -> bool {
    match event {
        StreamEvent::Started => settings.stream_start_notification_enabled,
        StreamEvent::Ended => settings.stream_end_notification_enabled,
    }
}

/// Send without waiting; failures are logged
pub fn dispatch(notifier: Arc<dyn Notifier>, message: MessageTemplate) {
    tokio::spawn(async move {
        if let Err(e) = notifier.notify(&message.title, &message.body).await {
            tracing::warn!("Failed to send notification '{}': {}", message.title, e);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 5, 17, 20, 15, 30).unwrap()
    }

    #[test]
    fn test_default_templates() {
        let settings = Settings::default();
        let msg = MessageTemplate::render(&settings, StreamEvent::Started, "Alice", at());
        assert_eq!(msg.title, DEFAULT_TITLE);
        assert_eq!(msg.body, "Alice went live at 2024-05-17 20:15:30");
    }

    #[test]
    fn test_custom_content() {
        let settings = Settings {
            custom_notification_title: Some("  ".into()),
            custom_stream_end_content: Some("[room_name] offline ([time])".into()),
            ..Settings::default()
        };
        let msg = MessageTemplate::render(&settings, StreamEvent::Ended, "Bob", at());
        assert_eq!(msg.title, DEFAULT_TITLE);
        assert_eq!(msg.body, "Bob offline (2024-05-17 20:15:30)");
    }

    #[test]
    fn test_enabled_for() {
        let settings = Settings {
            stream_start_notification_enabled: true,
            ..Settings::default()
        };
        assert!(enabled_for(&settings, StreamEvent::Started));
        assert!(!enabled_for(&settings, StreamEvent::Ended));
    }
}
