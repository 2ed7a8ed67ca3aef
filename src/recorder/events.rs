//! Recorder event bus
//!
//! Status changes are broadcast to any number of subscribers, e.g. a UI or
//! a log sink. Slow subscribers lose old events rather than blocking the
//! recorder.

use super::recording::RecordingView;
use tokio::sync::broadcast;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Events emitted by the recorder
#[derive(Debug, Clone, PartialEq)]
pub enum RecorderEvent {
    /// A recording changed state
    Updated(RecordingView),
    /// A recording was removed from the registry
    Removed(String),
    /// A user-visible error for one recording
    Error { rec_id: String, message: String },
    /// The disk guard disabled or re-enabled recording
    DiskSpace { free_gb: f64, recording_enabled: bool },
}

/// Coarse event categories for filtered subscriptions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventTopic {
    Update,
    Delete,
    Error,
    Disk,
}

impl RecorderEvent {
    pub fn topic(&self) -> EventTopic {
        match self {
            RecorderEvent::Updated(_) => EventTopic::Update,
            RecorderEvent::Removed(_) => EventTopic::Delete,
            RecorderEvent::Error { .. } => EventTopic::Error,
            RecorderEvent::DiskSpace { .. } => EventTopic::Disk,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<RecorderEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Publish an event; having no subscribers is not an error
    pub fn publish(&self, event: RecorderEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RecorderEvent> {
        self.tx.subscribe()
    }

    /// Subscribe to one topic only
    pub fn subscribe_topic(&self, topic: EventTopic) -> TopicSubscription {
        TopicSubscription {
            topic,
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

pub struct TopicSubscription {
    topic: EventTopic,
    rx: broadcast::Receiver<RecorderEvent>,
}

impl TopicSubscription {
    /// Next event of the subscribed topic, `None` once the bus is gone
    pub async fn recv(&mut self) -> Option<RecorderEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if event.topic() == self.topic => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("Event subscriber lagged, skipped {} events", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
