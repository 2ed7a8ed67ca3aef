//! Recording registry
//!
//! Ordered set of recordings keyed by `rec_id`. Insertion order is kept so
//! the persisted list and any UI see a stable order.

use super::events::{EventBus, RecorderEvent};
use super::recording::Recording;
use super::state::RecordingConfig;
use crate::utils::{AppError, AppResult};
use parking_lot::Mutex;
use std::sync::Arc;

pub struct RecordingRegistry {
    recordings: Mutex<Vec<Arc<Recording>>>,
    events: EventBus,
}

impl RecordingRegistry {
    pub fn new(events: EventBus) -> Self {
        Self {
            recordings: Mutex::new(Vec::new()),
            events,
        }
    }

    /// Add a recording; the same URL may be registered more than once
    pub fn add(&self, recording: Arc<Recording>) -> AppResult<()> {
        {
            let mut recordings = self.recordings.lock();
            if recordings.iter().any(|r| r.rec_id() == recording.rec_id()) {
                return Err(AppError::InvalidConfig(format!(
                    "duplicate recording id {}",
                    recording.rec_id()
                )));
            }
            recordings.push(recording.clone());
        }

        tracing::info!("Added recording {} ({})", recording.rec_id(), recording.config().url);
        self.events.publish(RecorderEvent::Updated(recording.view()));
        Ok(())
    }

    /// Remove a recording that is neither checking nor capturing
    pub fn remove(&self, rec_id: &str) -> AppResult<Arc<Recording>> {
        let removed = {
            let mut recordings = self.recordings.lock();
            let index = recordings
                .iter()
                .position(|r| r.rec_id() == rec_id)
                .ok_or_else(|| AppError::NotFound(rec_id.to_string()))?;
            if !recordings[index].retire() {
                return Err(AppError::RegistryBusy(rec_id.to_string()));
            }
            recordings.remove(index)
        };

        tracing::info!("Removed recording {}", rec_id);
        self.events.publish(RecorderEvent::Removed(rec_id.to_string()));
        Ok(removed)
    }

    /// Remove every recording; fails without removing anything if one is busy
    pub fn clear(&self) -> AppResult<usize> {
        let removed: Vec<Arc<Recording>> = {
            let mut recordings = self.recordings.lock();
            if let Some(busy) = recordings.iter().position(|r| !r.retire()) {
                for recording in &recordings[..busy] {
                    recording.reinstate();
                }
                return Err(AppError::RegistryBusy(recordings[busy].rec_id().to_string()));
            }
            recordings.drain(..).collect()
        };

        for recording in &removed {
            self.events.publish(RecorderEvent::Removed(recording.rec_id().to_string()));
        }
        Ok(removed.len())
    }

    pub fn find_by_id(&self, rec_id: &str) -> Option<Arc<Recording>> {
        self.recordings
            .lock()
            .iter()
            .find(|r| r.rec_id() == rec_id)
            .cloned()
    }

    /// Current recordings in insertion order
    pub fn snapshot(&self) -> Vec<Arc<Recording>> {
        self.recordings.lock().clone()
    }

    /// Configurations in insertion order, for persistence
    pub fn configs(&self) -> Vec<RecordingConfig> {
        self.snapshot().iter().map(|r| r.config()).collect()
    }

    pub fn len(&self) -> usize {
        self.recordings.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
