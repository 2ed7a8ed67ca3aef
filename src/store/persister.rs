//! Debounced background saving
//!
//! Callers ask for a save after every mutation; a single task coalesces the
//! requests and writes the latest registry snapshot.

use super::RecordingStore;
use crate::recorder::registry::RecordingRegistry;
use crate::utils::{AppError, AppResult};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Quiet period before a requested save is written
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(200);

#[derive(Clone)]
pub struct Persister {
    tx: mpsc::Sender<()>,
    store: Arc<dyn RecordingStore>,
    registry: Arc<RecordingRegistry>,
}

impl Persister {
    /// Start the background writer
    pub fn spawn(
        store: Arc<dyn RecordingStore>,
        registry: Arc<RecordingRegistry>,
        debounce: Duration,
    ) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<()>(1);

        let task = {
            let store = store.clone();
            let registry = registry.clone();
            tokio::spawn(async move {
                while rx.recv().await.is_some() {
                    tokio::time::sleep(debounce).await;
                    while rx.try_recv().is_ok() {}

                    if let Err(e) = save(store.clone(), &registry).await {
                        tracing::error!("Failed to persist recordings: {}", e);
                    }
                }
                tracing::debug!("Persister stopped");
            })
        };

        (Self { tx, store, registry }, task)
    }

    /// Schedule a save without waiting for it
    pub fn request_save(&self) {
        // A full channel already has a save pending
        let _ = self.tx.try_send(());
    }

    /// Write the current snapshot now
    pub async fn flush(&self) -> AppResult<()> {
        save(self.store.clone(), &self.registry).await
    }
}

async fn save(store: Arc<dyn RecordingStore>, registry: &RecordingRegistry) -> AppResult<()> {
    let configs = registry.configs();
    tokio::task::spawn_blocking(move || store.save_recordings(&configs))
        .await
        .map_err(|e| AppError::ConfigPersist(e.to_string()))?
}
