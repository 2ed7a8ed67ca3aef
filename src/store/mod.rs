//! Recording list persistence

mod json;
mod persister;

pub use json::JsonRecordingStore;
pub use persister::{Persister, DEFAULT_DEBOUNCE};

use crate::recorder::state::RecordingConfig;
use crate::utils::AppResult;

/// Durable storage for the recording list
pub trait RecordingStore: Send + Sync {
    fn load_recordings(&self) -> AppResult<Vec<RecordingConfig>>;

    fn save_recordings(&self, recordings: &[RecordingConfig]) -> AppResult<()>;
}
