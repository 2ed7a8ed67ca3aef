//! JSON file store

use super::RecordingStore;
use crate::recorder::state::RecordingConfig;
use crate::utils::{AppError, AppResult};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Stores the recording list as a pretty-printed JSON array.
///
/// Writes go to a temporary file in the same directory which is then renamed
/// over the target, so a crash never leaves a half-written list.
#[derive(Debug, Clone)]
pub struct JsonRecordingStore {
    path: PathBuf,
}

impl JsonRecordingStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RecordingStore for JsonRecordingStore {
    fn load_recordings(&self) -> AppResult<Vec<RecordingConfig>> {
        if !self.path.exists() {
            tracing::debug!("No recording list at {:?}, starting empty", self.path);
            return Ok(Vec::new());
        }

        let contents = fs::read_to_string(&self.path)?;
        if contents.trim().is_empty() {
            return Ok(Vec::new());
        }
        let recordings: Vec<RecordingConfig> = serde_json::from_str(&contents)?;

        tracing::info!("Loaded {} recordings from {:?}", recordings.len(), self.path);
        Ok(recordings)
    }

    fn save_recordings(&self, recordings: &[RecordingConfig]) -> AppResult<()> {
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)?;

        let contents = serde_json::to_string_pretty(recordings)?;
        let mut file = NamedTempFile::new_in(&dir)?;
        file.write_all(contents.as_bytes())?;
        file.as_file().sync_all()?;
        file.persist(&self.path)
            .map_err(|e| AppError::ConfigPersist(format!("{:?}: {}", self.path, e.error)))?;

        tracing::debug!("Saved {} recordings to {:?}", recordings.len(), self.path);
        Ok(())
    }
}
