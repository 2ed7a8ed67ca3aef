//! Error types and handling
//!
//! Common error types used across the recorder. None of them is fatal to the
//! process: every kind is either retried on the next scheduler tick or surfaced
//! to the user as a status and then cleared.

use crate::resolver::ResolverError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Live check failed: {0}")]
    Resolver(#[from] ResolverError),

    #[error("Capture process for {rec_id} exited with {code:?}")]
    CaptureProcess { rec_id: String, code: Option<i32> },

    #[error("Free disk space {free_gb:.2} GB is below the {threshold_gb:.2} GB threshold")]
    DiskExhausted { free_gb: f64, threshold_gb: f64 },

    #[error("Recording {0} is busy, stop the capture first")]
    RegistryBusy(String),

    #[error("Recording not found: {0}")]
    NotFound(String),

    #[error("Failed to persist configuration: {0}")]
    ConfigPersist(String),

    #[error("Failed to spawn capture process: {0}")]
    Spawn(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Error response for the presentation layer
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl From<AppError> for ErrorResponse {
    fn from(error: AppError) -> Self {
        let code = match &error {
            AppError::Io(_) => "IO_ERROR",
            AppError::Serialization(_) => "SERIALIZATION_ERROR",
            AppError::Resolver(_) => "LIVE_CHECK_ERROR",
            AppError::CaptureProcess { .. } => "RECORDING_ERROR",
            AppError::DiskExhausted { .. } => "DISK_EXHAUSTED",
            AppError::RegistryBusy(_) => "REGISTRY_BUSY",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::ConfigPersist(_) => "CONFIG_PERSIST_ERROR",
            AppError::Spawn(_) => "SPAWN_ERROR",
            AppError::InvalidConfig(_) => "INVALID_CONFIG",
        };

        ErrorResponse {
            code: code.to_string(),
            message: error.to_string(),
        }
    }
}

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;
