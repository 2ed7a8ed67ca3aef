//! Shared utilities

pub mod error;
pub mod naming;

pub use error::{AppError, AppResult, ErrorResponse};
