//! Live-stream resolution
//!
//! A `StreamResolver` turns a room URL into liveness plus a playable media
//! URL. Implementations are per platform and live outside this crate; the
//! `ResolverRegistry` picks one by URL pattern.

mod direct;
mod registry;

pub use direct::{DirectUrlResolver, DIRECT_URL_PATTERN};
pub use registry::{ResolverFactory, ResolverRegistry};

use crate::config::PlatformCredentials;
use crate::recorder::state::VideoQuality;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result of a successful resolve
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamData {
    pub is_live: bool,
    pub anchor_name: String,
    pub title: String,
    /// Playable media URL, empty when offline
    pub media_url: String,
}

/// Resolver failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolverError {
    #[error("Unsupported platform: {0}")]
    NotSupported(String),

    #[error("Network failure: {0}")]
    NetworkFailure(String),

    #[error("Could not parse stream data: {0}")]
    ParseFailure(String),
}

/// Everything a resolver may need besides the URL
#[derive(Debug, Clone, Default)]
pub struct ResolverContext {
    pub proxy: Option<String>,
    pub credentials: Option<PlatformCredentials>,
    pub quality: VideoQuality,
}

#[async_trait]
pub trait StreamResolver: Send + Sync {
    /// Resolve liveness and the media URL for a room URL
    async fn resolve(&self, url: &str, context: &ResolverContext) -> Result<StreamData, ResolverError>;
}

/// Registry with the resolvers shipped in this crate
pub fn builtin_registry(timeout: std::time::Duration) -> Result<ResolverRegistry, regex::Error> {
    let mut registry = ResolverRegistry::new(timeout);
    registry.register_instance(DIRECT_URL_PATTERN, "direct", std::sync::Arc::new(DirectUrlResolver))?;
    Ok(registry)
}
