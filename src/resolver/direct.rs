//! Resolver for URLs that already point at a media playlist or stream

use super::{ResolverContext, ResolverError, StreamData, StreamResolver};
use async_trait::async_trait;

/// Pattern matching direct `.m3u8` / `.flv` URLs
pub const DIRECT_URL_PATTERN: &str = r"^https?://\S+\.(m3u8|flv)(\?\S*)?$";

/// Treats the URL itself as the live media URL.
///
/// Liveness is not probed; if the source is offline the capture process exits
/// with an error and the next tick retries.
#[derive(Debug, Default, Clone)]
pub struct DirectUrlResolver;

#[async_trait]
impl StreamResolver for DirectUrlResolver {
    async fn resolve(&self, url: &str, _context: &ResolverContext) -> Result<StreamData, ResolverError> {
        let host = url
            .split("://")
            .nth(1)
            .and_then(|rest| rest.split('/').next())
            .filter(|host| !host.is_empty())
            .ok_or_else(|| ResolverError::ParseFailure(format!("no host in {}", url)))?;

        Ok(StreamData {
            is_live: true,
            anchor_name: host.to_string(),
            title: String::new(),
            media_url: url.to_string(),
        })
    }
}
