//! Ordered URL-pattern to resolver mapping

use super::{ResolverContext, ResolverError, StreamData, StreamResolver};
use regex::Regex;
use std::sync::Arc;
use std::time::Duration;

/// Builds a resolver for one check
pub type ResolverFactory = Arc<dyn Fn(&ResolverContext) -> Arc<dyn StreamResolver> + Send + Sync>;

struct ResolverEntry {
    pattern: Regex,
    platform_key: String,
    factory: ResolverFactory,
}

/// Patterns are tried in registration order; the first match wins.
pub struct ResolverRegistry {
    entries: Vec<ResolverEntry>,
    timeout: Duration,
}

impl ResolverRegistry {
    pub fn new(timeout: Duration) -> Self {
        Self {
            entries: Vec::new(),
            timeout,
        }
    }

    /// Register a resolver factory for a URL pattern
    pub fn register(
        &mut self,
        pattern: &str,
        platform_key: &str,
        factory: ResolverFactory,
    ) -> Result<(), regex::Error> {
        let pattern = Regex::new(pattern)?;
        tracing::debug!("Registered resolver '{}' for {}", platform_key, pattern);
        self.entries.push(ResolverEntry {
            pattern,
            platform_key: platform_key.to_string(),
            factory,
        });
        Ok(())
    }

    /// Register a single shared resolver instance
    pub fn register_instance(
        &mut self,
        pattern: &str,
        platform_key: &str,
        resolver: Arc<dyn StreamResolver>,
    ) -> Result<(), regex::Error> {
        self.register(pattern, platform_key, Arc::new(move |_| resolver.clone()))
    }

    /// Platform key of the first pattern matching `url`
    pub fn platform_info(&self, url: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|entry| entry.pattern.is_match(url))
            .map(|entry| entry.platform_key.as_str())
    }

    /// Build the resolver responsible for `url`
    pub fn resolver_for(
        &self,
        url: &str,
        context: &ResolverContext,
    ) -> Result<Arc<dyn StreamResolver>, ResolverError> {
        self.entries
            .iter()
            .find(|entry| entry.pattern.is_match(url))
            .map(|entry| (entry.factory)(context))
            .ok_or_else(|| ResolverError::NotSupported(url.to_string()))
    }

    /// Resolve `url` with the matching resolver, bounded by the per-call timeout
    pub async fn resolve(
        &self,
        url: &str,
        context: &ResolverContext,
    ) -> Result<StreamData, ResolverError> {
        let resolver = self.resolver_for(url, context)?;
        match tokio::time::timeout(self.timeout, resolver.resolve(url, context)).await {
            Ok(result) => result,
            Err(_) => Err(ResolverError::NetworkFailure(format!(
                "resolve timed out after {:?}",
                self.timeout
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct Fixed(&'static str);

    #[async_trait]
    impl StreamResolver for Fixed {
        async fn resolve(&self, _url: &str, _ctx: &ResolverContext) -> Result<StreamData, ResolverError> {
            Ok(StreamData {
                is_live: true,
                anchor_name: self.0.to_string(),
                ..Default::default()
            })
        }
    }

    struct Stuck;

    #[async_trait]
    impl StreamResolver for Stuck {
        async fn resolve(&self, _url: &str, _ctx: &ResolverContext) -> Result<StreamData, ResolverError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(StreamData::default())
        }
    }

    #[tokio::test]
    async fn test_first_registered_pattern_wins() {
        let mut registry = ResolverRegistry::new(Duration::from_secs(1));
        registry
            .register_instance(r"https://live\.example\.com/", "example", Arc::new(Fixed("first")))
            .unwrap();
        registry
            .register_instance(r"example\.com", "generic", Arc::new(Fixed("second")))
            .unwrap();

        assert_eq!(registry.platform_info("https://live.example.com/1"), Some("example"));
        assert_eq!(registry.platform_info("https://www.example.com/1"), Some("generic"));

        let data = registry
            .resolve("https://live.example.com/1", &ResolverContext::default())
            .await
            .unwrap();
        assert_eq!(data.anchor_name, "first");
    }

    #[tokio::test]
    async fn test_unknown_url_is_not_supported() {
        let registry = ResolverRegistry::new(Duration::from_secs(1));
        let err = registry
            .resolve("https://nowhere.invalid/", &ResolverContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ResolverError::NotSupported(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_resolver_times_out() {
        let mut registry = ResolverRegistry::new(Duration::from_secs(5));
        registry.register_instance("stuck", "stuck", Arc::new(Stuck)).unwrap();

        let err = registry
            .resolve("https://stuck/", &ResolverContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ResolverError::NetworkFailure(_)));
    }
}
