//! Per-source client: a [`RequestPipeline`] plus the cache management surface.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use ipcache_backend::{CacheStats, CacheStore};
use ipcache_core::{FetchRequest, FetchResponse};
use ipcache_feoxdb::FeOxDbStore;
use serde::Serialize;
use tracing::{debug, info};

use crate::cache::Cache;
use crate::config::ClientConfig;
use crate::credential::{CredentialConfig, CredentialManager};
use crate::error::{BuildError, CacheError, FetchError};
use crate::pipeline::RequestPipeline;
use crate::policy::TtlPolicy;
use crate::ratelimit::{RateLimitConfig, RateLimiter};
use crate::retry::{RetryConfig, RetryPolicy};
use crate::sources::Source;
use crate::transport::Transport;

/// A client for one upstream source.
///
/// Each client owns its cache, rate limiter and credentials; nothing is
/// shared between clients. Cloning is cheap and clones share all of them.
#[derive(Debug, Clone)]
pub struct Client {
    config: Arc<ClientConfig>,
    pipeline: RequestPipeline,
}

impl Client {
    /// Builder for a client called `name`.
    pub fn builder(name: impl Into<String>) -> ClientBuilder {
        ClientBuilder::from_config(ClientConfig::new(name))
    }

    /// Builder preset for a known source, with credentials from the environment.
    pub fn for_source(source: Source) -> Result<ClientBuilder, BuildError> {
        Ok(ClientBuilder::from_config(source.config()?))
    }

    /// Builds a client straight from a configuration.
    pub fn from_config<T>(config: ClientConfig, transport: T) -> Result<Self, BuildError>
    where
        T: Transport + 'static,
    {
        ClientBuilder::from_config(config).build(transport)
    }

    /// The configuration the client was built from.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// The underlying pipeline.
    pub fn pipeline(&self) -> &RequestPipeline {
        &self.pipeline
    }

    /// Resolves `path` against the base URL. Absolute URLs are returned as is.
    pub fn url(&self, path: &str) -> Result<String, FetchError> {
        if path.starts_with("http://") || path.starts_with("https://") {
            return Ok(path.to_owned());
        }
        let Some(base) = self.config.base_url.as_deref() else {
            return Err(FetchError::InvalidRequest(format!(
                "relative path `{path}` but client `{}` has no base_url",
                self.config.name
            )));
        };
        Ok(format!(
            "{}/{}",
            base.trim_end_matches('/'),
            path.trim_start_matches('/')
        ))
    }

    /// Executes a request.
    pub async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, FetchError> {
        self.pipeline.execute(request).await
    }

    /// `GET path` with query parameters.
    pub async fn get<I, K, V>(&self, path: &str, query: I) -> Result<FetchResponse, FetchError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let request = FetchRequest::get(self.url(path)?).queries(query);
        self.fetch(request).await
    }

    /// `POST path` with a JSON body.
    pub async fn post_json<B>(&self, path: &str, body: &B) -> Result<FetchResponse, FetchError>
    where
        B: Serialize + ?Sized,
    {
        let request = FetchRequest::post(self.url(path)?)
            .header("accept", "application/json")
            .json(body)
            .map_err(|e| FetchError::InvalidRequest(format!("request body: {e}")))?;
        self.fetch(request).await
    }

    /// Whether responses are cached.
    pub fn cache_enabled(&self) -> bool {
        self.pipeline.cache().is_some()
    }

    fn cache(&self) -> Result<&Cache, CacheError> {
        self.pipeline.cache().ok_or(CacheError::Disabled)
    }

    /// Hit/miss counters and store size.
    pub async fn cache_stats(&self) -> Result<CacheStats, CacheError> {
        self.cache()?.stats().await
    }

    /// Removes every cached entry. Returns how many were removed.
    pub async fn cache_clear(&self) -> Result<u64, CacheError> {
        self.cache()?.clear_all().await
    }

    /// Removes entries older than `max_age`, by default the client TTL (24 h
    /// when unset).
    pub async fn cache_clear_expired(&self, max_age: Option<Duration>) -> Result<u64, CacheError> {
        self.cache()?.clear_expired(max_age).await
    }

    /// Removes entries whose normalized URL matches the regular expression `pattern`.
    pub async fn cache_invalidate(&self, pattern: &str) -> Result<u64, CacheError> {
        self.cache()?.invalidate(pattern).await
    }

    /// Flushes pending cache writes. A no-op when caching is disabled.
    pub async fn shutdown(&self) -> Result<(), CacheError> {
        match self.pipeline.cache() {
            Some(cache) => {
                cache.flush().await?;
                debug!(client = %self.config.name, "Cache flushed");
                Ok(())
            }
            None => Ok(()),
        }
    }
}

/// Assembles a [`Client`].
pub struct ClientBuilder {
    config: ClientConfig,
    store: Option<Box<dyn CacheStore>>,
}

impl std::fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("config", &self.config)
            .field("custom_store", &self.store.is_some())
            .finish()
    }
}

impl ClientBuilder {
    /// Starts from an existing configuration.
    pub fn from_config(config: ClientConfig) -> Self {
        Self {
            config,
            store: None,
        }
    }

    /// Root that relative request paths are joined onto.
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.config.base_url = Some(base_url.into());
        self
    }

    /// Enables or disables caching.
    pub fn cache_enabled(mut self, enabled: bool) -> Self {
        self.config.cache_enabled = enabled;
        self
    }

    /// Directory holding the cache file.
    pub fn cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.cache_dir = Some(dir.into());
        self
    }

    /// Lifetime of responses without caching headers.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.config.ttl = Some(ttl);
        self
    }

    /// Request budget.
    pub fn rate_limit(mut self, rate_limit: RateLimitConfig) -> Self {
        self.config.rate_limit = Some(rate_limit);
        self
    }

    /// Retry behaviour.
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.config.retry = retry;
        self
    }

    /// Authentication scheme.
    pub fn credentials(mut self, credentials: CredentialConfig) -> Self {
        self.config.credentials = credentials;
        self
    }

    /// Adds a header sent with every request.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.config
            .headers
            .insert(name.into().to_ascii_lowercase(), value.into());
        self
    }

    /// Deadline for a single network attempt.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = Some(timeout);
        self
    }

    /// Caches into `store` instead of the FeOxDB file under the cache directory.
    pub fn store<S>(mut self, store: S) -> Self
    where
        S: CacheStore + 'static,
    {
        self.store = Some(Box::new(store));
        self
    }

    fn open_cache(&mut self) -> Result<Option<Cache>, BuildError> {
        if !self.config.cache_enabled {
            return Ok(None);
        }
        let ttl = TtlPolicy::new(self.config.ttl);
        let cache = match self.store.take() {
            Some(store) => Cache::new(store, ttl),
            None => {
                let store = FeOxDbStore::builder()
                    .path(self.config.resolved_cache_dir())
                    .label(self.config.name.as_str())
                    .build()?;
                Cache::new(store, ttl)
            }
        };
        Ok(Some(cache))
    }

    /// Validates the configuration, opens the cache and builds the client.
    pub fn build<T>(mut self, transport: T) -> Result<Client, BuildError>
    where
        T: Transport + 'static,
    {
        self.config.validate()?;
        let transport: Arc<dyn Transport> = Arc::new(transport);
        let cache = self.open_cache()?;
        let config = self.config;
        let retry = RetryPolicy::new(config.retry);

        let credentials =
            CredentialManager::new(config.credentials.clone(), Arc::clone(&transport), retry)
                .with_label(config.name.as_str());

        let mut pipeline = RequestPipeline::builder(config.name.as_str(), transport)
            .credentials(credentials)
            .retry(retry)
            .default_headers(config.default_headers());
        if let Some(cache) = cache {
            pipeline = pipeline.cache(cache);
        }
        if let Some(limit) = config.rate_limit {
            pipeline = pipeline.rate_limiter(RateLimiter::with_label(limit, config.name.as_str())?);
        }
        if let Some(timeout) = config.timeout {
            pipeline = pipeline.timeout(timeout);
        }

        info!(
            client = %config.name,
            cache_enabled = config.cache_enabled,
            base_url = config.base_url.as_deref().unwrap_or(""),
            "Client ready"
        );
        Ok(Client {
            config: Arc::new(config),
            pipeline: pipeline.build(),
        })
    }
}
