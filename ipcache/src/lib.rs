#![doc = include_str!("../README.md")]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

/// Client-facing cache: fresh/stale lookups, TTL-aware writes, management.
pub mod cache;

/// The per-source [`Client`] and its builder.
pub mod client;

/// Single-flight de-duplication of identical in-flight work.
///
/// Used by the pipeline for network fetches and by the credential manager
/// for token exchanges.
pub mod concurrency;

/// Client configuration, loadable from YAML.
pub mod config;

/// Credential schemes and the token lifecycle.
pub mod credential;

/// Error types.
///
/// - [`FetchError`] for the fetch path
/// - [`CacheError`] for cache management
/// - [`BuildError`] for client construction
pub mod error;

/// Metrics for pipeline observability.
///
/// When the `metrics` feature is enabled, this module records:
/// - Cache hits and misses per client
/// - Upstream attempt latency, retries and failures
/// - Rate-limiter waits, token refreshes and coalesced callers
pub mod metrics;

/// The request pipeline tying cache, credentials, rate limiting and retry together.
pub mod pipeline;

/// TTL precedence for stored responses.
pub mod policy;

/// Token-bucket rate limiting.
pub mod ratelimit;

/// Retry classification and backoff.
pub mod retry;

/// Presets for the known patent-office sources.
pub mod sources;

/// The network boundary.
pub mod transport;

pub use cache::{Cache, Lookup};
pub use client::{Client, ClientBuilder};
pub use config::{ClientConfig, default_cache_dir};
pub use credential::{
    AccessToken, Credential, CredentialConfig, CredentialManager, OAuthExchange, TokenExchange,
    TokenState,
};
pub use error::{BuildError, CacheError, FetchError, TransportErrorKind};
pub use pipeline::{PipelineBuilder, RequestPipeline};
pub use policy::{DEFAULT_TTL, Freshness, TtlPolicy};
pub use ratelimit::{RateLimitConfig, RateLimiter};
pub use retry::{Backoff, RetryConfig, RetryPolicy};
pub use sources::Source;
pub use transport::Transport;

pub use ipcache_backend::{CacheStats, CacheStore, MemoryStore, StoreError};
pub use ipcache_core::{
    CacheEntry, CacheStatus, EntryMeta, FetchRequest, FetchResponse, Fingerprint, Headers,
};
pub use ipcache_feoxdb::FeOxDbStore;
