//! Pipeline metrics declaration.
//!
//! Enable the `metrics` feature to record them through the [`metrics`] facade;
//! without it every recorder below compiles to nothing. Store-level metrics
//! live in `ipcache_backend::metrics`.

use std::time::Duration;

use ipcache_core::CacheStatus;

#[cfg(feature = "metrics")]
use lazy_static::lazy_static;

#[cfg(feature = "metrics")]
lazy_static! {
    // Cache status metrics

    /// Track number of requests served from the cache.
    pub static ref CACHE_HIT_COUNTER: &'static str = {
        metrics::describe_counter!(
            "ipcache_cache_hit_total",
            "Total number of requests served from the cache, including revalidated entries."
        );
        "ipcache_cache_hit_total"
    };
    /// Track number of requests that went to the network.
    pub static ref CACHE_MISS_COUNTER: &'static str = {
        metrics::describe_counter!(
            "ipcache_cache_miss_total",
            "Total number of cache misses."
        );
        "ipcache_cache_miss_total"
    };

    // Upstream metrics

    /// Histogram of upstream attempt duration.
    pub static ref UPSTREAM_DURATION: &'static str = {
        metrics::describe_histogram!(
            "ipcache_upstream_duration_seconds",
            metrics::Unit::Seconds,
            "Duration of single upstream attempts in seconds."
        );
        "ipcache_upstream_duration_seconds"
    };
    /// Track number of retried attempts.
    pub static ref UPSTREAM_RETRIES: &'static str = {
        metrics::describe_counter!(
            "ipcache_upstream_retries_total",
            "Total number of upstream attempts that were retried."
        );
        "ipcache_upstream_retries_total"
    };
    /// Track number of failed fetches by error kind.
    pub static ref UPSTREAM_ERRORS: &'static str = {
        metrics::describe_counter!(
            "ipcache_upstream_errors_total",
            "Total number of fetches that failed after retries."
        );
        "ipcache_upstream_errors_total"
    };

    // Governance metrics

    /// Histogram of time spent waiting for a rate-limit token.
    pub static ref RATE_LIMIT_WAIT: &'static str = {
        metrics::describe_histogram!(
            "ipcache_rate_limit_wait_seconds",
            metrics::Unit::Seconds,
            "Time spent waiting for a rate-limit token in seconds."
        );
        "ipcache_rate_limit_wait_seconds"
    };
    /// Track number of token exchanges.
    pub static ref TOKEN_REFRESH: &'static str = {
        metrics::describe_counter!(
            "ipcache_token_refresh_total",
            "Total number of credential exchanges, by outcome."
        );
        "ipcache_token_refresh_total"
    };
    /// Track number of callers that joined an in-flight operation.
    pub static ref COALESCED: &'static str = {
        metrics::describe_counter!(
            "ipcache_coalesced_total",
            "Total number of callers that joined an in-flight operation."
        );
        "ipcache_coalesced_total"
    };
}

/// Record the final cache status of one fetch.
#[cfg(feature = "metrics")]
#[inline]
pub fn record_cache_status(client: &str, status: CacheStatus) {
    let counter = match status {
        CacheStatus::Hit | CacheStatus::Revalidated => *CACHE_HIT_COUNTER,
        CacheStatus::Miss => *CACHE_MISS_COUNTER,
        CacheStatus::Bypass => return,
    };
    metrics::counter!(counter, "client" => client.to_string(), "status" => status.as_str())
        .increment(1);
}

/// No-op version when metrics feature is disabled.
#[cfg(not(feature = "metrics"))]
#[inline]
pub fn record_cache_status(_client: &str, _status: CacheStatus) {}

/// Record one upstream attempt.
#[cfg(feature = "metrics")]
#[inline]
pub fn record_upstream(client: &str, status: Option<u16>, duration: Duration) {
    let status = status.map_or_else(|| "error".to_string(), |s| s.to_string());
    metrics::histogram!(
        *UPSTREAM_DURATION,
        "client" => client.to_string(),
        "status" => status
    )
    .record(duration.as_secs_f64());
}

/// No-op version when metrics feature is disabled.
#[cfg(not(feature = "metrics"))]
#[inline]
pub fn record_upstream(_client: &str, _status: Option<u16>, _duration: Duration) {}

/// Record a retry caused by an error of `kind`.
#[cfg(feature = "metrics")]
#[inline]
pub fn record_retry(client: &str, kind: &'static str) {
    metrics::counter!(*UPSTREAM_RETRIES, "client" => client.to_string(), "kind" => kind)
        .increment(1);
}

/// No-op version when metrics feature is disabled.
#[cfg(not(feature = "metrics"))]
#[inline]
pub fn record_retry(_client: &str, _kind: &'static str) {}

/// Record a fetch that failed for good.
#[cfg(feature = "metrics")]
#[inline]
pub fn record_failure(client: &str, kind: &'static str) {
    metrics::counter!(*UPSTREAM_ERRORS, "client" => client.to_string(), "kind" => kind)
        .increment(1);
}

/// No-op version when metrics feature is disabled.
#[cfg(not(feature = "metrics"))]
#[inline]
pub fn record_failure(_client: &str, _kind: &'static str) {}

/// Record time spent waiting on the rate limiter.
#[cfg(feature = "metrics")]
#[inline]
pub fn record_rate_limit_wait(limiter: &str, waited: Duration) {
    metrics::histogram!(*RATE_LIMIT_WAIT, "limiter" => limiter.to_string())
        .record(waited.as_secs_f64());
}

/// No-op version when metrics feature is disabled.
#[cfg(not(feature = "metrics"))]
#[inline]
pub fn record_rate_limit_wait(_limiter: &str, _waited: Duration) {}

/// Record a credential exchange.
#[cfg(feature = "metrics")]
#[inline]
pub fn record_token_refresh(credentials: &str, success: bool) {
    let outcome = if success { "success" } else { "failure" };
    metrics::counter!(
        *TOKEN_REFRESH,
        "credentials" => credentials.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

/// No-op version when metrics feature is disabled.
#[cfg(not(feature = "metrics"))]
#[inline]
pub fn record_token_refresh(_credentials: &str, _success: bool) {}

/// Record a caller joining in-flight work.
#[cfg(feature = "metrics")]
#[inline]
pub fn record_coalesced(flight: &'static str) {
    metrics::counter!(*COALESCED, "flight" => flight).increment(1);
}

/// No-op version when metrics feature is disabled.
#[cfg(not(feature = "metrics"))]
#[inline]
pub fn record_coalesced(_flight: &'static str) {}
