//! Store metrics for ipcache.
//!
//! Enable the `metrics` feature to record them; without it every function
//! here is an empty inline stub.
//!
//! ## Naming Pattern
//!
//! All metrics follow the pattern: `ipcache_store_{operation}_{metric_type}`

use std::time::Duration;

#[cfg(feature = "metrics")]
use std::time::Instant;

#[cfg(feature = "metrics")]
use lazy_static::lazy_static;

/// Zero-cost timer for metrics collection.
///
/// When the `metrics` feature is enabled, this captures the start time.
/// When disabled, this is a zero-sized struct with no overhead.
pub struct Timer {
    #[cfg(feature = "metrics")]
    start: Instant,
}

impl Timer {
    /// Create a new timer, capturing the current instant if metrics enabled.
    #[inline]
    pub fn new() -> Self {
        Self {
            #[cfg(feature = "metrics")]
            start: Instant::now(),
        }
    }

    /// Elapsed duration since timer creation (`Duration::ZERO` without metrics).
    #[inline]
    pub fn elapsed(&self) -> Duration {
        #[cfg(feature = "metrics")]
        {
            self.start.elapsed()
        }
        #[cfg(not(feature = "metrics"))]
        {
            Duration::ZERO
        }
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "metrics")]
lazy_static! {
    /// Metric name for total read operations counter.
    pub static ref STORE_READ_TOTAL: &'static str = {
        metrics::describe_counter!(
            "ipcache_store_read_total",
            "Total number of cache store read operations."
        );
        "ipcache_store_read_total"
    };

    /// Metric name for read duration histogram.
    pub static ref STORE_READ_DURATION: &'static str = {
        metrics::describe_histogram!(
            "ipcache_store_read_duration_seconds",
            metrics::Unit::Seconds,
            "Duration of cache store reads in seconds."
        );
        "ipcache_store_read_duration_seconds"
    };

    /// Metric name for read errors counter.
    pub static ref STORE_READ_ERRORS: &'static str = {
        metrics::describe_counter!(
            "ipcache_store_read_errors_total",
            "Total number of failed cache store reads."
        );
        "ipcache_store_read_errors_total"
    };

    /// Metric name for total write operations counter.
    pub static ref STORE_WRITE_TOTAL: &'static str = {
        metrics::describe_counter!(
            "ipcache_store_write_total",
            "Total number of cache store write operations."
        );
        "ipcache_store_write_total"
    };

    /// Metric name for write duration histogram.
    pub static ref STORE_WRITE_DURATION: &'static str = {
        metrics::describe_histogram!(
            "ipcache_store_write_duration_seconds",
            metrics::Unit::Seconds,
            "Duration of cache store writes in seconds."
        );
        "ipcache_store_write_duration_seconds"
    };

    /// Metric name for write errors counter.
    pub static ref STORE_WRITE_ERRORS: &'static str = {
        metrics::describe_counter!(
            "ipcache_store_write_errors_total",
            "Total number of dropped cache store writes."
        );
        "ipcache_store_write_errors_total"
    };
}

/// Record a read operation with duration.
#[cfg(feature = "metrics")]
#[inline]
pub fn record_read(store: &str, duration: Duration) {
    metrics::counter!(*STORE_READ_TOTAL, "store" => store.to_string()).increment(1);
    metrics::histogram!(*STORE_READ_DURATION, "store" => store.to_string())
        .record(duration.as_secs_f64());
}

/// Record a read operation (no-op when `metrics` feature disabled).
#[cfg(not(feature = "metrics"))]
#[inline]
pub fn record_read(_store: &str, _duration: Duration) {}

/// Record a read error.
#[cfg(feature = "metrics")]
#[inline]
pub fn record_read_error(store: &str) {
    metrics::counter!(*STORE_READ_ERRORS, "store" => store.to_string()).increment(1);
}

/// Record a read error (no-op when `metrics` feature disabled).
#[cfg(not(feature = "metrics"))]
#[inline]
pub fn record_read_error(_store: &str) {}

/// Record a write operation with duration.
#[cfg(feature = "metrics")]
#[inline]
pub fn record_write(store: &str, duration: Duration) {
    metrics::counter!(*STORE_WRITE_TOTAL, "store" => store.to_string()).increment(1);
    metrics::histogram!(*STORE_WRITE_DURATION, "store" => store.to_string())
        .record(duration.as_secs_f64());
}

/// Record a write operation (no-op when `metrics` feature disabled).
#[cfg(not(feature = "metrics"))]
#[inline]
pub fn record_write(_store: &str, _duration: Duration) {}

/// Record a dropped write.
#[cfg(feature = "metrics")]
#[inline]
pub fn record_write_error(store: &str) {
    metrics::counter!(*STORE_WRITE_ERRORS, "store" => store.to_string()).increment(1);
}

/// Record a dropped write (no-op when `metrics` feature disabled).
#[cfg(not(feature = "metrics"))]
#[inline]
pub fn record_write_error(_store: &str) {}
