//! Token-bucket rate limiter, one per client.
//!
//! The bucket starts full. Before each check it is refilled by
//! `elapsed * refill_per_second`, capped at `capacity`. A caller that finds
//! less than one token sleeps until one accrues; callers are admitted in
//! arrival order because the bucket lock (a fair async mutex) is held across
//! that sleep. Requests are delayed, never rejected.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::error::BuildError;
use crate::metrics;

/// Tokens short of a whole one that still count as a whole one. Absorbs
/// float rounding so a waiter never re-sleeps for a zero duration.
const EPSILON: f64 = 1e-9;

/// Bucket size and refill rate.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct RateLimitConfig {
    /// Maximum burst.
    pub capacity: u32,
    /// Sustained rate in requests per second.
    pub refill_per_second: f64,
}

impl RateLimitConfig {
    /// `requests` per minute, with a burst of the same size.
    pub fn per_minute(requests: u32) -> Self {
        Self {
            capacity: requests,
            refill_per_second: f64::from(requests) / 60.0,
        }
    }

    /// `requests` per second, with a burst of the same size.
    pub fn per_second(requests: u32) -> Self {
        Self {
            capacity: requests,
            refill_per_second: f64::from(requests),
        }
    }

    /// Overrides the burst size.
    pub fn with_burst(mut self, capacity: u32) -> Self {
        self.capacity = capacity;
        self
    }

    /// Rejects empty buckets and rates that are zero, negative or not finite.
    pub fn validate(&self) -> Result<(), String> {
        if self.capacity == 0 {
            return Err("rate limit capacity must be at least 1".to_owned());
        }
        if !self.refill_per_second.is_finite() || self.refill_per_second <= 0.0 {
            return Err(format!(
                "rate limit refill rate must be positive, got {}",
                self.refill_per_second
            ));
        }
        Ok(())
    }
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

impl Bucket {
    fn refill(&mut self, now: Instant, config: &RateLimitConfig) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * config.refill_per_second).min(f64::from(config.capacity));
        self.last_refill = now;
    }

    fn try_take(&mut self) -> bool {
        if self.tokens + EPSILON >= 1.0 {
            self.tokens = (self.tokens - 1.0).max(0.0);
            true
        } else {
            false
        }
    }

    fn wait_time(&self, config: &RateLimitConfig) -> Duration {
        let missing = (1.0 - self.tokens).max(0.0);
        Duration::from_secs_f64(missing / config.refill_per_second).max(Duration::from_millis(1))
    }
}

/// Per-client token bucket.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    bucket: Mutex<Bucket>,
    label: String,
}

impl RateLimiter {
    /// Creates a full bucket, rejecting configs that fail [`RateLimitConfig::validate`].
    pub fn new(config: RateLimitConfig) -> Result<Self, BuildError> {
        Self::with_label(config, "default")
    }

    /// Creates a full bucket labelled for logs and metrics.
    pub fn with_label(
        config: RateLimitConfig,
        label: impl Into<String>,
    ) -> Result<Self, BuildError> {
        config.validate().map_err(BuildError::InvalidConfig)?;
        Ok(Self {
            config,
            bucket: Mutex::new(Bucket {
                tokens: f64::from(config.capacity),
                last_refill: Instant::now(),
            }),
            label: label.into(),
        })
    }

    /// The configuration in use.
    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Waits for a token and consumes it. Returns how long the caller waited.
    ///
    /// Dropping the future while it waits gives up the caller's place in the
    /// queue and leaves the bucket untouched.
    pub async fn acquire(&self) -> Duration {
        let start = Instant::now();
        let mut bucket = self.bucket.lock().await;
        loop {
            bucket.refill(Instant::now(), &self.config);
            if bucket.try_take() {
                let waited = start.elapsed();
                metrics::record_rate_limit_wait(&self.label, waited);
                return waited;
            }
            let wait = bucket.wait_time(&self.config);
            debug!(
                limiter = %self.label,
                wait_ms = wait.as_millis() as u64,
                "Rate limit reached, waiting for a token"
            );
            tokio::time::sleep(wait).await;
        }
    }

    /// Consumes a token if one is available right now.
    pub fn try_acquire(&self) -> bool {
        let Ok(mut bucket) = self.bucket.try_lock() else {
            return false;
        };
        bucket.refill(Instant::now(), &self.config);
        bucket.try_take()
    }

    /// Tokens currently available. `0.0` while another caller is waiting.
    pub fn available(&self) -> f64 {
        match self.bucket.try_lock() {
            Ok(mut bucket) => {
                bucket.refill(Instant::now(), &self.config);
                bucket.tokens
            }
            Err(_) => 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn validation() {
        assert!(RateLimitConfig::per_minute(60).validate().is_ok());
        assert!(RateLimitConfig::per_minute(60).with_burst(0).validate().is_err());
        assert!(RateLimitConfig::per_second(0).validate().is_err());
        let nan = RateLimitConfig {
            capacity: 1,
            refill_per_second: f64::NAN,
        };
        assert!(nan.validate().is_err());
    }

    #[test]
    fn invalid_config_is_rejected_by_constructor() {
        let infinite = RateLimitConfig {
            capacity: 2,
            refill_per_second: f64::INFINITY,
        };
        assert!(matches!(
            RateLimiter::new(infinite),
            Err(BuildError::InvalidConfig(_))
        ));
        assert!(RateLimiter::new(RateLimitConfig::per_second(0)).is_err());
        assert!(RateLimiter::with_label(RateLimitConfig::per_minute(6).with_burst(0), "epo").is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn burst_is_admitted_immediately() {
        let limiter = RateLimiter::new(RateLimitConfig::per_second(1).with_burst(3)).unwrap();
        let start = Instant::now();
        for _ in 0..3 {
            limiter.acquire().await;
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert!(!limiter.try_acquire());
    }

    #[tokio::test(start_paused = true)]
    async fn excess_requests_are_delayed_not_rejected() {
        let limiter = RateLimiter::new(RateLimitConfig::per_second(2).with_burst(2)).unwrap();
        let start = Instant::now();
        for _ in 0..6 {
            limiter.acquire().await;
        }
        // 2 from the burst, 4 more at 2/s.
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(1990), "{elapsed:?}");
        assert!(elapsed <= Duration::from_millis(2100), "{elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn sustained_rate_holds_over_any_window() {
        let limiter = Arc::new(RateLimiter::new(RateLimitConfig::per_second(5).with_burst(5)).unwrap());
        let start = Instant::now();
        let handles: Vec<_> = (0..40)
            .map(|_| {
                let limiter = limiter.clone();
                tokio::spawn(async move {
                    limiter.acquire().await;
                    Instant::now()
                })
            })
            .collect();
        let mut admitted = Vec::new();
        for handle in handles {
            admitted.push(handle.await.unwrap());
        }
        admitted.sort();

        // Any 2 s window admits at most burst + 2 s * rate.
        let window = Duration::from_secs(2);
        for (i, from) in admitted.iter().enumerate() {
            let in_window = admitted[i..]
                .iter()
                .take_while(|at| at.duration_since(*from) < window)
                .count();
            assert!(in_window <= 5 + 10, "{in_window} admissions in 2s");
        }
        assert!(start.elapsed() >= Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_waiter_does_not_consume_tokens() {
        let limiter = RateLimiter::new(RateLimitConfig::per_second(1).with_burst(1)).unwrap();
        limiter.acquire().await;

        let cancelled = tokio::time::timeout(Duration::from_millis(100), limiter.acquire()).await;
        assert!(cancelled.is_err());

        let waited = limiter.acquire().await;
        assert!(waited <= Duration::from_millis(901), "{waited:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn bucket_refills_to_capacity_only() {
        let limiter = RateLimiter::new(RateLimitConfig::per_second(10).with_burst(2)).unwrap();
        limiter.acquire().await;
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(limiter.available(), 2.0);
    }
}
