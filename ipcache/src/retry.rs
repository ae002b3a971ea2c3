//! Failure classification and backoff.
//!
//! A fetch is attempted once and then retried at most
//! [`RetryConfig::max_retries`] times. Only retryable failures
//! ([`FetchError::is_retryable`]) are retried:
//!
//! | outcome                                   | decision  |
//! |-------------------------------------------|-----------|
//! | HTTP 429, HTTP 5xx                        | retry     |
//! | timeout, connection failure or reset      | retry     |
//! | other 4xx, malformed response, bad auth   | terminal  |
//!
//! The n-th retry waits `base * 2^(n-1) * U(0.5, 1.5)`, capped at
//! `max_delay`. Within one fetch the computed delays never decrease. A
//! `Retry-After` header replaces the computed delay.

use std::future::Future;
use std::time::{Duration, SystemTime};

use chrono::DateTime;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::FetchError;

const fn default_max_retries() -> u32 {
    3
}

const fn default_base_delay() -> Duration {
    Duration::from_secs(1)
}

const fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

const fn default_max_retry_after() -> Duration {
    Duration::from_secs(300)
}

/// Retry settings of one client.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetryConfig {
    /// Additional attempts after the first one.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Delay before the first retry, before jitter (e.g. "1s", "250ms").
    #[serde(default = "default_base_delay", with = "humantime_serde")]
    pub base_delay: Duration,
    /// Cap on computed delays.
    #[serde(default = "default_max_delay", with = "humantime_serde")]
    pub max_delay: Duration,
    /// Cap on server-directed `Retry-After` delays.
    #[serde(default = "default_max_retry_after", with = "humantime_serde")]
    pub max_retry_after: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay: default_base_delay(),
            max_delay: default_max_delay(),
            max_retry_after: default_max_retry_after(),
        }
    }
}

impl RetryConfig {
    /// Never retry.
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Sets the number of retries.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the base delay.
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Sets the cap on computed delays.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), String> {
        if self.base_delay > self.max_delay {
            return Err(format!(
                "retry base_delay ({:?}) exceeds max_delay ({:?})",
                self.base_delay, self.max_delay
            ));
        }
        Ok(())
    }
}

/// Decides whether and when to retry.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    /// Creates a policy from its configuration.
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// The configuration in use.
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Fresh backoff state for one fetch.
    pub fn backoff(&self) -> Backoff {
        Backoff {
            config: self.config,
            retries: 0,
            last_delay: Duration::ZERO,
        }
    }

    /// Runs `operation` until it succeeds, fails terminally or retries run out.
    ///
    /// Returns the last error on exhaustion.
    pub async fn run<F, Fut, T>(&self, mut operation: F) -> Result<T, FetchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let mut backoff = self.backoff();
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(error) => match backoff.next_delay(&error) {
                    Some(delay) => {
                        debug!(
                            error = %error,
                            retry = backoff.retries(),
                            delay_ms = delay.as_millis() as u64,
                            "Retrying after failure"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => return Err(error),
                },
            }
        }
    }
}

/// Per-fetch retry state.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: RetryConfig,
    retries: u32,
    last_delay: Duration,
}

impl Backoff {
    /// Delay before retrying after `error`, or `None` if the fetch must give up.
    pub fn next_delay(&mut self, error: &FetchError) -> Option<Duration> {
        if !error.is_retryable() || self.retries >= self.config.max_retries {
            return None;
        }
        self.retries += 1;

        let computed = self.computed_delay().max(self.last_delay);
        self.last_delay = computed;

        Some(match error.retry_after() {
            Some(server) => server.min(self.config.max_retry_after),
            None => computed,
        })
    }

    /// Retries granted so far.
    pub fn retries(&self) -> u32 {
        self.retries
    }

    fn computed_delay(&self) -> Duration {
        let exponent = self.retries.saturating_sub(1).min(62) as i32;
        let jitter: f64 = rand::thread_rng().gen_range(0.5..1.5);
        let secs = self.config.base_delay.as_secs_f64() * 2f64.powi(exponent) * jitter;
        Duration::from_secs_f64(secs.min(self.config.max_delay.as_secs_f64()))
    }
}

/// Parses a `Retry-After` value: delta-seconds or an HTTP-date.
///
/// Dates in the past yield a zero delay.
pub fn parse_retry_after(value: &str, now: SystemTime) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let date: SystemTime = DateTime::parse_from_rfc2822(value).ok()?.into();
    Some(date.duration_since(now).unwrap_or(Duration::ZERO))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportErrorKind;

    fn throttled(retry_after: Option<Duration>) -> FetchError {
        FetchError::RateLimitExceeded {
            retry_after,
            body: String::new(),
        }
    }

    #[test]
    fn delays_are_non_decreasing_and_capped() {
        let config = RetryConfig::default()
            .with_max_retries(10)
            .with_base_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_secs(2));
        for _ in 0..50 {
            let mut backoff = RetryPolicy::new(config).backoff();
            let mut previous = Duration::ZERO;
            while let Some(delay) = backoff.next_delay(&throttled(None)) {
                assert!(delay >= previous, "{delay:?} < {previous:?}");
                assert!(delay <= Duration::from_secs(2));
                previous = delay;
            }
            assert_eq!(backoff.retries(), 10);
        }
    }

    #[test]
    fn first_delay_is_jittered_around_base() {
        let mut backoff = RetryPolicy::default().backoff();
        let delay = backoff
            .next_delay(&FetchError::transport(TransportErrorKind::Timeout, "t"))
            .unwrap();
        assert!(delay >= Duration::from_millis(500) && delay < Duration::from_millis(1500));
    }

    #[test]
    fn terminal_errors_are_not_retried() {
        let mut backoff = RetryPolicy::default().backoff();
        let not_found = FetchError::Client {
            status: 404,
            body: String::new(),
        };
        assert_eq!(backoff.next_delay(&not_found), None);
        assert_eq!(backoff.next_delay(&FetchError::Authentication("x".into())), None);
        assert_eq!(backoff.retries(), 0);
    }

    #[test]
    fn retries_are_bounded() {
        let mut backoff = RetryPolicy::new(RetryConfig::default().with_max_retries(2)).backoff();
        assert!(backoff.next_delay(&throttled(None)).is_some());
        assert!(backoff.next_delay(&throttled(None)).is_some());
        assert!(backoff.next_delay(&throttled(None)).is_none());
    }

    #[test]
    fn retry_after_overrides_computed_delay() {
        let mut backoff = RetryPolicy::default().backoff();
        assert_eq!(
            backoff.next_delay(&throttled(Some(Duration::from_secs(12)))),
            Some(Duration::from_secs(12))
        );
        assert_eq!(
            backoff.next_delay(&throttled(Some(Duration::from_secs(86_400)))),
            Some(Duration::from_secs(300))
        );
    }

    #[test]
    fn retry_after_formats() {
        let now = SystemTime::UNIX_EPOCH + Duration::from_secs(784_111_777);
        assert_eq!(parse_retry_after(" 120 ", now), Some(Duration::from_secs(120)));
        // 1994-11-06T08:49:37Z is 784111777 seconds after the epoch.
        assert_eq!(
            parse_retry_after("Sun, 06 Nov 1994 08:50:37 GMT", now),
            Some(Duration::from_secs(60))
        );
        assert_eq!(
            parse_retry_after("Sun, 06 Nov 1994 08:00:00 GMT", now),
            Some(Duration::ZERO)
        );
        assert_eq!(parse_retry_after("soon", now), None);
    }

    #[tokio::test(start_paused = true)]
    async fn run_returns_last_error_on_exhaustion() {
        let policy = RetryPolicy::new(RetryConfig::default().with_max_retries(2));
        let mut attempts: u16 = 0;
        let result: Result<(), _> = policy
            .run(|| {
                attempts += 1;
                let status = 500 + attempts;
                async move {
                    Err(FetchError::Server {
                        status,
                        retry_after: None,
                        body: String::new(),
                    })
                }
            })
            .await;
        assert_eq!(attempts, 3);
        assert_eq!(result.unwrap_err().status(), Some(503));
    }
}
