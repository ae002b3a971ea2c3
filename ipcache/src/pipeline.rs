//! The request pipeline.
//!
//! For one logical fetch:
//!
//! 1. Fingerprint the request.
//! 2. With caching enabled and a cacheable method, serve a fresh entry
//!    without touching the network or the rate limiter.
//! 3. Join an identical fetch already in flight, if any.
//! 4. Otherwise lead: obtain a credential, take a rate-limiter token, send.
//! 5. Retry failures under the [`RetryPolicy`], re-acquiring the credential
//!    and a token per attempt.
//! 6. Store the response, release the in-flight key and hand the outcome to
//!    every waiter.
//!
//! An expired entry carrying validators turns step 4 into a conditional
//! request; a `304 Not Modified` refreshes the entry and serves its body as
//! [`CacheStatus::Revalidated`].

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use chrono::Utc;
use ipcache_core::{CacheEntry, CacheStatus, FetchRequest, FetchResponse, Fingerprint, Headers};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::cache::{Cache, Lookup};
use crate::concurrency::SingleFlight;
use crate::credential::{Credential, CredentialConfig, CredentialManager};
use crate::error::{FetchError, TransportErrorKind};
use crate::metrics;
use crate::ratelimit::RateLimiter;
use crate::retry::RetryPolicy;
use crate::transport::Transport;

const NOT_MODIFIED: u16 = 304;
const UNAUTHORIZED: u16 = 401;

type Outcome = Result<FetchResponse, FetchError>;

struct Inner {
    name: String,
    transport: Arc<dyn Transport>,
    cache: Option<Cache>,
    limiter: Option<RateLimiter>,
    credentials: CredentialManager,
    retry: RetryPolicy,
    default_headers: Headers,
    timeout: Option<Duration>,
}

/// Cache-aware, rate-limited, retrying fetch path of one client.
///
/// Cloning is cheap; clones share the cache, limiter, credentials and the
/// in-flight registry.
#[derive(Clone)]
pub struct RequestPipeline {
    inner: Arc<Inner>,
    flight: SingleFlight<Fingerprint, Outcome>,
}

impl fmt::Debug for RequestPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestPipeline")
            .field("name", &self.inner.name)
            .field("cache", &self.inner.cache)
            .field("limiter", &self.inner.limiter)
            .field("credentials", &self.inner.credentials)
            .field("retry", &self.inner.retry)
            .field("in_flight", &self.flight.len())
            .finish()
    }
}

/// Assembles a [`RequestPipeline`].
pub struct PipelineBuilder {
    name: String,
    transport: Arc<dyn Transport>,
    cache: Option<Cache>,
    limiter: Option<RateLimiter>,
    credentials: Option<CredentialManager>,
    retry: RetryPolicy,
    default_headers: Headers,
    timeout: Option<Duration>,
}

impl PipelineBuilder {
    /// Enables caching through `cache`.
    pub fn cache(mut self, cache: Cache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Throttles network attempts through `limiter`.
    pub fn rate_limiter(mut self, limiter: RateLimiter) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// Attaches credentials to every attempt.
    pub fn credentials(mut self, credentials: CredentialManager) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Retry policy for failed attempts.
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Headers added to every request that does not set them itself.
    pub fn default_headers(mut self, headers: Headers) -> Self {
        self.default_headers = headers;
        self
    }

    /// Deadline for a single attempt.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Builds the pipeline.
    pub fn build(self) -> RequestPipeline {
        let credentials = self.credentials.unwrap_or_else(|| {
            CredentialManager::new(
                CredentialConfig::None,
                Arc::clone(&self.transport),
                self.retry,
            )
        });
        RequestPipeline {
            inner: Arc::new(Inner {
                name: self.name,
                transport: self.transport,
                cache: self.cache,
                limiter: self.limiter,
                credentials,
                retry: self.retry,
                default_headers: self.default_headers,
                timeout: self.timeout,
            }),
            flight: SingleFlight::new("fetch"),
        }
    }
}

impl RequestPipeline {
    /// Starts a pipeline named `name` sending through `transport`.
    ///
    /// Without further configuration it has no cache, no rate limit, no
    /// credentials and the default retry policy.
    pub fn builder(name: impl Into<String>, transport: impl Transport + 'static) -> PipelineBuilder {
        PipelineBuilder {
            name: name.into(),
            transport: Arc::new(transport),
            cache: None,
            limiter: None,
            credentials: None,
            retry: RetryPolicy::default(),
            default_headers: Headers::new(),
            timeout: None,
        }
    }

    /// Client name used in logs and metrics.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The cache, when caching is enabled.
    pub fn cache(&self) -> Option<&Cache> {
        self.inner.cache.as_ref()
    }

    /// The credential manager.
    pub fn credentials(&self) -> &CredentialManager {
        &self.inner.credentials
    }

    /// The rate limiter, if one is configured.
    pub fn rate_limiter(&self) -> Option<&RateLimiter> {
        self.inner.limiter.as_ref()
    }

    /// Number of distinct fetches currently on the network.
    pub fn in_flight(&self) -> usize {
        self.flight.len()
    }

    /// Executes one logical fetch.
    pub async fn execute(&self, request: FetchRequest) -> Result<FetchResponse, FetchError> {
        let request = self.inner.prepare(request);

        let cache = match &self.inner.cache {
            Some(cache) if request.is_cacheable_method() => cache.clone(),
            _ => {
                let response = self.inner.send_with_retry(&request).await?;
                return Ok(response.with_cache_status(CacheStatus::Bypass));
            }
        };

        let key = request.fingerprint()?;
        let url = request.normalized_url()?;

        let stale = match cache.lookup(&key).await {
            Lookup::Fresh(entry) => {
                debug!(client = %self.inner.name, key = %key.short(), %url, "Cache hit");
                self.record(&cache, CacheStatus::Hit);
                return Ok(entry.to_response(CacheStatus::Hit));
            }
            Lookup::Stale(entry) => {
                debug!(client = %self.inner.name, key = %key.short(), %url, "Cache entry stale, revalidating");
                Some(entry)
            }
            Lookup::Miss => {
                debug!(client = %self.inner.name, key = %key.short(), %url, "Cache miss");
                None
            }
        };

        let inner = Arc::clone(&self.inner);
        let leader_cache = cache.clone();
        let leader_key = key.clone();
        let outcome = self
            .flight
            .run(key, async move {
                inner
                    .fetch_and_store(&leader_cache, leader_key, url, request, stale)
                    .await
            })
            .await
            .unwrap_or(Err(FetchError::Aborted));

        match &outcome {
            Ok(response) => self.record(&cache, response.cache_status),
            Err(_) => self.record(&cache, CacheStatus::Miss),
        }
        outcome
    }

    fn record(&self, cache: &Cache, status: CacheStatus) {
        cache.record(status);
        metrics::record_cache_status(&self.inner.name, status);
    }
}

impl Inner {
    fn prepare(&self, mut request: FetchRequest) -> FetchRequest {
        let headers = request.headers_mut();
        for (name, value) in self.default_headers.iter() {
            headers.insert_if_absent(name, value);
        }
        request
    }

    /// Leader side of a cacheable fetch.
    async fn fetch_and_store(
        &self,
        cache: &Cache,
        key: Fingerprint,
        url: String,
        mut request: FetchRequest,
        stale: Option<CacheEntry>,
    ) -> Outcome {
        if let Some(entry) = &stale {
            let headers = request.headers_mut();
            if let Some(etag) = entry.etag() {
                headers.insert_if_absent("if-none-match", etag);
            }
            if let Some(last_modified) = entry.last_modified() {
                headers.insert_if_absent("if-modified-since", last_modified);
            }
        }

        let response = self.send_with_retry(&request).await?;
        let now = Utc::now();

        if response.status == NOT_MODIFIED
            && let Some(stale) = stale
        {
            let entry = cache.revalidate(stale, &response.headers, now).await;
            debug!(client = %self.name, key = %key.short(), "Entry revalidated, serving cached body");
            return Ok(entry.to_response(CacheStatus::Revalidated));
        }

        if response.is_success() {
            cache.store_response(key, &url, &response, now).await;
        }
        Ok(response.with_cache_status(CacheStatus::Miss))
    }

    /// Steps 4 and 5: attempts until success, a terminal error or exhaustion.
    async fn send_with_retry(&self, request: &FetchRequest) -> Outcome {
        let mut backoff = self.retry.backoff();
        let mut reauthenticated = false;
        loop {
            let credential = self.credentials.credential().await;
            let error = match &credential {
                Ok(credential) => match self.attempt(request, credential).await {
                    Ok(response) => return Ok(response),
                    Err(error) => error,
                },
                Err(error) => error.clone(),
            };

            if error.status() == Some(UNAUTHORIZED)
                && !reauthenticated
                && let Ok(Credential::Bearer(rejected)) = &credential
            {
                info!(client = %self.name, "Access token rejected, re-authenticating");
                self.credentials.invalidate(rejected);
                reauthenticated = true;
                continue;
            }

            match backoff.next_delay(&error) {
                Some(delay) => {
                    warn!(
                        client = %self.name,
                        url = request.url(),
                        %error,
                        retry = backoff.retries(),
                        delay_ms = delay.as_millis() as u64,
                        "Request failed, retrying"
                    );
                    metrics::record_retry(&self.name, error.kind());
                    tokio::time::sleep(delay).await;
                }
                None => {
                    debug!(client = %self.name, url = request.url(), %error, "Request failed");
                    metrics::record_failure(&self.name, error.kind());
                    return Err(error);
                }
            }
        }
    }

    /// One network attempt carrying `credential` and a rate-limiter token.
    async fn attempt(&self, request: &FetchRequest, credential: &Credential) -> Outcome {
        let mut outgoing = request.clone();
        credential.apply(outgoing.headers_mut());

        if let Some(limiter) = &self.limiter {
            limiter.acquire().await;
        }

        let started = Instant::now();
        let sent = self.transport.send(outgoing);
        let result = match self.timeout {
            Some(timeout) => match tokio::time::timeout(timeout, sent).await {
                Ok(result) => result,
                Err(_) => Err(FetchError::transport(
                    TransportErrorKind::Timeout,
                    format!("no response within {timeout:?}"),
                )),
            },
            None => sent.await,
        };
        metrics::record_upstream(
            &self.name,
            result.as_ref().ok().map(|response| response.status),
            started.elapsed(),
        );

        let response = result?;
        if response.is_success() || response.status == NOT_MODIFIED {
            Ok(response)
        } else {
            Err(FetchError::from_response(&response, SystemTime::now()))
        }
    }
}
