//! Cached responses with freshness metadata.
//!
//! A [`CacheEntry`] is one stored response: the body, the headers needed for
//! conditional revalidation, and two timestamps.
//!
//! - **Fresh** while `now < expires_at`: served without network access.
//! - **Stale** afterwards: never served as-is, but its validators
//!   (`ETag`, `Last-Modified`) can turn the next fetch into a conditional
//!   request. A `304 Not Modified` answer refreshes the entry in place.
//!
//! ```
//! use std::time::Duration;
//! use chrono::Utc;
//! use ipcache_core::{CacheEntry, FetchRequest, FetchResponse, Headers};
//!
//! let request = FetchRequest::get("https://ops.epo.org/3.2/rest-services/published-data");
//! let response = FetchResponse::new(200, Headers::new(), "<xml/>");
//! let now = Utc::now();
//! let entry = CacheEntry::from_response(
//!     request.fingerprint().unwrap(),
//!     request.normalized_url().unwrap(),
//!     &response,
//!     now,
//!     Duration::from_secs(3600),
//! );
//!
//! assert!(entry.is_fresh_at(now));
//! assert!(!entry.is_fresh_at(now + chrono::Duration::hours(2)));
//! ```

use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::{CacheStatus, FetchResponse, Fingerprint, Headers};

/// A stored response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    key: Fingerprint,
    url: String,
    status: u16,
    headers: Headers,
    body: Bytes,
    stored_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl CacheEntry {
    /// Creates an entry. `expires_at` is clamped to be no earlier than `stored_at`.
    pub fn new(
        key: Fingerprint,
        url: impl Into<String>,
        status: u16,
        headers: Headers,
        body: impl Into<Bytes>,
        stored_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            key,
            url: url.into(),
            status,
            headers,
            body: body.into(),
            stored_at,
            expires_at: expires_at.max(stored_at),
        }
    }

    /// Creates an entry from a network response stored at `stored_at` for `ttl`.
    pub fn from_response(
        key: Fingerprint,
        url: impl Into<String>,
        response: &FetchResponse,
        stored_at: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        Self::new(
            key,
            url,
            response.status,
            response.headers.clone(),
            response.body.clone(),
            stored_at,
            expiry(stored_at, ttl),
        )
    }

    /// Fingerprint of the request that produced this entry.
    #[inline]
    pub fn key(&self) -> &Fingerprint {
        &self.key
    }

    /// Normalized URL of the request that produced this entry.
    #[inline]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Stored HTTP status.
    #[inline]
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Stored response headers.
    #[inline]
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Stored response body.
    #[inline]
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// When the entry was written.
    #[inline]
    pub fn stored_at(&self) -> DateTime<Utc> {
        self.stored_at
    }

    /// When the entry stops being fresh.
    #[inline]
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Whether the entry may be served without revalidation at `now`.
    #[inline]
    pub fn is_fresh_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }

    /// Age of the entry at `now`.
    pub fn age_at(&self, now: DateTime<Utc>) -> TimeDelta {
        now.signed_duration_since(self.stored_at)
    }

    /// Strong or weak validator supplied by the origin.
    pub fn etag(&self) -> Option<&str> {
        self.headers.get("etag")
    }

    /// `Last-Modified` value supplied by the origin.
    pub fn last_modified(&self) -> Option<&str> {
        self.headers.get("last-modified")
    }

    /// Whether a conditional request can be built from this entry.
    pub fn has_validators(&self) -> bool {
        self.etag().is_some() || self.last_modified().is_some()
    }

    /// Refreshes the entry after a `304 Not Modified`.
    ///
    /// The body is kept; headers sent with the 304 replace the stored ones
    /// (that is how origins update validators and cache directives).
    pub fn revalidated(
        mut self,
        not_modified_headers: &Headers,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        self.headers.merge(not_modified_headers);
        self.stored_at = now;
        self.expires_at = expiry(now, ttl);
        self
    }

    /// Approximate encoded size in bytes.
    pub fn size(&self) -> usize {
        self.body.len() + self.headers.byte_size() + self.url.len() + self.key.as_str().len()
    }

    /// Builds the response handed to callers.
    pub fn to_response(&self, cache_status: CacheStatus) -> FetchResponse {
        FetchResponse {
            status: self.status,
            headers: self.headers.clone(),
            body: self.body.clone(),
            cache_status,
        }
    }

    /// Metadata used by stores to enumerate entries without loading bodies.
    pub fn meta(&self) -> EntryMeta {
        EntryMeta {
            key: self.key.clone(),
            url: self.url.clone(),
            stored_at: self.stored_at,
            expires_at: self.expires_at,
            size: self.size() as u64,
        }
    }
}

/// Entry metadata: everything enumeration operations (pattern invalidation,
/// expiry sweeps, statistics) need, without the body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMeta {
    /// Entry fingerprint.
    pub key: Fingerprint,
    /// Normalized request URL.
    pub url: String,
    /// Write timestamp.
    pub stored_at: DateTime<Utc>,
    /// Freshness deadline.
    pub expires_at: DateTime<Utc>,
    /// Approximate size in bytes.
    pub size: u64,
}

impl EntryMeta {
    /// Age at `now`.
    pub fn age_at(&self, now: DateTime<Utc>) -> TimeDelta {
        now.signed_duration_since(self.stored_at)
    }
}

fn expiry(stored_at: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(ttl)
        .ok()
        .and_then(|ttl| stored_at.checked_add_signed(ttl))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Method;

    fn fingerprint() -> Fingerprint {
        Fingerprint::compute(&Method::GET, "https://example.com/", None)
    }

    #[test]
    fn expires_at_never_precedes_stored_at() {
        let now = Utc::now();
        let entry = CacheEntry::new(
            fingerprint(),
            "https://example.com/",
            200,
            Headers::new(),
            "x",
            now,
            now - TimeDelta::hours(1),
        );
        assert_eq!(entry.expires_at(), entry.stored_at());
        assert!(!entry.is_fresh_at(now));
    }

    #[test]
    fn huge_ttl_saturates() {
        let now = Utc::now();
        let response = FetchResponse::new(200, Headers::new(), "x");
        let entry = CacheEntry::from_response(
            fingerprint(),
            "https://example.com/",
            &response,
            now,
            Duration::MAX,
        );
        assert_eq!(entry.expires_at(), DateTime::<Utc>::MAX_UTC);
    }

    #[test]
    fn revalidation_keeps_body_and_updates_validators() {
        let then = Utc::now() - TimeDelta::hours(3);
        let headers: Headers = [("ETag", "\"v1\""), ("Content-Type", "application/xml")]
            .into_iter()
            .collect();
        let response = FetchResponse::new(200, headers, "<doc/>");
        let entry = CacheEntry::from_response(
            fingerprint(),
            "https://example.com/",
            &response,
            then,
            Duration::from_secs(60),
        );
        assert!(entry.has_validators());

        let now = Utc::now();
        let refreshed = entry.revalidated(
            &[("etag", "\"v2\"")].into_iter().collect(),
            now,
            Duration::from_secs(60),
        );
        assert_eq!(refreshed.body().as_ref(), b"<doc/>");
        assert_eq!(refreshed.etag(), Some("\"v2\""));
        assert_eq!(refreshed.headers().get("content-type"), Some("application/xml"));
        assert!(refreshed.is_fresh_at(now));
    }
}
