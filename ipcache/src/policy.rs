//! How long a response stays fresh.
//!
//! Precedence, applied to every source alike:
//!
//! 1. Response directives. `Cache-Control: no-store` is not stored,
//!    `max-age` / `s-maxage` set the TTL, `no-cache` stores the entry already
//!    stale so it is always revalidated. Without `Cache-Control`, an
//!    `Expires` header is taken relative to `Date`.
//! 2. The client's configured `ttl`.
//! 3. [`DEFAULT_TTL`], 24 hours.

use std::time::Duration;

use chrono::{DateTime, Utc};
use ipcache_core::Headers;

/// TTL applied when neither the response nor the client specify one.
pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Parsed `Cache-Control` response directives the cache acts upon.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheDirectives {
    /// `no-store`
    pub no_store: bool,
    /// `no-cache`
    pub no_cache: bool,
    /// `max-age=N`
    pub max_age: Option<Duration>,
    /// `s-maxage=N`
    pub s_maxage: Option<Duration>,
}

impl CacheDirectives {
    /// Parses a `Cache-Control` value. Unknown or malformed directives are ignored.
    pub fn parse(value: &str) -> Self {
        let mut directives = Self::default();
        for directive in value.split(',') {
            let (name, argument) = match directive.split_once('=') {
                Some((name, argument)) => (name.trim(), Some(argument.trim().trim_matches('"'))),
                None => (directive.trim(), None),
            };
            let seconds = || {
                argument
                    .and_then(|a| a.parse::<u64>().ok())
                    .map(Duration::from_secs)
            };
            match name.to_ascii_lowercase().as_str() {
                "no-store" => directives.no_store = true,
                "no-cache" => directives.no_cache = true,
                "max-age" => directives.max_age = seconds(),
                "s-maxage" => directives.s_maxage = seconds(),
                _ => {}
            }
        }
        directives
    }

    /// Explicit lifetime, preferring `max-age` over `s-maxage`.
    pub fn lifetime(&self) -> Option<Duration> {
        self.max_age.or(self.s_maxage)
    }
}

/// Storage decision for one response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Do not write the response to the cache.
    DoNotStore,
    /// Store with this TTL. A zero TTL stores the entry already stale.
    Store(Duration),
}

/// Resolves the TTL of responses for one client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TtlPolicy {
    client_ttl: Option<Duration>,
}

impl TtlPolicy {
    /// `client_ttl` is the explicit per-client override, if any.
    pub fn new(client_ttl: Option<Duration>) -> Self {
        Self { client_ttl }
    }

    /// The explicit per-client TTL.
    pub fn client_ttl(&self) -> Option<Duration> {
        self.client_ttl
    }

    /// TTL used when the response does not specify one.
    pub fn fallback_ttl(&self) -> Duration {
        self.client_ttl.unwrap_or(DEFAULT_TTL)
    }

    /// Decides whether and for how long to store a response with `headers`.
    pub fn freshness(&self, headers: &Headers, now: DateTime<Utc>) -> Freshness {
        if let Some(value) = headers.get("cache-control") {
            let directives = CacheDirectives::parse(value);
            if directives.no_store {
                return Freshness::DoNotStore;
            }
            if directives.no_cache {
                return Freshness::Store(Duration::ZERO);
            }
            if let Some(lifetime) = directives.lifetime() {
                return Freshness::Store(lifetime);
            }
        }

        if let Some(expires) = headers.get("expires") {
            return Freshness::Store(expires_lifetime(expires, headers.get("date"), now));
        }

        Freshness::Store(self.fallback_ttl())
    }
}

/// Lifetime implied by `Expires`, relative to `Date` (or `now` without one).
/// An unparseable `Expires` means "already expired".
fn expires_lifetime(expires: &str, date: Option<&str>, now: DateTime<Utc>) -> Duration {
    let Some(expires) = parse_http_date(expires) else {
        return Duration::ZERO;
    };
    let base = date.and_then(parse_http_date).unwrap_or(now);
    (expires - base).to_std().unwrap_or(Duration::ZERO)
}

fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value.trim())
        .ok()
        .map(|date| date.with_timezone(&Utc))
}
