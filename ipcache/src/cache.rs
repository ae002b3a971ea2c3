//! Client-facing cache over a [`CacheStore`].
//!
//! On the fetch path the cache never fails: read errors are logged and
//! treated as a miss, write errors are logged and the write is dropped.
//! Management operations ([`Cache::clear_all`], [`Cache::invalidate`], ...)
//! do report store errors.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use ipcache_backend::metrics::{self as store_metrics, Timer};
use ipcache_backend::{CacheStats, CacheStore, StatsCounter, StoreError};
use ipcache_core::{CacheEntry, CacheStatus, EntryMeta, FetchResponse, Fingerprint, Headers};
use regex::Regex;
use tracing::{debug, warn};

use crate::error::CacheError;
use crate::policy::{Freshness, TtlPolicy};

/// Result of a cache lookup on the fetch path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    /// Servable without network access.
    Fresh(CacheEntry),
    /// Expired, but carries validators for a conditional request.
    Stale(CacheEntry),
    /// Nothing usable.
    Miss,
}

/// Per-client cache: a store, hit/miss counters and the TTL policy.
///
/// Cloning is cheap; clones share the store and the counters.
#[derive(Clone)]
pub struct Cache {
    store: Arc<dyn CacheStore>,
    counter: Arc<StatsCounter>,
    ttl: TtlPolicy,
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("store", &self.store.label())
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl Cache {
    /// Wraps `store`.
    pub fn new<S>(store: S, ttl: TtlPolicy) -> Self
    where
        S: CacheStore + 'static,
    {
        Self {
            store: Arc::new(store),
            counter: Arc::new(StatsCounter::new()),
            ttl,
        }
    }

    /// The underlying store.
    pub fn store(&self) -> &dyn CacheStore {
        self.store.as_ref()
    }

    /// The TTL policy applied to new entries.
    pub fn ttl_policy(&self) -> &TtlPolicy {
        &self.ttl
    }

    /// Reads an entry, fresh or not. Store failures read as absent.
    async fn read(&self, key: &Fingerprint) -> Option<CacheEntry> {
        let label = self.store.label();
        let timer = Timer::new();
        match self.store.read(key).await {
            Ok(entry) => {
                store_metrics::record_read(label.as_str(), timer.elapsed());
                entry
            }
            Err(error) => {
                store_metrics::record_read_error(label.as_str());
                warn!(store = %label, key = %key.short(), %error, "Cache read failed, treating as miss");
                if matches!(error, StoreError::Corrupt(_)) {
                    self.discard(key).await;
                }
                None
            }
        }
    }

    async fn discard(&self, key: &Fingerprint) {
        if let Err(error) = self.store.remove(key).await {
            warn!(store = %self.store.label(), key = %key.short(), %error, "Failed to drop corrupt cache entry");
        }
    }

    /// Fresh entry for `key`, or `None` when missing, expired or unreadable.
    pub async fn get(&self, key: &Fingerprint) -> Option<CacheEntry> {
        self.read(key)
            .await
            .filter(|entry| entry.is_fresh_at(Utc::now()))
    }

    /// Like [`get`](Self::get), but keeps expired entries that can be revalidated.
    pub async fn lookup(&self, key: &Fingerprint) -> Lookup {
        match self.read(key).await {
            Some(entry) if entry.is_fresh_at(Utc::now()) => Lookup::Fresh(entry),
            Some(entry) if entry.has_validators() => Lookup::Stale(entry),
            _ => Lookup::Miss,
        }
    }

    /// Upserts an entry. Failures are logged and the write is dropped.
    pub async fn put(&self, entry: CacheEntry) {
        let label = self.store.label();
        let key = entry.key().clone();
        let timer = Timer::new();
        match self.store.write(entry).await {
            Ok(()) => store_metrics::record_write(label.as_str(), timer.elapsed()),
            Err(error) => {
                store_metrics::record_write_error(label.as_str());
                warn!(store = %label, key = %key.short(), %error, "Cache write failed, dropping entry");
            }
        }
    }

    /// Stores a fresh network response under the TTL policy.
    ///
    /// Returns the stored entry, or `None` if the response must not be stored.
    pub async fn store_response(
        &self,
        key: Fingerprint,
        url: &str,
        response: &FetchResponse,
        now: DateTime<Utc>,
    ) -> Option<CacheEntry> {
        let Freshness::Store(ttl) = self.ttl.freshness(&response.headers, now) else {
            debug!(key = %key.short(), "Response marked no-store, not caching");
            return None;
        };
        let entry = CacheEntry::from_response(key, url, response, now, ttl);
        if ttl.is_zero() && !entry.has_validators() {
            return None;
        }
        self.put(entry.clone()).await;
        Some(entry)
    }

    /// Refreshes a stale entry after `304 Not Modified` and returns it.
    pub async fn revalidate(
        &self,
        stale: CacheEntry,
        not_modified: &Headers,
        now: DateTime<Utc>,
    ) -> CacheEntry {
        let mut merged = stale.headers().clone();
        merged.merge(not_modified);
        match self.ttl.freshness(&merged, now) {
            Freshness::Store(ttl) => {
                let entry = stale.revalidated(not_modified, now, ttl);
                self.put(entry.clone()).await;
                entry
            }
            Freshness::DoNotStore => {
                self.discard(stale.key()).await;
                stale.revalidated(not_modified, now, Duration::ZERO)
            }
        }
    }

    /// Counts a lookup outcome in the hit/miss statistics.
    pub fn record(&self, status: CacheStatus) {
        match status {
            CacheStatus::Hit | CacheStatus::Revalidated => self.counter.record_hit(),
            CacheStatus::Miss => self.counter.record_miss(),
            CacheStatus::Bypass => {}
        }
    }

    /// Removes every entry. Returns how many were removed.
    pub async fn clear_all(&self) -> Result<u64, CacheError> {
        let removed = self.store.clear().await?;
        debug!(store = %self.store.label(), removed, "Cleared cache");
        Ok(removed)
    }

    /// Removes entries older than `max_age` (default: the client TTL, else 24 hours).
    pub async fn clear_expired(&self, max_age: Option<Duration>) -> Result<u64, CacheError> {
        let max_age = max_age.unwrap_or_else(|| self.ttl.fallback_ttl());
        let now = Utc::now();
        let max_age = TimeDelta::from_std(max_age).unwrap_or(TimeDelta::MAX);
        let removed = self
            .store
            .remove_matching(&|meta: &EntryMeta| meta.age_at(now) > max_age)
            .await?;
        debug!(store = %self.store.label(), removed, "Cleared expired cache entries");
        Ok(removed)
    }

    /// Removes entries whose normalized URL matches the regular expression `pattern`.
    pub async fn invalidate(&self, pattern: &str) -> Result<u64, CacheError> {
        let regex = Regex::new(pattern)?;
        let removed = self
            .store
            .remove_matching(&|meta: &EntryMeta| regex.is_match(&meta.url))
            .await?;
        debug!(store = %self.store.label(), pattern, removed, "Invalidated cache entries");
        Ok(removed)
    }

    /// Usage and storage statistics.
    pub async fn stats(&self) -> Result<CacheStats, CacheError> {
        Ok(CacheStats {
            hits: self.counter.hits(),
            misses: self.counter.misses(),
            entry_count: self.store.len().await?,
            size_bytes: self.store.size_bytes().await?,
            location: self.store.location().map(|path| path.to_path_buf()),
        })
    }

    /// Forces pending writes to durable storage.
    pub async fn flush(&self) -> Result<(), CacheError> {
        self.store.flush().await?;
        Ok(())
    }
}
