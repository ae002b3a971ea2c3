use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use ipcache_core::{CacheEntry, EntryMeta, Fingerprint, StoreLabel};

use crate::StoreError;

pub type StoreResult<T> = Result<T, StoreError>;

/// Predicate over entry metadata used by bulk removal.
pub type EntryFilter<'a> = &'a (dyn Fn(&EntryMeta) -> bool + Send + Sync);

/// Raw key → entry storage owned by exactly one client.
///
/// Implementations do not interpret freshness: `read` returns expired
/// entries too, because the pipeline needs their validators for conditional
/// revalidation. Writes to the same key must be serialized (last write
/// wins); writes to different keys should not block each other.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Reads an entry, fresh or not.
    async fn read(&self, key: &Fingerprint) -> StoreResult<Option<CacheEntry>>;

    /// Upserts an entry under `entry.key()`.
    async fn write(&self, entry: CacheEntry) -> StoreResult<()>;

    /// Removes one entry. Returns whether it existed.
    async fn remove(&self, key: &Fingerprint) -> StoreResult<bool>;

    /// Removes every entry whose metadata satisfies `filter`.
    /// Returns the number of entries removed.
    async fn remove_matching(&self, filter: EntryFilter<'_>) -> StoreResult<u64>;

    /// Removes every entry. Returns the number of entries removed.
    async fn clear(&self) -> StoreResult<u64> {
        self.remove_matching(&|_: &EntryMeta| true).await
    }

    /// Number of stored entries.
    async fn len(&self) -> StoreResult<u64>;

    /// Approximate number of bytes held by the store.
    async fn size_bytes(&self) -> StoreResult<u64>;

    /// Forces pending writes to durable storage. No-op for volatile stores.
    async fn flush(&self) -> StoreResult<()> {
        Ok(())
    }

    /// Identifies this store in logs and metrics.
    fn label(&self) -> StoreLabel {
        StoreLabel::new("store")
    }

    /// Backing file, for durable stores.
    fn location(&self) -> Option<&Path> {
        None
    }
}

#[async_trait]
impl<T> CacheStore for Arc<T>
where
    T: CacheStore + ?Sized,
{
    async fn read(&self, key: &Fingerprint) -> StoreResult<Option<CacheEntry>> {
        (**self).read(key).await
    }

    async fn write(&self, entry: CacheEntry) -> StoreResult<()> {
        (**self).write(entry).await
    }

    async fn remove(&self, key: &Fingerprint) -> StoreResult<bool> {
        (**self).remove(key).await
    }

    async fn remove_matching(&self, filter: EntryFilter<'_>) -> StoreResult<u64> {
        (**self).remove_matching(filter).await
    }

    async fn clear(&self) -> StoreResult<u64> {
        (**self).clear().await
    }

    async fn len(&self) -> StoreResult<u64> {
        (**self).len().await
    }

    async fn size_bytes(&self) -> StoreResult<u64> {
        (**self).size_bytes().await
    }

    async fn flush(&self) -> StoreResult<()> {
        (**self).flush().await
    }

    fn label(&self) -> StoreLabel {
        (**self).label()
    }

    fn location(&self) -> Option<&Path> {
        (**self).location()
    }
}

#[async_trait]
impl CacheStore for Box<dyn CacheStore> {
    async fn read(&self, key: &Fingerprint) -> StoreResult<Option<CacheEntry>> {
        (**self).read(key).await
    }

    async fn write(&self, entry: CacheEntry) -> StoreResult<()> {
        (**self).write(entry).await
    }

    async fn remove(&self, key: &Fingerprint) -> StoreResult<bool> {
        (**self).remove(key).await
    }

    async fn remove_matching(&self, filter: EntryFilter<'_>) -> StoreResult<u64> {
        (**self).remove_matching(filter).await
    }

    async fn clear(&self) -> StoreResult<u64> {
        (**self).clear().await
    }

    async fn len(&self) -> StoreResult<u64> {
        (**self).len().await
    }

    async fn size_bytes(&self) -> StoreResult<u64> {
        (**self).size_bytes().await
    }

    async fn flush(&self) -> StoreResult<()> {
        (**self).flush().await
    }

    fn label(&self) -> StoreLabel {
        (**self).label()
    }

    fn location(&self) -> Option<&Path> {
        (**self).location()
    }
}
