use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use ipcache_core::{CacheEntry, Fingerprint, StoreLabel};

use crate::{CacheStore, EntryFilter, StoreResult};

/// Volatile store backed by a [`DashMap`].
///
/// Entries are lost when the last clone is dropped. Same-key writes are
/// serialized by the map's shard locks.
///
/// Cloning is cheap; clones share the same map.
#[derive(Clone, Debug)]
pub struct MemoryStore {
    entries: Arc<DashMap<Fingerprint, CacheEntry>>,
    label: StoreLabel,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Creates an empty store labelled `memory`.
    pub fn new() -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            label: StoreLabel::memory(),
        }
    }

    /// Creates an empty store with a custom label.
    pub fn with_label(label: impl Into<StoreLabel>) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            label: label.into(),
        }
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn read(&self, key: &Fingerprint) -> StoreResult<Option<CacheEntry>> {
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    async fn write(&self, entry: CacheEntry) -> StoreResult<()> {
        self.entries.insert(entry.key().clone(), entry);
        Ok(())
    }

    async fn remove(&self, key: &Fingerprint) -> StoreResult<bool> {
        Ok(self.entries.remove(key).is_some())
    }

    async fn remove_matching(&self, filter: EntryFilter<'_>) -> StoreResult<u64> {
        let mut removed = 0;
        self.entries.retain(|_, entry| {
            if filter(&entry.meta()) {
                removed += 1;
                false
            } else {
                true
            }
        });
        Ok(removed)
    }

    async fn len(&self) -> StoreResult<u64> {
        Ok(self.entries.len() as u64)
    }

    async fn size_bytes(&self) -> StoreResult<u64> {
        Ok(self
            .entries
            .iter()
            .map(|entry| entry.value().size() as u64)
            .sum())
    }

    fn label(&self) -> StoreLabel {
        self.label.clone()
    }
}
