use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bincode::config::standard as bincode_config;
use bincode::serde::{decode_from_slice, encode_to_vec};
use dashmap::mapref::entry::Entry;
use feoxdb::{FeoxError, FeoxStore};
use ipcache_backend::{CacheStore, EntryFilter, StoreError, StoreResult};
use ipcache_core::{CacheEntry, EntryMeta, Fingerprint, StoreLabel};
use tracing::{debug, warn};

use crate::FeOxDbError;
use crate::catalog::{Catalog, data_key, delete_entry, encode_meta, meta_key};

/// Disk-based cache store using FeOxDB.
///
/// Entries survive restarts: reopening the same file restores both the
/// entries and the metadata used to enumerate them.
///
/// ```no_run
/// use ipcache_feoxdb::FeOxDbStore;
///
/// // <dir>/uspto_odp.db
/// let store = FeOxDbStore::builder()
///     .path("/var/cache/ip_tools")
///     .label("uspto_odp")
///     .build()?;
///
/// // With resource limits
/// let store = FeOxDbStore::builder()
///     .path("/var/cache/ip_tools")
///     .label("epo_ops")
///     .max_file_size(2 * 1024 * 1024 * 1024)  // 2 GB
///     .max_memory(128 * 1024 * 1024)          // 128 MB
///     .build()?;
/// # Ok::<(), ipcache_feoxdb::FeOxDbError>(())
/// ```
///
/// Cloning is cheap; clones share the same underlying database.
#[derive(Clone)]
pub struct FeOxDbStore {
    inner: Arc<Inner>,
}

struct Inner {
    store: FeoxStore,
    catalog: Catalog,
    label: StoreLabel,
    location: Option<PathBuf>,
}

impl std::fmt::Debug for FeOxDbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeOxDbStore")
            .field("label", &self.inner.label)
            .field("location", &self.inner.location)
            .field("entries", &self.inner.catalog.len())
            .finish()
    }
}

impl FeOxDbStore {
    /// Starts building a new store.
    pub fn builder() -> FeOxDbStoreBuilder {
        FeOxDbStoreBuilder::default()
    }

    /// Memory-only store. Data is lost when the last clone is dropped.
    ///
    /// ```
    /// use ipcache_feoxdb::FeOxDbStore;
    ///
    /// let store = FeOxDbStore::in_memory().expect("in-memory store");
    /// assert!(store.location().is_none());
    /// ```
    pub fn in_memory() -> Result<Self, FeOxDbError> {
        FeOxDbStoreBuilder::default().build()
    }

    /// Path of the database file, if persistent.
    pub fn location(&self) -> Option<&Path> {
        self.inner.location.as_deref()
    }
}

/// Builder for [`FeOxDbStore`].
pub struct FeOxDbStoreBuilder {
    path: Option<PathBuf>,
    file: Option<PathBuf>,
    max_file_size: Option<u64>,
    max_memory: Option<usize>,
    label: StoreLabel,
}

impl Default for FeOxDbStoreBuilder {
    fn default() -> Self {
        Self {
            path: None,
            file: None,
            max_file_size: None,
            max_memory: None,
            label: StoreLabel::new("feoxdb"),
        }
    }
}

impl FeOxDbStoreBuilder {
    /// Stores the database in `dir`, as `<label>.db`.
    ///
    /// The directory is created if missing. Without a path the store is
    /// memory-only.
    pub fn path(mut self, dir: impl AsRef<Path>) -> Self {
        self.path = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Stores the database in exactly this file. Takes precedence over [`path`](Self::path).
    pub fn file(mut self, file: impl AsRef<Path>) -> Self {
        self.file = Some(file.as_ref().to_path_buf());
        self
    }

    /// Names the store in logs and metrics, and picks the file name under [`path`](Self::path).
    pub fn label(mut self, label: impl Into<StoreLabel>) -> Self {
        self.label = label.into();
        self
    }

    /// Pre-allocates disk space and caps maximum storage.
    ///
    /// Writes fail once the file is full. Ignored in memory-only mode.
    pub fn max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size = Some(bytes);
        self
    }

    /// Limits RAM usage.
    ///
    /// FeOxDB does not evict: writes fail once the limit is reached.
    pub fn max_memory(mut self, bytes: usize) -> Self {
        self.max_memory = Some(bytes);
        self
    }

    /// Opens or creates the store.
    pub fn build(self) -> Result<FeOxDbStore, FeOxDbError> {
        let location = match (self.file, self.path) {
            (Some(file), _) => Some(file),
            (None, Some(dir)) => {
                if dir.exists() && !dir.is_dir() {
                    return Err(FeOxDbError::InvalidConfig(format!(
                        "cache path {} is not a directory",
                        dir.display()
                    )));
                }
                std::fs::create_dir_all(&dir)?;
                Some(dir.join(self.label.file_name()))
            }
            (None, None) => None,
        };

        let mut builder = FeoxStore::builder();
        if let Some(location) = &location {
            builder = builder.device_path(location.to_string_lossy().to_string());
        }
        if let Some(file_size) = self.max_file_size {
            builder = builder.file_size(file_size);
        }
        if let Some(memory) = self.max_memory {
            builder = builder.max_memory(memory);
        }

        let store = builder.build()?;
        let catalog = Catalog::load(&store)?;
        debug!(
            label = %self.label,
            location = ?location,
            entries = catalog.len(),
            "Opened FeOxDB cache store"
        );

        Ok(FeOxDbStore {
            inner: Arc::new(Inner {
                store,
                catalog,
                label: self.label,
                location,
            }),
        })
    }
}

impl Inner {
    fn read(&self, key: &Fingerprint) -> Result<Option<CacheEntry>, FeOxDbError> {
        match self.store.get(&data_key(key)) {
            Ok(encoded) => {
                let (entry, _): (CacheEntry, _) = decode_from_slice(&encoded, bincode_config())?;
                Ok(Some(entry))
            }
            Err(FeoxError::KeyNotFound) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, meta: EntryMeta, encoded: Vec<u8>) -> Result<(), FeOxDbError> {
        let encoded_meta = encode_meta(&meta)?;
        // Holding the catalogue slot serializes writers of the same key.
        let slot = self.catalog.entries().entry(meta.key.clone());
        self.store.insert(&data_key(&meta.key), &encoded)?;
        if let Err(e) = self.store.insert(&meta_key(&meta.key), &encoded_meta) {
            if matches!(slot, Entry::Vacant(_))
                && let Err(cleanup) = delete_entry(&self.store, &meta.key)
            {
                warn!(key = %meta.key, error = %cleanup, "Failed to drop unindexed cache entry");
            }
            return Err(e.into());
        }
        slot.insert(meta);
        Ok(())
    }

    fn remove(&self, key: &Fingerprint) -> Result<bool, FeOxDbError> {
        match self.catalog.entries().entry(key.clone()) {
            Entry::Occupied(slot) => {
                delete_entry(&self.store, key)?;
                slot.remove();
                Ok(true)
            }
            Entry::Vacant(_) => {
                let orphan = self.store.contains_key(&data_key(key));
                if orphan {
                    delete_entry(&self.store, key)?;
                }
                Ok(orphan)
            }
        }
    }

    /// Removes the selected entries unless they were rewritten since selection.
    fn remove_selected(&self, selected: Vec<EntryMeta>) -> Result<u64, FeOxDbError> {
        let mut removed = 0u64;
        for meta in selected {
            if let Entry::Occupied(slot) = self.catalog.entries().entry(meta.key.clone())
                && *slot.get() == meta
            {
                delete_entry(&self.store, &meta.key)?;
                slot.remove();
                removed += 1;
            }
        }
        Ok(removed)
    }
}

fn join_error(error: tokio::task::JoinError) -> StoreError {
    StoreError::internal(error)
}

#[async_trait]
impl CacheStore for FeOxDbStore {
    async fn read(&self, key: &Fingerprint) -> StoreResult<Option<CacheEntry>> {
        let inner = self.inner.clone();
        let key = key.clone();
        let entry = tokio::task::spawn_blocking(move || inner.read(&key))
            .await
            .map_err(join_error)??;
        Ok(entry)
    }

    async fn write(&self, entry: CacheEntry) -> StoreResult<()> {
        let encoded = encode_to_vec(&entry, bincode_config()).map_err(FeOxDbError::from)?;
        let meta = entry.meta();
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || inner.write(meta, encoded))
            .await
            .map_err(join_error)??;
        Ok(())
    }

    async fn remove(&self, key: &Fingerprint) -> StoreResult<bool> {
        let inner = self.inner.clone();
        let key = key.clone();
        let existed = tokio::task::spawn_blocking(move || inner.remove(&key))
            .await
            .map_err(join_error)??;
        Ok(existed)
    }

    async fn remove_matching(&self, filter: EntryFilter<'_>) -> StoreResult<u64> {
        let selected = self.inner.catalog.select(filter);
        if selected.is_empty() {
            return Ok(0);
        }
        let inner = self.inner.clone();
        let removed = tokio::task::spawn_blocking(move || inner.remove_selected(selected))
            .await
            .map_err(join_error)??;
        Ok(removed)
    }

    async fn len(&self) -> StoreResult<u64> {
        Ok(self.inner.catalog.len())
    }

    async fn size_bytes(&self) -> StoreResult<u64> {
        Ok(self.inner.catalog.size_bytes())
    }

    /// FeOxDB flushes on its own shortly after each write; this forces it.
    async fn flush(&self) -> StoreResult<()> {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || inner.store.flush())
            .await
            .map_err(join_error)?
            .map_err(FeOxDbError::from)?;
        Ok(())
    }

    fn label(&self) -> StoreLabel {
        self.inner.label.clone()
    }

    fn location(&self) -> Option<&Path> {
        self.inner.location.as_deref()
    }
}
