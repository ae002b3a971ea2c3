//! Storage layer of ipcache.
//!
//! - [`CacheStore`] is the raw, fallible storage trait every store implements.
//! - [`MemoryStore`] keeps entries in a [`DashMap`](dashmap::DashMap); it is
//!   used in tests and for clients that only need an in-process cache.
//! - [`CacheStats`] and [`StatsCounter`] carry the statistics exposed by the
//!   management operations.
//!
//! Durable storage lives in `ipcache-feoxdb`.

mod memory;
pub mod metrics;
mod stats;
mod store;

pub use memory::MemoryStore;
pub use stats::{CacheStats, StatsCounter};
pub use store::{CacheStore, EntryFilter, StoreResult};

use thiserror::Error;

/// Errors raised by cache stores.
///
/// On the fetch path these are never fatal: the pipeline logs them and falls
/// back to the network (reads) or drops the write.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Internal store error, state or computation error.
    #[error(transparent)]
    InternalError(Box<dyn std::error::Error + Send>),
    /// Stored bytes could not be decoded (corrupt or foreign data).
    #[error("corrupt cache entry: {0}")]
    Corrupt(String),
    /// Encoding an entry failed.
    #[error("failed to encode cache entry: {0}")]
    Encode(String),
    /// Filesystem error while opening or writing the store.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Wraps any error as [`StoreError::InternalError`].
    pub fn internal<E>(error: E) -> Self
    where
        E: std::error::Error + Send + 'static,
    {
        StoreError::InternalError(Box::new(error))
    }
}
