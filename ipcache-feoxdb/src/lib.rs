//! Durable cache store for ipcache backed by [FeOxDB](https://docs.rs/feoxdb).
//!
//! Each client owns one database file, `<cache_dir>/<source>.db`, so stores
//! of different sources never share keys and a restarted process reopens the
//! same cache.
//!
//! ```no_run
//! use ipcache_feoxdb::FeOxDbStore;
//!
//! let store = FeOxDbStore::builder()
//!     .path("/home/me/.cache/ip_tools")
//!     .label("epo_ops")
//!     .build()?;
//! # Ok::<(), ipcache_feoxdb::FeOxDbError>(())
//! ```

#![warn(missing_docs)]

mod catalog;
mod error;
mod store;

pub use error::FeOxDbError;
pub use store::{FeOxDbStore, FeOxDbStoreBuilder};
