#![warn(missing_docs)]
//! # ipcache-core
//!
//! Core types shared by every crate of the ipcache workspace.
//!
//! Connectors talk to the request pipeline in terms of [`FetchRequest`] and
//! [`FetchResponse`]. Every request is identified by a [`Fingerprint`], which
//! keys both the persistent cache ([`CacheEntry`]) and the in-flight registry
//! used for single-flight de-duplication.
//!
//! This crate has no I/O. Storage lives in `ipcache-backend` and its
//! implementations, the pipeline itself lives in `ipcache`.

pub mod entry;
pub mod fingerprint;
pub mod headers;
pub mod label;
pub mod request;
pub mod response;

pub use entry::{CacheEntry, EntryMeta};
pub use fingerprint::Fingerprint;
pub use headers::Headers;
pub use label::StoreLabel;
pub use request::{FetchRequest, RequestError};
pub use response::{CacheStatus, FetchResponse};

/// Raw byte payload type used for request and response bodies.
/// Using `Bytes` makes handing the same body to several waiters a refcount bump.
pub type Raw = bytes::Bytes;
