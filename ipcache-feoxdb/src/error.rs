use bincode::error::{DecodeError, EncodeError};
use feoxdb::FeoxError;
use ipcache_backend::StoreError;
use thiserror::Error;

/// Errors that can occur when opening or using a [`FeOxDbStore`](crate::FeOxDbStore).
#[derive(Debug, Error)]
pub enum FeOxDbError {
    /// An error from the underlying FeOxDB database.
    #[error("FeOxDB error: {0}")]
    FeOxDb(#[from] FeoxError),

    /// Failed to serialize a cache entry or its metadata.
    #[error("Serialization error: {0}")]
    Serialization(#[from] EncodeError),

    /// Failed to deserialize a cache entry or its metadata.
    #[error("Deserialization error: {0}")]
    Deserialization(#[from] DecodeError),

    /// An I/O error occurred while preparing the database file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The provided configuration is invalid.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl From<FeOxDbError> for StoreError {
    fn from(error: FeOxDbError) -> Self {
        match error {
            FeOxDbError::Deserialization(e) => StoreError::Corrupt(e.to_string()),
            FeOxDbError::Serialization(e) => StoreError::Encode(e.to_string()),
            FeOxDbError::Io(e) => StoreError::Io(e),
            other => StoreError::internal(other),
        }
    }
}
