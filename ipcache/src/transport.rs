use std::sync::Arc;

use async_trait::async_trait;
use ipcache_core::{FetchRequest, FetchResponse};

use crate::error::FetchError;

/// The network boundary.
///
/// Implementations send one request and return whatever the server
/// answered, whatever the status; classifying statuses is the pipeline's
/// job. Only failures below HTTP are errors, as [`FetchError::Transport`].
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends `request` once.
    async fn send(&self, request: FetchRequest) -> Result<FetchResponse, FetchError>;
}

#[async_trait]
impl<T> Transport for Arc<T>
where
    T: Transport + ?Sized,
{
    async fn send(&self, request: FetchRequest) -> Result<FetchResponse, FetchError> {
        (**self).send(request).await
    }
}

#[async_trait]
impl Transport for Box<dyn Transport> {
    async fn send(&self, request: FetchRequest) -> Result<FetchResponse, FetchError> {
        (**self).send(request).await
    }
}
