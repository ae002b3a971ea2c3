//! [`Transport`] over reqwest.

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ipcache::{BuildError, FetchError, Transport, TransportErrorKind};
use ipcache_core::{FetchRequest, FetchResponse, Headers};
use reqwest_middleware::{ClientWithMiddleware, Middleware};
use tracing::debug;

/// Sends pipeline requests through a reqwest client.
///
/// Any status the server answers with is returned as a response; only
/// failures below HTTP become [`FetchError::Transport`].
#[derive(Clone)]
pub struct ReqwestTransport {
    client: ClientWithMiddleware,
}

impl fmt::Debug for ReqwestTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReqwestTransport").finish_non_exhaustive()
    }
}

impl ReqwestTransport {
    /// Transport over a default reqwest client.
    pub fn new() -> Result<Self, BuildError> {
        Self::builder().build()
    }

    /// Configures a transport.
    pub fn builder() -> ReqwestTransportBuilder {
        ReqwestTransportBuilder::default()
    }

    /// Transport over an existing client.
    pub fn from_client(client: reqwest::Client) -> Self {
        Self::from_middleware_client(reqwest_middleware::ClientBuilder::new(client).build())
    }

    /// Transport over an existing middleware chain.
    pub fn from_middleware_client(client: ClientWithMiddleware) -> Self {
        Self { client }
    }
}

/// Builder for [`ReqwestTransport`].
#[derive(Default)]
pub struct ReqwestTransportBuilder {
    timeout: Option<Duration>,
    connect_timeout: Option<Duration>,
    middleware: Vec<Arc<dyn Middleware>>,
}

impl fmt::Debug for ReqwestTransportBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReqwestTransportBuilder")
            .field("timeout", &self.timeout)
            .field("connect_timeout", &self.connect_timeout)
            .field("middleware", &self.middleware.len())
            .finish()
    }
}

impl ReqwestTransportBuilder {
    /// Total deadline per request, including reading the body.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Deadline for establishing connections.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Appends a reqwest middleware to the chain.
    pub fn with<M>(mut self, middleware: M) -> Self
    where
        M: Middleware + 'static,
    {
        self.middleware.push(Arc::new(middleware));
        self
    }

    /// Builds the transport.
    pub fn build(self) -> Result<ReqwestTransport, BuildError> {
        let mut client = reqwest::Client::builder();
        if let Some(timeout) = self.timeout {
            client = client.timeout(timeout);
        }
        if let Some(timeout) = self.connect_timeout {
            client = client.connect_timeout(timeout);
        }
        let client = client
            .build()
            .map_err(|e| BuildError::InvalidConfig(format!("http client: {e}")))?;

        let chain = self
            .middleware
            .into_iter()
            .fold(reqwest_middleware::ClientBuilder::new(client), |chain, m| {
                chain.with_arc(m)
            });
        Ok(ReqwestTransport::from_middleware_client(chain.build()))
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: FetchRequest) -> Result<FetchResponse, FetchError> {
        let url = request.target_url()?;
        debug!(method = %request.method(), %url, "Sending request");

        let mut builder = self.client.request(request.method().clone(), &url);
        for (name, value) in request.headers().iter() {
            builder = builder.header(name, value);
        }
        if let Some(body) = request.body_bytes() {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await.map_err(from_middleware_error)?;
        let status = response.status().as_u16();
        let headers = Headers::from_header_map(response.headers());
        let body = response.bytes().await.map_err(from_reqwest_error)?;
        debug!(%url, status, bytes = body.len(), "Received response");

        Ok(FetchResponse::new(status, headers, body))
    }
}

fn from_middleware_error(error: reqwest_middleware::Error) -> FetchError {
    match error {
        reqwest_middleware::Error::Reqwest(error) => from_reqwest_error(error),
        reqwest_middleware::Error::Middleware(error) => {
            FetchError::transport(TransportErrorKind::Other, format!("middleware: {error:#}"))
        }
    }
}

fn from_reqwest_error(error: reqwest::Error) -> FetchError {
    if error.is_decode() {
        return FetchError::MalformedResponse(describe(&error));
    }
    FetchError::transport(classify(&error), describe(&error))
}

fn classify(error: &reqwest::Error) -> TransportErrorKind {
    if error.is_timeout() {
        TransportErrorKind::Timeout
    } else if error.is_connect() {
        TransportErrorKind::Connect
    } else if error.is_builder() {
        TransportErrorKind::Request
    } else if error.is_body() || error.is_request() {
        TransportErrorKind::Reset
    } else {
        TransportErrorKind::Other
    }
}

/// The error and its sources on one line; reqwest's own message is terse.
fn describe(error: &reqwest::Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
