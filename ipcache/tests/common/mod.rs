#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ipcache::{FetchError, FetchRequest, FetchResponse, Headers, Transport};
use parking_lot::Mutex;

type Responder = dyn Fn(&FetchRequest) -> Result<FetchResponse, FetchError> + Send + Sync;

/// Scripted transport that records every request it sees.
///
/// Queued responses are served first, in order; once the queue is empty the
/// fallback responder answers.
#[derive(Clone)]
pub struct MockTransport {
    inner: Arc<MockInner>,
}

struct MockInner {
    queue: Mutex<VecDeque<Result<FetchResponse, FetchError>>>,
    fallback: Box<Responder>,
    latency: Duration,
    requests: Mutex<Vec<FetchRequest>>,
}

impl MockTransport {
    pub fn new<F>(fallback: F) -> Self
    where
        F: Fn(&FetchRequest) -> Result<FetchResponse, FetchError> + Send + Sync + 'static,
    {
        Self::with_latency(Duration::ZERO, fallback)
    }

    pub fn with_latency<F>(latency: Duration, fallback: F) -> Self
    where
        F: Fn(&FetchRequest) -> Result<FetchResponse, FetchError> + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(MockInner {
                queue: Mutex::new(VecDeque::new()),
                fallback: Box::new(fallback),
                latency,
                requests: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Always answers `200` with `body`.
    pub fn ok(body: &'static str) -> Self {
        Self::new(move |_| Ok(response(200, &[], body)))
    }

    pub fn push(&self, outcome: Result<FetchResponse, FetchError>) -> &Self {
        self.inner.queue.lock().push_back(outcome);
        self
    }

    pub fn calls(&self) -> usize {
        self.inner.requests.lock().len()
    }

    pub fn requests(&self) -> Vec<FetchRequest> {
        self.inner.requests.lock().clone()
    }

    pub fn last_request(&self) -> Option<FetchRequest> {
        self.inner.requests.lock().last().cloned()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: FetchRequest) -> Result<FetchResponse, FetchError> {
        self.inner.requests.lock().push(request.clone());
        if !self.inner.latency.is_zero() {
            tokio::time::sleep(self.inner.latency).await;
        }
        let queued = self.inner.queue.lock().pop_front();
        match queued {
            Some(outcome) => outcome,
            None => (self.inner.fallback)(&request),
        }
    }
}

pub fn response(status: u16, headers: &[(&str, &str)], body: &'static str) -> FetchResponse {
    let headers: Headers = headers.iter().copied().collect();
    FetchResponse::new(status, headers, body)
}
