use std::fmt;
use std::time::{Duration, SystemTime};

use ipcache_backend::StoreError;
use ipcache_core::{FetchResponse, RequestError};
use ipcache_feoxdb::FeOxDbError;
use thiserror::Error;

use crate::retry::parse_retry_after;

/// Upper bound on the response body copied into an error value.
pub const ERROR_BODY_LIMIT: usize = 500;

/// What went wrong below HTTP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportErrorKind {
    /// The request or response did not complete in time.
    Timeout,
    /// The connection could not be established.
    Connect,
    /// The connection dropped mid-exchange.
    Reset,
    /// The request could not be built or sent.
    Request,
    /// Anything else.
    Other,
}

impl TransportErrorKind {
    /// Timeouts, connection failures and resets are worth retrying.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Timeout | Self::Connect | Self::Reset)
    }

    /// Short lowercase name, used in logs and metrics labels.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Connect => "connect",
            Self::Reset => "reset",
            Self::Request => "request",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors surfaced by a fetch.
///
/// Every waiter coalesced onto one in-flight fetch receives a clone of the
/// same value, hence `Clone`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    /// Connection or timeout failure. Retryable for some kinds.
    #[error("transport error ({kind}): {message}")]
    Transport {
        /// Failure category.
        kind: TransportErrorKind,
        /// Human-readable detail.
        message: String,
    },

    /// The source answered HTTP 429.
    #[error("rate limit exceeded (HTTP 429)")]
    RateLimitExceeded {
        /// Server-directed delay from `Retry-After`.
        retry_after: Option<Duration>,
        /// Start of the response body.
        body: String,
    },

    /// The source answered HTTP 5xx.
    #[error("server error (HTTP {status})")]
    Server {
        /// HTTP status.
        status: u16,
        /// Server-directed delay from `Retry-After`, typically on 503.
        retry_after: Option<Duration>,
        /// Start of the response body.
        body: String,
    },

    /// The source answered with any other non-success status.
    #[error("client error (HTTP {status})")]
    Client {
        /// HTTP status.
        status: u16,
        /// Start of the response body.
        body: String,
    },

    /// Credentials could not be exchanged for a token.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// The response could not be interpreted.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// The request itself is invalid (bad URL, unserializable body).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The shared in-flight fetch ended without producing a result.
    #[error("in-flight fetch was aborted")]
    Aborted,
}

impl FetchError {
    /// Builds a transport error.
    pub fn transport(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self::Transport {
            kind,
            message: message.into(),
        }
    }

    /// Classifies a non-2xx response.
    pub fn from_response(response: &FetchResponse, now: SystemTime) -> Self {
        let body = truncate_body(&response.text());
        let retry_after = || {
            response
                .header("retry-after")
                .and_then(|value| parse_retry_after(value, now))
        };
        match response.status {
            429 => Self::RateLimitExceeded {
                retry_after: retry_after(),
                body,
            },
            status @ 500..=599 => Self::Server {
                status,
                retry_after: retry_after(),
                body,
            },
            status => Self::Client { status, body },
        }
    }

    /// Whether another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { kind, .. } => kind.is_retryable(),
            Self::RateLimitExceeded { .. } | Self::Server { .. } => true,
            _ => false,
        }
    }

    /// Server-directed delay before the next attempt.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimitExceeded { retry_after, .. } | Self::Server { retry_after, .. } => {
                *retry_after
            }
            _ => None,
        }
    }

    /// HTTP status, for errors that carry one.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::RateLimitExceeded { .. } => Some(429),
            Self::Server { status, .. } | Self::Client { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// `true` for HTTP 404.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Client { status: 404, .. })
    }

    /// Short label used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transport { kind, .. } => kind.as_str(),
            Self::RateLimitExceeded { .. } => "rate_limited",
            Self::Server { .. } => "server",
            Self::Client { .. } => "client",
            Self::Authentication(_) => "authentication",
            Self::MalformedResponse(_) => "malformed",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Aborted => "aborted",
        }
    }
}

impl From<RequestError> for FetchError {
    fn from(error: RequestError) -> Self {
        Self::InvalidRequest(error.to_string())
    }
}

/// Truncates `body` to at most [`ERROR_BODY_LIMIT`] bytes on a char boundary.
pub(crate) fn truncate_body(body: &str) -> String {
    if body.len() <= ERROR_BODY_LIMIT {
        return body.to_owned();
    }
    let mut end = ERROR_BODY_LIMIT;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    body[..end].to_owned()
}

/// Errors of the cache management operations.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The client was built with caching disabled.
    #[error("caching is disabled for this client")]
    Disabled,

    /// The store failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The invalidation pattern is not a valid regular expression.
    #[error("invalid URL pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
}

/// Errors raised while constructing a client.
#[derive(Debug, Error)]
pub enum BuildError {
    /// A configuration value is out of range or inconsistent.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The configuration document could not be parsed.
    #[error("failed to parse configuration: {0}")]
    Parse(String),

    /// The cache database could not be opened.
    #[error("failed to open cache store: {0}")]
    Store(#[from] FeOxDbError),

    /// A required credential environment variable is unset or empty.
    #[error("missing credential: environment variable {0} is not set")]
    MissingCredential(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use ipcache_core::Headers;

    fn response(status: u16, headers: &[(&str, &str)], body: &str) -> FetchResponse {
        FetchResponse::new(status, headers.iter().copied().collect::<Headers>(), body.to_owned())
    }

    #[test]
    fn classification_by_status() {
        let now = SystemTime::now();
        assert!(matches!(
            FetchError::from_response(&response(429, &[("Retry-After", "7")], ""), now),
            FetchError::RateLimitExceeded {
                retry_after: Some(d),
                ..
            } if d == Duration::from_secs(7)
        ));
        assert!(matches!(
            FetchError::from_response(&response(503, &[], ""), now),
            FetchError::Server { status: 503, .. }
        ));
        let not_found = FetchError::from_response(&response(404, &[], "no such patent"), now);
        assert!(not_found.is_not_found());
        assert!(!not_found.is_retryable());
        assert_eq!(not_found.status(), Some(404));
    }

    #[test]
    fn error_body_is_truncated_on_char_boundary() {
        let body = "é".repeat(400);
        let truncated = truncate_body(&body);
        assert!(truncated.len() <= ERROR_BODY_LIMIT);
        assert!(truncated.chars().all(|c| c == 'é'));
    }

    #[test]
    fn transport_kinds() {
        assert!(FetchError::transport(TransportErrorKind::Timeout, "slow").is_retryable());
        assert!(FetchError::transport(TransportErrorKind::Reset, "eof").is_retryable());
        assert!(!FetchError::transport(TransportErrorKind::Request, "bad header").is_retryable());
        assert!(!FetchError::Authentication("bad key".into()).is_retryable());
    }
}
