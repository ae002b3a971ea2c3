//! Inbound request type issued by connectors.

use bytes::Bytes;
use http::{Method, Uri};
use serde::Serialize;
use thiserror::Error;

use crate::{Fingerprint, Headers};

/// Errors produced while normalizing a request.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RequestError {
    /// The URL could not be parsed.
    #[error("invalid url `{url}`: {reason}")]
    InvalidUrl {
        /// The offending URL.
        url: String,
        /// Parser message.
        reason: String,
    },
    /// The URL is not absolute (no scheme or host).
    #[error("url `{0}` is not absolute")]
    NotAbsolute(String),
    /// The query string could not be decoded.
    #[error("invalid query string: {0}")]
    InvalidQuery(String),
}

/// A request issued by a connector.
///
/// Query parameters may be given inline in the URL, through [`query`](Self::query),
/// or both; they are merged and sorted during normalization.
///
/// ```
/// use ipcache_core::FetchRequest;
///
/// let a = FetchRequest::get("https://ops.epo.org/rest?b=2&a=1");
/// let b = FetchRequest::get("https://OPS.epo.org:443/rest").query("a", "1").query("b", "2");
/// assert_eq!(a.normalized_url().unwrap(), "https://ops.epo.org/rest?a=1&b=2");
/// assert_eq!(a.fingerprint().unwrap(), b.fingerprint().unwrap());
/// ```
#[derive(Debug, Clone)]
pub struct FetchRequest {
    method: Method,
    url: String,
    query: Vec<(String, String)>,
    headers: Headers,
    body: Option<Bytes>,
}

impl FetchRequest {
    /// Creates a request with the given method and absolute URL.
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            query: Vec::new(),
            headers: Headers::new(),
            body: None,
        }
    }

    /// Shorthand for a `GET` request.
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    /// Shorthand for a `POST` request.
    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    /// Adds a query parameter.
    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    /// Adds several query parameters.
    pub fn queries<I, K, V>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.query
            .extend(params.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Sets a request header.
    pub fn header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Sets a raw request body.
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Serializes `value` as the JSON body and sets `Content-Type`.
    pub fn json<T: Serialize + ?Sized>(self, value: &T) -> Result<Self, serde_json::Error> {
        let body = serde_json::to_vec(value)?;
        Ok(self.header("content-type", "application/json").body(body))
    }

    /// Serializes `value` as an `application/x-www-form-urlencoded` body.
    pub fn form<T: Serialize + ?Sized>(self, value: &T) -> Result<Self, serde_urlencoded::ser::Error> {
        let body = serde_urlencoded::to_string(value)?;
        Ok(self
            .header("content-type", "application/x-www-form-urlencoded")
            .body(body))
    }

    /// The request method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The URL as supplied by the caller.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Explicit query parameters (not including those inline in the URL).
    pub fn query_params(&self) -> &[(String, String)] {
        &self.query
    }

    /// Request headers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Mutable request headers.
    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    /// Request body, if any.
    pub fn body_bytes(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    /// Whether responses to this method may be cached.
    ///
    /// `POST` is included because several patent-office search endpoints take
    /// their query as a body; the body digest is part of the fingerprint.
    pub fn is_cacheable_method(&self) -> bool {
        matches!(self.method, Method::GET | Method::HEAD | Method::POST)
    }

    /// Normalized absolute URL: lowercase scheme and host, default port
    /// dropped, empty path as `/`, fragment dropped, and all query parameters
    /// (inline and explicit) sorted by name then value.
    pub fn normalized_url(&self) -> Result<String, RequestError> {
        let uri: Uri = self.url.parse().map_err(|e: http::uri::InvalidUri| {
            RequestError::InvalidUrl {
                url: self.url.clone(),
                reason: e.to_string(),
            }
        })?;

        let scheme = uri
            .scheme_str()
            .ok_or_else(|| RequestError::NotAbsolute(self.url.clone()))?
            .to_ascii_lowercase();
        let host = uri
            .host()
            .ok_or_else(|| RequestError::NotAbsolute(self.url.clone()))?
            .to_ascii_lowercase();

        let port = match (scheme.as_str(), uri.port_u16()) {
            ("http", Some(80)) | ("https", Some(443)) | (_, None) => String::new(),
            (_, Some(port)) => format!(":{port}"),
        };

        let path = match uri.path() {
            "" => "/",
            path => path,
        };

        let mut params: Vec<(String, String)> = match uri.query() {
            Some(query) if !query.is_empty() => serde_urlencoded::from_str(query)
                .map_err(|e| RequestError::InvalidQuery(e.to_string()))?,
            _ => Vec::new(),
        };
        params.extend(self.query.iter().cloned());
        params.sort();

        let mut normalized = format!("{scheme}://{host}{port}{path}");
        if !params.is_empty() {
            let query = serde_urlencoded::to_string(&params)
                .map_err(|e| RequestError::InvalidQuery(e.to_string()))?;
            normalized.push('?');
            normalized.push_str(&query);
        }
        Ok(normalized)
    }

    /// The URL to send: the caller's URL with the explicit query parameters
    /// appended in the order they were added.
    pub fn target_url(&self) -> Result<String, RequestError> {
        if self.query.is_empty() {
            return Ok(self.url.clone());
        }
        let query = serde_urlencoded::to_string(&self.query)
            .map_err(|e| RequestError::InvalidQuery(e.to_string()))?;
        let (base, fragment) = match self.url.split_once('#') {
            Some((base, fragment)) => (base, Some(fragment)),
            None => (self.url.as_str(), None),
        };
        let separator = match base.rfind('?') {
            Some(i) if i + 1 == base.len() => "",
            Some(_) => "&",
            None => "?",
        };
        let mut url = format!("{base}{separator}{query}");
        if let Some(fragment) = fragment {
            url.push('#');
            url.push_str(fragment);
        }
        Ok(url)
    }

    /// Computes the request [`Fingerprint`].
    pub fn fingerprint(&self) -> Result<Fingerprint, RequestError> {
        let url = self.normalized_url()?;
        Ok(Fingerprint::compute(
            &self.method,
            &url,
            self.body.as_deref(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn target_url_appends_explicit_query() {
        let request = FetchRequest::get("https://ops.epo.org/rest?lang=en")
            .query("q", "pa=siemens and py>=2020");
        assert_eq!(
            request.target_url().unwrap(),
            "https://ops.epo.org/rest?lang=en&q=pa%3Dsiemens+and+py%3E%3D2020"
        );
        assert_eq!(
            FetchRequest::get("https://ops.epo.org/rest").target_url().unwrap(),
            "https://ops.epo.org/rest"
        );
    }

    #[test]
    fn parameter_order_is_irrelevant() {
        let a = FetchRequest::get("https://api.uspto.gov/search")
            .query("q", "applicationNumberText:16123456")
            .query("limit", "25");
        let b = FetchRequest::get("https://api.uspto.gov/search?limit=25")
            .query("q", "applicationNumberText:16123456");
        assert_eq!(a.fingerprint().unwrap(), b.fingerprint().unwrap());
    }

    #[test]
    fn single_query_value_changes_fingerprint() {
        let a = FetchRequest::get("https://api.uspto.gov/search").query("offset", "0");
        let b = FetchRequest::get("https://api.uspto.gov/search").query("offset", "25");
        assert_ne!(a.fingerprint().unwrap(), b.fingerprint().unwrap());
    }

    #[test]
    fn path_changes_fingerprint() {
        let a = FetchRequest::get("https://api.uspto.gov/a");
        let b = FetchRequest::get("https://api.uspto.gov/b");
        assert_ne!(a.fingerprint().unwrap(), b.fingerprint().unwrap());
    }

    #[test]
    fn normalizes_scheme_host_port_and_path() {
        let request = FetchRequest::get("HTTPS://Assignment-API.USPTO.gov:443");
        assert_eq!(
            request.normalized_url().unwrap(),
            "https://assignment-api.uspto.gov/"
        );

        let request = FetchRequest::get("http://localhost:8080/x");
        assert_eq!(request.normalized_url().unwrap(), "http://localhost:8080/x");
    }

    #[test]
    fn query_values_are_reencoded() {
        let request = FetchRequest::get("https://ops.epo.org/search").query("q", "ti=solar and pa=acme");
        assert_eq!(
            request.normalized_url().unwrap(),
            "https://ops.epo.org/search?q=ti%3Dsolar+and+pa%3Dacme"
        );
    }

    #[test]
    fn relative_url_is_rejected() {
        let err = FetchRequest::get("/relative/path").normalized_url().unwrap_err();
        assert!(matches!(err, RequestError::NotAbsolute(_)));
    }

    #[test]
    fn json_body_sets_content_type() {
        let request = FetchRequest::post("https://api.uspto.gov/search")
            .json(&serde_json::json!({"q": "solar"}))
            .unwrap();
        assert_eq!(request.headers().get("content-type"), Some("application/json"));
        assert_eq!(request.body_bytes().unwrap().as_ref(), br#"{"q":"solar"}"#);
    }
}
