//! Request fingerprints.
//!
//! A [`Fingerprint`] is the identity of a logical request. It keys both the
//! persistent cache and the in-flight registry, so two requests that differ
//! only in query parameter order must map to the same fingerprint while any
//! change to the method, path, a query value or the body must not.
//!
//! ## Format
//!
//! The fingerprint is the lowercase hex SHA-256 of
//! `{METHOD}\n{normalized_url}\n{hex(sha256(body))}`, always 64 characters.
//! The body digest is empty when the request has no body.
//!
//! ```
//! use ipcache_core::Fingerprint;
//! use http::Method;
//!
//! let a = Fingerprint::compute(&Method::GET, "https://ops.epo.org/a?x=1&y=2", None);
//! let b = Fingerprint::compute(&Method::GET, "https://ops.epo.org/a?x=1&y=2", None);
//! assert_eq!(a, b);
//! assert_eq!(a.as_str().len(), 64);
//!
//! let post = Fingerprint::compute(&Method::POST, "https://ops.epo.org/a?x=1&y=2", None);
//! assert_ne!(a, post);
//! ```

use std::fmt;

use http::Method;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use smol_str::SmolStr;

/// Length of a fingerprint in hex characters.
pub const FINGERPRINT_LEN: usize = 64;

/// Deterministic identity of a request.
///
/// Cloning is cheap enough for map keys; the value is an immutable string.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(SmolStr);

impl Fingerprint {
    /// Computes the fingerprint of a request.
    ///
    /// `normalized_url` must already be normalized (see
    /// [`FetchRequest::normalized_url`](crate::FetchRequest::normalized_url));
    /// this function does no parsing and cannot fail.
    pub fn compute(method: &Method, normalized_url: &str, body: Option<&[u8]>) -> Self {
        let body_digest = body
            .filter(|body| !body.is_empty())
            .map(|body| hex::encode(Sha256::digest(body)))
            .unwrap_or_default();

        let mut hasher = Sha256::new();
        hasher.update(method.as_str().as_bytes());
        hasher.update(b"\n");
        hasher.update(normalized_url.as_bytes());
        hasher.update(b"\n");
        hasher.update(body_digest.as_bytes());

        Self(SmolStr::new(hex::encode(hasher.finalize())))
    }

    /// Parses a fingerprint from its hex form.
    ///
    /// Returns `None` unless the input is exactly 64 lowercase hex characters.
    pub fn from_hex(value: &str) -> Option<Self> {
        let valid = value.len() == FINGERPRINT_LEN
            && value
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        valid.then(|| Self(SmolStr::new(value)))
    }

    /// Returns the fingerprint as a hex string.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short prefix used in log output.
    #[inline]
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.short())
    }
}

impl AsRef<str> for Fingerprint {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const URL: &str = "https://api.uspto.gov/api/v1/patent/applications/search?q=foo";

    #[test]
    fn method_changes_fingerprint() {
        let get = Fingerprint::compute(&Method::GET, URL, None);
        let head = Fingerprint::compute(&Method::HEAD, URL, None);
        assert_ne!(get, head);
    }

    #[test]
    fn body_changes_fingerprint() {
        let a = Fingerprint::compute(&Method::POST, URL, Some(br#"{"q":"a"}"#));
        let b = Fingerprint::compute(&Method::POST, URL, Some(br#"{"q":"b"}"#));
        assert_ne!(a, b);
    }

    #[test]
    fn empty_body_equals_no_body() {
        let none = Fingerprint::compute(&Method::POST, URL, None);
        let empty = Fingerprint::compute(&Method::POST, URL, Some(b""));
        assert_eq!(none, empty);
    }

    #[test]
    fn hex_round_trip() {
        let fp = Fingerprint::compute(&Method::GET, URL, None);
        assert_eq!(Fingerprint::from_hex(fp.as_str()), Some(fp));
        assert_eq!(Fingerprint::from_hex("not-hex"), None);
    }
}
