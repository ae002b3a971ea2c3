//! Case-insensitive header map used for requests, responses and cache entries.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Header name → value mapping.
///
/// Names are stored lowercased so lookups are case-insensitive and two maps
/// with the same content compare equal regardless of insertion order.
/// Repeated headers are folded into one comma-separated value, which is
/// enough for the validators and cache directives the pipeline inspects.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Headers(BTreeMap<String, String>);

impl Headers {
    /// Creates an empty header map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a header, replacing any previous value for the same name.
    pub fn insert(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        self.0
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
    }

    /// Appends a value to a header, folding repeats with `", "`.
    pub fn append(&mut self, name: impl AsRef<str>, value: impl AsRef<str>) {
        let name = name.as_ref().to_ascii_lowercase();
        match self.0.get_mut(&name) {
            Some(existing) => {
                existing.push_str(", ");
                existing.push_str(value.as_ref());
            }
            None => {
                self.0.insert(name, value.as_ref().to_owned());
            }
        }
    }

    /// Inserts the header only when it is not already present.
    pub fn insert_if_absent(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        self.0
            .entry(name.as_ref().to_ascii_lowercase())
            .or_insert_with(|| value.into());
    }

    /// Returns the value of a header.
    pub fn get(&self, name: &str) -> Option<&str> {
        if name.bytes().any(|b| b.is_ascii_uppercase()) {
            self.0.get(&name.to_ascii_lowercase()).map(String::as_str)
        } else {
            self.0.get(name).map(String::as_str)
        }
    }

    /// Whether a header is present.
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Removes a header and returns its value.
    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.0.remove(&name.to_ascii_lowercase())
    }

    /// Iterates over `(name, value)` pairs in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of distinct header names.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the map is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Approximate byte size of names and values.
    pub fn byte_size(&self) -> usize {
        self.0.iter().map(|(k, v)| k.len() + v.len()).sum()
    }

    /// Overlays `other` on top of `self`; values from `other` win.
    pub fn merge(&mut self, other: &Headers) {
        for (name, value) in other.iter() {
            self.0.insert(name.to_owned(), value.to_owned());
        }
    }

    /// Builds a map from an [`http::HeaderMap`], skipping non-UTF-8 values.
    pub fn from_header_map(map: &http::HeaderMap) -> Self {
        let mut headers = Headers::new();
        for (name, value) in map {
            if let Ok(value) = value.to_str() {
                headers.append(name.as_str(), value);
            }
        }
        headers
    }
}

impl fmt::Debug for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (name, value) in self.iter() {
            if name == "authorization" || name == "x-api-key" {
                map.entry(&name, &"<redacted>");
            } else {
                map.entry(&name, &value);
            }
        }
        map.finish()
    }
}

impl<K, V> FromIterator<(K, V)> for Headers
where
    K: AsRef<str>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (name, value) in iter {
            headers.insert(name, value);
        }
        headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookups_are_case_insensitive() {
        let mut headers = Headers::new();
        headers.insert("ETag", "\"abc\"");
        assert_eq!(headers.get("etag"), Some("\"abc\""));
        assert_eq!(headers.get("ETAG"), Some("\"abc\""));
    }

    #[test]
    fn append_folds_repeats() {
        let mut headers = Headers::new();
        headers.append("Cache-Control", "public");
        headers.append("cache-control", "max-age=60");
        assert_eq!(headers.get("cache-control"), Some("public, max-age=60"));
    }

    #[test]
    fn insertion_order_does_not_matter() {
        let a: Headers = [("a", "1"), ("b", "2")].into_iter().collect();
        let b: Headers = [("B", "2"), ("A", "1")].into_iter().collect();
        assert_eq!(a, b);
    }

    #[test]
    fn debug_redacts_credentials() {
        let headers: Headers = [("Authorization", "Bearer secret")].into_iter().collect();
        assert!(!format!("{headers:?}").contains("secret"));
    }
}
