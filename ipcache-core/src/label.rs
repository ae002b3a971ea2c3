//! Names of per-source cache stores.
//!
//! A store is named after the source it caches (`uspto_odp`, `epo_ops`).
//! The same name tags logs and metrics and, for disk-backed stores, picks the
//! database file, so a restarted process reopens the same cache. Labels are
//! normalized on construction to keep both uses in agreement.

use smol_str::SmolStr;
use std::fmt;

/// Extension of database files named after a label.
pub const STORE_FILE_EXTENSION: &str = "db";

/// Normalized name of a cache store.
///
/// Letters are lowercased and anything outside `[a-z0-9_-]` becomes `_`.
///
/// ```
/// use ipcache_core::StoreLabel;
///
/// let label = StoreLabel::new("EPO OPS/3.2");
/// assert_eq!(label.as_str(), "epo_ops_3_2");
/// assert_eq!(label.file_name(), "epo_ops_3_2.db");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StoreLabel(SmolStr);

impl StoreLabel {
    /// Normalizes `name` into a label. An empty name becomes `store`.
    pub fn new(name: &str) -> Self {
        if name.is_empty() {
            return Self::new_static("store");
        }
        Self(
            name.chars()
                .map(|c| match c.to_ascii_lowercase() {
                    c @ ('a'..='z' | '0'..='9' | '_' | '-') => c,
                    _ => '_',
                })
                .collect(),
        )
    }

    /// Label from a literal that is already normalized.
    pub(crate) const fn new_static(name: &'static str) -> Self {
        Self(SmolStr::new_static(name))
    }

    /// Label of the in-process store.
    pub const fn memory() -> Self {
        Self::new_static("memory")
    }

    /// The normalized name.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Database file name for this store, `<label>.db`.
    pub fn file_name(&self) -> String {
        format!("{}.{STORE_FILE_EXTENSION}", self.0)
    }
}

impl fmt::Display for StoreLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for StoreLabel {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_names_are_kept() {
        for name in ["uspto_odp", "epo_ops", "google_patents", "jpo"] {
            assert_eq!(StoreLabel::new(name).as_str(), name);
        }
    }

    #[test]
    fn unsafe_characters_are_replaced() {
        assert_eq!(StoreLabel::new("../Secret Cache").as_str(), "___secret_cache");
        assert_eq!(StoreLabel::new("ops.epo.org").file_name(), "ops_epo_org.db");
    }

    #[test]
    fn empty_name_gets_a_default() {
        assert_eq!(StoreLabel::new(""), StoreLabel::new("store"));
    }
}
