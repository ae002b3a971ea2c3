//! In-memory index of the entries held in a FeOxDB file.
//!
//! FeOxDB is a point-lookup store, but clearing, pattern invalidation, expiry
//! sweeps and statistics all need to enumerate entries. Every entry is stored
//! as two records: the encoded [`CacheEntry`] under `entry:<fingerprint>` and
//! its [`EntryMeta`] under `meta:<fingerprint>`. The catalogue mirrors the
//! meta records in memory and is rebuilt from them on open.

use bincode::config::standard as bincode_config;
use bincode::serde::{decode_from_slice, encode_to_vec};
use dashmap::DashMap;
use feoxdb::{FeoxError, FeoxStore};
use ipcache_core::{CacheEntry, EntryMeta, Fingerprint};
use tracing::warn;

use crate::FeOxDbError;

const DATA_PREFIX: &str = "entry:";
const META_PREFIX: &str = "meta:";

/// Records fetched per range query while scanning on open.
const SCAN_PAGE: usize = 1024;

pub(crate) fn data_key(key: &Fingerprint) -> Vec<u8> {
    format!("{DATA_PREFIX}{key}").into_bytes()
}

pub(crate) fn meta_key(key: &Fingerprint) -> Vec<u8> {
    format!("{META_PREFIX}{key}").into_bytes()
}

pub(crate) fn encode_meta(meta: &EntryMeta) -> Result<Vec<u8>, FeOxDbError> {
    Ok(encode_to_vec(meta, bincode_config())?)
}

/// Fingerprint encoded in a record key, if the key has `prefix`.
fn fingerprint_of(record_key: &[u8], prefix: &str) -> Option<Fingerprint> {
    let suffix = record_key.strip_prefix(prefix.as_bytes())?;
    Fingerprint::from_hex(std::str::from_utf8(suffix).ok()?)
}

/// Visits every record whose key starts with `prefix`, one page at a time.
fn scan(
    store: &FeoxStore,
    prefix: &str,
    mut visit: impl FnMut(Vec<u8>, Vec<u8>) -> Result<(), FeOxDbError>,
) -> Result<(), FeOxDbError> {
    let mut start = prefix.as_bytes().to_vec();
    let mut end = prefix.as_bytes().to_vec();
    end.push(u8::MAX);

    loop {
        let page = store.range_query(&start, &end, SCAN_PAGE)?;
        let full = page.len() == SCAN_PAGE;
        let mut last = None;
        for (key, value) in page {
            last = Some(key.clone());
            visit(key, value)?;
        }
        match last {
            Some(mut next) if full => {
                next.push(0);
                start = next;
            }
            _ => return Ok(()),
        }
    }
}

fn delete_record(store: &FeoxStore, key: &[u8]) -> Result<(), FeOxDbError> {
    match store.delete(key) {
        Ok(()) | Err(FeoxError::KeyNotFound) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[derive(Debug, Default)]
pub(crate) struct Catalog {
    entries: DashMap<Fingerprint, EntryMeta>,
}

impl Catalog {
    /// Rebuilds the catalogue from the meta records in `store`.
    ///
    /// Meta records without data are deleted. Data records without meta are
    /// re-indexed from the entry itself, or deleted when they cannot be
    /// decoded.
    pub(crate) fn load(store: &FeoxStore) -> Result<Self, FeOxDbError> {
        let catalog = Catalog::default();
        let mut stale = Vec::new();

        scan(store, META_PREFIX, |key, value| {
            match decode_from_slice::<EntryMeta, _>(&value, bincode_config()) {
                Ok((meta, _))
                    if fingerprint_of(&key, META_PREFIX).as_ref() == Some(&meta.key)
                        && store.contains_key(&data_key(&meta.key)) =>
                {
                    catalog.entries.insert(meta.key.clone(), meta);
                }
                _ => stale.push(key),
            }
            Ok(())
        })?;

        let mut reindexed = 0usize;
        scan(store, DATA_PREFIX, |key, value| {
            let indexed = fingerprint_of(&key, DATA_PREFIX)
                .is_some_and(|fingerprint| catalog.entries.contains_key(&fingerprint));
            if indexed {
                return Ok(());
            }
            match decode_from_slice::<CacheEntry, _>(&value, bincode_config()) {
                Ok((entry, _)) if data_key(entry.key()) == key => {
                    let meta = entry.meta();
                    store.insert(&meta_key(&meta.key), &encode_meta(&meta)?)?;
                    catalog.entries.insert(meta.key.clone(), meta);
                    reindexed += 1;
                }
                _ => stale.push(key),
            }
            Ok(())
        })?;

        if !stale.is_empty() {
            warn!(records = stale.len(), "Deleting orphaned cache records");
            for key in &stale {
                delete_record(store, key)?;
            }
        }
        if reindexed > 0 {
            warn!(entries = reindexed, "Re-indexed cache entries missing metadata");
        }
        Ok(catalog)
    }

    pub(crate) fn entries(&self) -> &DashMap<Fingerprint, EntryMeta> {
        &self.entries
    }

    /// Metadata of every entry for which `filter` holds.
    pub(crate) fn select(&self, filter: impl Fn(&EntryMeta) -> bool) -> Vec<EntryMeta> {
        self.entries
            .iter()
            .filter(|entry| filter(entry.value()))
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub(crate) fn len(&self) -> u64 {
        self.entries.len() as u64
    }

    pub(crate) fn size_bytes(&self) -> u64 {
        self.entries.iter().map(|entry| entry.value().size).sum()
    }
}

/// Deletes both records of `key`, meta last so a failure leaves data that
/// the next open re-indexes.
pub(crate) fn delete_entry(store: &FeoxStore, key: &Fingerprint) -> Result<(), FeOxDbError> {
    delete_record(store, &data_key(key))?;
    delete_record(store, &meta_key(key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, Utc};
    use http::Method;
    use ipcache_core::Headers;

    fn entry(url: &str) -> CacheEntry {
        let now = Utc::now();
        CacheEntry::new(
            Fingerprint::compute(&Method::GET, url, None),
            url,
            200,
            Headers::new(),
            format!("body of {url}"),
            now,
            now + TimeDelta::hours(1),
        )
    }

    fn put(store: &FeoxStore, entry: &CacheEntry) {
        let encoded = encode_to_vec(entry, bincode_config()).unwrap();
        store.insert(&data_key(entry.key()), &encoded).unwrap();
        store
            .insert(&meta_key(entry.key()), &encode_meta(&entry.meta()).unwrap())
            .unwrap();
    }

    #[test]
    fn load_indexes_every_entry() {
        let store = FeoxStore::new(None).unwrap();
        let entries: Vec<_> = (0..3)
            .map(|i| entry(&format!("https://ops.epo.org/3.2/rest-services/{i}")))
            .collect();
        for e in &entries {
            put(&store, e);
        }

        let catalog = Catalog::load(&store).unwrap();
        assert_eq!(catalog.len(), 3);
        for e in &entries {
            assert_eq!(catalog.entries().get(e.key()).unwrap().value(), &e.meta());
        }
    }

    #[test]
    fn scan_crosses_page_boundaries() {
        let store = FeoxStore::new(None).unwrap();
        let count = SCAN_PAGE * 2 + 7;
        for i in 0..count {
            put(&store, &entry(&format!("https://api.uspto.gov/api/v1/patent/applications/{i}")));
        }

        let catalog = Catalog::load(&store).unwrap();
        assert_eq!(catalog.len(), count as u64);
    }

    #[test]
    fn meta_without_data_is_deleted() {
        let store = FeoxStore::new(None).unwrap();
        let kept = entry("https://example.com/kept");
        let lost = entry("https://example.com/lost");
        put(&store, &kept);
        put(&store, &lost);
        store.delete(&data_key(lost.key())).unwrap();

        let catalog = Catalog::load(&store).unwrap();
        assert_eq!(catalog.len(), 1);
        assert!(!catalog.entries().contains_key(lost.key()));
        assert!(!store.contains_key(&meta_key(lost.key())));
    }

    #[test]
    fn data_without_meta_is_reindexed() {
        let store = FeoxStore::new(None).unwrap();
        let e = entry("https://api.uspto.gov/api/v1/assignments/42");
        put(&store, &e);
        store.delete(&meta_key(e.key())).unwrap();

        let catalog = Catalog::load(&store).unwrap();
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.entries().get(e.key()).unwrap().value(), &e.meta());
        assert!(store.contains_key(&meta_key(e.key())));
    }

    #[test]
    fn undecodable_data_is_deleted() {
        let store = FeoxStore::new(None).unwrap();
        let key = Fingerprint::compute(&Method::GET, "https://example.com/garbage", None);
        store.insert(&data_key(&key), b"\xff\xff\xff").unwrap();

        let catalog = Catalog::load(&store).unwrap();
        assert_eq!(catalog.len(), 0);
        assert!(!store.contains_key(&data_key(&key)));
    }

    #[test]
    fn delete_entry_removes_both_records() {
        let store = FeoxStore::new(None).unwrap();
        let e = entry("https://example.com/both");
        put(&store, &e);

        delete_entry(&store, e.key()).unwrap();
        assert!(!store.contains_key(&data_key(e.key())));
        assert!(!store.contains_key(&meta_key(e.key())));
        delete_entry(&store, e.key()).unwrap();
    }
}
