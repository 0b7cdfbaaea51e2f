//! In-process memory backends
//!
//! The default cache and storage engines: plain maps behind mutexes,
//! linearizable per call, shared process-wide. The cache backend keeps
//! hit/miss statistics; coherence tests lean on them.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use super::cache::{CacheBackend, CacheStats, CacheValue};
use super::storage::{DatabaseBackend, NodeRow, RowQuery};

/// In-memory cache backend.
#[derive(Default)]
pub struct LocMemCache {
    records: Mutex<HashMap<String, CacheValue>>,
    calls: AtomicUsize,
    hits: AtomicUsize,
    misses: AtomicUsize,
    sets: AtomicUsize,
}

impl LocMemCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, CacheValue>> {
        self.records
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl CacheBackend for LocMemCache {
    fn raw_get(&self, key: &str) -> Option<CacheValue> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let value = self.lock().get(key).cloned();
        if value.is_some() {
            self.hits.fetch_add(1, Ordering::SeqCst);
        } else {
            self.misses.fetch_add(1, Ordering::SeqCst);
        }
        value
    }

    fn raw_get_many(&self, keys: &[String]) -> HashMap<String, CacheValue> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let records = self.lock();
        let mut found = HashMap::new();
        for key in keys {
            if let Some(value) = records.get(key) {
                self.hits.fetch_add(1, Ordering::SeqCst);
                found.insert(key.clone(), value.clone());
            } else {
                self.misses.fetch_add(1, Ordering::SeqCst);
            }
        }
        found
    }

    fn raw_set(&self, key: &str, value: CacheValue) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.sets.fetch_add(1, Ordering::SeqCst);
        self.lock().insert(key.to_owned(), value);
    }

    fn raw_set_many(&self, values: Vec<(String, CacheValue)>) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.sets.fetch_add(values.len(), Ordering::SeqCst);
        let mut records = self.lock();
        for (key, value) in values {
            records.insert(key, value);
        }
    }

    fn raw_delete(&self, key: &str) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.lock().remove(key);
    }

    fn raw_delete_many(&self, keys: &[String]) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut records = self.lock();
        for key in keys {
            records.remove(key);
        }
    }

    fn clear(&self) {
        self.lock().clear();
    }

    fn stats(&self) -> CacheStats {
        CacheStats {
            calls: self.calls.load(Ordering::SeqCst),
            hits: self.hits.load(Ordering::SeqCst),
            misses: self.misses.load(Ordering::SeqCst),
            sets: self.sets.load(Ordering::SeqCst),
        }
    }

    fn reset_stats(&self) {
        self.calls.store(0, Ordering::SeqCst);
        self.hits.store(0, Ordering::SeqCst);
        self.misses.store(0, Ordering::SeqCst);
        self.sets.store(0, Ordering::SeqCst);
    }
}

/// In-memory storage backend implementing the database row template.
#[derive(Default)]
pub struct LocMemStorage {
    rows: Mutex<BTreeMap<u64, NodeRow>>,
    sequence: AtomicU64,
}

impl LocMemStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<u64, NodeRow>> {
        self.rows
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Drop every row, for test setups.
    pub fn clear(&self) {
        self.lock().clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl DatabaseBackend for LocMemStorage {
    fn find(&self, query: &RowQuery) -> Option<(u64, NodeRow)> {
        self.lock()
            .iter()
            .find(|(_, row)| query.matches(row))
            .map(|(id, row)| (*id, row.clone()))
    }

    fn rows_for_key(&self, key: &str) -> Vec<(u64, NodeRow)> {
        self.lock()
            .iter()
            .filter(|(_, row)| row.key == key)
            .map(|(id, row)| (*id, row.clone()))
            .collect()
    }

    fn insert_row(&self, row: NodeRow) -> u64 {
        let id = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        self.lock().insert(id, row);
        id
    }

    fn update_row(&self, id: u64, row: NodeRow) {
        self.lock().insert(id, row);
    }

    fn remove_row(&self, id: u64) {
        self.lock().remove(&id);
    }

    fn all_rows(&self) -> Vec<NodeRow> {
        self.lock().values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::storage::{StorageBackend, node_key};
    use crate::node::Meta;
    use crate::uri::Uri;
    use serde_json::json;

    fn uri(s: &str) -> Uri {
        Uri::parse(s)
    }

    #[test]
    fn test_set_creates_then_updates() {
        let storage = LocMemStorage::new();
        let (node, created) = storage
            .set(&uri("i18n://sv-se@a.txt#draft"), "first", &Meta::new())
            .expect("set");
        assert!(created);
        assert_eq!(node.uri, "i18n://sv-se@a.txt#draft");

        let (node, created) = storage
            .set(&uri("i18n://sv-se@a.txt#draft"), "second", &Meta::new())
            .expect("set");
        assert!(!created);
        assert_eq!(node.content, "second");
        assert_eq!(storage.len(), 1);
    }

    #[test]
    fn test_get_without_version_requires_published() {
        let storage = LocMemStorage::new();
        storage
            .set(&uri("i18n://sv-se@a.txt#draft"), "A", &Meta::new())
            .expect("set");
        assert!(storage.get(&uri("i18n://sv-se@a")).is_err());

        storage
            .publish(&uri("i18n://sv-se@a#draft"), &Meta::new())
            .expect("publish");
        let node = storage.get(&uri("i18n://sv-se@a")).expect("get");
        assert_eq!(node.uri, "i18n://sv-se@a.txt#1");
        assert_eq!(node.meta.get("is_published"), Some(&json!(true)));
    }

    #[test]
    fn test_publish_assigns_monotone_versions() {
        let storage = LocMemStorage::new();
        storage
            .set(&uri("i18n://sv-se@a.txt#draft"), "v1", &Meta::new())
            .expect("set");
        let published = storage
            .publish(&uri("i18n://sv-se@a#draft"), &Meta::new())
            .expect("publish");
        assert_eq!(published.uri, "i18n://sv-se@a.txt#1");

        storage
            .set(&uri("i18n://sv-se@a.md#draft"), "v2", &Meta::new())
            .expect("set");
        let published = storage
            .publish(&uri("i18n://sv-se@a#draft"), &Meta::new())
            .expect("publish");
        assert_eq!(published.uri, "i18n://sv-se@a.md#2");

        // Exactly one published row per key.
        let published_rows = storage
            .rows_for_key(&node_key(&uri("i18n://sv-se@a")))
            .into_iter()
            .filter(|(_, row)| row.is_published)
            .count();
        assert_eq!(published_rows, 1);
    }

    #[test]
    fn test_publish_already_published_is_unchanged() {
        let storage = LocMemStorage::new();
        storage
            .set(&uri("i18n://sv-se@a.txt#draft"), "A", &Meta::new())
            .expect("set");
        storage
            .publish(&uri("i18n://sv-se@a#draft"), &Meta::new())
            .expect("publish");

        let mut meta = Meta::new();
        meta.insert("ignored".to_owned(), json!("yes"));
        let node = storage
            .publish(&uri("i18n://sv-se@a#1"), &meta)
            .expect("publish");
        assert_eq!(node.uri, "i18n://sv-se@a.txt#1");
        // Meta merge only happens on an actual publish transition.
        assert!(!node.meta.contains_key("ignored"));
    }

    #[test]
    fn test_duplicate_version_is_a_persistence_error() {
        let storage = LocMemStorage::new();
        storage
            .set(&uri("i18n://sv-se@a.txt#draft"), "first", &Meta::new())
            .expect("set");
        let error = storage
            .set(&uri("i18n://sv-se@a.md#draft"), "second", &Meta::new())
            .unwrap_err();
        assert!(matches!(error, crate::error::Error::Persistence { .. }));
    }

    #[test]
    fn test_get_revisions_lists_every_row() {
        let storage = LocMemStorage::new();
        storage
            .set(&uri("i18n://sv-se@a.txt#draft"), "v1", &Meta::new())
            .expect("set");
        storage
            .publish(&uri("i18n://sv-se@a#draft"), &Meta::new())
            .expect("publish");
        storage
            .set(&uri("i18n://sv-se@a.md#draft"), "v2", &Meta::new())
            .expect("set");

        let revisions = storage
            .get_revisions(&uri("i18n://sv-se@a"))
            .expect("revisions");
        assert_eq!(
            revisions,
            vec![
                (uri("i18n://sv-se@a.txt#1"), true),
                (uri("i18n://sv-se@a.md#draft"), false),
            ]
        );
    }

    #[test]
    fn test_search_filters_by_parts() {
        let storage = LocMemStorage::new();
        for (address, content) in [
            ("i18n://sv-se@page/title.txt#draft", "a"),
            ("i18n://en-us@page/title.txt#draft", "b"),
            ("l10n://local@foo/bar.txt#draft", "c"),
        ] {
            storage.set(&uri(address), content, &Meta::new()).expect("set");
        }

        let all = storage.search(&Uri::default()).expect("search");
        assert_eq!(all.len(), 3);

        let by_scheme = storage
            .search(&Uri::default().with_scheme(Some("l10n")))
            .expect("search");
        assert_eq!(by_scheme, vec![uri("l10n://local@foo/bar.txt")]);

        let by_namespace = storage
            .search(&Uri::default().with_namespace(Some("sv-se")))
            .expect("search");
        assert_eq!(by_namespace, vec![uri("i18n://sv-se@page/title.txt")]);

        let by_path = storage
            .search(&Uri::default().with_path(Some("page/title")))
            .expect("search");
        assert_eq!(by_path.len(), 2);
    }

    #[test]
    fn test_cache_stats_accounting() {
        let cache = LocMemCache::new();
        cache.raw_set("k", ("u".to_owned(), Some("c".to_owned())));
        assert!(cache.raw_get("k").is_some());
        assert!(cache.raw_get("missing").is_none());

        let stats = cache.stats();
        assert_eq!(stats.calls, 3);
        assert_eq!(stats.sets, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);

        cache.reset_stats();
        assert_eq!(cache.stats(), CacheStats::default());
    }
}
