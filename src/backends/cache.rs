//! Cache backend interface
//!
//! Cached records are `(uri_text, content)` pairs persisted verbatim,
//! keyed by the SHA-1 hex fingerprint of the URI with `ext` and `version`
//! cleared. All variants of one logical node therefore share a single
//! cache slot, and the fingerprint stays within the key-length and
//! whitespace restrictions of common cache servers.
//!
//! Backends implement the `raw_*` primitives over opaque keys; the
//! provided methods add fingerprinting and record decoding on top.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;

use sha1::{Digest, Sha1};

use crate::uri::Uri;

/// A decoded cache record. `content` is `None` when a resolved "known
/// missing" read was cached.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CachedNode {
    pub uri: Uri,
    pub content: Option<String>,
}

/// The raw persisted record shape.
pub type CacheValue = (String, Option<String>);

/// Hit/miss accounting, exposed by backends that keep it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub calls: usize,
    pub hits: usize,
    pub misses: usize,
    pub sets: usize,
}

/// The cache key fingerprint: SHA-1 hex over the URI with `ext` and
/// `version` cleared.
#[must_use]
pub fn cache_key(uri: &Uri) -> String {
    let base = uri.with_ext(None).with_version(None);
    let digest = Sha1::digest(base.as_str().as_bytes());
    let mut key = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(key, "{byte:02x}");
    }
    key
}

/// KV cache for resolved nodes.
pub trait CacheBackend: Send + Sync {
    fn raw_get(&self, key: &str) -> Option<CacheValue>;
    fn raw_get_many(&self, keys: &[String]) -> HashMap<String, CacheValue>;
    fn raw_set(&self, key: &str, value: CacheValue);
    fn raw_set_many(&self, values: Vec<(String, CacheValue)>);
    fn raw_delete(&self, key: &str);
    fn raw_delete_many(&self, keys: &[String]);

    /// Remove every record.
    fn clear(&self);

    fn stats(&self) -> CacheStats {
        CacheStats::default()
    }

    fn reset_stats(&self) {}

    /// The record for a URI, or `None` when missing or when the cached
    /// record's ext does not satisfy the requested one.
    fn get(&self, uri: &Uri) -> Option<CachedNode> {
        let value = self.raw_get(&cache_key(uri))?;
        decode_node(uri, &value)
    }

    /// Batch variant of [`get`](Self::get), keyed by the requested URIs.
    fn get_many(&self, uris: &[Uri]) -> BTreeMap<Uri, CachedNode> {
        let mut keys: HashMap<String, &Uri> = HashMap::with_capacity(uris.len());
        for uri in uris {
            keys.insert(cache_key(uri), uri);
        }
        let raw_keys: Vec<String> = keys.keys().cloned().collect();
        let found = self.raw_get_many(&raw_keys);

        let mut nodes = BTreeMap::new();
        for (key, value) in &found {
            if let Some(requested) = keys.get(key) {
                if let Some(node) = decode_node(requested, value) {
                    nodes.insert((*requested).clone(), node);
                }
            }
        }
        nodes
    }

    fn set(&self, uri: &Uri, content: Option<&str>) {
        self.raw_set(
            &cache_key(uri),
            (uri.to_string(), content.map(str::to_owned)),
        );
    }

    fn set_many(&self, nodes: &BTreeMap<Uri, Option<String>>) {
        let values: Vec<(String, CacheValue)> = nodes
            .iter()
            .map(|(uri, content)| (cache_key(uri), (uri.to_string(), content.clone())))
            .collect();
        self.raw_set_many(values);
    }

    fn delete(&self, uri: &Uri) {
        self.raw_delete(&cache_key(uri));
    }

    fn delete_many(&self, uris: &[Uri]) {
        let keys: Vec<String> = uris.iter().map(cache_key).collect();
        self.raw_delete_many(&keys);
    }
}

/// A cached record satisfies a request only when the requested ext is
/// absent or equal to the record's ext; a plugin-mismatched copy must not
/// serve a different-ext read.
fn decode_node(requested: &Uri, value: &CacheValue) -> Option<CachedNode> {
    let cached_uri = Uri::parse(&value.0);
    match requested.ext() {
        None => {}
        Some(ext) if Some(ext) == cached_uri.ext() => {}
        Some(_) => return None,
    }
    Some(CachedNode {
        uri: cached_uri,
        content: value.1.clone(),
    })
}
