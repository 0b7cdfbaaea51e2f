//! Storage backend interface
//!
//! Storage holds one row per stored revision:
//! `(key, content, plugin, version, is_published, meta)` where `key` is the
//! node key (URI with `ext`, `version` and `query` cleared), `version` is
//! the literal `draft` or a positive integer string, and at most one row
//! per key is published.
//!
//! [`StorageBackend`] is the outward interface used by the manager and the
//! pipeline. [`DatabaseBackend`] is a row-level template beneath it: a
//! backend provides the primitive row operations and the blanket impl
//! supplies get/set/delete/publish/revision/search semantics, meta-blob
//! merging and version assignment on top.

use std::collections::BTreeMap;

use serde_json::Value;
use tracing::warn;

use crate::error::{Error, Result};
use crate::node::Meta;
use crate::uri::Uri;

/// A node as returned from storage.
#[derive(Clone, Debug, PartialEq)]
pub struct StoredNode {
    pub uri: Uri,
    pub content: String,
    pub meta: Meta,
}

/// Durable store for node revisions.
pub trait StorageBackend: Send + Sync {
    /// The node for a URI, or [`Error::NodeDoesNotExist`].
    fn get(&self, uri: &Uri) -> Result<StoredNode>;

    /// Batch get; missing URIs are simply absent from the result.
    fn get_many(&self, uris: &[Uri]) -> Result<BTreeMap<Uri, StoredNode>>;

    /// Update-or-create. Returns the stored node and whether a row was
    /// created.
    fn set(&self, uri: &Uri, content: &str, meta: &Meta) -> Result<(StoredNode, bool)>;

    /// Delete the addressed row; `None` (with a logged warning) when it
    /// does not exist.
    fn delete(&self, uri: &Uri) -> Result<Option<StoredNode>>;

    /// Batch delete; only deleted entries appear in the result.
    fn delete_many(&self, uris: &[Uri]) -> Result<BTreeMap<Uri, StoredNode>>;

    /// Publish the addressed revision, un-publishing all siblings sharing
    /// its key. An already-published target is returned unchanged.
    fn publish(&self, uri: &Uri, meta: &Meta) -> Result<StoredNode>;

    /// Every version ever stored for the key, drafts included, with its
    /// published state.
    fn get_revisions(&self, uri: &Uri) -> Result<Vec<(Uri, bool)>>;

    /// Distinct base URIs matching any subset of scheme, namespace and
    /// path in the query URI, sorted by `(key, plugin)`.
    fn search(&self, uri: &Uri) -> Result<Vec<Uri>>;
}

impl std::fmt::Debug for dyn StorageBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn StorageBackend")
    }
}

/// One storage row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeRow {
    pub key: String,
    pub content: String,
    pub plugin: String,
    pub version: String,
    pub is_published: bool,
    pub meta: Option<String>,
}

/// Row selection: key plus optional plugin/version filters. Without a
/// version the published row is addressed.
#[derive(Clone, Debug)]
pub struct RowQuery {
    pub key: String,
    pub plugin: Option<String>,
    pub version: Option<String>,
    pub published_only: bool,
}

impl RowQuery {
    #[must_use]
    pub fn from_uri(uri: &Uri) -> Self {
        Self {
            key: node_key(uri),
            plugin: uri.ext().map(str::to_owned),
            version: uri.version().map(str::to_owned),
            published_only: uri.version().is_none(),
        }
    }

    #[must_use]
    pub fn matches(&self, row: &NodeRow) -> bool {
        if row.key != self.key {
            return false;
        }
        if let Some(plugin) = &self.plugin {
            if row.plugin != *plugin {
                return false;
            }
        }
        if let Some(version) = &self.version {
            if row.version != *version {
                return false;
            }
        } else if self.published_only && !row.is_published {
            return false;
        }
        true
    }
}

/// The row key shared by all revisions of one logical node.
#[must_use]
pub fn node_key(uri: &Uri) -> String {
    uri.with_ext(None)
        .with_version(None)
        .with_query(None)
        .to_string()
}

/// Row-level template for database-backed storage. Implement the primitive
/// row operations; the blanket [`StorageBackend`] impl supplies the
/// semantics.
pub trait DatabaseBackend: Send + Sync {
    /// The first row matching the query, with its row id.
    fn find(&self, query: &RowQuery) -> Option<(u64, NodeRow)>;

    /// All rows sharing a key, in insertion order.
    fn rows_for_key(&self, key: &str) -> Vec<(u64, NodeRow)>;

    fn insert_row(&self, row: NodeRow) -> u64;
    fn update_row(&self, id: u64, row: NodeRow);
    fn remove_row(&self, id: u64);

    /// Every row in the store, for search scans.
    fn all_rows(&self) -> Vec<NodeRow>;
}

impl<T: DatabaseBackend> StorageBackend for T {
    fn get(&self, uri: &Uri) -> Result<StoredNode> {
        let (_, row) = self
            .find(&RowQuery::from_uri(uri))
            .ok_or_else(|| Error::NodeDoesNotExist(uri.to_string()))?;
        Ok(serialize_row(uri, &row))
    }

    fn get_many(&self, uris: &[Uri]) -> Result<BTreeMap<Uri, StoredNode>> {
        let mut nodes = BTreeMap::new();
        for uri in uris {
            match self.get(uri) {
                Ok(node) => {
                    nodes.insert(uri.clone(), node);
                }
                Err(error) if error.is_not_found() => {}
                Err(error) => return Err(error),
            }
        }
        Ok(nodes)
    }

    fn set(&self, uri: &Uri, content: &str, meta: &Meta) -> Result<(StoredNode, bool)> {
        match self.find(&RowQuery::from_uri(uri)) {
            Some((id, mut row)) => {
                row.content = content.to_owned();
                if let Some(ext) = uri.ext() {
                    row.plugin = ext.to_owned();
                }
                if let Some(version) = uri.version() {
                    row.version = version.to_owned();
                }
                row.meta = merge_meta(row.meta.as_deref(), meta);
                self.update_row(id, row.clone());
                Ok((serialize_row(uri, &row), false))
            }
            None => {
                let row = self.create_row(uri, content, meta)?;
                Ok((serialize_row(uri, &row), true))
            }
        }
    }

    fn delete(&self, uri: &Uri) -> Result<Option<StoredNode>> {
        match self.find(&RowQuery::from_uri(uri)) {
            Some((id, row)) => {
                let node = serialize_row(uri, &row);
                self.remove_row(id);
                Ok(Some(node))
            }
            None => {
                warn!("tried to delete non existing node from storage: \"{uri}\"");
                Ok(None)
            }
        }
    }

    fn delete_many(&self, uris: &[Uri]) -> Result<BTreeMap<Uri, StoredNode>> {
        let mut deleted = BTreeMap::new();
        for uri in uris {
            if let Some(node) = self.delete(uri)? {
                deleted.insert(uri.clone(), node);
            }
        }
        Ok(deleted)
    }

    fn publish(&self, uri: &Uri, meta: &Meta) -> Result<StoredNode> {
        let (id, mut row) = self
            .find(&RowQuery::from_uri(uri))
            .ok_or_else(|| Error::NodeDoesNotExist(uri.to_string()))?;

        if !row.is_published {
            if !is_numeric_version(&row.version) {
                let versions: Vec<String> = self
                    .rows_for_key(&row.key)
                    .into_iter()
                    .map(|(_, sibling)| sibling.version)
                    .collect();
                row.version = next_version(&versions);
            }

            for (sibling_id, mut sibling) in self.rows_for_key(&row.key) {
                if sibling.is_published && sibling_id != id {
                    sibling.is_published = false;
                    self.update_row(sibling_id, sibling);
                }
            }

            row.meta = merge_meta(row.meta.as_deref(), meta);
            row.is_published = true;
            self.update_row(id, row.clone());
        }

        Ok(serialize_row(uri, &row))
    }

    fn get_revisions(&self, uri: &Uri) -> Result<Vec<(Uri, bool)>> {
        Ok(self
            .rows_for_key(&node_key(uri))
            .into_iter()
            .map(|(_, row)| {
                (
                    uri.with_ext(Some(&row.plugin))
                        .with_version(Some(&row.version)),
                    row.is_published,
                )
            })
            .collect())
    }

    fn search(&self, uri: &Uri) -> Result<Vec<Uri>> {
        let mut matches: Vec<(String, String)> = Vec::new();
        for row in self.all_rows() {
            if let Some(scheme) = uri.scheme() {
                if !row.key.starts_with(scheme) {
                    continue;
                }
            }
            if let Some(namespace) = uri.namespace() {
                if !row.key.contains(&format!("://{namespace}@")) {
                    continue;
                }
            }
            if let Some(path) = uri.path() {
                if !row.key.contains(&format!("@{path}")) {
                    continue;
                }
            }
            matches.push((row.key, row.plugin));
        }
        matches.sort();
        matches.dedup();
        Ok(matches
            .into_iter()
            .map(|(key, plugin)| Uri::parse(&key).with_ext(Some(&plugin)))
            .collect())
    }
}

/// Validation-and-insert shared by the blanket `set` impl.
trait CreateRow {
    fn create_row(&self, uri: &Uri, content: &str, meta: &Meta) -> Result<NodeRow>;
}

impl<T: DatabaseBackend> CreateRow for T {
    fn create_row(&self, uri: &Uri, content: &str, meta: &Meta) -> Result<NodeRow> {
        let key = node_key(uri);
        let plugin = uri.ext().ok_or_else(|| Error::Persistence {
            uri: uri.to_string(),
            reason: "missing ext".to_owned(),
        })?;
        let version = uri.version().ok_or_else(|| Error::Persistence {
            uri: uri.to_string(),
            reason: "missing version".to_owned(),
        })?;
        if self
            .rows_for_key(&key)
            .iter()
            .any(|(_, row)| row.version == version)
        {
            return Err(Error::Persistence {
                uri: uri.to_string(),
                reason: format!("duplicate version \"{version}\" for key \"{key}\""),
            });
        }

        let row = NodeRow {
            key,
            content: content.to_owned(),
            plugin: plugin.to_owned(),
            version: version.to_owned(),
            is_published: false,
            meta: encode_meta(meta),
        };
        self.insert_row(row.clone());
        Ok(row)
    }
}

/// Render a row as a stored node addressed through the requested URI.
/// `is_published` is surfaced in meta and always reflects the row.
#[must_use]
pub fn serialize_row(uri: &Uri, row: &NodeRow) -> StoredNode {
    let mut meta = decode_meta(row.meta.as_deref());
    meta.insert("is_published".to_owned(), Value::Bool(row.is_published));
    StoredNode {
        uri: uri
            .with_ext(Some(&row.plugin))
            .with_version(Some(&row.version)),
        content: row.content.clone(),
        meta,
    }
}

/// Decode a stored meta blob; absent and unparsable blobs are empty.
#[must_use]
pub fn decode_meta(encoded: Option<&str>) -> Meta {
    encoded
        .and_then(|blob| serde_json::from_str::<Value>(blob).ok())
        .and_then(|value| match value {
            Value::Object(map) => Some(map),
            _ => None,
        })
        .unwrap_or_default()
}

/// Encode a meta map as an opaque text blob; empty maps are stored as
/// absent.
#[must_use]
pub fn encode_meta(meta: &Meta) -> Option<String> {
    if meta.is_empty() {
        None
    } else {
        serde_json::to_string(meta).ok()
    }
}

/// Merge incoming meta into an encoded blob: non-null values overwrite,
/// null values delete their key. An empty incoming map clears the blob.
#[must_use]
pub fn merge_meta(encoded: Option<&str>, incoming: &Meta) -> Option<String> {
    if incoming.is_empty() {
        return None;
    }
    let mut merged = decode_meta(encoded);
    for (key, value) in incoming {
        if value.is_null() {
            merged.remove(key);
        } else {
            merged.insert(key.clone(), value.clone());
        }
    }
    encode_meta(&merged)
}

fn is_numeric_version(version: &str) -> bool {
    !version.is_empty() && version.bytes().all(|b| b.is_ascii_digit())
}

/// The next numeric version: max of the existing numeric versions plus one.
#[must_use]
pub fn next_version(versions: &[String]) -> String {
    let max = versions
        .iter()
        .filter(|v| is_numeric_version(v))
        .filter_map(|v| v.parse::<u64>().ok())
        .max()
        .unwrap_or(0);
    (max + 1).to_string()
}
