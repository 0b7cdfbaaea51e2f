//! The built-in pipeline stages.
//!
//! Default order: cache, meta, plugin, storage, namespace-fallback. The
//! forward pass runs request hooks in that order; the response pass runs
//! in strict reverse, so the cache stage sees fully rendered content last.

mod cache;
mod meta;
mod plugin;
mod storage;

pub use cache::CachePipe;
pub use meta::MetaPipe;
pub use plugin::PluginPipe;
pub use storage::{NamespaceFallbackPipe, StoragePipe};

use crate::node::{Content, Meta as NodeMeta, Node};
use crate::uri::Uri;

/// Adopt a backend record onto a node: URI, content and meta.
pub(crate) fn materialize_node(node: &Node, uri: Uri, content: Content, meta: Option<NodeMeta>) {
    node.set_uri(uri);
    node.set_content(content);
    node.set_meta(meta.unwrap_or_default());
}
