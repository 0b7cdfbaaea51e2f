//! Public API
//!
//! The operations callers use day to day: `get` (lazy by default), `set`,
//! `delete`, `publish`, `revisions`, `load` and `search`. Each wraps its
//! URIs into nodes, fills in defaults (environment namespace, default
//! extension, draft version) and sends them through the pipeline.

use serde_json::Value;

use crate::conf::settings;
use crate::error::Result;
use crate::events;
use crate::node::{Content, Meta, Node};
use crate::pipeline::{BufferedNode, Method, pipeline};
use crate::plugins::plugins;
use crate::{backends, uri::Uri};

/// Options for [`set_with`].
#[derive(Debug, Clone)]
pub struct SetOptions {
    /// Publish right after storing; on by default.
    pub publish: bool,
    /// Meta values stored with the node.
    pub meta: Meta,
}

impl Default for SetOptions {
    fn default() -> Self {
        Self {
            publish: true,
            meta: Meta::new(),
        }
    }
}

/// The result of [`load`]: the resolved URI, raw plugin data, rendered
/// content and stored meta.
#[derive(Debug, Clone)]
pub struct LoadedNode {
    pub uri: Uri,
    pub data: Option<Value>,
    pub content: Content,
    pub meta: Meta,
}

fn default_ext() -> String {
    settings()
        .get_str("URI_DEFAULT_EXT")
        .unwrap_or_else(|| "txt".to_owned())
}

fn init_get_node(uri: &str, default: impl Into<Content>) -> Node {
    let node = Node::new(uri, default);

    // Default the namespace to the environment's primary namespace for
    // the URI's scheme.
    let current = node.uri();
    if current.namespace().is_none() {
        if let Some(scheme) = current.scheme() {
            let env = node.env();
            if let Some(namespace) = env.namespaces(scheme).first() {
                node.set_uri(current.with_namespace(Some(namespace)));
            }
        }
    }
    node
}

/// Lazily read a node. The returned handle buffers until content or URI is
/// read; equal addresses issued back to back coalesce into one pipeline
/// pass.
pub fn get(uri: &str, default: impl Into<Content>) -> BufferedNode {
    let node = init_get_node(uri, default);
    pipeline().buffer(Method::Get, node)
}

/// Read a node through the pipeline immediately.
pub fn get_eager(uri: &str, default: impl Into<Content>) -> Result<Node> {
    let node = init_get_node(uri, default);
    pipeline().send(Method::Get, std::slice::from_ref(&node))?;
    Ok(node)
}

/// Store (and by default publish) content for a URI.
pub fn set(uri: &str, data: impl Into<Content>) -> Result<Node> {
    set_with(uri, data, SetOptions::default())
}

/// Store content for a URI with explicit options.
pub fn set_with(uri: &str, data: impl Into<Content>, options: SetOptions) -> Result<Node> {
    let node = Node::with_meta(uri, data, options.meta);

    // Extend the URI with the default extension and draft version.
    let mut current = node.uri();
    if current.ext().is_none() {
        current = current.with_ext(Some(&default_ext()));
    }
    if current.version().is_none() {
        current = current.with_version(Some("draft"));
    }
    node.set_uri(current);

    pipeline().send(Method::Set, std::slice::from_ref(&node))?;

    if options.publish {
        let response = pipeline().send(Method::Publish, std::slice::from_ref(&node))?;
        let published: Vec<Node> = response.values().cloned().collect();
        events::trigger(events::PUBLISH, &published);
    }

    Ok(node)
}

/// Delete nodes. Returns the initial URIs of those that actually went
/// away.
pub fn delete(uris: &[&str]) -> Result<Vec<String>> {
    let nodes: Vec<Node> = uris
        .iter()
        .map(|uri| {
            let node = Node::new(uri, Content::Empty);
            let current = node.uri();
            if current.version().is_none() {
                node.set_uri(current.with_version(Some("draft")));
            }
            node
        })
        .collect();

    pipeline().send(Method::Delete, &nodes)?;

    Ok(nodes
        .iter()
        .filter(|node| node.content().is_none())
        .map(Node::initial_uri)
        .collect())
}

/// Publish a revision. Returns `None` when storage has no such node.
pub fn publish(uri: &str) -> Result<Option<Node>> {
    let node = Node::new(uri, Content::None);

    // Publish the draft unless a specific version was addressed.
    let mut current = node.uri();
    if current.version().is_none() {
        current = current.with_version(Some("draft"));
        node.set_uri(current.clone());
    }

    let response = pipeline().send(Method::Publish, std::slice::from_ref(&node))?;
    let published = response.get(&current).cloned();
    if let Some(published_node) = &published {
        events::trigger(events::PUBLISH, std::slice::from_ref(published_node));
    }
    Ok(published)
}

/// Every stored revision for a URI's key, with its published state.
pub fn revisions(uri: &str) -> Result<Vec<(Uri, bool)>> {
    backends::storage().get_revisions(uri)
}

/// Load a node without the cache: pinned version first, then draft, then
/// the published revision. The query part is preserved into the plugin
/// call for plugins that parameterize on it.
pub fn load(uri: &str) -> Result<LoadedNode> {
    let requested = Uri::parse(uri);
    let base = requested.with_query(None);

    let mut chain: Vec<Uri> = Vec::with_capacity(3);
    if base.version().is_some() {
        chain.push(base.clone());
    }
    if base.version() != Some("draft") {
        chain.push(base.with_version(Some("draft")));
    }
    chain.push(base.with_version(None));

    for candidate in chain {
        let stored = match backends::storage().get(candidate) {
            Ok(stored) => stored,
            Err(error) if error.is_not_found() => continue,
            Err(error) => return Err(error),
        };

        let node_uri = stored.uri.with_query(requested.query().cloned());
        let node = Node::with_meta(node_uri.as_str(), Content::text(stored.content), stored.meta);
        let plugin = plugins().resolve(&node.uri())?;
        let data = plugin.load_node(&node)?;
        let content = plugin.render_node(&node, data.clone())?;
        node.set_content(content);

        return Ok(LoadedNode {
            uri: node.uri(),
            data: Some(data),
            content: node.content(),
            meta: node.meta(),
        });
    }

    // Initialize a non-existing node without version, validating that its
    // extension resolves to a plugin.
    let mut missing = requested.with_version(None);
    if missing.ext().is_none() {
        missing = missing.with_ext(Some(&default_ext()));
    }
    plugins().resolve(&missing)?;

    Ok(LoadedNode {
        uri: missing,
        data: None,
        content: Content::None,
        meta: Meta::new(),
    })
}

/// Search stored base URIs, optionally narrowed by a query URI.
pub fn search(uri: Option<&str>) -> Result<Vec<Uri>> {
    backends::storage().search(uri)
}
