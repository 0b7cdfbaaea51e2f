//! Cache stage
//!
//! Serves non-versioned reads from cache and keeps the cache coherent:
//! resolved default reads are written back under the requested namespace,
//! published nodes are written under their resolved URI, and deletes evict
//! their slots. Only non-versioned reads are ever cached; meta is cleared
//! on cached responses so cache hits and cold reads look identical.

use std::collections::BTreeMap;

use crate::backends::cache;
use crate::conf::settings;
use crate::error::Result;
use crate::node::{Content, Meta};
use crate::pipeline::pipes::materialize_node;
use crate::pipeline::{NodeMap, Pipe};
use crate::uri::Uri;

pub struct CachePipe;

impl CachePipe {
    fn cache_on_get() -> bool {
        settings()
            .get("CACHE_PIPE")
            .as_ref()
            .and_then(|value| value.get("CACHE_ON_GET"))
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(true)
    }
}

impl Pipe for CachePipe {
    fn get_request(&self, request: &mut NodeMap) -> Result<NodeMap> {
        // Versioned reads bypass the cache entirely.
        let uris: Vec<Uri> = request
            .iter()
            .filter(|(_, node)| node.uri().version().is_none())
            .map(|(uri, _)| uri.clone())
            .collect();

        let mut finalized = NodeMap::new();
        if uris.is_empty() {
            return Ok(finalized);
        }

        for (uri, cached) in cache().get_many(&uris)? {
            if let Some(node) = request.remove(&uri) {
                materialize_node(
                    &node,
                    cached.uri,
                    Content::from(cached.content),
                    Some(Meta::new()),
                );
                finalized.insert(uri, node);
            }
        }
        Ok(finalized)
    }

    fn get_response(&self, response: NodeMap) -> Result<NodeMap> {
        if !Self::cache_on_get() {
            return Ok(response);
        }

        let mut records: BTreeMap<Uri, Option<String>> = BTreeMap::new();
        for (uri, node) in &response {
            if uri.version().is_some() {
                continue;
            }
            // Cache under the requested namespace, keeping the resolved
            // ext and version in the record.
            let origin = node.uri().with_namespace(uri.namespace());
            match node.content() {
                Content::None => {
                    records.insert(origin, None);
                }
                Content::Value(value) => {
                    if let Some(text) = value.as_str() {
                        records.insert(origin, Some(text.to_owned()));
                    }
                }
                Content::Empty => {}
            }
            // Cached nodes carry no meta; clear for coherence.
            node.update_meta(Meta::clear);
        }

        if !records.is_empty() {
            cache().set_many(&records)?;
        }
        Ok(response)
    }

    fn publish_response(&self, response: NodeMap) -> Result<NodeMap> {
        let records: BTreeMap<Uri, Option<String>> = response
            .values()
            .map(|node| {
                (
                    node.uri(),
                    node.content().as_text().map(str::to_owned),
                )
            })
            .collect();
        cache().set_many(&records)?;
        Ok(response)
    }

    fn delete_response(&self, response: NodeMap) -> Result<NodeMap> {
        let uris: Vec<Uri> = response.keys().cloned().collect();
        cache().delete_many(&uris)?;
        Ok(response)
    }
}
