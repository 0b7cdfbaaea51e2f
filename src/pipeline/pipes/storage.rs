//! Storage stage and namespace fallback
//!
//! The storage stage is the durable end of the pipeline: batch reads
//! finalize found nodes, writes persist and adopt the stored shape, and
//! deletes mark their nodes with unset content. The namespace-fallback
//! stage sits behind it and probes the scheme's remaining namespaces,
//! level by level, for nodes storage could not resolve.

use std::collections::VecDeque;

use crate::backends::storage;
use crate::conf::settings;
use crate::error::Result;
use crate::node::Content;
use crate::pipeline::pipes::materialize_node;
use crate::pipeline::{NodeMap, Pipe};
use crate::uri::Uri;

pub struct StoragePipe;

fn default_ext() -> String {
    settings()
        .get_str("URI_DEFAULT_EXT")
        .unwrap_or_else(|| "txt".to_owned())
}

impl Pipe for StoragePipe {
    fn get_request(&self, request: &mut NodeMap) -> Result<NodeMap> {
        let uris: Vec<Uri> = request.keys().cloned().collect();
        let stored = storage().get_many(&uris)?;

        let mut finalized = NodeMap::new();
        for (uri, stored_node) in stored {
            if let Some(node) = request.remove(&uri) {
                materialize_node(
                    &node,
                    stored_node.uri,
                    Content::text(stored_node.content),
                    Some(stored_node.meta),
                );
                finalized.insert(uri, node);
            }
        }
        Ok(finalized)
    }

    fn get_response(&self, response: NodeMap) -> Result<NodeMap> {
        // Non-persisted nodes never got an extension; give them the
        // default so plugin resolution and caching can address them.
        for node in response.values() {
            let uri = node.uri();
            if uri.ext().is_none() {
                node.set_uri(uri.with_ext(Some(&default_ext())));
            }
        }
        Ok(response)
    }

    fn set_request(&self, request: &mut NodeMap) -> Result<NodeMap> {
        for node in request.values() {
            let (stored, _created) = storage().set(node.uri(), &node.content(), &node.meta())?;
            node.set_uri(stored.uri);
            node.set_meta(stored.meta);
        }
        Ok(NodeMap::new())
    }

    fn delete_request(&self, request: &mut NodeMap) -> Result<NodeMap> {
        let uris: Vec<Uri> = request.keys().cloned().collect();
        let deleted = storage().delete_many(&uris)?;

        for (uri, stored_node) in deleted {
            if let Some(node) = request.get(&uri) {
                // Unset content signals the node has been deleted.
                materialize_node(node, stored_node.uri, Content::None, Some(stored_node.meta));
            }
        }
        Ok(NodeMap::new())
    }

    fn publish_request(&self, request: &mut NodeMap) -> Result<NodeMap> {
        let uris: Vec<Uri> = request.keys().cloned().collect();
        for uri in uris {
            let Some(node) = request.get(&uri).cloned() else {
                continue;
            };
            match storage().publish(&uri, &node.meta()) {
                Ok(stored_node) => {
                    materialize_node(
                        &node,
                        stored_node.uri,
                        Content::text(stored_node.content),
                        Some(stored_node.meta),
                    );
                }
                Err(error) if error.is_not_found() => {
                    request.remove(&uri);
                }
                Err(error) => return Err(error),
            }
        }
        Ok(NodeMap::new())
    }
}

pub struct NamespaceFallbackPipe;

impl Pipe for NamespaceFallbackPipe {
    fn get_request(&self, request: &mut NodeMap) -> Result<NodeMap> {
        // One fallback URI per non-primary namespace of the scheme, per
        // unresolved request.
        let mut fallbacks: Vec<(Uri, VecDeque<Uri>)> = Vec::new();
        for (uri, node) in request.iter() {
            let env = node.env();
            let namespaces = env.namespaces(uri.scheme().unwrap_or_default());
            if namespaces.len() > 1 {
                let candidates: VecDeque<Uri> = namespaces[1..]
                    .iter()
                    .map(|namespace| uri.with_namespace(Some(namespace)))
                    .collect();
                fallbacks.push((uri.clone(), candidates));
            }
        }

        let mut finalized = NodeMap::new();
        while !fallbacks.is_empty() {
            // Probe one namespace level for every remaining URI at a time.
            let mut level: Vec<(Uri, Uri)> = Vec::with_capacity(fallbacks.len());
            for (requested, candidates) in &mut fallbacks {
                if let Some(candidate) = candidates.pop_front() {
                    level.push((candidate, requested.clone()));
                }
            }

            let probes: Vec<Uri> = level.iter().map(|(probe, _)| probe.clone()).collect();
            let stored = storage().get_many(&probes)?;

            for (probe, requested) in &level {
                let Some(stored_node) = stored.get(probe) else {
                    continue;
                };
                if let Some(node) = request.remove(requested) {
                    materialize_node(
                        &node,
                        stored_node.uri.clone(),
                        Content::text(stored_node.content.clone()),
                        Some(stored_node.meta.clone()),
                    );
                    finalized.insert(requested.clone(), node);
                }
                fallbacks.retain(|(pending, _)| pending != requested);
            }

            fallbacks.retain(|(_, candidates)| !candidates.is_empty());
        }
        Ok(finalized)
    }
}
