//! Plugin stage
//!
//! Hands nodes to the plugin owning their extension: `save` on writes,
//! `publish` on publishes, `delete` after deletes, and a re-render on
//! every get/set/publish response. A missing plugin is silently skipped on
//! the write paths (the caller keeps unmodified content) but is a hard
//! configuration error at render time.

use crate::error::{Error, Result};
use crate::pipeline::{NodeMap, Pipe};
use crate::plugins::plugins;

pub struct PluginPipe;

impl PluginPipe {
    fn render_response(&self, response: NodeMap) -> Result<NodeMap> {
        for node in response.values() {
            let uri = node.uri();
            let plugin = plugins().resolve(&uri).map_err(|error| match error {
                Error::UnknownPlugin(ext) => Error::ImproperlyConfigured(format!(
                    "unknown plugin \"{ext}\" or improperly configured pipeline for node \"{uri}\""
                )),
                other => other,
            })?;
            let data = plugin.load_node(node)?;
            let content = plugin.render_node(node, data)?;
            node.set_content(content);
        }
        Ok(response)
    }
}

impl Pipe for PluginPipe {
    fn get_response(&self, response: NodeMap) -> Result<NodeMap> {
        self.render_response(response)
    }

    fn set_request(&self, request: &mut NodeMap) -> Result<NodeMap> {
        for node in request.values() {
            match plugins().resolve(&node.uri()) {
                Ok(plugin) => plugin.save_node(node)?,
                Err(Error::UnknownPlugin(_)) => {}
                Err(error) => return Err(error),
            }
        }
        Ok(NodeMap::new())
    }

    fn set_response(&self, response: NodeMap) -> Result<NodeMap> {
        self.render_response(response)
    }

    fn publish_request(&self, request: &mut NodeMap) -> Result<NodeMap> {
        for node in request.values() {
            match plugins().resolve(&node.uri()) {
                Ok(plugin) => plugin.publish_node(node)?,
                Err(Error::UnknownPlugin(_)) => {}
                Err(error) => return Err(error),
            }
        }
        Ok(NodeMap::new())
    }

    fn publish_response(&self, response: NodeMap) -> Result<NodeMap> {
        self.render_response(response)
    }

    fn delete_response(&self, response: NodeMap) -> Result<NodeMap> {
        for node in response.values() {
            match plugins().resolve(&node.uri()) {
                Ok(plugin) => {
                    // The sentinel marks a node the storage stage never
                    // deleted; plugins must not run delete on it.
                    if !node.content().is_empty_sentinel() {
                        plugin.delete_node(node)?;
                    }
                }
                Err(Error::UnknownPlugin(_)) => {}
                Err(error) => return Err(error),
            }
        }
        Ok(response)
    }
}
