//! Plugins
//!
//! A plugin owns one extension and translates between the three shapes a
//! node's content takes: the persisted string in storage, the structured
//! plugin data handed to callers of `load`, and the rendered output
//! returned from reads. The default implementations pass content through
//! untouched, so a minimal plugin only declares its extension.
//!
//! The node-level hooks (`*_node`) receive the full node and may rewrite
//! its URI; the content-level hooks below them are what most plugins
//! override.
//!
//! The process-wide [`PluginLibrary`] maps extensions to shared plugin
//! instances and rebuilds itself from the `PLUGINS` setting when settings
//! change. Plugin constructors are registered by short name, and
//! configuration selects by name.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use once_cell::sync::Lazy;
use serde_json::Value;

use crate::conf::settings;
use crate::error::{Error, Result};
use crate::node::{Content, Meta, Node};
use crate::uri::Uri;

pub mod md;
pub mod txt;

pub use md::MarkdownPlugin;
pub use txt::TextPlugin;

/// One content plugin, shared across threads.
pub trait Plugin: Send + Sync {
    /// The extension this plugin is responsible for.
    fn ext(&self) -> &'static str;

    /// Turn persisted content into plugin data.
    fn load(&self, content: Content) -> Result<Value> {
        Ok(content.to_json())
    }

    /// Turn plugin data into the content string to persist. Side resources
    /// (files, thumbnails) are persisted here too.
    fn save(&self, data: Value) -> Result<Value> {
        Ok(data)
    }

    /// Delete side resources belonging to the data.
    fn delete(&self, _data: &Value) -> Result<()> {
        Ok(())
    }

    /// Render plugin data into output content.
    fn render(&self, data: Value) -> Result<Content> {
        Ok(Content::from_json(data))
    }

    /// Node-level load; may rewrite `node.uri`.
    fn load_node(&self, node: &Node) -> Result<Value> {
        self.load(node.content())
    }

    /// Node-level save: replaces the node content with its serialized form.
    fn save_node(&self, node: &Node) -> Result<()> {
        let serialized = self.save(node.content().to_json())?;
        node.set_content(Content::from_json(serialized));
        Ok(())
    }

    /// Hook run when a node is published.
    fn publish_node(&self, _node: &Node) -> Result<()> {
        Ok(())
    }

    /// Node-level delete of side resources.
    fn delete_node(&self, node: &Node) -> Result<()> {
        self.delete(&node.content().to_json())
    }

    /// Node-level render; may rewrite `node.uri`.
    fn render_node(&self, node: &Node, data: Value) -> Result<Content> {
        let _ = node;
        self.render(data)
    }

    /// Plugin-specific settings, read from the settings key matching the
    /// upper-cased extension.
    fn plugin_settings(&self) -> Meta {
        match settings().get(&self.ext().to_uppercase()) {
            Some(Value::Object(map)) => map,
            _ => Meta::new(),
        }
    }
}

impl std::fmt::Debug for dyn Plugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("dyn Plugin").field("ext", &self.ext()).finish()
    }
}

type PluginFactory = Arc<dyn Fn() -> Arc<dyn Plugin> + Send + Sync>;

static FACTORIES: Lazy<RwLock<HashMap<String, PluginFactory>>> = Lazy::new(|| {
    let mut factories: HashMap<String, PluginFactory> = HashMap::new();
    factories.insert("txt".to_owned(), Arc::new(|| Arc::new(TextPlugin)));
    factories.insert("md".to_owned(), Arc::new(|| Arc::new(MarkdownPlugin)));
    RwLock::new(factories)
});

/// Register a plugin constructor under a short name, so the `PLUGINS`
/// setting can select it.
pub fn register_plugin_factory(
    name: &str,
    factory: impl Fn() -> Arc<dyn Plugin> + Send + Sync + 'static,
) {
    FACTORIES
        .write()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .insert(name.to_owned(), Arc::new(factory));
}

static LIBRARY: Lazy<PluginLibrary> = Lazy::new(|| {
    settings().watch(|| {
        plugins().mark_stale();
        Ok(())
    });
    PluginLibrary {
        plugins: RwLock::new(HashMap::new()),
        stale: AtomicBool::new(true),
    }
});

/// The process-wide plugin library.
pub fn plugins() -> &'static PluginLibrary {
    &LIBRARY
}

/// Extension to plugin-instance map, rebuilt on settings changes.
pub struct PluginLibrary {
    plugins: RwLock<HashMap<String, Arc<dyn Plugin>>>,
    stale: AtomicBool,
}

impl PluginLibrary {
    /// Rebuild the instance map from the `PLUGINS` setting.
    pub fn reload(&self) -> Result<()> {
        let names = settings().get_str_list("PLUGINS");
        let factories = FACTORIES
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut instances = HashMap::with_capacity(names.len());
        for name in names {
            let Some(factory) = factories.get(&name) else {
                return Err(Error::ImproperlyConfigured(format!(
                    "could not resolve plugin \"{name}\"; is it registered?"
                )));
            };
            let plugin = factory();
            instances.insert(plugin.ext().to_owned(), plugin);
        }
        *self
            .plugins
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = instances;
        self.stale.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Add a plugin instance to the current map. Instance registrations do
    /// not survive a settings-triggered reload; register a factory for
    /// that.
    pub fn register(&self, plugin: Arc<dyn Plugin>) -> Result<()> {
        self.ensure_loaded()?;
        self.plugins
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(plugin.ext().to_owned(), plugin);
        Ok(())
    }

    /// The plugin for an extension, or [`Error::UnknownPlugin`].
    pub fn get(&self, ext: &str) -> Result<Arc<dyn Plugin>> {
        self.ensure_loaded()?;
        self.plugins
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(ext)
            .cloned()
            .ok_or_else(|| Error::UnknownPlugin(ext.to_owned()))
    }

    /// The plugin for a URI's extension.
    pub fn resolve(&self, uri: &Uri) -> Result<Arc<dyn Plugin>> {
        self.get(uri.ext().unwrap_or(""))
    }

    /// The registered extensions, sorted.
    pub fn exts(&self) -> Result<Vec<String>> {
        self.ensure_loaded()?;
        let mut exts: Vec<String> = self
            .plugins
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        exts.sort();
        Ok(exts)
    }

    fn mark_stale(&self) {
        self.stale.store(true, Ordering::SeqCst);
    }

    fn ensure_loaded(&self) -> Result<()> {
        if self.stale.load(Ordering::SeqCst) {
            self.reload()?;
        }
        Ok(())
    }
}
