//! Shared test support: engine reset between tests and helper plugins.
//!
//! The engine keeps process-wide state (base settings, backends, plugin
//! library), so integration tests serialize on a global lock and reset
//! everything at the start.

#![allow(dead_code)]

use std::sync::{Arc, Mutex, MutexGuard, Once, PoisonError};

use once_cell::sync::Lazy;
use serde_json::{Value, json};

use contentflow::backends::{self, CacheBackend, CacheStats};
use contentflow::node::{Content, Node};
use contentflow::plugins::{Plugin, plugins};
use contentflow::{conf, events, pipeline};

static LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));
static TRACING: Once = Once::new();

/// Serialize the test and reset process-wide and thread-local engine
/// state. Hold the returned guard for the whole test.
pub fn setup() -> MutexGuard<'static, ()> {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });

    let guard = LOCK.lock().unwrap_or_else(PoisonError::into_inner);

    conf::settings().reset();
    conf::settings().configure(settings_map(json!({
        "ENVIRONMENT": {
            "default": {
                "i18n": "sv-se",
                "l10n": "tests",
                "g11n": "global",
            }
        },
    })));
    pipeline::pipeline().clear();
    events::clear();

    guard
}

/// Unwrap a JSON object literal into a settings map.
pub fn settings_map(value: Value) -> conf::SettingsMap {
    match value {
        Value::Object(map) => map,
        _ => panic!("expected a JSON object"),
    }
}

/// The active cache backend, for statistics assertions.
pub fn cache_backend() -> Arc<dyn CacheBackend> {
    backends::cache().backend().expect("cache backend")
}

/// Run a block and return the cache statistics it produced.
pub fn with_cache_stats(f: impl FnOnce()) -> CacheStats {
    let backend = cache_backend();
    backend.reset_stats();
    f();
    backend.stats()
}

/// Test plugin storing JSON payloads and rendering an upper-cased name.
pub struct UppercasePlugin;

impl Plugin for UppercasePlugin {
    fn ext(&self) -> &'static str {
        "up"
    }

    fn load(&self, content: Content) -> contentflow::Result<Value> {
        Ok(match content.as_text() {
            Some(text) => {
                serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_owned()))
            }
            None => content.to_json(),
        })
    }

    fn save(&self, data: Value) -> contentflow::Result<Value> {
        let encoded = serde_json::to_string(&data).expect("serializable plugin data");
        Ok(Value::String(encoded))
    }

    fn render(&self, data: Value) -> contentflow::Result<Content> {
        let name = match &data {
            Value::String(s) => s.clone(),
            Value::Object(map) => map
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned(),
            _ => String::new(),
        };
        Ok(Content::text(name.to_uppercase()))
    }
}

/// Test plugin rewriting node URIs inside load and render.
pub struct ReplacerPlugin;

impl Plugin for ReplacerPlugin {
    fn ext(&self) -> &'static str {
        "rpl"
    }

    fn load_node(&self, node: &Node) -> contentflow::Result<Value> {
        node.set_uri(node.uri().with_path(Some("page/loaded")));
        node.set_content("REPLACED");
        self.load(node.content())
    }

    fn render_node(&self, node: &Node, data: Value) -> contentflow::Result<Content> {
        node.set_uri(node.uri().with_path(Some("page/rendered")));
        self.render(data)
    }
}

/// Register the helper plugins into the active plugin library.
pub fn register_test_plugins() {
    plugins()
        .register(Arc::new(UppercasePlugin))
        .expect("register uppercase plugin");
    plugins()
        .register(Arc::new(ReplacerPlugin))
        .expect("register replacer plugin");
}
