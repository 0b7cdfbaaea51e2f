//! Backend managers
//!
//! The cache and storage backends are resolved from the `CACHE` and
//! `STORAGE` settings: a URL-like value (`locmem://target?opt=value`), a
//! bare registered name, or an object with a `BACKEND` key plus options.
//! Constructors are registered by scheme name in process-wide registries;
//! configuration selects by name.
//!
//! Each manager is a process-wide singleton guarding its backend's public
//! surface: it validates URIs before any backend call and re-resolves the
//! backend lazily after settings changes.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use once_cell::sync::Lazy;
use serde_json::Value;
use tracing::debug;

use crate::conf::settings;
use crate::error::{Error, Result};
use crate::node::{Content, Meta};
use crate::uri::{SCHEME_SEPARATOR, Uri, UriPart};

pub mod cache;
pub mod locmem;
pub mod storage;

pub use cache::{CacheBackend, CacheStats, CachedNode};
pub use locmem::{LocMemCache, LocMemStorage};
pub use storage::{DatabaseBackend, StorageBackend, StoredNode};

/// A parsed backend selector.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackendConfig {
    /// Registered backend name (the URL scheme).
    pub backend: String,
    /// The part after `://`, e.g. a database name.
    pub target: Option<String>,
    /// Options from the query string or config object.
    pub options: BTreeMap<String, String>,
}

impl BackendConfig {
    /// Parse a backend selector from a settings value.
    pub fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::String(selector) => Ok(Self::from_selector(selector)),
            Value::Object(map) => {
                let Some(Value::String(selector)) = map.get("BACKEND") else {
                    return Err(Error::InvalidBackend(
                        Value::Object(map.clone()).to_string(),
                    ));
                };
                let mut config = Self::from_selector(selector);
                for (key, entry) in map {
                    match (key.as_str(), entry) {
                        ("BACKEND", _) => {}
                        ("NAME", Value::String(name)) => config.target = Some(name.clone()),
                        (key, Value::String(entry)) => {
                            config.options.insert(key.to_owned(), entry.clone());
                        }
                        (key, entry) => {
                            config.options.insert(key.to_owned(), entry.to_string());
                        }
                    }
                }
                Ok(config)
            }
            other => Err(Error::InvalidBackend(other.to_string())),
        }
    }

    fn from_selector(selector: &str) -> Self {
        let Some((scheme, rest)) = selector.split_once(SCHEME_SEPARATOR) else {
            return Self {
                backend: selector.to_owned(),
                target: None,
                options: BTreeMap::new(),
            };
        };
        let (target, params) = match rest.split_once('?') {
            Some((target, params)) => (target, Some(params)),
            None => (rest, None),
        };
        let mut options = BTreeMap::new();
        if let Some(params) = params {
            for param in params.split('&') {
                if let Some((key, value)) = param.split_once('=') {
                    options.insert(key.to_owned(), value.to_owned());
                }
            }
        }
        Self {
            backend: scheme.to_owned(),
            target: (!target.is_empty()).then(|| target.to_owned()),
            options,
        }
    }
}

type CacheFactory = Arc<dyn Fn(&BackendConfig) -> Result<Arc<dyn CacheBackend>> + Send + Sync>;
type StorageFactory = Arc<dyn Fn(&BackendConfig) -> Result<Arc<dyn StorageBackend>> + Send + Sync>;

static CACHE_FACTORIES: Lazy<RwLock<HashMap<String, CacheFactory>>> = Lazy::new(|| {
    let mut factories: HashMap<String, CacheFactory> = HashMap::new();
    factories.insert(
        "locmem".to_owned(),
        Arc::new(|_config| Ok(Arc::new(LocMemCache::new()) as Arc<dyn CacheBackend>)),
    );
    RwLock::new(factories)
});

static STORAGE_FACTORIES: Lazy<RwLock<HashMap<String, StorageFactory>>> = Lazy::new(|| {
    let mut factories: HashMap<String, StorageFactory> = HashMap::new();
    factories.insert(
        "locmem".to_owned(),
        Arc::new(|_config| Ok(Arc::new(LocMemStorage::new()) as Arc<dyn StorageBackend>)),
    );
    RwLock::new(factories)
});

/// Register a cache backend constructor under a scheme name.
pub fn register_cache_backend(
    name: &str,
    factory: impl Fn(&BackendConfig) -> Result<Arc<dyn CacheBackend>> + Send + Sync + 'static,
) {
    CACHE_FACTORIES
        .write()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .insert(name.to_owned(), Arc::new(factory));
}

/// Register a storage backend constructor under a scheme name.
pub fn register_storage_backend(
    name: &str,
    factory: impl Fn(&BackendConfig) -> Result<Arc<dyn StorageBackend>> + Send + Sync + 'static,
) {
    STORAGE_FACTORIES
        .write()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .insert(name.to_owned(), Arc::new(factory));
}

/// Resolve a cache backend instance from a settings value.
pub fn resolve_cache_backend(value: &Value) -> Result<Arc<dyn CacheBackend>> {
    let config = BackendConfig::from_value(value)?;
    let factory = CACHE_FACTORIES
        .read()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .get(&config.backend)
        .cloned()
        .ok_or_else(|| Error::InvalidBackend(config.backend.clone()))?;
    debug!("resolving cache backend \"{}\"", config.backend);
    factory(&config)
}

/// Resolve a storage backend instance from a settings value.
pub fn resolve_storage_backend(value: &Value) -> Result<Arc<dyn StorageBackend>> {
    let config = BackendConfig::from_value(value)?;
    let factory = STORAGE_FACTORIES
        .read()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .get(&config.backend)
        .cloned()
        .ok_or_else(|| Error::InvalidBackend(config.backend.clone()))?;
    debug!("resolving storage backend \"{}\"", config.backend);
    factory(&config)
}

static CACHE: Lazy<CacheManager> = Lazy::new(|| {
    settings().watch(|| {
        CACHE.stale.store(true, Ordering::SeqCst);
        Ok(())
    });
    CacheManager {
        backend: RwLock::new(None),
        stale: AtomicBool::new(true),
    }
});

static STORAGE: Lazy<StorageManager> = Lazy::new(|| {
    settings().watch(|| {
        STORAGE.stale.store(true, Ordering::SeqCst);
        Ok(())
    });
    StorageManager {
        backend: RwLock::new(None),
        stale: AtomicBool::new(true),
    }
});

/// The process-wide cache manager.
pub fn cache() -> &'static CacheManager {
    &CACHE
}

/// The process-wide storage manager.
pub fn storage() -> &'static StorageManager {
    &STORAGE
}

/// Cache backend manager: URI validation plus lazy backend resolution.
pub struct CacheManager {
    backend: RwLock<Option<Arc<dyn CacheBackend>>>,
    stale: AtomicBool,
}

impl CacheManager {
    /// The active backend, re-resolved from the `CACHE` setting after
    /// settings changes.
    pub fn backend(&self) -> Result<Arc<dyn CacheBackend>> {
        if !self.stale.load(Ordering::SeqCst) {
            if let Some(backend) = self
                .backend
                .read()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .clone()
            {
                return Ok(backend);
            }
        }
        let value = settings()
            .get("CACHE")
            .ok_or_else(|| Error::ImproperlyConfigured("missing CACHE setting".to_owned()))?;
        let backend = resolve_cache_backend(&value)?;
        *self
            .backend
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(Arc::clone(&backend));
        self.stale.store(false, Ordering::SeqCst);
        Ok(backend)
    }

    pub fn get(&self, uri: impl Into<Uri>) -> Result<Option<CachedNode>> {
        let uri = self.clean_get_uri(uri.into())?;
        Ok(self.backend()?.get(&uri))
    }

    pub fn get_many(&self, uris: &[Uri]) -> Result<BTreeMap<Uri, CachedNode>> {
        for uri in uris {
            self.clean_get_uri(uri.clone())?;
        }
        Ok(self.backend()?.get_many(uris))
    }

    pub fn set(&self, uri: impl Into<Uri>, content: Option<&str>) -> Result<()> {
        let uri = self.clean_set_uri(uri.into())?;
        self.backend()?.set(&uri, content);
        Ok(())
    }

    pub fn set_many(&self, nodes: &BTreeMap<Uri, Option<String>>) -> Result<()> {
        for uri in nodes.keys() {
            self.clean_set_uri(uri.clone())?;
        }
        self.backend()?.set_many(nodes);
        Ok(())
    }

    pub fn delete(&self, uri: impl Into<Uri>) -> Result<()> {
        let uri = self.clean_get_uri(uri.into())?;
        self.backend()?.delete(&uri);
        Ok(())
    }

    pub fn delete_many(&self, uris: &[Uri]) -> Result<()> {
        for uri in uris {
            self.clean_get_uri(uri.clone())?;
        }
        self.backend()?.delete_many(uris);
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        self.backend()?.clear();
        Ok(())
    }

    fn clean_get_uri(&self, uri: Uri) -> Result<Uri> {
        uri.require_parts(&[UriPart::Namespace, UriPart::Path])?;
        Ok(uri)
    }

    fn clean_set_uri(&self, uri: Uri) -> Result<Uri> {
        uri.require_parts(&[UriPart::Namespace, UriPart::Path, UriPart::Ext])?;
        Ok(uri)
    }
}

/// Storage backend manager: URI validation plus lazy backend resolution.
pub struct StorageManager {
    backend: RwLock<Option<Arc<dyn StorageBackend>>>,
    stale: AtomicBool,
}

impl StorageManager {
    /// The active backend, re-resolved from the `STORAGE` setting after
    /// settings changes.
    pub fn backend(&self) -> Result<Arc<dyn StorageBackend>> {
        if !self.stale.load(Ordering::SeqCst) {
            if let Some(backend) = self
                .backend
                .read()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .clone()
            {
                return Ok(backend);
            }
        }
        let value = settings()
            .get("STORAGE")
            .ok_or_else(|| Error::ImproperlyConfigured("missing STORAGE setting".to_owned()))?;
        let backend = resolve_storage_backend(&value)?;
        *self
            .backend
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(Arc::clone(&backend));
        self.stale.store(false, Ordering::SeqCst);
        Ok(backend)
    }

    pub fn get(&self, uri: impl Into<Uri>) -> Result<StoredNode> {
        let uri = self.clean_get_uri(uri.into())?;
        self.backend()?.get(&uri)
    }

    pub fn get_many(&self, uris: &[Uri]) -> Result<BTreeMap<Uri, StoredNode>> {
        for uri in uris {
            self.clean_get_uri(uri.clone())?;
        }
        self.backend()?.get_many(uris)
    }

    /// Persist node content and meta. Unset content is a caller error;
    /// non-text content is stored in its JSON encoding.
    pub fn set(
        &self,
        uri: impl Into<Uri>,
        content: &Content,
        meta: &Meta,
    ) -> Result<(StoredNode, bool)> {
        let uri = self.clean_set_uri(uri.into())?;
        let text = match content {
            Content::None | Content::Empty => {
                return Err(Error::NoneContent(uri.to_string()));
            }
            Content::Value(Value::String(s)) => s.clone(),
            Content::Value(other) => {
                serde_json::to_string(other).map_err(|error| Error::Persistence {
                    uri: uri.to_string(),
                    reason: error.to_string(),
                })?
            }
        };
        self.backend()?.set(&uri, &text, meta)
    }

    pub fn delete(&self, uri: impl Into<Uri>) -> Result<Option<StoredNode>> {
        let uri = self.clean_delete_uri(uri.into())?;
        self.backend()?.delete(&uri)
    }

    pub fn delete_many(&self, uris: &[Uri]) -> Result<BTreeMap<Uri, StoredNode>> {
        for uri in uris {
            self.clean_delete_uri(uri.clone())?;
        }
        self.backend()?.delete_many(uris)
    }

    pub fn publish(&self, uri: impl Into<Uri>, meta: &Meta) -> Result<StoredNode> {
        let uri = self.clean_delete_uri(uri.into())?;
        self.backend()?.publish(&uri, meta)
    }

    pub fn get_revisions(&self, uri: impl Into<Uri>) -> Result<Vec<(Uri, bool)>> {
        let uri = self.clean_get_uri(uri.into())?;
        self.backend()?.get_revisions(&uri)
    }

    /// Search stored base URIs. A query without an explicit scheme
    /// separator matches any scheme.
    pub fn search(&self, uri: Option<&str>) -> Result<Vec<Uri>> {
        let query = match uri {
            None => Uri::default(),
            Some(text) => {
                let parsed = Uri::parse(text);
                if text.contains(SCHEME_SEPARATOR) {
                    parsed
                } else {
                    parsed.with_scheme(None)
                }
            }
        };
        self.backend()?.search(&query)
    }

    fn clean_get_uri(&self, uri: Uri) -> Result<Uri> {
        uri.require_parts(&[UriPart::Namespace, UriPart::Path])?;
        Ok(uri)
    }

    fn clean_set_uri(&self, uri: Uri) -> Result<Uri> {
        uri.require_parts(&[
            UriPart::Namespace,
            UriPart::Path,
            UriPart::Ext,
            UriPart::Version,
        ])?;
        Ok(uri)
    }

    fn clean_delete_uri(&self, uri: Uri) -> Result<Uri> {
        uri.require_parts(&[UriPart::Namespace, UriPart::Path, UriPart::Version])?;
        Ok(uri)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_backend_config_from_url() {
        let config = BackendConfig::from_value(&json!("locmem://")).expect("config");
        assert_eq!(config.backend, "locmem");
        assert_eq!(config.target, None);
        assert!(config.options.is_empty());

        let config =
            BackendConfig::from_value(&json!("locmem://cachetable?timeout=30")).expect("config");
        assert_eq!(config.backend, "locmem");
        assert_eq!(config.target.as_deref(), Some("cachetable"));
        assert_eq!(config.options.get("timeout").map(String::as_str), Some("30"));
    }

    #[test]
    fn test_backend_config_from_object() {
        let config = BackendConfig::from_value(&json!({
            "BACKEND": "locmem://",
            "NAME": "content",
            "OPTION": "x",
        }))
        .expect("config");
        assert_eq!(config.backend, "locmem");
        assert_eq!(config.target.as_deref(), Some("content"));
        assert_eq!(config.options.get("OPTION").map(String::as_str), Some("x"));
    }

    #[test]
    fn test_backend_config_requires_backend_key() {
        assert!(BackendConfig::from_value(&json!({"NAME": "x"})).is_err());
        assert!(BackendConfig::from_value(&json!(42)).is_err());
    }

    #[test]
    fn test_unknown_backend_scheme_is_invalid() {
        let error = resolve_storage_backend(&json!("bogus://")).unwrap_err();
        assert!(matches!(error, Error::InvalidBackend(name) if name == "bogus"));
        let error = resolve_storage_backend(&json!("invalid")).unwrap_err();
        assert!(matches!(error, Error::InvalidBackend(name) if name == "invalid"));
    }

    #[test]
    fn test_registered_backend_resolves() {
        register_storage_backend("memtest", |_config| {
            Ok(Arc::new(LocMemStorage::new()) as Arc<dyn StorageBackend>)
        });
        assert!(resolve_storage_backend(&json!("memtest://")).is_ok());
    }
}
