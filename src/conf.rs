//! Settings
//!
//! A process-wide mapping from UPPER_SNAKE keys to arbitrary JSON values,
//! with a stackable thread-local overlay for scoped overrides. Components
//! that cache derived state (pipe chains, plugin library, backend managers,
//! the environment stack) observe changes either through the [`watch`]
//! listener hook or by comparing [`generation`] counters and rebuilding
//! lazily.
//!
//! Listener callbacks fire synchronously on every mutation, on the mutating
//! thread. A failing callback is logged and swallowed; it never aborts the
//! settings change.
//!
//! [`watch`]: Settings::watch
//! [`generation`]: Settings::generation

use std::cell::{Cell, RefCell};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};

use once_cell::sync::Lazy;
use serde_json::Value;
use tracing::warn;

pub mod defaults;

/// The settings value map. Plain `serde_json` objects keep the crate free
/// of a bespoke config value type.
pub type SettingsMap = serde_json::Map<String, Value>;

type Listener = std::sync::Arc<dyn Fn() -> anyhow::Result<()> + Send + Sync>;

/// A monotonically increasing pair of (process, thread-overlay) change
/// counters. Two equal generations mean the effective settings for the
/// current thread have not changed in between.
pub type Generation = (u64, u64);

static SETTINGS: Lazy<Settings> = Lazy::new(Settings::with_defaults);

thread_local! {
    static LOCAL: RefCell<SettingsMap> = RefCell::new(SettingsMap::new());
    static OVERLAY: RefCell<Vec<SettingsMap>> = const { RefCell::new(Vec::new()) };
    static OVERLAY_GENERATION: Cell<u64> = const { Cell::new(0) };
}

/// The process-wide settings instance.
pub fn settings() -> &'static Settings {
    &SETTINGS
}

/// Process-wide base settings plus thread-local overlay access.
pub struct Settings {
    base: RwLock<SettingsMap>,
    listeners: Mutex<Vec<Listener>>,
    base_generation: AtomicU64,
}

impl Settings {
    fn with_defaults() -> Self {
        Self {
            base: RwLock::new(defaults::default_settings()),
            listeners: Mutex::new(Vec::new()),
            base_generation: AtomicU64::new(0),
        }
    }

    /// Look up a settings value. Thread-local overlay layers are applied on
    /// top of the base value, deep-merging object values so a scoped
    /// override of one nested key leaves its siblings visible.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        let mut value = self
            .base
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(key)
            .cloned();
        let mut apply = |layer: &SettingsMap| {
            if let Some(overriding) = layer.get(key) {
                value = Some(match value.take() {
                    Some(mut base) => {
                        deep_merge(&mut base, overriding);
                        base
                    }
                    None => overriding.clone(),
                });
            }
        };
        LOCAL.with_borrow(&mut apply);
        OVERLAY.with_borrow(|layers| layers.iter().for_each(apply));
        value
    }

    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<String> {
        match self.get(key)? {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key)?.as_bool()
    }

    /// A list-of-strings value; non-string elements are skipped.
    #[must_use]
    pub fn get_str_list(&self, key: &str) -> Vec<String> {
        match self.get(key) {
            Some(Value::Array(items)) => items
                .into_iter()
                .filter_map(|item| match item {
                    Value::String(s) => Some(s),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Update base settings. Only UPPER_SNAKE keys are accepted; keys are
    /// replaced wholesale. All listeners are notified.
    pub fn configure(&self, values: SettingsMap) {
        {
            let mut base = self
                .base
                .write()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            for (key, value) in values {
                if is_settings_key(&key) {
                    base.insert(key, value);
                }
            }
        }
        self.base_generation.fetch_add(1, Ordering::SeqCst);
        self.notify();
    }

    /// Merge values into this thread's persistent overlay layer. Other
    /// threads keep reading base settings untouched.
    pub fn configure_local(&self, values: SettingsMap) {
        LOCAL.with_borrow_mut(|layer| {
            for (key, value) in values {
                if !is_settings_key(&key) {
                    continue;
                }
                match layer.get_mut(&key) {
                    Some(existing) => deep_merge(existing, &value),
                    None => {
                        layer.insert(key, value);
                    }
                }
            }
        });
        self.bump_overlay();
    }

    /// Push a scoped overlay layer, removed when the returned guard drops.
    #[must_use]
    pub fn scoped(&self, values: SettingsMap) -> ScopedSettings {
        OVERLAY.with_borrow_mut(|layers| {
            layers.push(
                values
                    .into_iter()
                    .filter(|(key, _)| is_settings_key(key))
                    .collect(),
            );
        });
        self.bump_overlay();
        ScopedSettings { _private: () }
    }

    /// Register a change listener. Listeners are expected to be registered
    /// once, at component initialization.
    pub fn watch(&self, callback: impl Fn() -> anyhow::Result<()> + Send + Sync + 'static) {
        self.listeners
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(std::sync::Arc::new(callback));
    }

    /// The effective settings generation for the current thread.
    #[must_use]
    pub fn generation(&self) -> Generation {
        (
            self.base_generation.load(Ordering::SeqCst),
            OVERLAY_GENERATION.get(),
        )
    }

    /// Restore base settings to the built-in defaults and drop this
    /// thread's overlay. Intended for test setups.
    pub fn reset(&self) {
        {
            let mut base = self
                .base
                .write()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            *base = defaults::default_settings();
        }
        LOCAL.with_borrow_mut(SettingsMap::clear);
        OVERLAY.with_borrow_mut(Vec::clear);
        self.base_generation.fetch_add(1, Ordering::SeqCst);
        self.bump_overlay();
    }

    fn bump_overlay(&self) {
        OVERLAY_GENERATION.set(OVERLAY_GENERATION.get() + 1);
        self.notify();
    }

    fn notify(&self) {
        let listeners: Vec<Listener> = self
            .listeners
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone();
        for listener in listeners {
            if let Err(error) = listener() {
                warn!("failed to notify listener about new settings: {error}");
            }
        }
    }
}

/// Guard for a scoped settings overlay; pops its layer on drop.
pub struct ScopedSettings {
    _private: (),
}

impl Drop for ScopedSettings {
    fn drop(&mut self) {
        OVERLAY.with_borrow_mut(|layers| {
            layers.pop();
        });
        settings().bump_overlay();
    }
}

fn is_settings_key(key: &str) -> bool {
    key.chars().any(|c| c.is_ascii_alphabetic()) && key == key.to_ascii_uppercase()
}

fn deep_merge(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base, overlay) => *base = overlay.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> SettingsMap {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_defaults_present() {
        assert_eq!(
            settings().get_str("URI_DEFAULT_EXT"),
            Some("txt".to_owned())
        );
        assert_eq!(
            settings().get_str("URI_DEFAULT_SCHEME"),
            Some("i18n".to_owned())
        );
    }

    #[test]
    fn test_scoped_overlay_replaces_and_restores() {
        let before = settings().get_str("URI_DEFAULT_EXT");
        {
            let _guard = settings().scoped(map(json!({"URI_DEFAULT_EXT": "md"})));
            assert_eq!(settings().get_str("URI_DEFAULT_EXT"), Some("md".to_owned()));
        }
        assert_eq!(settings().get_str("URI_DEFAULT_EXT"), before);
    }

    #[test]
    fn test_scoped_overlay_deep_merges_objects() {
        let _guard = settings().scoped(map(json!({"CACHE_PIPE": {"EXTRA": 1}})));
        let value = settings().get("CACHE_PIPE").expect("value");
        assert_eq!(value["CACHE_ON_GET"], json!(true));
        assert_eq!(value["EXTRA"], json!(1));
    }

    #[test]
    fn test_overlay_is_thread_local() {
        let _guard = settings().scoped(map(json!({"URI_DEFAULT_SCHEME": "l10n"})));
        let seen = std::thread::spawn(|| settings().get_str("URI_DEFAULT_SCHEME"))
            .join()
            .expect("thread");
        assert_eq!(seen, Some("i18n".to_owned()));
        assert_eq!(
            settings().get_str("URI_DEFAULT_SCHEME"),
            Some("l10n".to_owned())
        );
    }

    #[test]
    fn test_lowercase_keys_are_ignored() {
        let _guard = settings().scoped(map(json!({"lowercase": 1, "MIXED_case": 2})));
        assert!(settings().get("lowercase").is_none());
        assert!(settings().get("MIXED_case").is_none());
    }

    #[test]
    fn test_watch_fires_on_scoped_mutation() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicUsize, Ordering};

        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        settings().watch(move || {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let before = count.load(Ordering::SeqCst);
        {
            let _guard = settings().scoped(SettingsMap::new());
        }
        // One notification for the push, one for the pop.
        assert!(count.load(Ordering::SeqCst) >= before + 2);
    }

    #[test]
    fn test_generation_changes_with_overlay() {
        let before = settings().generation();
        let guard = settings().scoped(SettingsMap::new());
        assert_ne!(settings().generation(), before);
        drop(guard);
        assert_ne!(settings().generation(), before);
    }
}
