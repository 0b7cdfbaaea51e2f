//! Built-in default settings.

use serde_json::json;

use super::SettingsMap;

/// The settings every fresh process starts from.
#[must_use]
pub fn default_settings() -> SettingsMap {
    let defaults = json!({
        "ENVIRONMENT": {
            "default": {
                "i18n": "en-us",
                "l10n": "local",
                "g11n": "global",
            }
        },
        "CACHE": "locmem://",
        "STORAGE": "locmem://",
        "PIPELINE": [
            "cache",
            "meta",
            "plugin",
            "storage",
            "namespace-fallback",
        ],
        "PLUGINS": [
            "txt",
            "md",
        ],
        "CACHE_PIPE": {
            "CACHE_ON_GET": true,
        },
        "URI_DEFAULT_SCHEME": "i18n",
        "URI_DEFAULT_EXT": "txt",
    });
    match defaults {
        serde_json::Value::Object(map) => map,
        _ => unreachable!("default settings literal is an object"),
    }
}
