//! Execution environment
//!
//! The environment is a thread-local stack of `(i18n, l10n, g11n)` namespace
//! lists; the top of the stack is the active scope. Nodes snapshot the
//! active state at creation so namespace resolution and fallback use the
//! environment the caller addressed them under, regardless of when the
//! pipeline runs.
//!
//! The stack resets to the configured `ENVIRONMENT["default"]` scope when
//! settings change; pushes nest strictly and the bottom state can never be
//! popped.

use std::cell::RefCell;

use serde_json::Value;

use crate::conf::{Generation, settings};
use crate::error::{Error, Result};

const DEFAULT_SCOPE: &str = "default";

const FALLBACK_I18N: &str = "en-us";
const FALLBACK_L10N: &str = "local";
const FALLBACK_G11N: &str = "global";

/// One environment scope: per-scheme namespace lists, primary first.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EnvState {
    pub i18n: Vec<String>,
    pub l10n: Vec<String>,
    pub g11n: Vec<String>,
}

impl EnvState {
    /// The namespace list for a scheme; empty for unknown schemes.
    #[must_use]
    pub fn namespaces(&self, scheme: &str) -> &[String] {
        match scheme {
            "i18n" => &self.i18n,
            "l10n" => &self.l10n,
            "g11n" => &self.g11n,
            _ => &[],
        }
    }
}

/// Partial scope override; absent fields inherit from the active state.
#[derive(Clone, Debug, Default)]
pub struct EnvOverride {
    pub i18n: Option<Vec<String>>,
    pub l10n: Option<Vec<String>>,
    pub g11n: Option<Vec<String>>,
}

impl EnvOverride {
    #[must_use]
    pub fn i18n<S: Into<String>>(namespaces: impl IntoIterator<Item = S>) -> Self {
        Self {
            i18n: Some(namespaces.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_l10n<S: Into<String>>(mut self, namespaces: impl IntoIterator<Item = S>) -> Self {
        self.l10n = Some(namespaces.into_iter().map(Into::into).collect());
        self
    }

    #[must_use]
    pub fn with_g11n<S: Into<String>>(mut self, namespaces: impl IntoIterator<Item = S>) -> Self {
        self.g11n = Some(namespaces.into_iter().map(Into::into).collect());
        self
    }

    fn from_value(value: &Value) -> Self {
        Self {
            i18n: namespace_list(value.get("i18n")),
            l10n: namespace_list(value.get("l10n")),
            g11n: namespace_list(value.get("g11n")),
        }
    }
}

struct Slot {
    stack: Vec<EnvState>,
    generation: Option<Generation>,
}

thread_local! {
    static ENV: RefCell<Slot> = const {
        RefCell::new(Slot { stack: Vec::new(), generation: None })
    };
}

/// The active environment state for this thread.
#[must_use]
pub fn state() -> EnvState {
    ENV.with_borrow_mut(|slot| {
        ensure(slot);
        slot.stack.last().cloned().unwrap_or_else(default_state)
    })
}

/// Push a named scope from the `ENVIRONMENT` setting.
pub fn push(name: &str) -> Result<()> {
    let scopes = settings().get("ENVIRONMENT").unwrap_or(Value::Null);
    let Some(scope) = scopes.get(name) else {
        return Err(Error::ImproperlyConfigured(format!(
            "unknown environment scope \"{name}\""
        )));
    };
    push_state(EnvOverride::from_value(scope));
    Ok(())
}

/// Push a state on top of the stack; absent fields inherit the active state.
pub fn push_state(over: EnvOverride) {
    ENV.with_borrow_mut(|slot| {
        ensure(slot);
        let current = slot.stack.last().cloned().unwrap_or_else(default_state);
        slot.stack.push(EnvState {
            i18n: over.i18n.unwrap_or(current.i18n),
            l10n: over.l10n.unwrap_or(current.l10n),
            g11n: over.g11n.unwrap_or(current.g11n),
        });
    });
}

/// Pop the active state. Popping the bottom state is an error.
pub fn pop() -> Result<()> {
    ENV.with_borrow_mut(|slot| {
        ensure(slot);
        if slot.stack.len() <= 1 {
            return Err(Error::EnvironmentUnderflow);
        }
        slot.stack.pop();
        Ok(())
    })
}

/// Reset this thread's stack to the configured default scope.
pub fn reset() {
    ENV.with_borrow_mut(|slot| {
        slot.stack = vec![default_state()];
        slot.generation = Some(settings().generation());
    });
}

/// The current stack depth, mostly useful in tests.
#[must_use]
pub fn depth() -> usize {
    ENV.with_borrow_mut(|slot| {
        ensure(slot);
        slot.stack.len()
    })
}

/// Push a state and pop it when the returned guard drops.
#[must_use]
pub fn scoped(over: EnvOverride) -> EnvGuard {
    push_state(over);
    EnvGuard { _private: () }
}

/// Push a named scope and pop it when the returned guard drops.
pub fn scoped_named(name: &str) -> Result<EnvGuard> {
    push(name)?;
    Ok(EnvGuard { _private: () })
}

/// RAII guard returned by [`scoped`] and [`scoped_named`].
pub struct EnvGuard {
    _private: (),
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        if let Err(error) = pop() {
            tracing::warn!("failed to pop environment scope: {error}");
        }
    }
}

fn ensure(slot: &mut Slot) {
    let current = settings().generation();
    if slot.generation != Some(current) || slot.stack.is_empty() {
        slot.stack = vec![default_state()];
        slot.generation = Some(current);
    }
}

fn default_state() -> EnvState {
    let scopes = settings().get("ENVIRONMENT").unwrap_or(Value::Null);
    let over = scopes
        .get(DEFAULT_SCOPE)
        .map(EnvOverride::from_value)
        .unwrap_or_default();
    EnvState {
        i18n: over.i18n.unwrap_or_else(|| vec![FALLBACK_I18N.to_owned()]),
        l10n: over.l10n.unwrap_or_else(|| vec![FALLBACK_L10N.to_owned()]),
        g11n: over.g11n.unwrap_or_else(|| vec![FALLBACK_G11N.to_owned()]),
    }
}

fn namespace_list(value: Option<&Value>) -> Option<Vec<String>> {
    match value? {
        Value::String(s) => Some(vec![s.clone()]),
        Value::Array(items) => Some(
            items
                .iter()
                .filter_map(|item| item.as_str().map(str::to_owned))
                .collect(),
        ),
        _ => None,
    }
}
