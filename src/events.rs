//! Named events
//!
//! Minimal pub/sub used by the API layer to announce lifecycle moments,
//! most notably `"publish"` with the published nodes. Listeners are
//! process-wide; callbacks run synchronously on the triggering thread and
//! receive the nodes involved.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use once_cell::sync::Lazy;

use crate::node::Node;

/// Event name fired after a successful publish.
pub const PUBLISH: &str = "publish";

type Callback = Arc<dyn Fn(&[Node]) + Send + Sync>;

static LISTENERS: Lazy<Mutex<HashMap<String, Vec<(u64, Callback)>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));
static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Handle returned by [`listen`], used to [`mute`] the callback again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventId(u64);

/// Register a callback for an event name.
pub fn listen(name: &str, callback: impl Fn(&[Node]) + Send + Sync + 'static) -> EventId {
    let id = NEXT_ID.fetch_add(1, Ordering::SeqCst);
    LISTENERS
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .entry(name.to_owned())
        .or_default()
        .push((id, Arc::new(callback)));
    EventId(id)
}

/// Remove a previously registered callback.
pub fn mute(name: &str, id: EventId) {
    let mut listeners = LISTENERS
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    if let Some(callbacks) = listeners.get_mut(name) {
        callbacks.retain(|(callback_id, _)| *callback_id != id.0);
    }
}

/// Invoke all callbacks registered for an event name.
pub fn trigger(name: &str, nodes: &[Node]) {
    let callbacks: Vec<Callback> = LISTENERS
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .get(name)
        .map(|callbacks| callbacks.iter().map(|(_, cb)| Arc::clone(cb)).collect())
        .unwrap_or_default();
    for callback in callbacks {
        callback(nodes);
    }
}

/// Drop all listeners, for all event names.
pub fn clear() {
    LISTENERS
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .clear();
}
