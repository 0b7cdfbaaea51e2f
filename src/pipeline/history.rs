//! Pipeline history
//!
//! Per-thread, per-method append-only log of every node a send has
//! produced. Integration layers use it to inspect what a request touched;
//! cleared together with the buffer by `pipeline().clear()`.

use std::cell::RefCell;
use std::collections::BTreeMap;

use crate::node::Node;
use crate::pipeline::Method;

thread_local! {
    static HISTORY: RefCell<BTreeMap<Method, Vec<Node>>> = const { RefCell::new(BTreeMap::new()) };
}

pub(crate) fn log(method: Method, nodes: impl IntoIterator<Item = Node>) {
    HISTORY.with_borrow_mut(|history| {
        history.entry(method).or_default().extend(nodes);
    });
}

pub(crate) fn list(method: Method) -> Vec<Node> {
    HISTORY.with_borrow(|history| history.get(&method).cloned().unwrap_or_default())
}

pub(crate) fn len() -> usize {
    HISTORY.with_borrow(|history| history.values().map(Vec::len).sum())
}

pub(crate) fn clear() {
    HISTORY.with_borrow_mut(BTreeMap::clear);
}
