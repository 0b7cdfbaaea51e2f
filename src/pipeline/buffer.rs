//! Lazy node buffering
//!
//! A [`BufferedNode`] wraps a node parked for a later batched send. The
//! cheap attributes (`initial`, `initial_uri`, `namespace_uri`, `meta`)
//! forward without side effects; reading `content` or `uri` flushes the
//! whole per-method bucket through the pipeline first. Writing content
//! marks the node flushed, bypassing the flush on subsequent reads.
//!
//! Buckets are thread-local and keyed by the raw initial URI, so equal
//! addresses coalesce into a single pipeline pass.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::rc::Rc;

use serde_json::Value;

use crate::error::Result;
use crate::formatter::FormatArgs;
use crate::node::{Content, Meta, Node};
use crate::pipeline::{Method, pipeline};
use crate::uri::Uri;

type Bucket = BTreeMap<String, Vec<BufferedNode>>;

thread_local! {
    static BUFFER: RefCell<HashMap<Method, Bucket>> = RefCell::new(HashMap::new());
}

pub(crate) fn add(method: Method, node: BufferedNode) {
    BUFFER.with_borrow_mut(|buffer| {
        buffer
            .entry(method)
            .or_default()
            .entry(node.initial_uri())
            .or_default()
            .push(node);
    });
}

pub(crate) fn pop(method: Method) -> Bucket {
    BUFFER.with_borrow_mut(|buffer| buffer.get_mut(&method).map(std::mem::take).unwrap_or_default())
}

pub(crate) fn clear() {
    BUFFER.with_borrow_mut(HashMap::clear);
}

struct Inner {
    node: Node,
    method: Method,
    flushed: Cell<bool>,
}

/// A node whose pipeline send is deferred until a materializing read.
#[derive(Clone)]
pub struct BufferedNode {
    inner: Rc<Inner>,
}

impl BufferedNode {
    pub(crate) fn new(node: Node, method: Method) -> Self {
        Self {
            inner: Rc::new(Inner {
                node,
                method,
                flushed: Cell::new(false),
            }),
        }
    }

    /// The current URI; flushes first.
    pub fn uri(&self) -> Result<Uri> {
        self.flush()?;
        Ok(self.inner.node.uri())
    }

    /// The resolved content; flushes first.
    pub fn content(&self) -> Result<Content> {
        self.flush()?;
        Ok(self.inner.node.content())
    }

    /// Write content directly, marking the node flushed.
    pub fn set_content(&self, content: impl Into<Content>) {
        self.inner.flushed.set(true);
        self.inner.node.set_content(content);
    }

    /// Node meta; does not flush.
    #[must_use]
    pub fn meta(&self) -> Meta {
        self.inner.node.meta()
    }

    /// The caller-supplied default; does not flush.
    #[must_use]
    pub fn initial(&self) -> Content {
        self.inner.node.initial()
    }

    /// The raw initial URI; does not flush.
    #[must_use]
    pub fn initial_uri(&self) -> String {
        self.inner.node.initial_uri()
    }

    /// First URI in history with a namespace; does not flush.
    #[must_use]
    pub fn namespace_uri(&self) -> Option<Uri> {
        self.inner.node.namespace_uri()
    }

    /// The wrapped node.
    #[must_use]
    pub fn node(&self) -> &Node {
        &self.inner.node
    }

    /// JSON form of the resolved node; flushes first.
    pub fn for_json(&self) -> Result<Value> {
        self.flush()?;
        Ok(self.inner.node.for_json())
    }

    /// Render resolved text content; flushes first.
    pub fn render(&self) -> Result<Option<String>> {
        self.flush()?;
        Ok(self.inner.node.render())
    }

    /// Render resolved content through the permissive formatter; flushes
    /// first.
    pub fn render_with(&self, args: &FormatArgs) -> Result<Option<String>> {
        self.flush()?;
        Ok(self.inner.node.render_with(args))
    }

    fn flush(&self) -> Result<()> {
        if !self.inner.flushed.get() {
            pipeline().flush_with_sender(self.inner.method, Some(self))?;
        }
        Ok(())
    }
}

impl fmt::Debug for BufferedNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<BufferedNode: {}>", self.initial_uri())
    }
}

impl fmt::Display for BufferedNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.render() {
            Ok(rendered) => f.write_str(&rendered.unwrap_or_default()),
            Err(_) => Ok(()),
        }
    }
}
