//! Content nodes
//!
//! A [`Node`] is the mutable carrier threaded through the pipeline. It
//! records append-only histories of its URI and content, carries a
//! string-keyed meta map, and snapshots the environment it was created
//! under. Nodes are cheap shared handles (`Rc<RefCell<..>>`) and
//! deliberately thread-confined: the concurrency model keeps all in-flight
//! nodes on the thread that created them.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use serde_json::{Value, json};

use crate::environment::{self, EnvState};
use crate::formatter::{FormatArgs, format_content};
use crate::uri::Uri;

/// String-keyed node metadata.
pub type Meta = serde_json::Map<String, Value>;

/// Node content.
///
/// `None` means unset or deleted; `Empty` is the explicit pending-delete
/// sentinel, distinct from `None` so the plugin stage can tell "was
/// deleted" apart from "asked to be deleted but never found". Values are
/// JSON: strings for rendered content, structured data between a caller
/// and its plugin's `save`.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Content {
    #[default]
    None,
    Empty,
    Value(Value),
}

impl Content {
    #[must_use]
    pub fn text(s: impl Into<String>) -> Self {
        Self::Value(Value::String(s.into()))
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Value(Value::String(s)) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    #[must_use]
    pub fn is_empty_sentinel(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// JSON view; `None` and `Empty` both collapse to `null`.
    #[must_use]
    pub fn to_json(&self) -> Value {
        match self {
            Self::None | Self::Empty => Value::Null,
            Self::Value(value) => value.clone(),
        }
    }

    /// Inverse of [`to_json`](Self::to_json): `null` becomes `None`.
    #[must_use]
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::Null => Self::None,
            other => Self::Value(other),
        }
    }
}

impl From<&str> for Content {
    fn from(s: &str) -> Self {
        Self::text(s)
    }
}

impl From<String> for Content {
    fn from(s: String) -> Self {
        Self::text(s)
    }
}

impl From<Value> for Content {
    fn from(value: Value) -> Self {
        Self::from_json(value)
    }
}

impl From<Option<String>> for Content {
    fn from(value: Option<String>) -> Self {
        value.map_or(Self::None, Self::text)
    }
}

impl From<Option<&str>> for Content {
    fn from(value: Option<&str>) -> Self {
        value.map_or(Self::None, Self::text)
    }
}

struct Inner {
    raw_uri: String,
    uris: Vec<Uri>,
    contents: Vec<Content>,
    meta: Meta,
    env: EnvState,
}

/// Mutable content carrier; a cheap clonable handle to shared state.
#[derive(Clone)]
pub struct Node {
    inner: Rc<RefCell<Inner>>,
}

impl Node {
    pub fn new(uri: &str, content: impl Into<Content>) -> Self {
        Self::with_meta(uri, content, Meta::new())
    }

    pub fn with_meta(uri: &str, content: impl Into<Content>, meta: Meta) -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner {
                raw_uri: uri.to_owned(),
                uris: vec![Uri::parse(uri)],
                contents: vec![content.into()],
                meta,
                env: environment::state(),
            })),
        }
    }

    /// The current URI: the tail of the URI history.
    #[must_use]
    pub fn uri(&self) -> Uri {
        self.inner
            .borrow()
            .uris
            .last()
            .cloned()
            .unwrap_or_default()
    }

    /// Append a URI to the history, if it differs from the current one.
    pub fn set_uri(&self, uri: impl Into<Uri>) {
        let uri = uri.into();
        let mut inner = self.inner.borrow_mut();
        if inner.uris.last() != Some(&uri) {
            inner.uris.push(uri);
        }
    }

    /// The current content: the tail of the content history.
    #[must_use]
    pub fn content(&self) -> Content {
        self.inner
            .borrow()
            .contents
            .last()
            .cloned()
            .unwrap_or_default()
    }

    /// Append content to the history, if it differs from the current value.
    pub fn set_content(&self, content: impl Into<Content>) {
        let content = content.into();
        let mut inner = self.inner.borrow_mut();
        if inner.contents.last() != Some(&content) {
            inner.contents.push(content);
        }
    }

    /// The caller-supplied default content.
    #[must_use]
    pub fn initial(&self) -> Content {
        self.inner
            .borrow()
            .contents
            .first()
            .cloned()
            .unwrap_or_default()
    }

    /// The URI exactly as first addressed by the caller, before parsing.
    #[must_use]
    pub fn initial_uri(&self) -> String {
        self.inner.borrow().raw_uri.clone()
    }

    /// The first URI in the history carrying a namespace, if any.
    #[must_use]
    pub fn namespace_uri(&self) -> Option<Uri> {
        self.inner
            .borrow()
            .uris
            .iter()
            .find(|uri| uri.namespace().is_some())
            .cloned()
    }

    #[must_use]
    pub fn meta(&self) -> Meta {
        self.inner.borrow().meta.clone()
    }

    pub fn set_meta(&self, meta: Meta) {
        self.inner.borrow_mut().meta = meta;
    }

    pub fn update_meta(&self, f: impl FnOnce(&mut Meta)) {
        f(&mut self.inner.borrow_mut().meta);
    }

    /// The environment snapshot taken at creation.
    #[must_use]
    pub fn env(&self) -> EnvState {
        self.inner.borrow().env.clone()
    }

    #[must_use]
    pub fn uri_history(&self) -> Vec<Uri> {
        self.inner.borrow().uris.clone()
    }

    #[must_use]
    pub fn content_history(&self) -> Vec<Content> {
        self.inner.borrow().contents.clone()
    }

    #[must_use]
    pub fn for_json(&self) -> Value {
        let inner = self.inner.borrow();
        json!({
            "uri": inner.uris.last().map(Uri::to_string).unwrap_or_default(),
            "content": inner.contents.last().map_or(Value::Null, Content::to_json),
            "meta": Value::Object(inner.meta.clone()),
        })
    }

    /// Render text content; `None` and non-text content yield no output.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.content().as_text().map(str::to_owned)
    }

    /// Render text content through the permissive formatter.
    #[must_use]
    pub fn render_with(&self, args: &FormatArgs) -> Option<String> {
        self.content()
            .as_text()
            .map(|text| format_content(text, args))
    }

    /// Adopt a backend record: URI, content and meta in one step.
    pub(crate) fn materialize(&self, uri: Uri, content: Content, meta: Meta) {
        self.set_uri(uri);
        self.set_content(content);
        self.set_meta(meta);
    }

    /// Two handles to the same underlying node.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<Node: {}>", self.uri())
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render().unwrap_or_default())
    }
}
