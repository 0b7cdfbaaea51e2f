//! contentflow - a pipelined content engine
//!
//! Content is addressed by opaque URIs of the form
//! `scheme://namespace@path.ext#version` and flows through an ordered,
//! interceptor-style pipeline with cache, meta, plugin, storage and
//! namespace-fallback stages. Reads are lazy by default: many independent
//! lookups buffer into per-thread buckets and coalesce into a single
//! batched pipeline pass when the first value is materialized.
//!
//! Storage keeps draft and numbered revisions per node with at most one
//! published revision per key; the cache stage keeps resolved default
//! reads hot and plugin-ext-aware. Plugins own extensions and translate
//! between stored, structured and rendered content shapes.
//!
//! ```no_run
//! use contentflow as cf;
//!
//! # fn main() -> cf::Result<()> {
//! cf::set("i18n://sv-se@label/email.md", "e-post")?;
//! let node = cf::get("label/email", "fallback");
//! assert_eq!(node.content()?.as_text(), Some("<p>e-post</p>"));
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod backends;
pub mod conf;
pub mod environment;
pub mod error;
pub mod events;
pub mod formatter;
pub mod node;
pub mod pipeline;
pub mod plugins;
pub mod uri;

pub use api::{
    LoadedNode, SetOptions, delete, get, get_eager, load, publish, revisions, search, set,
    set_with,
};
pub use error::{Error, Result};
pub use node::{Content, Meta, Node};
pub use pipeline::{BufferedNode, Method, NodeMap, Pipe, pipeline};
pub use uri::Uri;
