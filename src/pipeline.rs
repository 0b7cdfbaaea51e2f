//! Pipeline engine
//!
//! Every API operation runs its nodes through an ordered chain of stages
//! ("pipes"). A send builds a request map of `uri -> node`, walks the
//! stages in configured order letting each request hook mutate the shared
//! map and finalize nodes out of it, then walks the accumulated response
//! chain in reverse, merging finalized nodes back in. Response nodes are
//! logged into the per-thread history.
//!
//! Reads can also be buffered: [`Pipeline::buffer`] parks a node in a
//! per-thread, per-method bucket and hands back a [`BufferedNode`]; the
//! first materializing read flushes the whole bucket through one send,
//! batched per distinct initial URI.
//!
//! Pipes are selected by short name through the `PIPELINE` setting and a
//! constructor registry. The per-thread chain is rebuilt when settings
//! change; pipe instances themselves are stateless and shared.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, RwLock};

use once_cell::sync::Lazy;
use tracing::warn;

use crate::conf::{Generation, settings};
use crate::error::{Error, Result};
use crate::node::Node;
use crate::uri::Uri;

pub mod buffer;
pub mod history;
pub mod pipes;

pub use buffer::BufferedNode;

/// The operations a pipeline can carry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Method {
    Get,
    Set,
    Delete,
    Publish,
}

impl Method {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "get",
            Self::Set => "set",
            Self::Delete => "delete",
            Self::Publish => "publish",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The shared in-flight node set, keyed by each node's URI at send time.
pub type NodeMap = BTreeMap<Uri, Node>;

/// One pipeline stage.
///
/// A request hook may mutate the shared request map and returns the nodes
/// it has finalized (removed from further processing). A response hook
/// receives the accumulated response map and returns its replacement. All
/// hooks default to no-ops, so a pipe implements only the methods it
/// participates in.
pub trait Pipe: Send + Sync {
    fn get_request(&self, _request: &mut NodeMap) -> Result<NodeMap> {
        Ok(NodeMap::new())
    }

    fn get_response(&self, response: NodeMap) -> Result<NodeMap> {
        Ok(response)
    }

    fn set_request(&self, _request: &mut NodeMap) -> Result<NodeMap> {
        Ok(NodeMap::new())
    }

    fn set_response(&self, response: NodeMap) -> Result<NodeMap> {
        Ok(response)
    }

    fn delete_request(&self, _request: &mut NodeMap) -> Result<NodeMap> {
        Ok(NodeMap::new())
    }

    fn delete_response(&self, response: NodeMap) -> Result<NodeMap> {
        Ok(response)
    }

    fn publish_request(&self, _request: &mut NodeMap) -> Result<NodeMap> {
        Ok(NodeMap::new())
    }

    fn publish_response(&self, response: NodeMap) -> Result<NodeMap> {
        Ok(response)
    }
}

type PipeFactory = Arc<dyn Fn() -> Arc<dyn Pipe> + Send + Sync>;

static PIPE_FACTORIES: Lazy<RwLock<HashMap<String, PipeFactory>>> = Lazy::new(|| {
    let mut factories: HashMap<String, PipeFactory> = HashMap::new();
    factories.insert("cache".to_owned(), Arc::new(|| Arc::new(pipes::CachePipe)));
    factories.insert("meta".to_owned(), Arc::new(|| Arc::new(pipes::MetaPipe)));
    factories.insert(
        "plugin".to_owned(),
        Arc::new(|| Arc::new(pipes::PluginPipe)),
    );
    factories.insert(
        "storage".to_owned(),
        Arc::new(|| Arc::new(pipes::StoragePipe)),
    );
    factories.insert(
        "namespace-fallback".to_owned(),
        Arc::new(|| Arc::new(pipes::NamespaceFallbackPipe)),
    );
    RwLock::new(factories)
});

/// Register a pipe constructor under a short name, so the `PIPELINE`
/// setting can select it.
pub fn register_pipe(name: &str, factory: impl Fn() -> Arc<dyn Pipe> + Send + Sync + 'static) {
    PIPE_FACTORIES
        .write()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .insert(name.to_owned(), Arc::new(factory));
}

struct ThreadPipes {
    generation: Option<Generation>,
    pipes: Vec<Arc<dyn Pipe>>,
}

thread_local! {
    static PIPES: RefCell<ThreadPipes> = const {
        RefCell::new(ThreadPipes { generation: None, pipes: Vec::new() })
    };
}

static PIPELINE: Pipeline = Pipeline { _private: () };

/// The pipeline engine handle.
pub fn pipeline() -> &'static Pipeline {
    &PIPELINE
}

/// Orders stages and runs request/response chains; see the module docs.
pub struct Pipeline {
    _private: (),
}

impl Pipeline {
    /// Run nodes through the stage chain for a method.
    pub fn send(&self, method: Method, nodes: &[Node]) -> Result<NodeMap> {
        let mut request: NodeMap = nodes
            .iter()
            .map(|node| (node.uri(), node.clone()))
            .collect();

        let chain = self.with_pipes(Vec::clone)?;
        let mut response_chain: Vec<(Arc<dyn Pipe>, NodeMap)> = Vec::new();

        for pipe in chain {
            let finalized = request_hook(&pipe, method, &mut request)?;
            response_chain.push((pipe, finalized));
            if request.is_empty() {
                break;
            }
        }

        let mut response = request;
        for (pipe, finalized) in response_chain.into_iter().rev() {
            if !response.is_empty() {
                response = response_hook(&pipe, method, response)?;
            }
            response.extend(finalized);
        }

        history::log(method, response.values().cloned());
        Ok(response)
    }

    /// Park a node for a later batched send and return its lazy handle.
    pub fn buffer(&self, method: Method, node: Node) -> BufferedNode {
        let buffered = BufferedNode::new(node, method);
        buffer::add(method, buffered.clone());
        buffered
    }

    /// Flush all buffered nodes for a method through one send, batched per
    /// distinct initial URI, fanning content back out to every buffered
    /// sibling.
    pub fn flush(&self, method: Method) -> Result<()> {
        self.flush_with_sender(method, None)
    }

    pub(crate) fn flush_with_sender(
        &self,
        method: Method,
        sender: Option<&BufferedNode>,
    ) -> Result<()> {
        let mut bucket = buffer::pop(method);
        if bucket.is_empty() {
            let Some(sender) = sender else {
                return Ok(());
            };
            warn!(
                "tried to flush empty buffer, triggered by probably abandoned or cached node: {}",
                sender.initial_uri()
            );
            buffer::add(method, sender.clone());
            bucket = buffer::pop(method);
            if bucket.is_empty() {
                return Ok(());
            }
        }

        // One representative node per distinct initial URI.
        let representatives: Vec<Node> = bucket
            .values()
            .filter_map(|siblings| siblings.first())
            .map(|buffered| buffered.node().clone())
            .collect();

        let response = self.send(method, &representatives)?;

        // Duplicate initial URIs were not sent through the pipeline;
        // copy the representative's content onto every sibling. URI
        // rewrites are intentionally not propagated.
        for node in response.values() {
            if let Some(siblings) = bucket.get(&node.initial_uri()) {
                let content = node.content();
                for buffered in siblings {
                    buffered.set_content(content.clone());
                }
            }
        }
        Ok(())
    }

    /// The nodes seen by sends for a method on this thread.
    #[must_use]
    pub fn history(&self, method: Method) -> Vec<Node> {
        history::list(method)
    }

    /// Total nodes logged on this thread, across methods.
    #[must_use]
    pub fn history_len(&self) -> usize {
        history::len()
    }

    /// Drop this thread's buffered nodes and history.
    pub fn clear(&self) {
        buffer::clear();
        history::clear();
    }

    fn with_pipes<R>(&self, f: impl FnOnce(&Vec<Arc<dyn Pipe>>) -> R) -> Result<R> {
        PIPES.with(|slot| {
            let mut slot = slot.borrow_mut();
            let current = settings().generation();
            if slot.generation != Some(current) {
                slot.pipes = build_pipes()?;
                slot.generation = Some(current);
            }
            Ok(f(&slot.pipes))
        })
    }
}

fn build_pipes() -> Result<Vec<Arc<dyn Pipe>>> {
    let names = settings().get_str_list("PIPELINE");
    let factories = PIPE_FACTORIES
        .read()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    let mut chain = Vec::with_capacity(names.len());
    for name in names {
        let Some(factory) = factories.get(&name) else {
            return Err(Error::ImproperlyConfigured(format!(
                "could not resolve pipe \"{name}\"; is it registered?"
            )));
        };
        chain.push(factory());
    }
    Ok(chain)
}

fn request_hook(pipe: &Arc<dyn Pipe>, method: Method, request: &mut NodeMap) -> Result<NodeMap> {
    match method {
        Method::Get => pipe.get_request(request),
        Method::Set => pipe.set_request(request),
        Method::Delete => pipe.delete_request(request),
        Method::Publish => pipe.publish_request(request),
    }
}

fn response_hook(pipe: &Arc<dyn Pipe>, method: Method, response: NodeMap) -> Result<NodeMap> {
    match method {
        Method::Get => pipe.get_response(response),
        Method::Set => pipe.set_response(response),
        Method::Delete => pipe.delete_response(response),
        Method::Publish => pipe.publish_response(response),
    }
}
