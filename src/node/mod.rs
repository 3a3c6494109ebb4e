// src/node/mod.rs

//! Node abstraction.
//!
//! - [`data`] defines [`NodeData`], the payload threaded through a chain.
//! - [`registry`] maps a node *kind* to a constructor.
//! - [`builtin`] holds the plumbing nodes shipped with flowloop (queue
//!   reader/writer, shell command, condition, set).
//!
//! A node exposes one operation, [`Node::execute`]. The loop awaits it to
//! completion before advancing, whatever the node does internally. The
//! variant tag ([`NodeVariant`]) lives next to the node in the loop, not in
//! the node itself.

pub mod builtin;
pub mod data;
pub mod registry;

use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

use crate::queue::QueueError;

pub use crate::types::NodeVariant;
pub use data::NodeData;
pub use registry::{NodeBuildError, NodeContext, NodeFactory, NodeRegistry};

/// Canonical node identifier type.
pub type NodeId = String;

/// Boxed future returned by [`Node::execute`].
pub type NodeFuture<'a> = Pin<Box<dyn Future<Output = Result<NodeOutput, NodeError>> + Send + 'a>>;

/// Successful result of one node invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeOutput {
    /// Transformed data for the next hop.
    Data(NodeData),
    /// Producer had nothing to emit; the loop idles and asks again.
    NoWork,
    /// Conditional result: data plus the label of the edge to follow.
    Branch { data: NodeData, label: String },
}

impl NodeOutput {
    pub fn branch(data: NodeData, label: impl Into<String>) -> Self {
        NodeOutput::Branch {
            data,
            label: label.into(),
        }
    }
}

/// Failure raised from inside `execute`.
///
/// Every variant is treated the same by the loop: dead-lettered, not
/// retried, iteration abandoned.
#[derive(Error, Debug)]
pub enum NodeError {
    #[error("{0}")]
    Failed(String),

    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid node data: {0}")]
    InvalidData(String),
}

impl NodeError {
    pub fn failed(msg: impl Into<String>) -> Self {
        NodeError::Failed(msg.into())
    }
}

impl From<anyhow::Error> for NodeError {
    fn from(err: anyhow::Error) -> Self {
        NodeError::Failed(format!("{err:#}"))
    }
}

/// The smallest executable unit of a workflow.
///
/// `execute` borrows the upstream data and returns a fresh value; a node
/// cannot keep a reference to its input past the call.
pub trait Node: Send {
    fn execute<'a>(&'a mut self, input: &'a NodeData) -> NodeFuture<'a>;
}

/// Node backed by a synchronous closure.
pub struct FnNode<F> {
    f: F,
}

/// Wrap a closure as a [`Node`].
///
/// Handy for tests and for embedding small transforms without a dedicated
/// type.
pub fn from_fn<F>(f: F) -> FnNode<F>
where
    F: FnMut(&NodeData) -> Result<NodeOutput, NodeError> + Send,
{
    FnNode { f }
}

impl<F> Node for FnNode<F>
where
    F: FnMut(&NodeData) -> Result<NodeOutput, NodeError> + Send,
{
    fn execute<'a>(&'a mut self, input: &'a NodeData) -> NodeFuture<'a> {
        let result = (self.f)(input);
        Box::pin(async move { result })
    }
}
