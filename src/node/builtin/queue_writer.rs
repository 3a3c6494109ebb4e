// src/node/builtin/queue_writer.rs

//! Hands the current data to another loop through a named queue.
//!
//! Usually declared `non-blocking`, so the iteration ends right after the
//! push is accepted.

use std::sync::Arc;

use serde::Deserialize;

use crate::node::{Node, NodeBuildError, NodeContext, NodeData, NodeFuture, NodeOutput, NodeVariant};
use crate::queue::{QueueManager, validate_queue_name};

pub const KIND: &str = "queue-writer";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Params {
    queue: String,
}

#[derive(Debug)]
pub struct QueueWriterNode {
    queue: String,
    queues: Arc<dyn QueueManager>,
}

impl QueueWriterNode {
    pub fn new(queues: Arc<dyn QueueManager>, queue: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            queues,
        }
    }
}

pub(super) fn build(ctx: &NodeContext) -> Result<Box<dyn Node>, NodeBuildError> {
    ctx.require_variant(
        KIND,
        &[NodeVariant::Producer, NodeVariant::Blocking, NodeVariant::NonBlocking],
    )?;
    let params: Params = ctx.params()?;
    validate_queue_name(&params.queue).map_err(|e| NodeBuildError::InvalidParams {
        node: ctx.id.clone(),
        message: e.to_string(),
    })?;

    Ok(Box::new(QueueWriterNode::new(ctx.queues.clone(), params.queue)))
}

impl Node for QueueWriterNode {
    fn execute<'a>(&'a mut self, input: &'a NodeData) -> NodeFuture<'a> {
        Box::pin(async move {
            self.queues.push(&self.queue, input.clone()).await?;
            Ok(NodeOutput::Data(input.clone()))
        })
    }
}
