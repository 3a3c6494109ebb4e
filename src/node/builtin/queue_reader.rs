// src/node/builtin/queue_reader.rs

//! Producer that pops the next entry of a named queue.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::trace;

use crate::node::{Node, NodeBuildError, NodeContext, NodeData, NodeFuture, NodeOutput, NodeVariant};
use crate::queue::{QueueManager, validate_queue_name};

pub const KIND: &str = "queue-reader";

fn default_timeout_ms() -> u64 {
    5000
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Params {
    queue: String,
    #[serde(default = "default_timeout_ms")]
    timeout_ms: u64,
}

#[derive(Debug)]
pub struct QueueReaderNode {
    queue: String,
    timeout: Duration,
    queues: Arc<dyn QueueManager>,
}

impl QueueReaderNode {
    pub fn new(queues: Arc<dyn QueueManager>, queue: impl Into<String>, timeout: Duration) -> Self {
        Self {
            queue: queue.into(),
            timeout,
            queues,
        }
    }
}

pub(super) fn build(ctx: &NodeContext) -> Result<Box<dyn Node>, NodeBuildError> {
    ctx.require_variant(KIND, &[NodeVariant::Producer])?;
    let params: Params = ctx.params()?;
    validate_queue_name(&params.queue).map_err(|e| NodeBuildError::InvalidParams {
        node: ctx.id.clone(),
        message: e.to_string(),
    })?;

    Ok(Box::new(QueueReaderNode::new(
        ctx.queues.clone(),
        params.queue,
        Duration::from_millis(params.timeout_ms),
    )))
}

impl Node for QueueReaderNode {
    fn execute<'a>(&'a mut self, _input: &'a NodeData) -> NodeFuture<'a> {
        Box::pin(async move {
            match self.queues.pop(&self.queue, self.timeout).await? {
                Some(data) => Ok(NodeOutput::Data(data)),
                None => {
                    trace!(queue = %self.queue, "queue empty");
                    Ok(NodeOutput::NoWork)
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::MemoryQueueManager;
    use serde_json::json;

    fn ctx(variant: NodeVariant, params: toml::Table) -> NodeContext {
        NodeContext {
            id: "reader".to_string(),
            variant,
            params,
            queues: Arc::new(MemoryQueueManager::new()),
        }
    }

    #[tokio::test]
    async fn pops_queue_head_or_reports_no_work() {
        let queues: Arc<dyn QueueManager> = Arc::new(MemoryQueueManager::new());
        let mut node = QueueReaderNode::new(queues.clone(), "q1", Duration::from_millis(10));

        let out = node.execute(&NodeData::trigger()).await.unwrap();
        assert_eq!(out, NodeOutput::NoWork);

        queues.push("q1", NodeData::new(json!({"v": 4}))).await.unwrap();
        let out = node.execute(&NodeData::trigger()).await.unwrap();
        assert_eq!(out, NodeOutput::Data(NodeData::new(json!({"v": 4}))));
    }

    #[test]
    fn only_producers_may_read() {
        let mut params = toml::Table::new();
        params.insert("queue".into(), "q1".into());

        assert!(build(&ctx(NodeVariant::Producer, params.clone())).is_ok());
        assert!(matches!(
            build(&ctx(NodeVariant::Blocking, params)),
            Err(NodeBuildError::UnsupportedVariant { .. })
        ));
    }

    #[test]
    fn rejects_bad_queue_name() {
        let mut params = toml::Table::new();
        params.insert("queue".into(), "../etc".into());
        assert!(matches!(
            build(&ctx(NodeVariant::Producer, params)),
            Err(NodeBuildError::InvalidParams { .. })
        ));
    }
}
