// src/node/builtin/command.rs

//! Shell command node.
//!
//! The node's input is written to the child's stdin as JSON; whatever the
//! child prints on stdout becomes the output:
//!
//! - an object with a `payload` key is read as a full `NodeData`;
//! - any other JSON value replaces the payload (metadata is kept);
//! - empty stdout means "nothing to emit" for a producer and "pass the
//!   input through" for every other variant.
//!
//! A non-zero exit status or an expired `timeout_ms` fails the node.

use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, anyhow};
use serde::Deserialize;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

use crate::node::{
    Node, NodeBuildError, NodeContext, NodeData, NodeError, NodeFuture, NodeId, NodeOutput,
    NodeVariant,
};

pub const KIND: &str = "command";

/// Bytes of stderr kept in the failure message.
const STDERR_TAIL: usize = 512;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Params {
    cmd: String,
    #[serde(default)]
    timeout_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct CommandNode {
    id: NodeId,
    cmd: String,
    timeout: Option<Duration>,
    producer: bool,
}

impl CommandNode {
    pub fn new(id: impl Into<NodeId>, cmd: impl Into<String>, variant: NodeVariant) -> Self {
        Self {
            id: id.into(),
            cmd: cmd.into(),
            timeout: None,
            producer: variant == NodeVariant::Producer,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    async fn run(&self, input: &NodeData) -> Result<NodeOutput, NodeError> {
        debug!(node_id = %self.id, cmd = %self.cmd, "spawning command");

        // Build a shell command appropriate for the platform.
        let mut cmd = if cfg!(windows) {
            let mut c = Command::new("cmd");
            c.arg("/C").arg(&self.cmd);
            c
        } else {
            let mut c = Command::new("sh");
            c.arg("-c").arg(&self.cmd);
            c
        };

        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .with_context(|| format!("spawning process for node '{}'", self.id))?;

        let body = serde_json::to_vec(input).map_err(|e| NodeError::InvalidData(e.to_string()))?;
        let stdin = child.stdin.take();
        let feed = async move {
            if let Some(mut stdin) = stdin {
                // The command may exit without reading its input.
                match stdin.write_all(&body).await {
                    Err(e) if e.kind() != std::io::ErrorKind::BrokenPipe => return Err(e),
                    _ => {}
                }
            }
            Ok(())
        };

        let (fed, output) = tokio::join!(feed, child.wait_with_output());
        fed.with_context(|| format!("writing stdin of node '{}'", self.id))?;
        let output = output.with_context(|| format!("waiting for process of node '{}'", self.id))?;

        let code = output.status.code().unwrap_or(-1);
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stderr = stderr.trim();
            let tail = match stderr.char_indices().rev().nth(STDERR_TAIL) {
                Some((idx, _)) => &stderr[idx..],
                None => stderr,
            };
            info!(node_id = %self.id, exit_code = code, "command failed");
            return Err(NodeError::failed(format!(
                "command exited with code {code}: {tail}"
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stdout = stdout.trim();
        if stdout.is_empty() {
            return Ok(if self.producer {
                NodeOutput::NoWork
            } else {
                NodeOutput::Data(input.clone())
            });
        }

        let value: Value = serde_json::from_str(stdout)
            .map_err(|e| NodeError::InvalidData(format!("stdout is not JSON: {e}")))?;
        let data = if value.get("payload").is_some() {
            serde_json::from_value::<NodeData>(value)
                .map_err(|e| NodeError::InvalidData(e.to_string()))?
        } else {
            input.with_payload(value)
        };

        Ok(NodeOutput::Data(data))
    }
}

pub(super) fn build(ctx: &NodeContext) -> Result<Box<dyn Node>, NodeBuildError> {
    ctx.require_variant(
        KIND,
        &[NodeVariant::Producer, NodeVariant::Blocking, NodeVariant::NonBlocking],
    )?;
    let params: Params = ctx.params()?;

    let mut node = CommandNode::new(ctx.id.clone(), params.cmd, ctx.variant);
    if let Some(ms) = params.timeout_ms {
        node = node.with_timeout(Duration::from_millis(ms));
    }
    Ok(Box::new(node))
}

impl Node for CommandNode {
    fn execute<'a>(&'a mut self, input: &'a NodeData) -> NodeFuture<'a> {
        Box::pin(async move {
            match self.timeout {
                Some(limit) => tokio::time::timeout(limit, self.run(input))
                    .await
                    .map_err(|_| anyhow!("command timed out after {}ms", limit.as_millis()))?,
                None => self.run(input).await,
            }
        })
    }
}
