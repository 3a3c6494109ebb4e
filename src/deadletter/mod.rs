// src/deadletter/mod.rs

//! Dead-letter channel for failed iterations.
//!
//! When any node of an iteration fails, the loop packages the payload the
//! node received, the node id, and the error into a [`DeadLetterRecord`] and
//! submits it here before starting the next iteration. The scheduler only
//! ever appends; reading and replaying records is left to external tooling.
//!
//! - [`memory`]: records kept in memory, readable through the API.
//! - [`jsonl`]: records appended to a JSON-lines file.

pub mod jsonl;
pub mod memory;

use std::fmt::{self, Debug};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::DeadLetterSection;
use crate::engine::LoopId;
use crate::node::{NodeData, NodeId};
use crate::types::DeadLetterBackend;

pub use jsonl::JsonlDeadLetterSink;
pub use memory::MemoryDeadLetterSink;

/// Why an iteration was dead-lettered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The node's `execute` returned an error.
    NodeFailure,
    /// A conditional node chose a label with no matching edge.
    UnmappedBranch,
    /// A node returned an output its variant may not produce.
    Protocol,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::NodeFailure => f.write_str("node_failure"),
            FailureKind::UnmappedBranch => f.write_str("unmapped_branch"),
            FailureKind::Protocol => f.write_str("protocol"),
        }
    }
}

/// Terminal record of one failed iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterRecord {
    pub loop_id: LoopId,
    pub node_id: NodeId,
    /// The payload the failing node received.
    pub data: NodeData,
    pub kind: FailureKind,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

impl DeadLetterRecord {
    pub fn new(
        loop_id: impl Into<LoopId>,
        node_id: impl Into<NodeId>,
        data: NodeData,
        kind: FailureKind,
        error: impl Into<String>,
    ) -> Self {
        Self {
            loop_id: loop_id.into(),
            node_id: node_id.into(),
            data,
            kind,
            error: error.into(),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Error, Debug)]
pub enum DeadLetterError {
    #[error("dead-letter IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("dead-letter record could not be encoded: {0}")]
    Codec(#[from] serde_json::Error),
}

pub type SinkFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, DeadLetterError>> + Send + 'a>>;

/// Append-only store for dead-letter records.
pub trait DeadLetterSink: Send + Sync + Debug {
    /// Store `record`; resolves only once the record is accepted.
    fn submit(&self, record: DeadLetterRecord) -> SinkFuture<'_, ()>;

    /// Number of records accepted since the sink was opened.
    fn count(&self) -> u64;
}

/// Build the sink selected in the `[dead_letter]` section.
pub fn from_config(
    section: &DeadLetterSection,
) -> Result<Arc<dyn DeadLetterSink>, DeadLetterError> {
    match section.backend {
        DeadLetterBackend::Memory => Ok(Arc::new(MemoryDeadLetterSink::new())),
        DeadLetterBackend::Jsonl => Ok(Arc::new(JsonlDeadLetterSink::open(&section.path)?)),
    }
}
