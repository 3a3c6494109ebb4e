use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Behavioural variant of a node.
///
/// The variant only decides how the loop continues after the node returns;
/// every variant is invoked through the same `Node::execute` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeVariant {
    /// Chain start, re-invoked every iteration.
    Producer,
    /// Returns data and continues to its single successor.
    Blocking,
    /// Returns data and ends the current iteration.
    #[serde(alias = "nonblocking")]
    NonBlocking,
    /// Returns data plus a branch label selecting the outgoing edge.
    #[serde(rename = "conditional", alias = "if")]
    ConditionalBlocking,
}

impl NodeVariant {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeVariant::Producer => "producer",
            NodeVariant::Blocking => "blocking",
            NodeVariant::NonBlocking => "non-blocking",
            NodeVariant::ConditionalBlocking => "conditional",
        }
    }
}

impl fmt::Display for NodeVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeVariant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "producer" => Ok(NodeVariant::Producer),
            "blocking" => Ok(NodeVariant::Blocking),
            "non-blocking" | "nonblocking" => Ok(NodeVariant::NonBlocking),
            "conditional" | "if" => Ok(NodeVariant::ConditionalBlocking),
            other => Err(format!(
                "invalid node variant: {other} (expected \"producer\", \"blocking\", \"non-blocking\" or \"conditional\")"
            )),
        }
    }
}

/// Execution context a loop runs in.
///
/// - `Async`: a task on the shared multi-threaded tokio runtime (default).
/// - `Thread`: a dedicated OS thread driving its own current-thread runtime,
///   for loops whose nodes block or hog the CPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionPool {
    Async,
    Thread,
}

impl Default for ExecutionPool {
    fn default() -> Self {
        ExecutionPool::Async
    }
}

impl ExecutionPool {
    /// Pick the strongest isolation among a set of preferences.
    ///
    /// Ordering is `Thread > Async`; `None` when there are no preferences.
    pub fn highest<I>(prefs: I) -> Option<ExecutionPool>
    where
        I: IntoIterator<Item = ExecutionPool>,
    {
        prefs.into_iter().max()
    }
}

impl fmt::Display for ExecutionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionPool::Async => f.write_str("async"),
            ExecutionPool::Thread => f.write_str("thread"),
        }
    }
}

impl FromStr for ExecutionPool {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "async" => Ok(ExecutionPool::Async),
            "thread" => Ok(ExecutionPool::Thread),
            other => Err(format!(
                "invalid execution pool: {other} (expected \"async\" or \"thread\")"
            )),
        }
    }
}

/// Storage backend for named queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueBackend {
    /// In-process queues (lost on restart).
    Memory,
    /// Directory-backed spool shared by every process pointing at it.
    Spool,
}

impl Default for QueueBackend {
    fn default() -> Self {
        QueueBackend::Memory
    }
}

/// Storage backend for dead-letter records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeadLetterBackend {
    /// Kept in memory for inspection through the API.
    Memory,
    /// Appended to a JSON-lines file.
    Jsonl,
}

impl Default for DeadLetterBackend {
    fn default() -> Self {
        DeadLetterBackend::Memory
    }
}
