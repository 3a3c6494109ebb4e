// src/queue/mod.rs

//! Named queues used for cross-loop handoff.
//!
//! Loops never reference each other; a NonBlocking node in one loop pushes
//! into a named queue and a producer in another loop pops from it. The
//! [`QueueManager`] trait is the only way to reach that shared state:
//!
//! - [`memory`]: in-process queues, fast, lost on restart.
//! - [`spool`]: directory-backed queues that survive restarts and can be
//!   shared by several processes pointing at the same directory.
//!
//! Both guarantee FIFO per queue name under concurrent callers. Nothing is
//! promised across names.

pub mod memory;
pub mod spool;

use std::fmt::Debug;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::config::QueueSection;
use crate::node::NodeData;
use crate::types::QueueBackend;

pub use memory::MemoryQueueManager;
pub use spool::SpoolQueueManager;

/// Boxed future returned by queue operations.
pub type QueueFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, QueueError>> + Send + 'a>>;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("invalid queue name '{0}' (expected [A-Za-z0-9_.-]+)")]
    InvalidName(String),

    #[error("queue IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("queue entry could not be encoded/decoded: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Push/pop access to the named-queue store.
///
/// Queues are created lazily on first use. Implementations must be safe to
/// call from many loops at once, including loops running on their own
/// threads and runtimes.
pub trait QueueManager: Send + Sync + Debug {
    /// Append `data` at the tail of `queue`; resolves once accepted.
    fn push<'a>(&'a self, queue: &'a str, data: NodeData) -> QueueFuture<'a, ()>;

    /// Remove and return the head of `queue`, waiting up to `timeout`.
    ///
    /// Resolves to `Ok(None)` when the timeout elapses with nothing to pop.
    fn pop<'a>(&'a self, queue: &'a str, timeout: Duration) -> QueueFuture<'a, Option<NodeData>>;

    /// Current number of entries in `queue` (0 for unknown queues).
    fn len<'a>(&'a self, queue: &'a str) -> QueueFuture<'a, usize>;
}

/// Queue names double as directory names in the spool backend, so they are
/// restricted to a portable character set everywhere.
pub fn validate_queue_name(name: &str) -> Result<(), QueueError> {
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));

    if valid {
        Ok(())
    } else {
        Err(QueueError::InvalidName(name.to_string()))
    }
}

/// Build the queue manager selected in the `[queue]` section.
pub fn from_config(section: &QueueSection) -> Result<Arc<dyn QueueManager>, QueueError> {
    match section.backend {
        QueueBackend::Memory => Ok(Arc::new(MemoryQueueManager::new())),
        QueueBackend::Spool => {
            let manager = SpoolQueueManager::open(
                &section.spool_dir,
                Duration::from_millis(section.poll_interval_ms),
            )?;
            Ok(Arc::new(manager))
        }
    }
}
