// src/queue/memory.rs

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::trace;

use crate::node::NodeData;
use crate::queue::{QueueError, QueueFuture, QueueManager, validate_queue_name};

/// One named FIFO plus the wake-up signal for blocked poppers.
#[derive(Debug, Default)]
struct NamedQueue {
    items: Mutex<VecDeque<NodeData>>,
    available: Notify,
}

impl NamedQueue {
    fn items(&self) -> MutexGuard<'_, VecDeque<NodeData>> {
        // A poisoned lock only means a panic elsewhere while holding it; the
        // deque itself is still consistent.
        self.items.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// In-process queue store.
///
/// Locks are plain `std::sync::Mutex`es held only for a push or pop, never
/// across an `.await`, so the manager works from any runtime (including the
/// per-thread runtimes of `thread` loops).
#[derive(Debug, Default)]
pub struct MemoryQueueManager {
    queues: Mutex<HashMap<String, Arc<NamedQueue>>>,
}

impl MemoryQueueManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn queue(&self, name: &str) -> Result<Arc<NamedQueue>, QueueError> {
        validate_queue_name(name)?;
        let mut queues = self
            .queues
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let queue = queues.entry(name.to_string()).or_default();
        Ok(Arc::clone(queue))
    }
}

impl QueueManager for MemoryQueueManager {
    fn push<'a>(&'a self, queue: &'a str, data: NodeData) -> QueueFuture<'a, ()> {
        Box::pin(async move {
            let q = self.queue(queue)?;
            let depth = {
                let mut items = q.items();
                items.push_back(data);
                items.len()
            };
            q.available.notify_one();
            trace!(queue, depth, "pushed entry");
            Ok(())
        })
    }

    fn pop<'a>(&'a self, queue: &'a str, timeout: Duration) -> QueueFuture<'a, Option<NodeData>> {
        Box::pin(async move {
            let q = self.queue(queue)?;
            let deadline = Instant::now() + timeout;

            loop {
                // Register interest before checking, so a push landing between
                // the check and the wait still wakes us.
                let notified = q.available.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();

                if let Some(item) = q.items().pop_front() {
                    trace!(queue, "popped entry");
                    return Ok(Some(item));
                }

                if tokio::time::timeout_at(deadline, notified).await.is_err() {
                    trace!(queue, "pop timed out");
                    return Ok(None);
                }
            }
        })
    }

    fn len<'a>(&'a self, queue: &'a str) -> QueueFuture<'a, usize> {
        Box::pin(async move {
            validate_queue_name(queue)?;
            let queues = self
                .queues
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            Ok(queues.get(queue).map(|q| q.items().len()).unwrap_or(0))
        })
    }
}
