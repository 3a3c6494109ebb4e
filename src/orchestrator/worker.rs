// src/orchestrator/worker.rs

//! Execution contexts for loops.

use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::engine::{LoopManager, LoopState};
use crate::errors::{FlowloopError, Result};
use crate::types::ExecutionPool;

/// A running loop, in whichever context it was placed.
#[derive(Debug)]
pub enum Worker {
    /// Task on the shared tokio runtime.
    Task(JoinHandle<LoopState>),
    /// Dedicated OS thread with its own current-thread runtime.
    Thread(std::thread::JoinHandle<LoopState>),
}

/// Start `manager` in the given pool.
///
/// Must be called from within a tokio runtime.
pub fn spawn(pool: ExecutionPool, manager: LoopManager) -> Result<Worker> {
    let loop_id = manager.id().to_string();
    debug!(loop_id = %loop_id, %pool, "spawning loop worker");

    match pool {
        ExecutionPool::Async => {
            let handle = tokio::runtime::Handle::try_current()
                .map_err(|e| FlowloopError::Other(e.into()))?;
            Ok(Worker::Task(handle.spawn(supervise(manager))))
        }
        ExecutionPool::Thread => {
            let handle = std::thread::Builder::new()
                .name(format!("loop-{loop_id}"))
                .spawn(move || {
                    match tokio::runtime::Builder::new_current_thread()
                        .enable_all()
                        .build()
                    {
                        Ok(rt) => rt.block_on(supervise(manager)),
                        Err(e) => {
                            error!(loop_id = %loop_id, error = %e, "failed to build loop runtime");
                            manager.health().set_error(format!("loop runtime unavailable: {e}"));
                            LoopState::Error
                        }
                    }
                })?;
            Ok(Worker::Thread(handle))
        }
    }
}

/// Run the loop as a child task so a panic is recorded on its health as
/// soon as it happens, not only when the worker is joined.
async fn supervise(manager: LoopManager) -> LoopState {
    let loop_id = manager.id().to_string();
    let health = manager.health().clone();

    match tokio::spawn(manager.run()).await {
        Ok(state) => state,
        Err(err) => {
            let message = if err.is_panic() {
                panic_message(err.into_panic().as_ref())
            } else {
                format!("loop task ended abnormally: {err}")
            };
            error!(loop_id = %loop_id, error = %message, "loop worker died");
            health.set_error(message);
            LoopState::Error
        }
    }
}

impl Worker {
    /// Wait for the loop to exit.
    ///
    /// A worker that died outside the supervised loop is reported as `Err`.
    pub async fn join(self) -> std::result::Result<LoopState, String> {
        match self {
            Worker::Task(handle) => handle.await.map_err(|e| e.to_string()),
            Worker::Thread(handle) => {
                match tokio::task::spawn_blocking(move || handle.join()).await {
                    Ok(Ok(state)) => Ok(state),
                    Ok(Err(panic)) => Err(panic_message(panic.as_ref())),
                    Err(e) => Err(e.to_string()),
                }
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        match self {
            Worker::Task(handle) => handle.is_finished(),
            Worker::Thread(handle) => handle.is_finished(),
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("loop panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("loop panicked: {s}")
    } else {
        "loop panicked".to_string()
    }
}
