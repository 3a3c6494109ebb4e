// src/engine/loop_manager.rs

//! Async shell driving one loop.
//!
//! The manager owns its nodes and repeats one iteration at a time:
//!
//! 1. apply pending control at the boundary (pause waits, stop exits);
//! 2. invoke the producer with the trigger value, backing off on no work;
//! 3. walk the chain, feeding each node the previous node's output, until
//!    [`advance`] says the iteration ended or failed.
//!
//! Failures are dead-lettered with the failing node's input and never
//! retried. Only a run of unmapped branches moves the loop to `Error`.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::{debug, error, info, trace, warn};

use crate::config::ConfigSection;
use crate::deadletter::{DeadLetterRecord, DeadLetterSink, FailureKind};
use crate::engine::cycle::{Transition, advance};
use crate::engine::health::HealthRecorder;
use crate::engine::{LoopCommand, LoopId, LoopState};
use crate::graph::LoopPlan;
use crate::node::{Node, NodeData, NodeId};

/// Per-loop tunables taken from `[config]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopSettings {
    /// Pause after a producer reports no work, and between dead-letter
    /// submission attempts.
    pub idle_backoff: Duration,
    /// Consecutive unmapped branches that put the loop in `Error`.
    pub unmapped_branch_limit: u32,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            idle_backoff: Duration::from_millis(200),
            unmapped_branch_limit: 3,
        }
    }
}

impl From<&ConfigSection> for LoopSettings {
    fn from(cfg: &ConfigSection) -> Self {
        Self {
            idle_backoff: cfg.idle_backoff(),
            unmapped_branch_limit: cfg.unmapped_branch_limit,
        }
    }
}

/// How one pass through the loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Iteration {
    Idle,
    Completed,
    Failed { unmapped_branch: bool },
}

/// Control side of a loop, kept by the orchestrator.
#[derive(Debug)]
pub struct LoopHandle {
    id: LoopId,
    control: watch::Sender<LoopCommand>,
    health: HealthRecorder,
}

impl LoopHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn pause(&self) {
        self.send(LoopCommand::Pause);
    }

    pub fn resume(&self) {
        self.send(LoopCommand::Run);
    }

    pub fn stop(&self) {
        self.send(LoopCommand::Stop);
    }

    pub fn state(&self) -> LoopState {
        self.health.state()
    }

    pub fn health(&self) -> &HealthRecorder {
        &self.health
    }

    fn send(&self, command: LoopCommand) {
        debug!(loop_id = %self.id, ?command, "loop control requested");
        // The loop may already have exited; the latest value is all that counts.
        self.control.send_replace(command);
    }
}

pub struct LoopManager {
    id: LoopId,
    plan: LoopPlan,
    nodes: BTreeMap<NodeId, Box<dyn Node>>,
    sink: Arc<dyn DeadLetterSink>,
    settings: LoopSettings,
    control: watch::Receiver<LoopCommand>,
    health: HealthRecorder,
}

impl fmt::Debug for LoopManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopManager")
            .field("id", &self.id)
            .field("plan", &self.plan)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl LoopManager {
    /// Create a manager and the handle used to control it.
    ///
    /// `nodes` must hold one instance per member of `plan`.
    pub fn new(
        plan: LoopPlan,
        nodes: BTreeMap<NodeId, Box<dyn Node>>,
        sink: Arc<dyn DeadLetterSink>,
        settings: LoopSettings,
        health: HealthRecorder,
    ) -> (Self, LoopHandle) {
        let id: LoopId = plan.producer().to_string();
        let (tx, rx) = watch::channel(LoopCommand::Run);

        let manager = Self {
            id: id.clone(),
            plan,
            nodes,
            sink,
            settings,
            control: rx,
            health: health.clone(),
        };
        let handle = LoopHandle {
            id,
            control: tx,
            health,
        };
        (manager, handle)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn health(&self) -> &HealthRecorder {
        &self.health
    }

    /// Run until stopped or structurally broken; returns the final state.
    pub async fn run(mut self) -> LoopState {
        info!(loop_id = %self.id, members = ?self.plan.members(), "loop started");
        let mut iteration: u64 = 0;

        loop {
            // Nodes that never await would otherwise starve a shared runtime.
            tokio::task::yield_now().await;

            if !self.at_boundary().await {
                self.health.set_state(LoopState::Stopped);
                info!(loop_id = %self.id, iterations = iteration, "loop stopped");
                return LoopState::Stopped;
            }

            match self.run_iteration(iteration + 1).await {
                Iteration::Idle => {
                    self.health.record_idle();
                    self.backoff().await;
                }
                Iteration::Completed => {
                    iteration += 1;
                    self.health.record_completed();
                }
                Iteration::Failed { unmapped_branch } => {
                    iteration += 1;
                    let streak = self.health.record_failed(unmapped_branch);
                    if unmapped_branch && streak >= self.settings.unmapped_branch_limit {
                        let reason = format!("{streak} consecutive unmapped branches");
                        error!(loop_id = %self.id, iteration, %reason, "loop entering error state");
                        self.health.set_error(reason);
                        return LoopState::Error;
                    }
                }
            }
        }
    }

    /// Apply pending control. Returns `false` when the loop must exit.
    async fn at_boundary(&mut self) -> bool {
        loop {
            // A dropped handle means nobody can resume or stop us any more.
            if self.control.has_changed().is_err() {
                return false;
            }

            let command = *self.control.borrow_and_update();
            match command {
                LoopCommand::Run => {
                    if self.health.state() != LoopState::Running {
                        self.health.set_state(LoopState::Running);
                        debug!(loop_id = %self.id, "loop running");
                    }
                    return true;
                }
                LoopCommand::Stop => return false,
                LoopCommand::Pause => {
                    if self.health.state() != LoopState::Paused {
                        self.health.set_state(LoopState::Paused);
                        info!(loop_id = %self.id, "loop paused");
                    }
                    if self.control.changed().await.is_err() {
                        return false;
                    }
                }
            }
        }
    }

    /// Sleep for `idle_backoff`, waking early on any control change.
    async fn backoff(&mut self) {
        tokio::select! {
            _ = tokio::time::sleep(self.settings.idle_backoff) => {}
            _ = self.control.changed() => {}
        }
    }

    async fn run_iteration(&mut self, iteration: u64) -> Iteration {
        let mut node_id: NodeId = self.plan.producer().to_string();
        let mut current = NodeData::trigger();

        loop {
            let started = Instant::now();
            let result = match self.nodes.get_mut(&node_id) {
                Some(node) => node.execute(&current).await,
                None => {
                    let message = format!("node '{node_id}' has no instance in loop '{}'", self.id);
                    return self
                        .fail(iteration, node_id, current, FailureKind::Protocol, message)
                        .await;
                }
            };
            let elapsed = started.elapsed();

            let transition = match result {
                Ok(output) => advance(&self.plan, &node_id, output),
                Err(err) => Transition::Fail {
                    kind: FailureKind::NodeFailure,
                    message: err.to_string(),
                },
            };

            let error = match &transition {
                Transition::Fail { message, .. } => Some(message.clone()),
                _ => None,
            };
            self.health.record_invocation(&node_id, elapsed, error);

            match transition {
                Transition::Continue { next, data } => {
                    trace!(
                        loop_id = %self.id,
                        iteration,
                        node_id = %node_id,
                        next = %next,
                        "advancing"
                    );
                    node_id = next;
                    current = data;
                }
                Transition::Idle => {
                    trace!(loop_id = %self.id, "producer has no work");
                    return Iteration::Idle;
                }
                Transition::End(reason) => {
                    debug!(
                        loop_id = %self.id,
                        iteration,
                        node_id = %node_id,
                        ?reason,
                        "iteration complete"
                    );
                    return Iteration::Completed;
                }
                Transition::Fail { kind, message } => {
                    return self.fail(iteration, node_id, current, kind, message).await;
                }
            }
        }
    }

    async fn fail(
        &mut self,
        iteration: u64,
        node_id: NodeId,
        input: NodeData,
        kind: FailureKind,
        message: String,
    ) -> Iteration {
        warn!(
            loop_id = %self.id,
            iteration,
            node_id = %node_id,
            %kind,
            error = %message,
            "iteration failed; dead-lettering"
        );
        let record = DeadLetterRecord::new(self.id.clone(), node_id, input, kind, message);
        self.dead_letter(record).await;

        Iteration::Failed {
            unmapped_branch: kind == FailureKind::UnmappedBranch,
        }
    }

    /// Submit until the sink accepts, or until a stop makes waiting pointless.
    async fn dead_letter(&mut self, record: DeadLetterRecord) {
        loop {
            match self.sink.submit(record.clone()).await {
                Ok(()) => {
                    self.health.record_dead_letter();
                    return;
                }
                Err(err) => {
                    let stopping = self.control.has_changed().is_err()
                        || *self.control.borrow() == LoopCommand::Stop;
                    if stopping {
                        let json = serde_json::to_string(&record)
                            .unwrap_or_else(|_| format!("{record:?}"));
                        error!(
                            loop_id = %self.id,
                            error = %err,
                            record = %json,
                            "dead-letter sink unavailable while stopping; record not stored"
                        );
                        return;
                    }

                    warn!(
                        loop_id = %self.id,
                        error = %err,
                        "dead-letter submission failed; retrying"
                    );
                    self.backoff().await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deadletter::MemoryDeadLetterSink;
    use crate::graph::{PlanNode, Successors};
    use crate::node::{NodeError, NodeOutput, NodeVariant, from_fn};
    use crate::types::ExecutionPool;
    use serde_json::json;
    use std::sync::atomic::{AtomicU64, Ordering};

    fn settings() -> LoopSettings {
        LoopSettings {
            idle_backoff: Duration::from_millis(5),
            unmapped_branch_limit: 2,
        }
    }

    /// Producer emitting `{"n": 1}`, `{"n": 2}`, ... up to `limit`, then no work.
    fn counter(limit: u64) -> Box<dyn Node> {
        let next = AtomicU64::new(0);
        Box::new(from_fn(move |_| {
            let n = next.fetch_add(1, Ordering::SeqCst) + 1;
            if n > limit {
                Ok(NodeOutput::NoWork)
            } else {
                Ok(NodeOutput::Data(NodeData::new(json!({ "n": n }))))
            }
        }))
    }

    fn entry(id: &str, variant: NodeVariant, successors: Successors) -> (NodeId, PlanNode) {
        (id.into(), PlanNode { variant, successors })
    }

    async fn wait_for(mut check: impl FnMut() -> bool) {
        for _ in 0..400 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn failures_are_dead_lettered_with_node_input() {
        let plan = LoopPlan::new(
            "src",
            vec![
                entry("src", NodeVariant::Producer, Successors::Next("check".into())),
                entry("check", NodeVariant::Blocking, Successors::End),
            ],
        );
        let mut nodes: BTreeMap<NodeId, Box<dyn Node>> = BTreeMap::new();
        nodes.insert("src".into(), counter(3));
        nodes.insert(
            "check".into(),
            Box::new(from_fn(|d: &NodeData| {
                if d.get("n") == Some(&json!(2)) {
                    Err(NodeError::failed("two is bad"))
                } else {
                    Ok(NodeOutput::Data(d.clone()))
                }
            })),
        );

        let sink = Arc::new(MemoryDeadLetterSink::new());
        let health = HealthRecorder::new("src", ExecutionPool::Async);
        let (manager, handle) = LoopManager::new(plan, nodes, sink.clone(), settings(), health);
        let task = tokio::spawn(manager.run());

        wait_for(|| handle.health().snapshot().iterations == 3).await;
        handle.stop();
        assert_eq!(task.await.unwrap(), LoopState::Stopped);

        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].node_id, "check");
        assert_eq!(records[0].kind, FailureKind::NodeFailure);
        assert_eq!(records[0].data, NodeData::new(json!({"n": 2})));
        assert_eq!(records[0].error, "two is bad");

        let snap = handle.health().snapshot();
        assert_eq!(snap.completed, 2);
        assert_eq!(snap.failed, 1);
        assert_eq!(snap.state, LoopState::Stopped);
    }

    #[tokio::test]
    async fn repeated_unmapped_branches_end_in_error() {
        let plan = LoopPlan::new(
            "src",
            vec![
                entry("src", NodeVariant::Producer, Successors::Next("check".into())),
                entry(
                    "check",
                    NodeVariant::ConditionalBlocking,
                    Successors::Branches(BTreeMap::new()),
                ),
            ],
        );
        let mut nodes: BTreeMap<NodeId, Box<dyn Node>> = BTreeMap::new();
        nodes.insert("src".into(), counter(100));
        nodes.insert(
            "check".into(),
            Box::new(from_fn(|d: &NodeData| Ok(NodeOutput::branch(d.clone(), "nowhere")))),
        );

        let sink = Arc::new(MemoryDeadLetterSink::new());
        let health = HealthRecorder::new("src", ExecutionPool::Async);
        let (manager, handle) = LoopManager::new(plan, nodes, sink.clone(), settings(), health);

        assert_eq!(manager.run().await, LoopState::Error);
        assert_eq!(handle.state(), LoopState::Error);
        assert_eq!(sink.records().len(), 2);
        assert!(sink.records().iter().all(|r| r.kind == FailureKind::UnmappedBranch));
    }
}
