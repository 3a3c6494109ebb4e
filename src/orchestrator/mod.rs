// src/orchestrator/mod.rs

//! Loop discovery, placement and lifecycle.
//!
//! The orchestrator turns a validated graph into one [`LoopManager`] per
//! producer, places each in its execution context and exposes the external
//! lifecycle operations. A loop that cannot be built is kept as an entry in
//! state `Error`; every other loop is unaffected by it.

pub mod worker;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, warn};

use crate::config::ConfigFile;
use crate::deadletter::DeadLetterSink;
use crate::engine::health::HealthRecorder;
use crate::engine::{HealthReport, LoopHandle, LoopId, LoopManager, LoopSettings, LoopState};
use crate::errors::{FlowloopError, Result};
use crate::graph::{ExecutionGraph, LoopConstructionError, LoopPlan, resolve_loop, select_pool};
use crate::node::{Node, NodeContext, NodeId, NodeRegistry};
use crate::queue::QueueManager;
use crate::types::ExecutionPool;

pub use worker::Worker;

#[derive(Debug)]
struct LoopEntry {
    pool: ExecutionPool,
    autostart: bool,
    members: Vec<NodeId>,
    health: HealthRecorder,
    /// Construction failure; such a loop never starts.
    error: Option<String>,
    /// Present until the loop is started.
    manager: Option<LoopManager>,
    handle: Option<LoopHandle>,
    worker: Option<Worker>,
}

/// Owner of every loop in the process.
#[derive(Debug)]
pub struct Orchestrator {
    loops: BTreeMap<LoopId, LoopEntry>,
    sink: Arc<dyn DeadLetterSink>,
}

impl Orchestrator {
    /// Build every loop of `config`.
    ///
    /// Never fails as a whole: loop construction errors are recorded on the
    /// affected loop.
    pub fn build(
        config: &ConfigFile,
        registry: &NodeRegistry,
        queues: Arc<dyn QueueManager>,
        sink: Arc<dyn DeadLetterSink>,
    ) -> Self {
        let graph = ExecutionGraph::from_config(config);
        let settings = LoopSettings::from(&config.config);
        let mut loops = BTreeMap::new();
        let mut reachable: BTreeSet<NodeId> = BTreeSet::new();

        for producer in graph.producers() {
            let loop_cfg = config.loop_config(producer);
            let override_pool = loop_cfg.and_then(|l| l.pool);
            let autostart = loop_cfg.map(|l| l.autostart).unwrap_or(true);

            let built = resolve_loop(&graph, producer).and_then(|plan| {
                let nodes = instantiate(&graph, &plan, registry, &queues)?;
                Ok((plan, nodes))
            });

            let entry = match built {
                Ok((plan, nodes)) => {
                    reachable.extend(plan.members().iter().cloned());
                    let pool =
                        select_pool(&graph, &plan, override_pool, config.config.default_pool);
                    let members = plan.members().to_vec();
                    let health = HealthRecorder::new(producer, pool);
                    let (manager, handle) =
                        LoopManager::new(plan, nodes, sink.clone(), settings, health.clone());

                    info!(loop_id = %producer, %pool, members = ?members, "loop built");
                    LoopEntry {
                        pool,
                        autostart,
                        members,
                        health,
                        error: None,
                        manager: Some(manager),
                        handle: Some(handle),
                        worker: None,
                    }
                }
                Err(err) => {
                    reachable.insert(producer.to_string());
                    let pool = override_pool.unwrap_or(config.config.default_pool);
                    let health = HealthRecorder::new(producer, pool);
                    health.set_error(err.to_string());

                    error!(loop_id = %producer, error = %err, "loop construction failed");
                    LoopEntry {
                        pool,
                        autostart,
                        members: Vec::new(),
                        health,
                        error: Some(err.to_string()),
                        manager: None,
                        handle: None,
                        worker: None,
                    }
                }
            };
            loops.insert(producer.to_string(), entry);
        }

        for node in graph.nodes() {
            if !reachable.contains(&node.id) && graph.predecessors_of(&node.id).is_empty() {
                warn!(node_id = %node.id, "node has no incoming edge and is never invoked");
            }
        }

        Self { loops, sink }
    }

    fn entry(&self, id: &str) -> Result<&LoopEntry> {
        self.loops
            .get(id)
            .ok_or_else(|| FlowloopError::LoopNotFound(id.to_string()))
    }

    fn handle(&self, id: &str) -> Result<&LoopHandle> {
        let entry = self.entry(id)?;
        match (&entry.handle, &entry.error) {
            (Some(handle), _) => Ok(handle),
            (None, error) => Err(FlowloopError::LoopErrored(
                id.to_string(),
                error.clone().unwrap_or_default(),
            )),
        }
    }

    /// Loop ids in id order.
    pub fn loop_ids(&self) -> impl Iterator<Item = &str> {
        self.loops.keys().map(|k| k.as_str())
    }

    pub fn state(&self, id: &str) -> Option<LoopState> {
        self.loops.get(id).map(|e| e.health.state())
    }

    pub fn pool(&self, id: &str) -> Option<ExecutionPool> {
        self.loops.get(id).map(|e| e.pool)
    }

    /// Members of a loop, producer first (empty for errored loops).
    pub fn members(&self, id: &str) -> Option<&[NodeId]> {
        self.loops.get(id).map(|e| e.members.as_slice())
    }

    /// Construction error of a loop, if it failed to build.
    pub fn loop_error(&self, id: &str) -> Option<&str> {
        self.loops.get(id).and_then(|e| e.error.as_deref())
    }

    /// Start one loop in its execution context.
    pub fn start(&mut self, id: &str) -> Result<()> {
        let entry = self
            .loops
            .get_mut(id)
            .ok_or_else(|| FlowloopError::LoopNotFound(id.to_string()))?;

        if let Some(error) = &entry.error {
            return Err(FlowloopError::LoopErrored(id.to_string(), error.clone()));
        }
        let manager = entry
            .manager
            .take()
            .ok_or_else(|| FlowloopError::LoopAlreadyStarted(id.to_string()))?;

        entry.worker = Some(worker::spawn(entry.pool, manager)?);
        info!(loop_id = %id, pool = %entry.pool, "loop worker started");
        Ok(())
    }

    /// Start every buildable loop whose `autostart` is set.
    ///
    /// Returns the number of loops started.
    pub fn start_all(&mut self) -> Result<usize> {
        let ids: Vec<LoopId> = self
            .loops
            .iter()
            .filter(|(_, e)| e.autostart && e.error.is_none() && e.manager.is_some())
            .map(|(id, _)| id.clone())
            .collect();

        for id in &ids {
            self.start(id)?;
        }
        Ok(ids.len())
    }

    pub fn pause(&self, id: &str) -> Result<()> {
        self.handle(id)?.pause();
        Ok(())
    }

    pub fn resume(&self, id: &str) -> Result<()> {
        self.handle(id)?.resume();
        Ok(())
    }

    /// Request a stop; it takes effect at the loop's next iteration boundary.
    pub fn stop(&self, id: &str) -> Result<()> {
        self.handle(id)?.stop();
        Ok(())
    }

    pub fn stop_all(&self) {
        for entry in self.loops.values() {
            if let Some(handle) = &entry.handle {
                handle.stop();
            }
        }
    }

    /// Wait for one started loop to exit and return its final state.
    pub async fn join(&mut self, id: &str) -> Result<LoopState> {
        let entry = self
            .loops
            .get_mut(id)
            .ok_or_else(|| FlowloopError::LoopNotFound(id.to_string()))?;

        if let Some(worker) = entry.worker.take() {
            match worker.join().await {
                Ok(state) => {
                    info!(loop_id = %id, %state, "loop worker exited");
                }
                Err(panic) => {
                    error!(loop_id = %id, error = %panic, "loop worker died");
                    entry.health.set_error(panic);
                }
            }
        }
        Ok(entry.health.state())
    }

    /// Stop every loop and wait for all workers to exit.
    pub async fn shutdown(&mut self) {
        self.stop_all();

        let ids: Vec<LoopId> = self.loops.keys().cloned().collect();
        for id in ids {
            if let Err(err) = self.join(&id).await {
                warn!(loop_id = %id, error = %err, "failed to join loop");
            }
            if let Some(entry) = self.loops.get_mut(&id) {
                // Never started: nothing to join, but it will not run either.
                if entry.manager.take().is_some() {
                    entry.health.set_state(LoopState::Stopped);
                }
            }
        }
        info!("all loops shut down");
    }

    /// Snapshot of every loop plus the dead-letter total.
    pub fn health(&self) -> HealthReport {
        HealthReport {
            generated_at: Utc::now(),
            loops: self.loops.values().map(|e| e.health.snapshot()).collect(),
            dead_letters_total: self.sink.count(),
        }
    }

    /// True once at least one loop has been handed to a worker.
    pub fn any_started(&self) -> bool {
        self.loops
            .values()
            .any(|e| e.error.is_none() && e.manager.is_none())
    }

    /// True when every started loop has exited.
    pub fn all_finished(&self) -> bool {
        self.loops
            .values()
            .all(|e| e.worker.as_ref().is_none_or(|w| w.is_finished()))
    }
}

/// Construct one node instance per loop member.
fn instantiate(
    graph: &ExecutionGraph,
    plan: &LoopPlan,
    registry: &NodeRegistry,
    queues: &Arc<dyn QueueManager>,
) -> std::result::Result<BTreeMap<NodeId, Box<dyn Node>>, LoopConstructionError> {
    let mut nodes = BTreeMap::new();
    for id in plan.members() {
        let Some(spec) = graph.node(id) else {
            continue;
        };
        let ctx = NodeContext {
            id: id.clone(),
            variant: spec.variant,
            params: spec.params.clone(),
            queues: queues.clone(),
        };
        nodes.insert(id.clone(), registry.build(&spec.kind, &ctx)?);
    }
    Ok(nodes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_from_str;
    use crate::deadletter::MemoryDeadLetterSink;
    use crate::queue::MemoryQueueManager;

    fn orchestrator(toml: &str) -> Orchestrator {
        let cfg = ConfigFile::try_from(load_from_str(toml).unwrap()).unwrap();
        Orchestrator::build(
            &cfg,
            &NodeRegistry::with_builtins(),
            Arc::new(MemoryQueueManager::new()),
            Arc::new(MemoryDeadLetterSink::new()),
        )
    }

    #[tokio::test]
    async fn unknown_kind_errors_only_its_loop() {
        let mut orch = orchestrator(
            r#"
[node.good]
variant = "producer"
kind = "queue-reader"
params = { queue = "in", timeout_ms = 10 }
[node.sink]
variant = "non-blocking"
kind = "queue-writer"
params = { queue = "out" }

[node.bad]
variant = "producer"
kind = "does-not-exist"
[node.other]
variant = "blocking"
kind = "set"
params = { values = { a = 1 } }

[[edge]]
from = "good"
to = "sink"
[[edge]]
from = "bad"
to = "other"

[loop.good]
pool = "thread"
"#,
        );

        assert_eq!(orch.loop_ids().collect::<Vec<_>>(), vec!["bad", "good"]);
        assert_eq!(orch.state("bad"), Some(LoopState::Error));
        assert!(orch.loop_error("bad").unwrap().contains("does-not-exist"));
        assert_eq!(orch.pool("good"), Some(ExecutionPool::Thread));
        assert_eq!(orch.members("good").unwrap(), &["good", "sink"]);

        assert!(matches!(orch.start("bad"), Err(FlowloopError::LoopErrored(..))));
        assert!(matches!(orch.start("nope"), Err(FlowloopError::LoopNotFound(_))));

        assert_eq!(orch.start_all().unwrap(), 1);
        assert!(matches!(orch.start("good"), Err(FlowloopError::LoopAlreadyStarted(_))));

        orch.shutdown().await;
        assert_eq!(orch.state("good"), Some(LoopState::Stopped));
        assert_eq!(orch.state("bad"), Some(LoopState::Error));
        assert!(orch.all_finished());

        let report = orch.health();
        assert_eq!(report.loops.len(), 2);
        assert_eq!(report.dead_letters_total, 0);
    }

    #[tokio::test]
    async fn autostart_false_is_left_idle() {
        let mut orch = orchestrator(
            r#"
[node.p]
variant = "producer"
kind = "queue-reader"
params = { queue = "in", timeout_ms = 10 }
[node.w]
variant = "non-blocking"
kind = "queue-writer"
params = { queue = "out" }

[[edge]]
from = "p"
to = "w"

[loop.p]
autostart = false
"#,
        );

        assert_eq!(orch.start_all().unwrap(), 0);
        assert_eq!(orch.state("p"), Some(LoopState::Idle));
        assert!(!orch.any_started());
        orch.shutdown().await;
        assert_eq!(orch.state("p"), Some(LoopState::Stopped));
    }
}
