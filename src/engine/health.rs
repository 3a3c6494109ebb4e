// src/engine/health.rs

//! Loop and node health records.
//!
//! Each loop owns one [`HealthRecorder`] and is its only writer; the
//! orchestrator clones the handle and takes snapshots for reports. The lock
//! is never held across an `.await`.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::engine::{LoopId, LoopState};
use crate::node::NodeId;
use crate::types::ExecutionPool;

/// Invocation statistics for one node of one loop.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NodeHealth {
    pub invocations: u64,
    pub failures: u64,
    pub total_duration_ms: u64,
    pub max_duration_ms: u64,
    pub last_error: Option<String>,
}

/// Point-in-time view of one loop.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoopHealth {
    pub loop_id: LoopId,
    pub state: LoopState,
    pub pool: ExecutionPool,
    /// Iterations that got past the producer (completed + failed).
    pub iterations: u64,
    pub completed: u64,
    pub failed: u64,
    /// Producer calls that returned no work.
    pub idle_polls: u64,
    pub dead_letters: u64,
    pub consecutive_unmapped: u32,
    /// Iterations per second since the loop started.
    pub iteration_rate: f64,
    pub started_at: Option<DateTime<Utc>>,
    pub last_iteration_at: Option<DateTime<Utc>>,
    /// Construction error or reason for entering `Error`.
    pub error: Option<String>,
    pub nodes: BTreeMap<NodeId, NodeHealth>,
}

impl LoopHealth {
    pub fn new(loop_id: impl Into<LoopId>, pool: ExecutionPool) -> Self {
        Self {
            loop_id: loop_id.into(),
            state: LoopState::Idle,
            pool,
            iterations: 0,
            completed: 0,
            failed: 0,
            idle_polls: 0,
            dead_letters: 0,
            consecutive_unmapped: 0,
            iteration_rate: 0.0,
            started_at: None,
            last_iteration_at: None,
            error: None,
            nodes: BTreeMap::new(),
        }
    }
}

/// Health of every loop plus the dead-letter sink total.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub generated_at: DateTime<Utc>,
    pub loops: Vec<LoopHealth>,
    pub dead_letters_total: u64,
}

impl HealthReport {
    pub fn loop_health(&self, id: &str) -> Option<&LoopHealth> {
        self.loops.iter().find(|l| l.loop_id == id)
    }
}

#[derive(Debug)]
struct Record {
    health: LoopHealth,
    started: Option<Instant>,
}

/// Shared handle to one loop's health record.
#[derive(Debug, Clone)]
pub struct HealthRecorder {
    inner: Arc<Mutex<Record>>,
}

impl HealthRecorder {
    pub fn new(loop_id: impl Into<LoopId>, pool: ExecutionPool) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Record {
                health: LoopHealth::new(loop_id, pool),
                started: None,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Record> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> LoopState {
        self.lock().health.state
    }

    pub fn set_state(&self, state: LoopState) {
        let mut rec = self.lock();
        if state == LoopState::Running && rec.started.is_none() {
            rec.started = Some(Instant::now());
            rec.health.started_at = Some(Utc::now());
        }
        rec.health.state = state;
    }

    /// Enter `Error` with a reason.
    pub fn set_error(&self, error: impl Into<String>) {
        let mut rec = self.lock();
        rec.health.state = LoopState::Error;
        rec.health.error = Some(error.into());
    }

    pub fn record_invocation(&self, node: &str, elapsed: Duration, error: Option<String>) {
        let ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        let mut rec = self.lock();
        let stats = rec.health.nodes.entry(node.to_string()).or_default();
        stats.invocations += 1;
        stats.total_duration_ms = stats.total_duration_ms.saturating_add(ms);
        stats.max_duration_ms = stats.max_duration_ms.max(ms);
        if let Some(error) = error {
            stats.failures += 1;
            stats.last_error = Some(error);
        }
    }

    pub fn record_idle(&self) {
        self.lock().health.idle_polls += 1;
    }

    pub fn record_completed(&self) {
        let mut rec = self.lock();
        rec.health.iterations += 1;
        rec.health.completed += 1;
        rec.health.consecutive_unmapped = 0;
        rec.health.last_iteration_at = Some(Utc::now());
    }

    pub fn record_failed(&self, unmapped_branch: bool) -> u32 {
        let mut rec = self.lock();
        rec.health.iterations += 1;
        rec.health.failed += 1;
        if unmapped_branch {
            rec.health.consecutive_unmapped += 1;
        } else {
            rec.health.consecutive_unmapped = 0;
        }
        rec.health.last_iteration_at = Some(Utc::now());
        rec.health.consecutive_unmapped
    }

    pub fn record_dead_letter(&self) {
        self.lock().health.dead_letters += 1;
    }

    pub fn snapshot(&self) -> LoopHealth {
        let rec = self.lock();
        let mut health = rec.health.clone();
        if let Some(started) = rec.started {
            let secs = started.elapsed().as_secs_f64();
            if secs > 0.0 {
                health.iteration_rate = health.iterations as f64 / secs;
            }
        }
        health
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_and_unmapped_streak() {
        let rec = HealthRecorder::new("jobs", ExecutionPool::Async);
        rec.set_state(LoopState::Running);

        rec.record_invocation("jobs", Duration::from_millis(5), None);
        rec.record_invocation("check", Duration::from_millis(7), Some("boom".into()));
        assert_eq!(rec.record_failed(true), 1);
        assert_eq!(rec.record_failed(true), 2);
        rec.record_completed();
        rec.record_idle();
        rec.record_dead_letter();

        let snap = rec.snapshot();
        assert_eq!(snap.state, LoopState::Running);
        assert_eq!(snap.iterations, 3);
        assert_eq!(snap.completed, 1);
        assert_eq!(snap.failed, 2);
        assert_eq!(snap.consecutive_unmapped, 0);
        assert_eq!(snap.idle_polls, 1);
        assert_eq!(snap.dead_letters, 1);
        assert!(snap.started_at.is_some());

        let check = &snap.nodes["check"];
        assert_eq!(check.invocations, 1);
        assert_eq!(check.failures, 1);
        assert_eq!(check.last_error.as_deref(), Some("boom"));
        assert_eq!(snap.nodes["jobs"].max_duration_ms, 5);
    }

    #[test]
    fn snapshot_serializes_to_json() {
        let rec = HealthRecorder::new("jobs", ExecutionPool::Thread);
        rec.set_error("cycle detected");
        let json = serde_json::to_value(rec.snapshot()).unwrap();
        assert_eq!(json["state"], "error");
        assert_eq!(json["pool"], "thread");
        assert_eq!(json["error"], "cycle detected");
    }
}
