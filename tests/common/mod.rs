#![allow(dead_code)]

use std::sync::Arc;

use flowloop::config::ConfigFile;
use flowloop::deadletter::MemoryDeadLetterSink;
use flowloop::engine::{LoopHealth, LoopState};
use flowloop::orchestrator::Orchestrator;
use flowloop::queue::MemoryQueueManager;
use flowloop_test_utils::nodes::{Recorder, test_registry};

pub use flowloop_test_utils::builders::{GraphConfigBuilder, NodeConfigBuilder};
pub use flowloop_test_utils::{init_tracing, wait_until, with_timeout};

/// Orchestrator wired to in-memory backends and the scripted test kinds.
pub struct Harness {
    pub orchestrator: Orchestrator,
    pub queues: Arc<MemoryQueueManager>,
    pub sink: Arc<MemoryDeadLetterSink>,
    pub recorder: Recorder,
}

impl Harness {
    pub fn new(cfg: &ConfigFile) -> Self {
        init_tracing();
        let recorder = Recorder::new();
        let queues = Arc::new(MemoryQueueManager::new());
        let sink = Arc::new(MemoryDeadLetterSink::new());
        let orchestrator = Orchestrator::build(
            cfg,
            &test_registry(&recorder),
            queues.clone(),
            sink.clone(),
        );
        Self {
            orchestrator,
            queues,
            sink,
            recorder,
        }
    }

    pub fn loop_health(&self, id: &str) -> LoopHealth {
        self.orchestrator
            .health()
            .loop_health(id)
            .cloned()
            .expect("unknown loop")
    }

    pub fn state(&self, id: &str) -> LoopState {
        self.orchestrator.state(id).expect("unknown loop")
    }

    /// Wait until loop `id` has finished `n` iterations (completed or failed).
    pub async fn wait_iterations(&self, id: &str, n: u64) {
        wait_until(|| self.loop_health(id).iterations >= n).await;
    }
}
