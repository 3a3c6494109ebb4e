// src/engine/runtime.rs

use std::fmt;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::engine::{HealthReport, RuntimeEvent};
use crate::errors::Result;
use crate::orchestrator::Orchestrator;

/// How often the runtime checks whether every started loop has exited.
const FINISHED_POLL: Duration = Duration::from_millis(100);

/// Options for the process-level event loop.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuntimeOptions {
    /// Log a health report at this interval.
    pub health_interval: Option<Duration>,
    /// Request shutdown after this long.
    pub run_for: Option<Duration>,
}

/// Drives the orchestrator in response to `RuntimeEvent`s.
///
/// Loops run on their own; this shell only starts them, forwards external
/// lifecycle requests, emits health reports and performs the final
/// shutdown.
pub struct Runtime {
    orchestrator: Orchestrator,
    event_tx: mpsc::Sender<RuntimeEvent>,
    event_rx: mpsc::Receiver<RuntimeEvent>,
    options: RuntimeOptions,
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("orchestrator", &self.orchestrator)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Runtime {
    pub fn new(orchestrator: Orchestrator, options: RuntimeOptions) -> Self {
        let (event_tx, event_rx) = mpsc::channel(64);
        Self {
            orchestrator,
            event_tx,
            event_rx,
            options,
        }
    }

    /// Sender for injecting events (Ctrl-C handler, tests, embedders).
    pub fn sender(&self) -> mpsc::Sender<RuntimeEvent> {
        self.event_tx.clone()
    }

    /// Main event loop.
    ///
    /// - Starts every autostart loop.
    /// - Consumes `RuntimeEvent`s until shutdown is requested, or until every
    ///   started loop has ended on its own (stopped or errored).
    /// - Stops and joins all loops, and returns the final health report.
    pub async fn run(mut self) -> Result<HealthReport> {
        let started = self.orchestrator.start_all()?;
        info!(loops = started, "flowloop runtime started");
        if started == 0 {
            warn!("no loop was started");
        }

        if let Some(interval) = self.options.health_interval {
            spawn_ticker(self.event_tx.clone(), interval);
        }
        if let Some(limit) = self.options.run_for {
            spawn_deadline(self.event_tx.clone(), limit);
        }

        let mut finished_poll = tokio::time::interval(FINISHED_POLL);
        loop {
            let event = tokio::select! {
                event = self.event_rx.recv() => match event {
                    Some(e) => e,
                    None => {
                        info!("runtime event channel closed; exiting");
                        break;
                    }
                },
                _ = finished_poll.tick() => {
                    if self.orchestrator.any_started() && self.orchestrator.all_finished() {
                        info!("every loop has ended; exiting");
                        break;
                    }
                    continue;
                }
            };

            debug!(?event, "runtime received event");
            if !self.handle_event(event) {
                info!("shutdown requested; stopping loops");
                break;
            }
        }

        self.orchestrator.shutdown().await;
        let report = self.orchestrator.health();
        log_report(&report);
        info!("runtime exiting");
        Ok(report)
    }

    /// Apply one event. Returns `false` once the runtime should exit.
    fn handle_event(&mut self, event: RuntimeEvent) -> bool {
        let result = match event {
            RuntimeEvent::ShutdownRequested => return false,
            RuntimeEvent::ReportHealth => {
                log_report(&self.orchestrator.health());
                Ok(())
            }
            RuntimeEvent::StartLoop(id) => self.orchestrator.start(&id),
            RuntimeEvent::PauseLoop(id) => self.orchestrator.pause(&id),
            RuntimeEvent::ResumeLoop(id) => self.orchestrator.resume(&id),
            RuntimeEvent::StopLoop(id) => self.orchestrator.stop(&id),
        };

        if let Err(err) = result {
            warn!(error = %err, "loop control request rejected");
        }
        true
    }
}

fn log_report(report: &HealthReport) {
    match serde_json::to_string(report) {
        Ok(json) => info!(health = %json, "health report"),
        Err(err) => warn!(error = %err, "failed to encode health report"),
    }
}

fn spawn_ticker(tx: mpsc::Sender<RuntimeEvent>, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if tx.send(RuntimeEvent::ReportHealth).await.is_err() {
                break;
            }
        }
    });
}

fn spawn_deadline(tx: mpsc::Sender<RuntimeEvent>, limit: Duration) {
    tokio::spawn(async move {
        tokio::time::sleep(limit).await;
        info!(secs = limit.as_secs_f64(), "run deadline reached");
        let _ = tx.send(RuntimeEvent::ShutdownRequested).await;
    });
}
