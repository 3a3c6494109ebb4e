// src/engine/mod.rs

//! Loop execution engine.
//!
//! This module ties together:
//! - the pure iteration core ([`cycle`]) deciding what happens after each
//!   node returns
//! - the per-loop async shell ([`loop_manager`]) that invokes nodes, applies
//!   the failure policy and honours control commands
//! - per-loop and per-node health records ([`health`])
//! - the process-level event loop ([`runtime`]) that reacts to:
//!   - Ctrl-C / shutdown requests
//!   - health report ticks
//!   - external start/stop/pause/resume requests
//!
//! The core is free of tokio so it can be tested in isolation; everything
//! that awaits lives in the shells.

use std::fmt;

use serde::Serialize;

/// Canonical loop identifier: the id of the loop's producer node.
pub type LoopId = String;

/// Lifecycle state of one loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopState {
    /// Built but not started.
    Idle,
    Running,
    /// Held at an iteration boundary until resumed.
    Paused,
    /// Stopped on request; terminal.
    Stopped,
    /// Structurally unable to run; terminal.
    Error,
}

impl LoopState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, LoopState::Stopped | LoopState::Error)
    }
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LoopState::Idle => "idle",
            LoopState::Running => "running",
            LoopState::Paused => "paused",
            LoopState::Stopped => "stopped",
            LoopState::Error => "error",
        };
        f.write_str(s)
    }
}

/// Control requested from outside the loop; applied at iteration
/// boundaries only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopCommand {
    Run,
    Pause,
    Stop,
}

/// Events flowing into the process runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeEvent {
    /// Emit a health report.
    ReportHealth,
    StartLoop(LoopId),
    PauseLoop(LoopId),
    ResumeLoop(LoopId),
    StopLoop(LoopId),
    /// Graceful shutdown requested (e.g. Ctrl-C or `--run-for` elapsed).
    ShutdownRequested,
}

pub mod cycle;
pub mod health;
pub mod loop_manager;
pub mod runtime;

pub use cycle::{EndReason, Transition, advance};
pub use health::{HealthRecorder, HealthReport, LoopHealth, NodeHealth};
pub use loop_manager::{LoopHandle, LoopManager, LoopSettings};
pub use runtime::{Runtime, RuntimeOptions};
