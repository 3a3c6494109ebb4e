// src/errors.rs

//! Crate-wide error aliases and helpers.
//!
//! Module-level failures (nodes, queues, dead letters, loop construction)
//! have their own error enums next to the code that raises them; this type
//! covers configuration and orchestration.

use thiserror::Error;

use crate::engine::LoopId;

#[derive(Error, Debug)]
pub enum FlowloopError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Loop not found: {0}")]
    LoopNotFound(LoopId),

    #[error("Loop '{0}' failed to construct and cannot be started: {1}")]
    LoopErrored(LoopId, String),

    #[error("Loop '{0}' is already running")]
    LoopAlreadyStarted(LoopId),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, FlowloopError>;
