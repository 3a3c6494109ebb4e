// src/config/mod.rs

//! Graph definition loading and validation.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a definition from disk (`loader.rs`).
//! - Validate graph-wide invariants (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{default_config_path, load_and_validate, load_from_path, load_from_str};
pub use model::{
    ConfigFile, ConfigSection, DeadLetterSection, EdgeConfig, LoopConfig, NodeConfig,
    QueueSection, RawConfigFile,
};
pub use validate::validate_raw_config;
