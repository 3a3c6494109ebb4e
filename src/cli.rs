// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

/// Command-line arguments for `flowloop`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "flowloop",
    version,
    about = "Run producer-driven node loops that hand data off through named queues.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the graph definition (TOML).
    ///
    /// Default: `Flowloop.toml` in the current working directory.
    #[arg(long, value_name = "PATH", default_value = "Flowloop.toml")]
    pub config: String,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `FLOWLOOP_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse + validate, print the discovered loops, but don't run them.
    #[arg(long)]
    pub dry_run: bool,

    /// Stop all loops after this many seconds.
    #[arg(long, value_name = "SECS")]
    pub run_for: Option<u64>,

    /// Log a JSON health report every this many seconds.
    #[arg(long, value_name = "SECS")]
    pub health_interval: Option<u64>,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
