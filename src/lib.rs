// src/lib.rs

pub mod cli;
pub mod config;
pub mod deadletter;
pub mod engine;
pub mod errors;
pub mod graph;
pub mod logging;
pub mod node;
pub mod orchestrator;
pub mod queue;
pub mod types;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, info};

use crate::cli::CliArgs;
use crate::config::loader::load_and_validate;
use crate::config::model::ConfigFile;
use crate::deadletter::MemoryDeadLetterSink;
use crate::engine::{Runtime, RuntimeEvent, RuntimeOptions};
use crate::node::NodeRegistry;
use crate::orchestrator::Orchestrator;
use crate::queue::MemoryQueueManager;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading
/// - queue store and dead-letter sink from `[queue]` / `[dead_letter]`
/// - node registry (built-in kinds)
/// - orchestrator / runtime
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<()> {
    let cfg = load_and_validate(&args.config)?;
    let registry = NodeRegistry::with_builtins();

    if args.dry_run {
        print_dry_run(&cfg, &registry);
        return Ok(());
    }

    let orchestrator = build_orchestrator(&cfg, &registry)?;

    let options = RuntimeOptions {
        health_interval: args.health_interval.map(Duration::from_secs),
        run_for: args.run_for.map(Duration::from_secs),
    };
    let runtime = Runtime::new(orchestrator, options);

    // Ctrl-C → graceful shutdown.
    {
        let tx = runtime.sender();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("failed to listen for Ctrl+C: {e}");
                return;
            }
            let _ = tx.send(RuntimeEvent::ShutdownRequested).await;
        });
    }

    let report = runtime.run().await?;
    info!(
        loops = report.loops.len(),
        dead_letters = report.dead_letters_total,
        "flowloop finished"
    );
    Ok(())
}

/// Open the configured queue store and dead-letter sink and build every loop.
pub fn build_orchestrator(cfg: &ConfigFile, registry: &NodeRegistry) -> Result<Orchestrator> {
    let queues = queue::from_config(&cfg.queue)?;
    let sink = deadletter::from_config(&cfg.dead_letter)?;
    debug!(queue = ?cfg.queue.backend, dead_letter = ?cfg.dead_letter.backend, "backends ready");
    Ok(Orchestrator::build(cfg, registry, queues, sink))
}

/// Print discovered loops without opening any backend or running a node.
fn print_dry_run(cfg: &ConfigFile, registry: &NodeRegistry) {
    let orchestrator = Orchestrator::build(
        cfg,
        registry,
        Arc::new(MemoryQueueManager::new()),
        Arc::new(MemoryDeadLetterSink::new()),
    );

    println!("flowloop dry-run");
    println!("  config.idle_backoff_ms = {}", cfg.config.idle_backoff_ms);
    println!("  config.unmapped_branch_limit = {}", cfg.config.unmapped_branch_limit);
    println!("  config.default_pool = {}", cfg.config.default_pool);
    println!("  queue.backend = {:?}", cfg.queue.backend);
    println!("  dead_letter.backend = {:?}", cfg.dead_letter.backend);
    println!();

    println!("nodes ({}):", cfg.node.len());
    for (id, node) in cfg.node.iter() {
        println!("  - {id} ({}, kind = {})", node.variant, node.kind);
    }
    println!();

    let ids: Vec<&str> = orchestrator.loop_ids().collect();
    println!("loops ({}):", ids.len());
    for id in ids {
        match orchestrator.loop_error(id) {
            Some(err) => println!("  - {id}: ERROR {err}"),
            None => {
                let pool = orchestrator.pool(id).unwrap_or_default();
                let members = orchestrator.members(id).unwrap_or_default();
                println!("  - {id} [{pool}]: {}", members.join(" -> "));
            }
        }
    }

    debug!("dry-run complete (no execution)");
}
