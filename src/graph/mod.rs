// src/graph/mod.rs

//! Resolved execution graph and loop discovery.
//!
//! - [`graph`] holds the node/edge adjacency built from a validated config.
//! - [`discovery`] splits the graph into producer-rooted loops and checks
//!   each one for cycles.

pub mod discovery;
pub mod graph;

pub use discovery::{LoopConstructionError, LoopPlan, PlanNode, resolve_loop, select_pool};
pub use graph::{ExecutionGraph, GraphNode, Successors};
