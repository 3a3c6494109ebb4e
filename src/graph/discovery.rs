// src/graph/discovery.rs

//! Loop discovery: one loop per producer.
//!
//! A loop is its producer plus every node reachable from it without walking
//! past a NonBlocking node. Because producers cannot be edge targets, a
//! chain never crosses into another loop's producer.

use std::collections::{BTreeMap, HashSet, VecDeque};

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use thiserror::Error;
use tracing::{debug, warn};

use crate::graph::graph::{ExecutionGraph, GraphNode, Successors};
use crate::node::{NodeBuildError, NodeId};
use crate::types::{ExecutionPool, NodeVariant};

/// Reasons a loop cannot be built. Fatal to that loop only.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LoopConstructionError {
    #[error("producer '{0}' has no downstream chain")]
    NoChain(NodeId),

    #[error("'{0}' is not a producer node")]
    NotAProducer(NodeId),

    #[error("cycle detected in loop '{producer}' involving node '{node}'")]
    Cycle { producer: NodeId, node: NodeId },

    #[error(transparent)]
    Build(#[from] NodeBuildError),
}

/// Scheduling view of one node inside a loop.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanNode {
    pub variant: NodeVariant,
    pub successors: Successors,
}

/// Resolved structure of one loop.
#[derive(Debug, Clone)]
pub struct LoopPlan {
    producer: NodeId,
    /// Member ids in discovery (breadth-first) order, producer first.
    order: Vec<NodeId>,
    nodes: BTreeMap<NodeId, PlanNode>,
}

impl LoopPlan {
    /// Build a plan directly from its parts (mainly for tests and embedders
    /// that construct chains in code).
    pub fn new(producer: impl Into<NodeId>, nodes: Vec<(NodeId, PlanNode)>) -> Self {
        let order = nodes.iter().map(|(id, _)| id.clone()).collect();
        Self {
            producer: producer.into(),
            order,
            nodes: nodes.into_iter().collect(),
        }
    }

    pub fn producer(&self) -> &str {
        &self.producer
    }

    pub fn node(&self, id: &str) -> Option<&PlanNode> {
        self.nodes.get(id)
    }

    /// Member ids, producer first.
    pub fn members(&self) -> &[NodeId] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Resolve the loop rooted at `producer`.
pub fn resolve_loop(
    graph: &ExecutionGraph,
    producer: &str,
) -> Result<LoopPlan, LoopConstructionError> {
    let root = match graph.node(producer) {
        Some(n) if n.variant == NodeVariant::Producer => n,
        _ => return Err(LoopConstructionError::NotAProducer(producer.to_string())),
    };

    if root.successors.is_end() {
        return Err(LoopConstructionError::NoChain(producer.to_string()));
    }

    let members = reachable_members(graph, root);
    ensure_acyclic(graph, producer, &members)?;

    let nodes = members
        .iter()
        .filter_map(|id| {
            let node = graph.node(id)?;
            if node.variant == NodeVariant::NonBlocking && !node.successors.is_end() {
                warn!(
                    loop_id = %producer,
                    node_id = %id,
                    "successors of a non-blocking node are never reached in the same iteration"
                );
            }
            Some((
                id.clone(),
                PlanNode {
                    variant: node.variant,
                    successors: node.successors.clone(),
                },
            ))
        })
        .collect();

    debug!(loop_id = %producer, members = ?members, "resolved loop");
    Ok(LoopPlan::new(producer, nodes))
}

/// Breadth-first walk from the producer that stops at NonBlocking nodes.
fn reachable_members(graph: &ExecutionGraph, root: &GraphNode) -> Vec<NodeId> {
    let mut order = Vec::new();
    let mut seen: HashSet<&str> = HashSet::new();
    let mut queue: VecDeque<&str> = VecDeque::from([root.id.as_str()]);

    while let Some(id) = queue.pop_front() {
        if !seen.insert(id) {
            continue;
        }
        order.push(id.to_string());

        let Some(node) = graph.node(id) else {
            continue;
        };
        if node.variant == NodeVariant::NonBlocking {
            continue;
        }
        queue.extend(node.successors.targets());
    }

    order
}

/// Chains must be acyclic within one iteration.
fn ensure_acyclic(
    graph: &ExecutionGraph,
    producer: &str,
    members: &[NodeId],
) -> Result<(), LoopConstructionError> {
    let mut dag: DiGraphMap<&str, ()> = DiGraphMap::new();

    for id in members {
        dag.add_node(id.as_str());
    }
    for id in members {
        let Some(node) = graph.node(id) else {
            continue;
        };
        if node.variant == NodeVariant::NonBlocking {
            continue;
        }
        for target in node.successors.targets() {
            dag.add_edge(id.as_str(), target, ());
        }
    }

    match toposort(&dag, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => Err(LoopConstructionError::Cycle {
            producer: producer.to_string(),
            node: cycle.node_id().to_string(),
        }),
    }
}

/// Execution context for a loop: explicit override, else the strongest
/// preference among its nodes, else the configured default.
pub fn select_pool(
    graph: &ExecutionGraph,
    plan: &LoopPlan,
    override_pool: Option<ExecutionPool>,
    default_pool: ExecutionPool,
) -> ExecutionPool {
    override_pool
        .or_else(|| {
            ExecutionPool::highest(
                plan.members()
                    .iter()
                    .filter_map(|id| graph.node(id).and_then(|n| n.pool)),
            )
        })
        .unwrap_or(default_pool)
}
