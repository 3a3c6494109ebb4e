// src/graph/graph.rs

use std::collections::BTreeMap;

use crate::config::model::ConfigFile;
use crate::node::NodeId;
use crate::types::{ExecutionPool, NodeVariant};

/// Where the chain goes after a node returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Successors {
    /// No outgoing edge: the iteration ends here.
    End,
    /// Single unlabelled edge.
    Next(NodeId),
    /// Labelled edges of a conditional node.
    Branches(BTreeMap<String, NodeId>),
}

impl Successors {
    /// Every node this one can hand data to.
    pub fn targets(&self) -> Vec<&str> {
        match self {
            Successors::End => Vec::new(),
            Successors::Next(id) => vec![id.as_str()],
            Successors::Branches(map) => map.values().map(|id| id.as_str()).collect(),
        }
    }

    pub fn is_end(&self) -> bool {
        match self {
            Successors::End => true,
            Successors::Next(_) => false,
            Successors::Branches(map) => map.is_empty(),
        }
    }
}

/// A node of the resolved graph: config plus adjacency.
#[derive(Debug, Clone)]
pub struct GraphNode {
    pub id: NodeId,
    pub variant: NodeVariant,
    pub kind: String,
    pub pool: Option<ExecutionPool>,
    pub params: toml::Table,
    pub successors: Successors,
    /// Direct upstream nodes (for diagnostics).
    pub predecessors: Vec<NodeId>,
}

/// Resolved execution graph keyed by node id.
///
/// Built from a validated [`ConfigFile`], so edge endpoints exist, only
/// conditional nodes branch, and branch labels are unique.
#[derive(Debug, Clone)]
pub struct ExecutionGraph {
    nodes: BTreeMap<NodeId, GraphNode>,
}

impl ExecutionGraph {
    pub fn from_config(cfg: &ConfigFile) -> Self {
        let mut nodes: BTreeMap<NodeId, GraphNode> = cfg
            .node
            .iter()
            .map(|(id, nc)| {
                let node = GraphNode {
                    id: id.clone(),
                    variant: nc.variant,
                    kind: nc.kind.clone(),
                    pool: nc.pool,
                    params: nc.params.clone(),
                    successors: if nc.variant == NodeVariant::ConditionalBlocking {
                        Successors::Branches(BTreeMap::new())
                    } else {
                        Successors::End
                    },
                    predecessors: Vec::new(),
                };
                (id.clone(), node)
            })
            .collect();

        for edge in cfg.edge.iter() {
            if let Some(from) = nodes.get_mut(&edge.from) {
                match (&mut from.successors, &edge.label) {
                    (Successors::Branches(map), Some(label)) => {
                        map.insert(label.clone(), edge.to.clone());
                    }
                    (succ, _) => {
                        *succ = Successors::Next(edge.to.clone());
                    }
                }
            }
            if let Some(to) = nodes.get_mut(&edge.to) {
                to.predecessors.push(edge.from.clone());
            }
        }

        Self { nodes }
    }

    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.nodes.get(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &GraphNode> {
        self.nodes.values()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Producer ids, in id order.
    pub fn producers(&self) -> impl Iterator<Item = &str> {
        self.nodes
            .values()
            .filter(|n| n.variant == NodeVariant::Producer)
            .map(|n| n.id.as_str())
    }

    /// Immediate successors of a node (`End` for unknown ids).
    pub fn successors_of(&self, id: &str) -> &Successors {
        static END: Successors = Successors::End;
        self.nodes.get(id).map(|n| &n.successors).unwrap_or(&END)
    }

    /// Immediate upstream nodes of a node.
    pub fn predecessors_of(&self, id: &str) -> &[NodeId] {
        self.nodes
            .get(id)
            .map(|n| n.predecessors.as_slice())
            .unwrap_or(&[])
    }
}
