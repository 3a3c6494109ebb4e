// src/engine/cycle.rs

//! Pure iteration core.
//!
//! After every node invocation the loop asks [`advance`] what to do next.
//! The answer depends only on the loop's structure, the variant of the node
//! that just ran and what it returned, so this module has no channels, no
//! tokio types and performs no IO.

use crate::deadletter::FailureKind;
use crate::graph::{LoopPlan, Successors};
use crate::node::{NodeData, NodeId, NodeOutput, NodeVariant};

/// Why an iteration ended normally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// The node that just ran is NonBlocking.
    NonBlocking,
    /// The node that just ran has no successor.
    EndOfChain,
}

/// What the loop does after one node returned.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Invoke `next` with `data`.
    Continue { next: NodeId, data: NodeData },
    /// The producer had no work: back off and ask again.
    Idle,
    /// The iteration completed; its data is discarded.
    End(EndReason),
    /// The iteration failed at the node that just ran.
    Fail { kind: FailureKind, message: String },
}

impl Transition {
    fn protocol(node: &str, variant: NodeVariant, what: &str) -> Self {
        Transition::Fail {
            kind: FailureKind::Protocol,
            message: format!("{variant} node '{node}' returned {what}"),
        }
    }
}

fn follow(successors: &Successors, data: NodeData) -> Transition {
    match successors {
        Successors::Next(next) => Transition::Continue {
            next: next.clone(),
            data,
        },
        // Branch maps only belong to conditional nodes; treat as chain end.
        Successors::End | Successors::Branches(_) => Transition::End(EndReason::EndOfChain),
    }
}

/// Decide the next step after `node_id` returned `output`.
pub fn advance(plan: &LoopPlan, node_id: &str, output: NodeOutput) -> Transition {
    let Some(node) = plan.node(node_id) else {
        return Transition::Fail {
            kind: FailureKind::Protocol,
            message: format!("node '{node_id}' is not part of loop '{}'", plan.producer()),
        };
    };

    match (node.variant, output) {
        (NodeVariant::Producer, NodeOutput::NoWork) => Transition::Idle,
        (_, NodeOutput::NoWork) => Transition::protocol(node_id, node.variant, "no work"),

        (NodeVariant::NonBlocking, NodeOutput::Data(_)) => Transition::End(EndReason::NonBlocking),

        (NodeVariant::ConditionalBlocking, NodeOutput::Branch { data, label }) => {
            let target = match &node.successors {
                Successors::Branches(map) => map.get(&label),
                _ => None,
            };
            match target {
                Some(next) => Transition::Continue {
                    next: next.clone(),
                    data,
                },
                None => Transition::Fail {
                    kind: FailureKind::UnmappedBranch,
                    message: format!(
                        "conditional node '{node_id}' chose unmapped branch '{label}'"
                    ),
                },
            }
        }
        (NodeVariant::ConditionalBlocking, NodeOutput::Data(_)) => Transition::Fail {
            kind: FailureKind::UnmappedBranch,
            message: format!("conditional node '{node_id}' returned data without a branch label"),
        },

        (variant, NodeOutput::Branch { label, .. }) => {
            Transition::protocol(node_id, variant, &format!("branch label '{label}'"))
        }

        (_, NodeOutput::Data(data)) => follow(&node.successors, data),
    }
}
