use proptest::prelude::*;
use serde_json::json;

use flowloop::engine::{EndReason, Transition, advance};
use flowloop::graph::{LoopPlan, PlanNode, Successors};
use flowloop::node::{NodeData, NodeOutput, NodeVariant};

// A producer followed by a linear chain of Blocking / NonBlocking nodes.
fn chain_strategy(max_len: usize) -> impl Strategy<Value = Vec<NodeVariant>> {
    proptest::collection::vec(
        prop_oneof![Just(NodeVariant::Blocking), Just(NodeVariant::NonBlocking)],
        1..=max_len,
    )
}

fn plan_for(chain: &[NodeVariant]) -> LoopPlan {
    let ids: Vec<String> = (0..=chain.len()).map(|i| format!("n{i}")).collect();
    let variants = std::iter::once(NodeVariant::Producer).chain(chain.iter().copied());

    let nodes = variants
        .enumerate()
        .map(|(i, variant)| {
            let successors = match ids.get(i + 1) {
                Some(next) => Successors::Next(next.clone()),
                None => Successors::End,
            };
            (ids[i].clone(), PlanNode { variant, successors })
        })
        .collect();
    LoopPlan::new("n0", nodes)
}

/// Drive one iteration through the pure core, every node echoing its input.
fn walk(plan: &LoopPlan) -> (Vec<String>, Transition) {
    let mut visited = Vec::new();
    let mut node = plan.producer().to_string();
    let mut data = NodeData::new(json!({"v": 1}));

    loop {
        visited.push(node.clone());
        match advance(plan, &node, NodeOutput::Data(data.clone())) {
            Transition::Continue { next, data: d } => {
                node = next;
                data = d;
            }
            other => return (visited, other),
        }
    }
}

proptest! {
    #[test]
    fn walk_ends_at_first_non_blocking_or_chain_end(chain in chain_strategy(12)) {
        let plan = plan_for(&chain);
        let (visited, end) = walk(&plan);

        match chain.iter().position(|v| *v == NodeVariant::NonBlocking) {
            Some(idx) => {
                // +1 for the producer.
                prop_assert_eq!(visited.len(), idx + 2);
                prop_assert_eq!(end, Transition::End(EndReason::NonBlocking));
            }
            None => {
                prop_assert_eq!(visited.len(), chain.len() + 1);
                prop_assert_eq!(end, Transition::End(EndReason::EndOfChain));
            }
        }
    }

    #[test]
    fn data_is_handed_on_unchanged_by_the_core(v in any::<i64>(), len in 1usize..8) {
        let plan = plan_for(&vec![NodeVariant::Blocking; len]);
        let data = NodeData::new(json!({ "v": v }));

        for i in 0..len {
            let id = format!("n{i}");
            match advance(&plan, &id, NodeOutput::Data(data.clone())) {
                Transition::Continue { next, data: d } => {
                    prop_assert_eq!(next, format!("n{}", i + 1));
                    prop_assert_eq!(&d, &data);
                }
                other => prop_assert!(false, "unexpected {:?}", other),
            }
        }
    }

    #[test]
    fn no_work_only_idles_a_producer(chain in chain_strategy(6)) {
        let plan = plan_for(&chain);
        prop_assert_eq!(advance(&plan, "n0", NodeOutput::NoWork), Transition::Idle);
        for i in 1..=chain.len() {
            let is_protocol_failure = matches!(
                advance(&plan, &format!("n{i}"), NodeOutput::NoWork),
                Transition::Fail { kind: flowloop::deadletter::FailureKind::Protocol, .. }
            );
            prop_assert!(is_protocol_failure);
        }
    }
}
