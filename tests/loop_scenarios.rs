mod common;

use std::time::Duration;

use common::*;
use flowloop::deadletter::FailureKind;
use flowloop::engine::LoopState;
use flowloop::node::NodeData;
use flowloop::queue::QueueManager;
use flowloop::types::ExecutionPool;
use serde_json::json;

/// `[{v = 1}, {v = 2}, ...]` for the `scripted` producer.
fn values(vs: &[i64]) -> toml::Value {
    toml::Value::Array(
        vs.iter()
            .map(|v| {
                let mut t = toml::Table::new();
                t.insert("v".into(), toml::Value::Integer(*v));
                toml::Value::Table(t)
            })
            .collect(),
    )
}

fn data(v: i64) -> NodeData {
    NodeData::new(json!({ "v": v }))
}

#[tokio::test]
async fn producer_double_then_push_to_queue() {
    let cfg = GraphConfigBuilder::new()
        .idle_backoff_ms(5)
        .with_node(
            "src",
            NodeConfigBuilder::producer("scripted")
                .param("values", values(&[2]))
                .build(),
        )
        .with_node("double", NodeConfigBuilder::blocking("double").build())
        .with_node(
            "write_q1",
            NodeConfigBuilder::non_blocking("queue-writer")
                .param("queue", "q1")
                .build(),
        )
        .chain(&["src", "double", "write_q1"])
        .build();

    let mut h = Harness::new(&cfg);
    h.orchestrator.start_all().unwrap();
    h.wait_iterations("src", 1).await;

    assert_eq!(h.queues.len("q1").await.unwrap(), 1);
    let head = h.queues.pop("q1", Duration::from_millis(10)).await.unwrap();
    assert_eq!(head, Some(data(4)));

    let order = h.recorder.order();
    assert_eq!(&order[..2], &["src", "double"]);
    assert_eq!(h.recorder.inputs_of("src")[0], NodeData::trigger());

    let health = h.loop_health("src");
    assert_eq!(health.completed, 1);
    assert_eq!(health.dead_letters, 0);
    assert_eq!(health.state, LoopState::Running);

    h.orchestrator.shutdown().await;
}

#[tokio::test]
async fn queue_handoff_feeds_second_loop() {
    let cfg = GraphConfigBuilder::new()
        .idle_backoff_ms(5)
        .with_node(
            "a_src",
            NodeConfigBuilder::producer("scripted")
                .param("values", values(&[2]))
                .build(),
        )
        .with_node("double", NodeConfigBuilder::blocking("double").build())
        .with_node(
            "write_q1",
            NodeConfigBuilder::non_blocking("queue-writer")
                .param("queue", "q1")
                .build(),
        )
        .with_node(
            "b_src",
            NodeConfigBuilder::producer("queue-reader")
                .param("queue", "q1")
                .param("timeout_ms", 20)
                .build(),
        )
        .with_node("inc", NodeConfigBuilder::blocking("increment").build())
        .chain(&["a_src", "double", "write_q1"])
        .chain(&["b_src", "inc"])
        .loop_pool("b_src", ExecutionPool::Thread)
        .build();

    let mut h = Harness::new(&cfg);
    assert_eq!(h.orchestrator.pool("b_src"), Some(ExecutionPool::Thread));
    h.orchestrator.start_all().unwrap();
    h.wait_iterations("b_src", 1).await;

    assert_eq!(h.recorder.inputs_of("inc"), vec![data(4)]);
    assert_eq!(h.queues.len("q1").await.unwrap(), 0);
    assert_eq!(h.loop_health("b_src").completed, 1);

    h.orchestrator.shutdown().await;
    assert_eq!(h.state("a_src"), LoopState::Stopped);
    assert_eq!(h.state("b_src"), LoopState::Stopped);
}

#[tokio::test]
async fn failing_node_is_dead_lettered_and_loop_continues() {
    let cfg = GraphConfigBuilder::new()
        .idle_backoff_ms(5)
        .with_node(
            "src",
            NodeConfigBuilder::producer("scripted")
                .param("values", values(&[1, 2, 3]))
                .build(),
        )
        .with_node("check", NodeConfigBuilder::blocking("fail-if").param("equals", 2).build())
        .with_node("after", NodeConfigBuilder::blocking("pass").build())
        .chain(&["src", "check", "after"])
        .build();

    let mut h = Harness::new(&cfg);
    h.orchestrator.start_all().unwrap();
    h.wait_iterations("src", 3).await;

    let records = h.sink.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].loop_id, "src");
    assert_eq!(records[0].node_id, "check");
    assert_eq!(records[0].kind, FailureKind::NodeFailure);
    assert_eq!(records[0].data, data(2));
    assert!(records[0].error.contains("refusing v = 2"));

    // The failed iteration never reached `after`; the next one did.
    assert_eq!(h.recorder.inputs_of("after"), vec![data(1), data(3)]);
    assert_eq!(h.state("src"), LoopState::Running);

    let health = h.loop_health("src");
    assert_eq!(health.completed, 2);
    assert_eq!(health.failed, 1);
    assert_eq!(health.nodes["check"].failures, 1);
    assert_eq!(h.orchestrator.health().dead_letters_total, 1);

    h.orchestrator.shutdown().await;
}

#[tokio::test]
async fn failure_in_one_loop_leaves_the_other_untouched() {
    let cfg = GraphConfigBuilder::new()
        .idle_backoff_ms(5)
        .with_node(
            "a_src",
            NodeConfigBuilder::producer("scripted")
                .param("values", values(&[1, 2, 3]))
                .build(),
        )
        .with_node("double", NodeConfigBuilder::blocking("double").build())
        .with_node("guard", NodeConfigBuilder::blocking("fail-if").param("equals", 4).build())
        .with_node(
            "write_q1",
            NodeConfigBuilder::non_blocking("queue-writer")
                .param("queue", "q1")
                .build(),
        )
        .with_node(
            "b_src",
            NodeConfigBuilder::producer("queue-reader")
                .param("queue", "q1")
                .param("timeout_ms", 20)
                .build(),
        )
        .with_node("inc", NodeConfigBuilder::blocking("increment").build())
        .chain(&["a_src", "double", "guard", "write_q1"])
        .chain(&["b_src", "inc"])
        .build();

    let mut h = Harness::new(&cfg);
    h.orchestrator.start_all().unwrap();
    h.wait_iterations("a_src", 3).await;
    h.wait_iterations("b_src", 2).await;

    // Only A's failing node was dead-lettered, with its input.
    let records = h.sink.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].loop_id, "a_src");
    assert_eq!(records[0].node_id, "guard");
    assert_eq!(records[0].data, data(4));

    // A restarted at its producer after the failure.
    assert_eq!(h.recorder.inputs_of("double"), vec![data(1), data(2), data(3)]);

    // B consumed every good value and never failed.
    assert_eq!(h.recorder.inputs_of("inc"), vec![data(2), data(6)]);
    let b = h.loop_health("b_src");
    assert_eq!(b.failed, 0);
    assert_eq!(b.dead_letters, 0);
    assert_eq!(h.state("b_src"), LoopState::Running);
    assert_eq!(h.loop_health("a_src").failed, 1);

    h.orchestrator.shutdown().await;
}

#[tokio::test]
async fn unmapped_branches_move_loop_to_error_after_limit() {
    let cfg = GraphConfigBuilder::new()
        .idle_backoff_ms(5)
        .unmapped_branch_limit(3)
        .with_node(
            "src",
            NodeConfigBuilder::producer("scripted")
                .param("values", values(&[1, 2, 3, 4, 5]))
                .build(),
        )
        .with_node(
            "choose",
            NodeConfigBuilder::conditional("label")
                .param("label", "maybe")
                .build(),
        )
        .with_node("yes", NodeConfigBuilder::blocking("pass").build())
        .edge("src", "choose")
        .branch("choose", "yes", "yes")
        .build();

    let mut h = Harness::new(&cfg);
    h.orchestrator.start_all().unwrap();
    wait_until(|| h.state("src") == LoopState::Error).await;

    let records = h.sink.records();
    assert_eq!(records.len(), 3);
    assert!(records.iter().all(|r| r.kind == FailureKind::UnmappedBranch && r.node_id == "choose"));
    assert_eq!(h.recorder.count("yes"), 0);
    assert!(h.loop_health("src").error.unwrap().contains("unmapped"));

    assert_eq!(h.orchestrator.join("src").await.unwrap(), LoopState::Error);
}

#[tokio::test]
async fn successful_iteration_resets_unmapped_streak() {
    let cfg = GraphConfigBuilder::new()
        .idle_backoff_ms(5)
        .unmapped_branch_limit(2)
        .with_node(
            "src",
            NodeConfigBuilder::producer("scripted")
                .param("values", values(&[1, 2, 1, 2, 1]))
                .build(),
        )
        .with_node("parity", NodeConfigBuilder::conditional("parity").build())
        .with_node("even", NodeConfigBuilder::non_blocking("pass").build())
        .edge("src", "parity")
        .branch("parity", "even", "even")
        .build();

    let mut h = Harness::new(&cfg);
    h.orchestrator.start_all().unwrap();
    h.wait_iterations("src", 5).await;

    assert_eq!(h.sink.records().len(), 3);
    assert_eq!(h.recorder.inputs_of("even"), vec![data(2), data(2)]);
    assert_eq!(h.state("src"), LoopState::Running);

    h.orchestrator.shutdown().await;
}

#[tokio::test]
async fn conditional_routes_each_iteration_down_one_path() {
    let cfg = GraphConfigBuilder::new()
        .idle_backoff_ms(5)
        .with_node(
            "src",
            NodeConfigBuilder::producer("scripted")
                .param("values", values(&[1, 2, 3]))
                .build(),
        )
        .with_node("parity", NodeConfigBuilder::conditional("parity").build())
        .with_node("even", NodeConfigBuilder::blocking("double").build())
        .with_node("odd", NodeConfigBuilder::blocking("increment").build())
        .with_node(
            "join",
            NodeConfigBuilder::non_blocking("queue-writer")
                .param("queue", "out")
                .build(),
        )
        .edge("src", "parity")
        .branch("parity", "even", "even")
        .branch("parity", "odd", "odd")
        .edge("even", "join")
        .edge("odd", "join")
        .build();

    let mut h = Harness::new(&cfg);
    h.orchestrator.start_all().unwrap();
    h.wait_iterations("src", 3).await;

    let mut out = Vec::new();
    while let Some(d) = h.queues.pop("out", Duration::from_millis(5)).await.unwrap() {
        out.push(d);
    }
    assert_eq!(out, vec![data(2), data(4), data(4)]);
    assert_eq!(h.recorder.count("even"), 1);
    assert_eq!(h.recorder.count("odd"), 2);

    h.orchestrator.shutdown().await;
}

#[tokio::test]
async fn no_work_never_advances_or_dead_letters() {
    let cfg = GraphConfigBuilder::new()
        .idle_backoff_ms(5)
        .with_node(
            "src",
            NodeConfigBuilder::producer("scripted")
                .param("values", values(&[]))
                .build(),
        )
        .with_node("next", NodeConfigBuilder::blocking("pass").build())
        .chain(&["src", "next"])
        .build();

    let mut h = Harness::new(&cfg);
    h.orchestrator.start_all().unwrap();
    wait_until(|| h.loop_health("src").idle_polls >= 5).await;

    let health = h.loop_health("src");
    assert_eq!(health.iterations, 0);
    assert_eq!(health.dead_letters, 0);
    assert_eq!(h.recorder.count("next"), 0);
    assert!(h.sink.records().is_empty());
    assert!(h.recorder.inputs_of("src").iter().all(NodeData::is_trigger));

    h.orchestrator.shutdown().await;
}

#[tokio::test]
async fn non_blocking_node_ends_iteration_despite_successor() {
    let cfg = GraphConfigBuilder::new()
        .idle_backoff_ms(5)
        .with_node(
            "src",
            NodeConfigBuilder::producer("scripted")
                .param("values", values(&[1]))
                .build(),
        )
        .with_node("fire", NodeConfigBuilder::non_blocking("pass").build())
        .with_node("after", NodeConfigBuilder::blocking("pass").build())
        .chain(&["src", "fire", "after"])
        .build();

    let mut h = Harness::new(&cfg);
    assert_eq!(h.orchestrator.members("src").unwrap(), &["src", "fire"]);
    h.orchestrator.start_all().unwrap();
    h.wait_iterations("src", 1).await;

    assert_eq!(h.recorder.count("fire"), 1);
    assert_eq!(h.recorder.count("after"), 0);

    h.orchestrator.shutdown().await;
}

#[tokio::test]
async fn invocations_within_a_loop_are_strictly_ordered() {
    let cfg = GraphConfigBuilder::new()
        .idle_backoff_ms(5)
        .with_node(
            "src",
            NodeConfigBuilder::producer("scripted")
                .param("values", values(&[1, 2]))
                .build(),
        )
        .with_node("a", NodeConfigBuilder::blocking("increment").build())
        .with_node("b", NodeConfigBuilder::blocking("double").build())
        .with_node("c", NodeConfigBuilder::blocking("pass").build())
        .chain(&["src", "a", "b", "c"])
        .default_pool(ExecutionPool::Thread)
        .build();

    let mut h = Harness::new(&cfg);
    h.orchestrator.start_all().unwrap();
    h.wait_iterations("src", 2).await;

    let order = h.recorder.order();
    assert_eq!(&order[..8], &["src", "a", "b", "c", "src", "a", "b", "c"]);
    assert_eq!(h.recorder.inputs_of("c"), vec![data(4), data(6)]);

    h.orchestrator.shutdown().await;
}
