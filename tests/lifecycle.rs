mod common;

use std::time::{Duration, Instant};

use common::*;
use flowloop::engine::LoopState;
use flowloop::errors::FlowloopError;
use flowloop::types::ExecutionPool;

fn many(n: i64) -> toml::Value {
    toml::Value::Array((0..n).map(toml::Value::Integer).collect())
}

fn busy_loop(pool: ExecutionPool) -> flowloop::config::ConfigFile {
    GraphConfigBuilder::new()
        .idle_backoff_ms(5)
        .with_node(
            "src",
            NodeConfigBuilder::producer("scripted")
                .param("values", many(100_000))
                .build(),
        )
        .with_node("work", NodeConfigBuilder::blocking("pass").build())
        .chain(&["src", "work"])
        .loop_pool("src", pool)
        .build()
}

async fn pause_resume_stop(pool: ExecutionPool) {
    let mut h = Harness::new(&busy_loop(pool));
    h.orchestrator.start("src").unwrap();
    h.wait_iterations("src", 10).await;

    h.orchestrator.pause("src").unwrap();
    wait_until(|| h.state("src") == LoopState::Paused).await;
    let held = h.loop_health("src").iterations;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.loop_health("src").iterations, held, "paused loop kept iterating");

    h.orchestrator.resume("src").unwrap();
    h.wait_iterations("src", held + 10).await;
    assert_eq!(h.state("src"), LoopState::Running);

    h.orchestrator.stop("src").unwrap();
    let state = with_timeout(h.orchestrator.join("src")).await.unwrap();
    assert_eq!(state, LoopState::Stopped);

    // A pause never lands mid-chain: every started iteration reached `work`.
    let health = h.loop_health("src");
    assert_eq!(h.recorder.count("work") as u64, health.completed);
}

#[tokio::test]
async fn pause_resume_stop_async_loop() {
    pause_resume_stop(ExecutionPool::Async).await;
}

#[tokio::test]
async fn pause_resume_stop_thread_loop() {
    pause_resume_stop(ExecutionPool::Thread).await;
}

#[tokio::test]
async fn stop_interrupts_idle_backoff() {
    let cfg = GraphConfigBuilder::new()
        .idle_backoff_ms(60_000)
        .with_node("src", NodeConfigBuilder::producer("scripted").param("values", many(0)).build())
        .with_node("work", NodeConfigBuilder::blocking("pass").build())
        .chain(&["src", "work"])
        .build();

    let mut h = Harness::new(&cfg);
    h.orchestrator.start_all().unwrap();
    wait_until(|| h.loop_health("src").idle_polls >= 1).await;

    let started = Instant::now();
    h.orchestrator.stop("src").unwrap();
    let state = with_timeout(h.orchestrator.join("src")).await.unwrap();
    assert_eq!(state, LoopState::Stopped);
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn cycle_errors_its_loop_only() {
    let cfg = GraphConfigBuilder::new()
        .idle_backoff_ms(5)
        .with_node("p1", NodeConfigBuilder::producer("scripted").param("values", many(3)).build())
        .with_node("a", NodeConfigBuilder::blocking("pass").build())
        .with_node("b", NodeConfigBuilder::blocking("pass").build())
        .with_node("p2", NodeConfigBuilder::producer("scripted").param("values", many(3)).build())
        .with_node("c", NodeConfigBuilder::blocking("pass").build())
        .chain(&["p1", "a", "b", "a"])
        .chain(&["p2", "c"])
        .build();

    let mut h = Harness::new(&cfg);
    assert_eq!(h.state("p1"), LoopState::Error);
    assert!(h.orchestrator.loop_error("p1").unwrap().contains("cycle"));

    assert_eq!(h.orchestrator.start_all().unwrap(), 1);
    h.wait_iterations("p2", 3).await;
    assert_eq!(h.recorder.count("c"), 3);
    assert_eq!(h.recorder.count("a"), 0);

    assert!(matches!(
        h.orchestrator.resume("p1"),
        Err(FlowloopError::LoopErrored(..))
    ));

    h.orchestrator.shutdown().await;
    assert_eq!(h.state("p1"), LoopState::Error);
    assert_eq!(h.state("p2"), LoopState::Stopped);
}

#[tokio::test]
async fn runtime_reports_health_and_honours_deadline() {
    use flowloop::engine::{Runtime, RuntimeEvent, RuntimeOptions};

    let h = Harness::new(&busy_loop(ExecutionPool::Async));
    let runtime = Runtime::new(
        h.orchestrator,
        RuntimeOptions {
            health_interval: Some(Duration::from_millis(20)),
            run_for: Some(Duration::from_millis(200)),
        },
    );
    let tx = runtime.sender();
    tx.send(RuntimeEvent::PauseLoop("missing".into())).await.unwrap();

    let report = with_timeout(runtime.run()).await.unwrap();
    let src = report.loop_health("src").unwrap();
    assert_eq!(src.state, LoopState::Stopped);
    assert!(src.completed > 0);
}

async fn panicking_loop_is_reported_without_join(pool: ExecutionPool) {
    let cfg = GraphConfigBuilder::new()
        .idle_backoff_ms(5)
        .with_node("bad", NodeConfigBuilder::producer("scripted").param("values", many(1)).build())
        .with_node("boom", NodeConfigBuilder::blocking("panic-if").param("equals", 0).build())
        .chain(&["bad", "boom"])
        .loop_pool("bad", pool)
        .with_node(
            "good",
            NodeConfigBuilder::producer("scripted").param("values", many(100_000)).build(),
        )
        .with_node("work", NodeConfigBuilder::blocking("pass").build())
        .chain(&["good", "work"])
        .build();

    let mut h = Harness::new(&cfg);
    assert_eq!(h.orchestrator.start_all().unwrap(), 2);

    // Non-object payload: `v` reads as 0, so the first invocation panics.
    wait_until(|| h.state("bad") == LoopState::Error).await;
    let bad = h.loop_health("bad");
    assert!(bad.error.as_deref().unwrap_or_default().contains("loop panicked"));

    let before = h.loop_health("good").iterations;
    h.wait_iterations("good", before + 10).await;
    assert_eq!(h.state("good"), LoopState::Running);
    assert_eq!(h.sink.records().len(), 0);

    h.orchestrator.shutdown().await;
    assert_eq!(h.state("bad"), LoopState::Error);
    assert_eq!(h.state("good"), LoopState::Stopped);
}

#[tokio::test]
async fn panicking_async_loop_shows_error_while_others_run() {
    panicking_loop_is_reported_without_join(ExecutionPool::Async).await;
}

#[tokio::test]
async fn panicking_thread_loop_shows_error_while_others_run() {
    panicking_loop_is_reported_without_join(ExecutionPool::Thread).await;
}

#[tokio::test]
async fn runtime_exits_once_every_loop_has_ended() {
    use flowloop::engine::{Runtime, RuntimeOptions};

    let cfg = GraphConfigBuilder::new()
        .idle_backoff_ms(5)
        .unmapped_branch_limit(2)
        .with_node("src", NodeConfigBuilder::producer("scripted").param("values", many(10)).build())
        .with_node(
            "choose",
            NodeConfigBuilder::conditional("label")
                .param("label", "nowhere")
                .build(),
        )
        .with_node("yes", NodeConfigBuilder::blocking("pass").build())
        .edge("src", "choose")
        .branch("choose", "yes", "yes")
        .build();

    let h = Harness::new(&cfg);
    let runtime = Runtime::new(h.orchestrator, RuntimeOptions::default());

    // No deadline and no Ctrl-C: only the loop ending can finish the run.
    let report = with_timeout(runtime.run()).await.unwrap();
    let src = report.loop_health("src").unwrap();
    assert_eq!(src.state, LoopState::Error);
    assert_eq!(src.consecutive_unmapped, 2);
}
