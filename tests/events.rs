//! Stream guarantees: ordering, backlog replay, wire format.

mod common;

use std::time::Duration;

use serde_json::json;

use nodeflow::engine::Engine;
use nodeflow::event_bus::{EventKind, ExecutionEvent};
use nodeflow::scheduler::RunOptions;
use nodeflow::types::ExecutionStatus;
use nodeflow::workflow::{NodeSpec, Workflow};

use common::test_registry;

fn rag_workflow() -> Workflow {
    Workflow::builder("rag")
        .add_node(NodeSpec::new("q", "text_input").with_config("text", json!("What is Nodeflow?")))
        .add_node(NodeSpec::new("search", "vector_search").with_config("index_id", json!("idx-1")))
        .add_node(NodeSpec::new("answer", "chat"))
        .add_edge("q", "search")
        .add_edge("search", "answer")
        .build()
}

async fn drain(engine: &Engine, execution_id: &str) -> Vec<ExecutionEvent> {
    let mut events = engine.stream(execution_id).unwrap();
    let mut log = Vec::new();
    while let Some(event) = events.next_timeout(Duration::from_secs(10)).await {
        log.push(event);
    }
    log
}

#[tokio::test]
async fn seq_is_monotonic_with_started_first_and_terminal_last() {
    let (registry, _fx) = test_registry();
    let engine = Engine::builder().with_registry(registry).build();
    let id = engine.start(rag_workflow(), RunOptions::default());
    let log = drain(&engine, &id).await;

    assert!(!log.is_empty());
    assert_eq!(log[0].kind, EventKind::ExecutionStarted);
    assert!(log.last().unwrap().kind.is_execution_terminal());
    for pair in log.windows(2) {
        assert!(pair[0].seq < pair[1].seq);
    }
    let terminal_count = log
        .iter()
        .filter(|e| e.kind.is_execution_terminal())
        .count();
    assert_eq!(terminal_count, 1);
}

#[tokio::test]
async fn every_node_emits_one_started_completed_pair() {
    let (registry, _fx) = test_registry();
    let engine = Engine::builder().with_registry(registry).build();
    let id = engine.start(rag_workflow(), RunOptions::default());
    let log = drain(&engine, &id).await;

    for node in ["q", "search", "answer"] {
        let started = log
            .iter()
            .filter(|e| e.kind == EventKind::NodeStarted && e.node_id.as_deref() == Some(node))
            .count();
        let completed = log
            .iter()
            .filter(|e| e.kind == EventKind::NodeCompleted && e.node_id.as_deref() == Some(node))
            .count();
        assert_eq!(started, 1, "{node} started events");
        assert_eq!(completed, 1, "{node} completed events");
    }
}

#[tokio::test]
async fn routing_events_carry_input_origins() {
    let (registry, _fx) = test_registry();
    let engine = Engine::builder().with_registry(registry).build();
    let id = engine.start(rag_workflow(), RunOptions::default());
    let log = drain(&engine, &id).await;

    let routing = log
        .iter()
        .find(|e| {
            e.kind == EventKind::RoutingCompleted && e.node_id.as_deref() == Some("answer")
        })
        .expect("routing.completed for the chat node");
    let origins = &routing.payload["inputs"];
    assert_eq!(origins["results"], json!("direct"));
    assert_eq!(origins["index_id"], json!("direct"));
    assert_eq!(origins["query"], json!("extraction"));
}

#[tokio::test]
async fn late_subscriber_replays_the_full_backlog() {
    let (registry, _fx) = test_registry();
    let engine = Engine::builder().with_registry(registry).build();
    let id = engine.start(rag_workflow(), RunOptions::default());

    // First subscriber watches it live, and stays attached so the stream
    // is not garbage-collected yet.
    let mut live_stream = engine.stream(&id).unwrap();
    let mut live = Vec::new();
    while let Some(event) = live_stream.next_timeout(Duration::from_secs(10)).await {
        live.push(event);
    }
    assert_eq!(
        engine.status(&id).unwrap().status,
        ExecutionStatus::Completed
    );

    // A second subscriber attaching after completion sees the identical
    // sequence from the backlog.
    let mut replay_stream = engine.stream(&id).unwrap();
    let mut replay = Vec::new();
    while let Some(event) = replay_stream.next_timeout(Duration::from_secs(10)).await {
        replay.push(event);
    }
    assert_eq!(live.len(), replay.len());
    for (a, b) in live.iter().zip(replay.iter()) {
        assert_eq!(a.seq, b.seq);
        assert_eq!(a.kind, b.kind);
        assert_eq!(a.node_id, b.node_id);
    }

    // Once every subscriber detaches, the terminal stream is collected;
    // snapshots remain available.
    drop(live_stream);
    drop(replay_stream);
    assert!(engine.status(&id).is_ok());
    assert!(engine.stream(&id).is_err());
}

#[tokio::test]
async fn wire_json_has_millisecond_timestamps_and_dotted_kinds() {
    let (registry, _fx) = test_registry();
    let engine = Engine::builder().with_registry(registry).build();
    let id = engine.start(rag_workflow(), RunOptions::default());
    let log = drain(&engine, &id).await;

    let wire = log[0].to_wire_json();
    assert_eq!(wire["execution_id"], json!(id));
    assert_eq!(wire["kind"], json!("execution.started"));
    assert_eq!(wire["seq"], json!(0));
    let at = wire["at"].as_str().unwrap();
    // RFC 3339 with milliseconds: 2025-01-01T00:00:00.000Z
    assert!(at.ends_with('Z'));
    assert_eq!(at.len(), "2025-01-01T00:00:00.000Z".len());
}
