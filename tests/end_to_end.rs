//! Full-engine scenarios: the RAG happy path, multi-source merges,
//! determinism, and intelligent-routing fallback.

mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use serde_json::json;

use nodeflow::config::EngineConfig;
use nodeflow::engine::Engine;
use nodeflow::registry::NodeRegistry;
use nodeflow::router::{AdvisorError, AdvisorRequest, RoutingAdvisor};
use nodeflow::scheduler::{ErrorInfo, ExecutionSnapshot, RunOptions};
use nodeflow::types::{Cost, ExecutionStatus, NodeStatus, TokenUsage};
use nodeflow::workflow::{NodeSpec, Workflow};

use common::test_registry;

async fn run_to_end(engine: &Engine, execution_id: &str) -> ExecutionSnapshot {
    let mut events = engine.stream(execution_id).unwrap();
    while events.next_timeout(Duration::from_secs(10)).await.is_some() {}
    engine.status(execution_id).unwrap()
}

fn rag_workflow() -> Workflow {
    Workflow::builder("rag")
        .add_node(NodeSpec::new("q", "text_input").with_config("text", json!("What is Nodeflow?")))
        .add_node(
            NodeSpec::new("search", "vector_search")
                .with_config("index_id", json!("idx-1"))
                .with_config("k", json!(3)),
        )
        .add_node(NodeSpec::new("answer", "chat"))
        .add_edge("q", "search")
        .add_edge("search", "answer")
        .build()
}

#[tokio::test]
async fn rag_happy_path_routes_query_results_and_index() {
    let (registry, fixtures) = test_registry();
    let engine = Engine::builder().with_registry(registry).build();
    let id = engine.start(rag_workflow(), RunOptions::default());
    let snapshot = run_to_end(&engine, &id).await;

    assert_eq!(snapshot.status, ExecutionStatus::Completed);

    let seen = fixtures.chat_inputs.seen();
    assert_eq!(seen.len(), 1);
    let inputs = &seen[0];
    assert_eq!(inputs.get("query"), Some(&json!("What is Nodeflow?")));
    assert_eq!(
        inputs.get("results"),
        Some(&json!([
            {"text": "A", "score": 0.9},
            {"text": "B", "score": 0.7},
        ]))
    );
    assert_eq!(inputs.get("index_id"), Some(&json!("idx-1")));
    assert_eq!(inputs.len(), 3);

    // Chat was the only costed node.
    assert_eq!(snapshot.total_tokens.total, 30);
    assert!(snapshot.total_cost.as_micros() > 0);
}

#[tokio::test]
async fn multi_source_direct_priority_feeds_the_generator() {
    let (registry, fixtures) = test_registry();
    let engine = Engine::builder().with_registry(registry).build();
    let wf = Workflow::builder("two-feeds")
        .add_node(NodeSpec::new("topic", "text_input").with_config("text", json!("topic X")))
        .add_node(NodeSpec::new("upload", "file_input").with_config("text", json!("long article")))
        .add_node(NodeSpec::new("blog", "blog_generator"))
        .add_edge("topic", "blog")
        .add_edge("upload", "blog")
        .build();
    let id = engine.start(wf, RunOptions::default());
    let snapshot = run_to_end(&engine, &id).await;

    assert_eq!(snapshot.status, ExecutionStatus::Completed);
    let inputs = fixtures.blog_inputs.last().unwrap();
    assert_eq!(inputs.get("topic"), Some(&json!("topic X")));
    assert_eq!(inputs.get("content"), Some(&json!("long article")));
    // The file is a direct source with an unconditional rule: it owns
    // `text` even though the topic input also proposed it.
    assert_eq!(inputs.get("text"), Some(&json!("long article")));
    assert_eq!(inputs.get("file_content"), Some(&json!("long article")));
}

/// Everything in a snapshot except timestamps, which legitimately differ
/// between runs.
type Essentials = (
    ExecutionStatus,
    Cost,
    TokenUsage,
    Option<ErrorInfo>,
    Vec<(String, NodeStatus, Cost, TokenUsage, Option<ErrorInfo>)>,
);

fn essentials(snapshot: &ExecutionSnapshot) -> Essentials {
    (
        snapshot.status,
        snapshot.total_cost,
        snapshot.total_tokens,
        snapshot.error.clone(),
        snapshot
            .nodes
            .iter()
            .map(|n| {
                (
                    n.node_id.clone(),
                    n.status,
                    n.cost,
                    n.tokens,
                    n.error.clone(),
                )
            })
            .collect(),
    )
}

#[tokio::test]
async fn deterministic_routing_yields_identical_snapshots() {
    let run = |wf: Workflow| async move {
        let (registry, fixtures) = test_registry();
        let engine = Engine::builder().with_registry(registry).build();
        let id = engine.start(wf, RunOptions::default());
        let snapshot = run_to_end(&engine, &id).await;
        (snapshot, fixtures)
    };

    let (first, first_fx) = run(rag_workflow()).await;
    let (second, second_fx) = run(rag_workflow()).await;

    assert_eq!(essentials(&first), essentials(&second));
    assert_eq!(first_fx.chat_inputs.seen(), second_fx.chat_inputs.seen());
}

struct StallingAdvisor;

#[async_trait]
impl RoutingAdvisor for StallingAdvisor {
    async fn advise(
        &self,
        _request: AdvisorRequest,
    ) -> Result<FxHashMap<String, String>, AdvisorError> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Err(AdvisorError::CallFailed("never reached".into()))
    }
}

/// With a stalling advisor, intelligent routing must fall back to the
/// deterministic result wherever that result already suffices.
fn conflict_workflow() -> Workflow {
    Workflow::builder("conflict")
        .add_node(NodeSpec::new("a", "text_input").with_config("text", json!("first")))
        .add_node(NodeSpec::new("b", "text_input").with_config("text", json!("second")))
        .add_node(NodeSpec::new("blog", "blog_generator"))
        .add_edge("a", "blog")
        .add_edge("b", "blog")
        .build()
}

#[tokio::test]
async fn intelligent_routing_timeout_matches_deterministic_run() {
    let run = |intelligent: bool| async move {
        let (registry, fixtures) = test_registry();
        let mut builder = Engine::builder().with_registry(registry).with_config(EngineConfig {
            advisor_timeout: Duration::from_millis(50),
            ..EngineConfig::default()
        });
        if intelligent {
            builder = builder.with_routing_advisor(Arc::new(StallingAdvisor));
        }
        let engine = builder.build();
        let options = RunOptions {
            use_intelligent_routing: intelligent,
            ..RunOptions::default()
        };
        let id = engine.start(conflict_workflow(), options);
        let snapshot = run_to_end(&engine, &id).await;
        (snapshot, fixtures)
    };

    let (deterministic, det_fx) = run(false).await;
    let (with_advisor, adv_fx) = run(true).await;

    assert_eq!(deterministic.status, ExecutionStatus::Completed);
    assert_eq!(essentials(&deterministic), essentials(&with_advisor));
    assert_eq!(det_fx.blog_inputs.seen(), adv_fx.blog_inputs.seen());
}

#[tokio::test]
async fn validation_failure_surfaces_through_snapshot_and_events() {
    let (registry, _fx) = test_registry();
    let engine = Engine::builder().with_registry(registry).build();
    let wf = Workflow::builder("cyclic")
        .add_node(NodeSpec::new("a", "text_input"))
        .add_node(NodeSpec::new("b", "slow"))
        .add_edge("a", "b")
        .add_edge("b", "a")
        .build();
    let id = engine.start(wf, RunOptions::default());
    let snapshot = run_to_end(&engine, &id).await;

    assert_eq!(snapshot.status, ExecutionStatus::Failed);
    assert_eq!(snapshot.error.as_ref().unwrap().kind, "cyclic_graph");
}

#[tokio::test]
async fn registry_must_know_every_node_type() {
    let engine = Engine::builder().with_registry(NodeRegistry::new()).build();
    let wf = Workflow::builder("unknown")
        .add_node(NodeSpec::new("a", "teleporter"))
        .build();
    let id = engine.start(wf, RunOptions::default());
    let snapshot = run_to_end(&engine, &id).await;

    assert_eq!(snapshot.status, ExecutionStatus::Failed);
    assert_eq!(snapshot.error.as_ref().unwrap().kind, "unknown_node_type");
}

#[tokio::test]
async fn entry_inputs_reach_entry_nodes() {
    let (registry, fixtures) = test_registry();
    let engine = Engine::builder().with_registry(registry).build();
    // No config on the text input; the runtime input supplies the text.
    let wf = Workflow::builder("runtime-inputs")
        .add_node(NodeSpec::new("q", "text_input"))
        .add_node(NodeSpec::new("search", "vector_search").with_config("index_id", json!("idx-9")))
        .add_node(NodeSpec::new("answer", "chat"))
        .add_edge("q", "search")
        .add_edge("search", "answer")
        .build();
    let mut entry_inputs = FxHashMap::default();
    entry_inputs.insert("text".to_string(), json!("runtime question"));
    let options = RunOptions {
        entry_inputs,
        ..RunOptions::default()
    };
    let id = engine.start(wf, options);
    let snapshot = run_to_end(&engine, &id).await;

    assert_eq!(snapshot.status, ExecutionStatus::Completed);
    let inputs = fixtures.chat_inputs.last().unwrap();
    assert_eq!(inputs.get("query"), Some(&json!("runtime question")));
}
