//! Shared fixtures: a registry of mock node types mirroring the
//! platform's library, with capture hooks so tests can observe the exact
//! inputs a node received.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::{Value, json};

use nodeflow::node::{Node, NodeContext, NodeError, NodeOutput};
use nodeflow::registry::{FieldSpec, NodeCategory, NodeDescriptor, NodeRegistry};
use nodeflow::types::{Cost, TokenUsage};

/// Records every input map handed to the node type it is attached to.
#[derive(Clone, Default)]
pub struct Capture {
    seen: Arc<Mutex<Vec<FxHashMap<String, Value>>>>,
}

impl Capture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seen(&self) -> Vec<FxHashMap<String, Value>> {
        self.seen.lock().clone()
    }

    pub fn last(&self) -> Option<FxHashMap<String, Value>> {
        self.seen.lock().last().cloned()
    }

    fn record(&self, inputs: &FxHashMap<String, Value>) {
        self.seen.lock().push(inputs.clone());
    }
}

/// Counts execute attempts across all instances of a node type.
#[derive(Clone, Default)]
pub struct AttemptCounter {
    count: Arc<AtomicU32>,
}

impl AttemptCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> u32 {
        self.count.load(Ordering::SeqCst)
    }

    fn bump(&self) -> u32 {
        self.count.fetch_add(1, Ordering::SeqCst) + 1
    }
}

struct TextInputNode;

#[async_trait]
impl Node for TextInputNode {
    async fn execute(
        &self,
        inputs: &FxHashMap<String, Value>,
        config: &FxHashMap<String, Value>,
        _ctx: NodeContext,
    ) -> Result<NodeOutput, NodeError> {
        let text = inputs
            .get("text")
            .or_else(|| config.get("text"))
            .cloned()
            .unwrap_or_else(|| json!(""));
        Ok(NodeOutput::with_output("text", text))
    }
}

struct VectorSearchNode;

#[async_trait]
impl Node for VectorSearchNode {
    async fn execute(
        &self,
        inputs: &FxHashMap<String, Value>,
        config: &FxHashMap<String, Value>,
        _ctx: NodeContext,
    ) -> Result<NodeOutput, NodeError> {
        let results = config.get("mock_results").cloned().unwrap_or_else(|| {
            json!([
                {"text": "A", "score": 0.9},
                {"text": "B", "score": 0.7},
            ])
        });
        let index_id = inputs
            .get("index_id")
            .or_else(|| config.get("index_id"))
            .cloned()
            .unwrap_or_else(|| json!("idx-unknown"));
        Ok(NodeOutput::with_output("results", results).and_output("index_id", index_id))
    }
}

struct ChatNode {
    capture: Capture,
}

#[async_trait]
impl Node for ChatNode {
    async fn execute(
        &self,
        inputs: &FxHashMap<String, Value>,
        _config: &FxHashMap<String, Value>,
        _ctx: NodeContext,
    ) -> Result<NodeOutput, NodeError> {
        self.capture.record(inputs);
        let query = inputs.get("query").and_then(Value::as_str).unwrap_or("");
        Ok(
            NodeOutput::with_output("response", json!(format!("answer to: {query}")))
                .with_cost(Cost::from_f64(0.001))
                .with_tokens(TokenUsage::new(20, 10)),
        )
    }
}

struct BlogGeneratorNode {
    capture: Capture,
}

#[async_trait]
impl Node for BlogGeneratorNode {
    async fn execute(
        &self,
        inputs: &FxHashMap<String, Value>,
        _config: &FxHashMap<String, Value>,
        _ctx: NodeContext,
    ) -> Result<NodeOutput, NodeError> {
        self.capture.record(inputs);
        let topic = inputs.get("topic").and_then(Value::as_str).unwrap_or("?");
        Ok(NodeOutput::with_output(
            "output",
            json!(format!("a blog post about {topic}")),
        ))
    }
}

/// Fails every attempt. `error_kind` config selects transient/permanent;
/// `sleep_ms` delays the failure so siblings get a chance to finish first.
struct FailingNode {
    attempts: AttemptCounter,
}

#[async_trait]
impl Node for FailingNode {
    async fn execute(
        &self,
        _inputs: &FxHashMap<String, Value>,
        config: &FxHashMap<String, Value>,
        _ctx: NodeContext,
    ) -> Result<NodeOutput, NodeError> {
        self.attempts.bump();
        if let Some(ms) = config.get("sleep_ms").and_then(Value::as_u64) {
            tokio::time::sleep(std::time::Duration::from_millis(ms)).await;
        }
        match config.get("error_kind").and_then(Value::as_str) {
            Some("transient") => Err(NodeError::transient("simulated 503")),
            _ => Err(NodeError::permanent("simulated 401")),
        }
    }
}

/// Fails with a transient error `failures` times, then succeeds.
struct FlakyNode {
    attempts: AttemptCounter,
}

#[async_trait]
impl Node for FlakyNode {
    async fn execute(
        &self,
        _inputs: &FxHashMap<String, Value>,
        config: &FxHashMap<String, Value>,
        _ctx: NodeContext,
    ) -> Result<NodeOutput, NodeError> {
        let failures = config.get("failures").and_then(Value::as_u64).unwrap_or(2) as u32;
        let attempt = self.attempts.bump();
        if attempt <= failures {
            return Err(NodeError::transient(format!("flaky attempt {attempt}")));
        }
        Ok(NodeOutput::with_output("text", json!("finally"))
            .with_cost(Cost::from_f64(0.0005))
            .with_tokens(TokenUsage::new(5, 5)))
    }
}

/// Sleeps for `sleep_ms`, watching the cancellation token.
struct SlowNode;

#[async_trait]
impl Node for SlowNode {
    async fn execute(
        &self,
        _inputs: &FxHashMap<String, Value>,
        config: &FxHashMap<String, Value>,
        ctx: NodeContext,
    ) -> Result<NodeOutput, NodeError> {
        let ms = config.get("sleep_ms").and_then(Value::as_u64).unwrap_or(5_000);
        tokio::select! {
            () = tokio::time::sleep(std::time::Duration::from_millis(ms)) => {
                Ok(NodeOutput::with_output("text", json!("slept")))
            }
            () = ctx.cancellation().cancelled() => Err(NodeError::Cancelled),
        }
    }
}

/// Sleeps without ever looking at the cancellation token.
struct StubbornNode;

#[async_trait]
impl Node for StubbornNode {
    async fn execute(
        &self,
        _inputs: &FxHashMap<String, Value>,
        config: &FxHashMap<String, Value>,
        _ctx: NodeContext,
    ) -> Result<NodeOutput, NodeError> {
        let ms = config.get("sleep_ms").and_then(Value::as_u64).unwrap_or(10_000);
        tokio::time::sleep(std::time::Duration::from_millis(ms)).await;
        Ok(NodeOutput::with_output("text", json!("ignored you")))
    }
}

/// Handles to the capture/counter state inside a [`test_registry`].
pub struct Fixtures {
    pub chat_inputs: Capture,
    pub blog_inputs: Capture,
    pub failing_attempts: AttemptCounter,
    pub flaky_attempts: AttemptCounter,
}

/// The registry every integration test runs against: a miniature version
/// of the platform's node library.
pub fn test_registry() -> (NodeRegistry, Fixtures) {
    let fixtures = Fixtures {
        chat_inputs: Capture::new(),
        blog_inputs: Capture::new(),
        failing_attempts: AttemptCounter::new(),
        flaky_attempts: AttemptCounter::new(),
    };
    let mut registry = NodeRegistry::new();

    registry
        .register(
            NodeDescriptor::new("text_input", NodeCategory::Input, || TextInputNode)
                .with_display_name("Text Input")
                .with_config_schema(vec![FieldSpec::optional("text", "The text to emit")])
                .with_output_schema(vec![FieldSpec::required("text", "Entered text")]),
        )
        .unwrap();
    registry
        .register(
            NodeDescriptor::new("file_input", NodeCategory::Input, || TextInputNode)
                .with_display_name("File Upload")
                .with_config_schema(vec![FieldSpec::optional("text", "Extracted file text")])
                .with_output_schema(vec![FieldSpec::required("text", "Extracted text")]),
        )
        .unwrap();
    registry
        .register(
            NodeDescriptor::new("vector_search", NodeCategory::Retrieval, || VectorSearchNode)
                .with_display_name("Vector Search")
                .with_config_schema(vec![
                    FieldSpec::optional("index_id", "Index to search"),
                    FieldSpec::optional("k", "Result count"),
                ])
                .with_input_schema(vec![
                    FieldSpec::optional("query", "Search query"),
                    FieldSpec::optional("index_id", "Index to search"),
                ])
                .with_output_schema(vec![
                    FieldSpec::required("results", "Scored matches"),
                    FieldSpec::optional("index_id", "Searched index"),
                ]),
        )
        .unwrap();
    let chat_capture = fixtures.chat_inputs.clone();
    registry
        .register(
            NodeDescriptor::new("chat", NodeCategory::Generation, move || ChatNode {
                capture: chat_capture.clone(),
            })
            .with_display_name("Chat")
            .with_config_schema(vec![FieldSpec::optional("template", "Prompt template")])
            .with_input_schema(vec![
                FieldSpec::required("query", "User question"),
                FieldSpec::optional("results", "Retrieved context"),
                FieldSpec::optional("index_id", "Index the context came from"),
            ])
            .with_output_schema(vec![FieldSpec::required("response", "Model answer")]),
        )
        .unwrap();
    let blog_capture = fixtures.blog_inputs.clone();
    registry
        .register(
            NodeDescriptor::new("blog_generator", NodeCategory::Generation, move || {
                BlogGeneratorNode {
                    capture: blog_capture.clone(),
                }
            })
            .with_display_name("Blog Generator")
            .with_input_schema(vec![
                FieldSpec::required("topic", "What to write about"),
                FieldSpec::optional("text", "Raw source text"),
                FieldSpec::optional("content", "Source content"),
                FieldSpec::optional("context", "Additional context"),
                FieldSpec::optional("file_content", "Uploaded reference material"),
            ])
            .with_output_schema(vec![FieldSpec::required("output", "The article")]),
        )
        .unwrap();
    let failing_attempts = fixtures.failing_attempts.clone();
    registry
        .register(
            NodeDescriptor::new("failing", NodeCategory::Transform, move || FailingNode {
                attempts: failing_attempts.clone(),
            })
            .with_config_schema(vec![
                FieldSpec::optional("error_kind", "transient or permanent"),
                FieldSpec::optional("sleep_ms", "Delay before failing"),
            ])
            .with_output_schema(vec![FieldSpec::optional("text", "Never produced")]),
        )
        .unwrap();
    let flaky_attempts = fixtures.flaky_attempts.clone();
    registry
        .register(
            NodeDescriptor::new("flaky", NodeCategory::Transform, move || FlakyNode {
                attempts: flaky_attempts.clone(),
            })
            .with_config_schema(vec![FieldSpec::optional(
                "failures",
                "Transient failures before success",
            )])
            .with_output_schema(vec![FieldSpec::required("text", "Eventual output")]),
        )
        .unwrap();
    registry
        .register(
            NodeDescriptor::new("slow", NodeCategory::Transform, || SlowNode)
                .with_config_schema(vec![FieldSpec::optional("sleep_ms", "How long to sleep")])
                .with_output_schema(vec![FieldSpec::required("text", "Produced after sleeping")]),
        )
        .unwrap();
    registry
        .register(
            NodeDescriptor::new("stubborn", NodeCategory::Transform, || StubbornNode)
                .with_config_schema(vec![FieldSpec::optional("sleep_ms", "How long to sleep")])
                .with_output_schema(vec![FieldSpec::required("text", "Produced after sleeping")]),
        )
        .unwrap();

    (registry, fixtures)
}
