//! # Nodeflow: a workflow execution engine for GenAI orchestration
//!
//! Nodeflow executes user-authored DAGs of typed nodes — LLM calls,
//! embedding, retrieval, agents, transforms, delivery adapters — routing
//! artifacts between them, streaming progress events, accounting cost and
//! tokens, and recording a span tree per execution.
//!
//! ## Core concepts
//!
//! - **Workflow**: a DAG of typed [`workflow::NodeSpec`]s joined by
//!   [`workflow::Edge`]s
//! - **Node**: a unit of computation implementing [`node::Node`]
//! - **Registry**: node type → descriptor (schemas, category, factory)
//! - **Router**: synthesises each node's inputs from ancestor outputs
//! - **Scheduler**: parallel execution over the readiness frontier
//! - **Engine**: the façade — `start`, `status`, `stream`, `cancel`
//!
//! ## Quick start
//!
//! Define a node type, register it, and run a workflow:
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use nodeflow::engine::Engine;
//! use nodeflow::node::{Node, NodeContext, NodeError, NodeOutput};
//! use nodeflow::registry::{FieldSpec, NodeCategory, NodeDescriptor, NodeRegistry};
//! use nodeflow::scheduler::RunOptions;
//! use nodeflow::workflow::{NodeSpec, Workflow};
//! use rustc_hash::FxHashMap;
//! use serde_json::{Value, json};
//!
//! struct TextInputNode;
//!
//! #[async_trait]
//! impl Node for TextInputNode {
//!     async fn execute(
//!         &self,
//!         inputs: &FxHashMap<String, Value>,
//!         config: &FxHashMap<String, Value>,
//!         _ctx: NodeContext,
//!     ) -> Result<NodeOutput, NodeError> {
//!         let text = inputs
//!             .get("text")
//!             .or_else(|| config.get("text"))
//!             .cloned()
//!             .unwrap_or_else(|| json!(""));
//!         Ok(NodeOutput::with_output("text", text))
//!     }
//! }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut registry = NodeRegistry::new();
//! registry.register(
//!     NodeDescriptor::new("text_input", NodeCategory::Input, || TextInputNode)
//!         .with_output_schema(vec![FieldSpec::required("text", "The entered text")]),
//! )?;
//!
//! let engine = Engine::builder().with_registry(registry).build();
//! let workflow = Workflow::builder("hello")
//!     .add_node(NodeSpec::new("greet", "text_input").with_config("text", json!("hi")))
//!     .build();
//!
//! let execution_id = engine.start(workflow, RunOptions::default());
//! let mut events = engine.stream(&execution_id)?;
//! while let Some(event) = events.recv().await {
//!     println!("{event}");
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Module guide
//!
//! - [`workflow`] - Graph model, builder, and structural validation
//! - [`registry`] - Node type descriptors and lookup
//! - [`node`] - The node execution contract
//! - [`router`] - Deterministic smart-merge, extraction, intelligent routing
//! - [`scheduler`] - Parallel executor, retries, cancellation
//! - [`engine`] - The public façade
//! - [`event_bus`] - Per-execution ordered event streams
//! - [`trace`] - Span/trace recording through a pluggable sink
//! - [`display`] - Presentation metadata for node outputs
//! - [`secrets`] - Credential resolution
//! - [`config`] - Engine tunables with environment fallbacks
//! - [`telemetry`] - Event rendering and tracing setup

pub mod config;
pub mod display;
pub mod engine;
pub mod event_bus;
pub mod node;
pub mod registry;
pub mod router;
pub mod scheduler;
pub mod secrets;
pub mod telemetry;
pub mod trace;
pub mod types;
pub mod utils;
pub mod workflow;
