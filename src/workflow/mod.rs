//! The in-memory workflow model: nodes, edges, and the builder.
//!
//! A [`Workflow`] is the unit the engine executes: a DAG of typed
//! [`NodeSpec`]s connected by [`Edge`]s. The workflow exclusively owns its
//! nodes and edges; executions only ever read it through an `Arc`.
//!
//! # Examples
//!
//! ```rust
//! use nodeflow::workflow::{NodeSpec, Workflow};
//! use serde_json::json;
//!
//! let workflow = Workflow::builder("rag-demo")
//!     .add_node(NodeSpec::new("q", "text_input").with_config("text", json!("What is Nodeflow?")))
//!     .add_node(NodeSpec::new("search", "vector_search").with_config("index_id", json!("idx-1")))
//!     .add_node(NodeSpec::new("answer", "chat"))
//!     .add_edge("q", "search")
//!     .add_edge("search", "answer")
//!     .build();
//!
//! assert_eq!(workflow.nodes.len(), 3);
//! assert_eq!(workflow.edges.len(), 2);
//! ```

pub mod validation;

pub use validation::{Topology, ValidationError, validate};

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// One vertex of a workflow: a typed, configured computation unit.
///
/// `node_type` keys the node registry; `config` is an open map whose
/// accepted keys come from the type's config schema. `position` is canvas
/// layout data the engine carries but never interprets.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeSpec {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub label: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub position: Value,
    #[serde(default)]
    pub config: FxHashMap<String, Value>,
}

impl NodeSpec {
    #[must_use]
    pub fn new(id: impl Into<String>, node_type: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            label: id.clone(),
            id,
            node_type: node_type.into(),
            position: Value::Null,
            config: FxHashMap::default(),
        }
    }

    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    #[must_use]
    pub fn with_position(mut self, position: Value) -> Self {
        self.position = position;
        self
    }

    #[must_use]
    pub fn with_config(mut self, key: impl Into<String>, value: Value) -> Self {
        self.config.insert(key.into(), value);
        self
    }
}

/// A directed connection between two nodes.
///
/// Handles, when present, name a declared output field of the source and a
/// declared input field of the target; validation rejects unknown names.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Edge {
    pub id: String,
    pub source_node_id: String,
    pub target_node_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_handle: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_handle: Option<String>,
}

/// A user-authored DAG of typed nodes.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Workflow {
    pub id: String,
    pub name: String,
    pub nodes: Vec<NodeSpec>,
    pub edges: Vec<Edge>,
}

impl Workflow {
    /// Start a fluent builder for a new workflow.
    #[must_use]
    pub fn builder(name: impl Into<String>) -> WorkflowBuilder {
        WorkflowBuilder::new(name)
    }

    /// Find a node by id.
    #[must_use]
    pub fn node(&self, node_id: &str) -> Option<&NodeSpec> {
        self.nodes.iter().find(|n| n.id == node_id)
    }
}

/// Fluent constructor for [`Workflow`]s.
///
/// Edge ids are generated (`e0`, `e1`, ...) in insertion order; insertion
/// order is also the order the router sees direct sources in, which keeps
/// fan-in merges deterministic.
pub struct WorkflowBuilder {
    name: String,
    nodes: Vec<NodeSpec>,
    edges: Vec<Edge>,
}

impl WorkflowBuilder {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: Vec::new(),
            edges: Vec::new(),
        }
    }

    #[must_use]
    pub fn add_node(mut self, node: NodeSpec) -> Self {
        self.nodes.push(node);
        self
    }

    #[must_use]
    pub fn add_edge(self, source: impl Into<String>, target: impl Into<String>) -> Self {
        self.add_edge_with_handles(source, target, None, None)
    }

    #[must_use]
    pub fn add_edge_with_handles(
        mut self,
        source: impl Into<String>,
        target: impl Into<String>,
        source_handle: Option<String>,
        target_handle: Option<String>,
    ) -> Self {
        let id = format!("e{}", self.edges.len());
        self.edges.push(Edge {
            id,
            source_node_id: source.into(),
            target_node_id: target.into(),
            source_handle,
            target_handle,
        });
        self
    }

    #[must_use]
    pub fn build(self) -> Workflow {
        Workflow {
            id: Uuid::new_v4().to_string(),
            name: self.name,
            nodes: self.nodes,
            edges: self.edges,
        }
    }
}
