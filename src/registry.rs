//! The node type registry.
//!
//! Maps a node `type` string (`"text_input"`, `"vector_search"`,
//! `"chat"`, ...) to its [`NodeDescriptor`]: display metadata, category,
//! declared schemas, and a factory producing the executable [`Node`].
//!
//! The registry is populated once at process start by the embedding
//! application (the node library itself lives outside the engine) and is
//! read-only afterwards; the scheduler and router only ever look things up.

use std::fmt;
use std::sync::Arc;

use miette::Diagnostic;
use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::node::Node;

/// Broad behavioural grouping of a node type.
///
/// The router uses the category where per-type rules would not scale:
/// agent-like and content-generation nodes receive transitive upstream
/// context, retrieval nodes share one mapping rule, and so on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NodeCategory {
    /// Sources: text input, file upload.
    Input,
    /// Pure transforms: chunking, parsing, templating.
    Transform,
    /// Embedding generation.
    Embedding,
    /// Vector/BM25/hybrid search and reranking.
    Retrieval,
    /// Index and document stores.
    Storage,
    /// Single-shot content generation: LLM, chat, writers.
    Generation,
    /// Multi-step agent nodes with tool use.
    Agent,
    /// Side-effecting delivery: email, chat posts, webhooks.
    Output,
}

impl NodeCategory {
    /// Whether targets of this category receive outputs of transitive
    /// (non-adjacent) ancestors during routing.
    #[must_use]
    pub fn wants_transitive_context(&self) -> bool {
        matches!(self, Self::Agent | Self::Generation)
    }
}

impl fmt::Display for NodeCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Input => "input",
            Self::Transform => "transform",
            Self::Embedding => "embedding",
            Self::Retrieval => "retrieval",
            Self::Storage => "storage",
            Self::Generation => "generation",
            Self::Agent => "agent",
            Self::Output => "output",
        };
        write!(f, "{s}")
    }
}

/// One declared field of a node's config, input, or output schema.
#[derive(Clone, Debug)]
pub struct FieldSpec {
    pub name: String,
    /// One-line description, surfaced to the routing advisor and the UI.
    pub description: String,
    pub required: bool,
}

impl FieldSpec {
    #[must_use]
    pub fn required(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            required: true,
        }
    }

    #[must_use]
    pub fn optional(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            required: false,
        }
    }
}

/// Factory producing a fresh executable node for one execution.
pub type NodeFactory = Arc<dyn Fn() -> Arc<dyn Node> + Send + Sync>;

/// Everything the engine knows about a node type.
#[derive(Clone)]
pub struct NodeDescriptor {
    pub node_type: String,
    pub display_name: String,
    pub category: NodeCategory,
    pub config_schema: Vec<FieldSpec>,
    pub input_schema: Vec<FieldSpec>,
    pub output_schema: Vec<FieldSpec>,
    factory: NodeFactory,
}

impl NodeDescriptor {
    /// Start building a descriptor around a node constructor.
    #[must_use]
    pub fn new<N, F>(node_type: impl Into<String>, category: NodeCategory, make: F) -> Self
    where
        N: Node + 'static,
        F: Fn() -> N + Send + Sync + 'static,
    {
        let node_type = node_type.into();
        Self {
            display_name: node_type.clone(),
            node_type,
            category,
            config_schema: Vec::new(),
            input_schema: Vec::new(),
            output_schema: Vec::new(),
            factory: Arc::new(move || Arc::new(make())),
        }
    }

    #[must_use]
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    #[must_use]
    pub fn with_config_schema(mut self, fields: Vec<FieldSpec>) -> Self {
        self.config_schema = fields;
        self
    }

    #[must_use]
    pub fn with_input_schema(mut self, fields: Vec<FieldSpec>) -> Self {
        self.input_schema = fields;
        self
    }

    #[must_use]
    pub fn with_output_schema(mut self, fields: Vec<FieldSpec>) -> Self {
        self.output_schema = fields;
        self
    }

    /// Instantiate an executable node of this type.
    #[must_use]
    pub fn instantiate(&self) -> Arc<dyn Node> {
        (self.factory)()
    }

    /// Whether `name` is a declared input field.
    #[must_use]
    pub fn has_input_field(&self, name: &str) -> bool {
        self.input_schema.iter().any(|f| f.name == name)
    }

    /// Whether `name` is a declared output field.
    #[must_use]
    pub fn has_output_field(&self, name: &str) -> bool {
        self.output_schema.iter().any(|f| f.name == name)
    }

    /// Declared input fields marked required.
    pub fn required_inputs(&self) -> impl Iterator<Item = &FieldSpec> {
        self.input_schema.iter().filter(|f| f.required)
    }
}

impl fmt::Debug for NodeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeDescriptor")
            .field("node_type", &self.node_type)
            .field("category", &self.category)
            .finish_non_exhaustive()
    }
}

/// Registry lookup failures.
#[derive(Debug, Error, Diagnostic)]
pub enum RegistryError {
    #[error("unknown node type: {node_type}")]
    #[diagnostic(
        code(nodeflow::registry::unknown_node_type),
        help("Register the node type before loading workflows that use it.")
    )]
    UnknownNodeType { node_type: String },

    #[error("node type registered twice: {node_type}")]
    #[diagnostic(code(nodeflow::registry::duplicate_node_type))]
    DuplicateNodeType { node_type: String },
}

/// Process-wide map from node type string to descriptor.
#[derive(Default)]
pub struct NodeRegistry {
    descriptors: FxHashMap<String, NodeDescriptor>,
}

impl NodeRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node type. Fails on duplicates so load order mistakes
    /// surface at startup instead of mid-execution.
    pub fn register(&mut self, descriptor: NodeDescriptor) -> Result<(), RegistryError> {
        let node_type = descriptor.node_type.clone();
        if self.descriptors.contains_key(&node_type) {
            return Err(RegistryError::DuplicateNodeType { node_type });
        }
        self.descriptors.insert(node_type, descriptor);
        Ok(())
    }

    /// Look up a descriptor by type string.
    pub fn descriptor(&self, node_type: &str) -> Result<&NodeDescriptor, RegistryError> {
        self.descriptors
            .get(node_type)
            .ok_or_else(|| RegistryError::UnknownNodeType {
                node_type: node_type.to_string(),
            })
    }

    #[must_use]
    pub fn contains(&self, node_type: &str) -> bool {
        self.descriptors.contains_key(node_type)
    }

    /// Registered type names, sorted for stable output.
    #[must_use]
    pub fn node_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.descriptors.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{NodeContext, NodeError, NodeOutput};
    use async_trait::async_trait;
    use rustc_hash::FxHashMap;
    use serde_json::Value;

    struct NoopNode;

    #[async_trait]
    impl Node for NoopNode {
        async fn execute(
            &self,
            _inputs: &FxHashMap<String, Value>,
            _config: &FxHashMap<String, Value>,
            _ctx: NodeContext,
        ) -> Result<NodeOutput, NodeError> {
            Ok(NodeOutput::default())
        }
    }

    fn descriptor(node_type: &str) -> NodeDescriptor {
        NodeDescriptor::new(node_type, NodeCategory::Transform, || NoopNode)
    }

    #[test]
    fn lookup_unknown_type_fails() {
        let registry = NodeRegistry::new();
        let err = registry.descriptor("nope").unwrap_err();
        assert!(matches!(err, RegistryError::UnknownNodeType { .. }));
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut registry = NodeRegistry::new();
        registry.register(descriptor("echo")).unwrap();
        let err = registry.register(descriptor("echo")).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateNodeType { .. }));
    }

    #[test]
    fn schema_helpers() {
        let d = descriptor("chat")
            .with_input_schema(vec![
                FieldSpec::required("query", "User question"),
                FieldSpec::optional("results", "Retrieved context"),
            ])
            .with_output_schema(vec![FieldSpec::required("response", "Model answer")]);
        assert!(d.has_input_field("query"));
        assert!(!d.has_input_field("response"));
        assert!(d.has_output_field("response"));
        let required: Vec<_> = d.required_inputs().map(|f| f.name.as_str()).collect();
        assert_eq!(required, vec!["query"]);
    }

    #[test]
    fn transitive_context_categories() {
        assert!(NodeCategory::Agent.wants_transitive_context());
        assert!(NodeCategory::Generation.wants_transitive_context());
        assert!(!NodeCategory::Retrieval.wants_transitive_context());
        assert!(!NodeCategory::Input.wants_transitive_context());
    }
}
