//! The node execution contract.
//!
//! Every node type in the platform — LLM calls, retrieval, transforms,
//! output adapters — implements the single [`Node`] trait. The scheduler
//! routes an input map to the node, hands it its config and a
//! [`NodeContext`], and receives outputs plus cost/token accounting.
//!
//! # Design principles
//!
//! - **Read-only inputs**: nodes receive `inputs` and `config` by shared
//!   reference and communicate exclusively through their returned outputs.
//! - **Cooperative cancellation**: nodes check the context's cancellation
//!   token at every suspension point and bail with
//!   [`NodeError::Cancelled`].
//! - **Typed failures**: the error kind decides retry eligibility; only
//!   [`NodeError::Transient`] is retried.
//!
//! # Examples
//!
//! ```rust
//! use async_trait::async_trait;
//! use nodeflow::node::{Node, NodeContext, NodeError, NodeOutput};
//! use nodeflow::types::{Cost, TokenUsage};
//! use rustc_hash::FxHashMap;
//! use serde_json::{Value, json};
//!
//! struct UppercaseNode;
//!
//! #[async_trait]
//! impl Node for UppercaseNode {
//!     async fn execute(
//!         &self,
//!         inputs: &FxHashMap<String, Value>,
//!         _config: &FxHashMap<String, Value>,
//!         ctx: NodeContext,
//!     ) -> Result<NodeOutput, NodeError> {
//!         ctx.check_cancelled()?;
//!         let text = inputs
//!             .get("text")
//!             .and_then(Value::as_str)
//!             .ok_or_else(|| NodeError::MissingInput { what: "text".into() })?;
//!         Ok(NodeOutput::with_output("text", json!(text.to_uppercase())))
//!     }
//! }
//! ```

use async_trait::async_trait;
use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::event_bus::NodeEmitter;
use crate::secrets::SecretResolver;
use crate::trace::SpanScope;
use crate::types::{Cost, TokenUsage};
use std::sync::Arc;

/// Core trait implemented by every executable node type.
#[async_trait]
pub trait Node: Send + Sync {
    /// Execute this node against routed inputs and its configuration.
    ///
    /// Side effects are limited to external calls (APIs, storage) and
    /// events emitted through the context; all data for downstream nodes
    /// goes into the returned outputs.
    async fn execute(
        &self,
        inputs: &FxHashMap<String, Value>,
        config: &FxHashMap<String, Value>,
        ctx: NodeContext,
    ) -> Result<NodeOutput, NodeError>;
}

/// Execution environment handed to a node for one run.
#[derive(Clone)]
pub struct NodeContext {
    /// The execution this run belongs to.
    pub execution_id: String,
    /// The node being executed.
    pub node_id: String,
    /// The user on whose behalf the workflow runs, if any.
    pub user_id: Option<String>,
    secrets: Arc<dyn SecretResolver>,
    emitter: NodeEmitter,
    cancellation: CancellationToken,
    spans: SpanScope,
}

impl NodeContext {
    #[must_use]
    pub fn new(
        execution_id: String,
        node_id: String,
        user_id: Option<String>,
        secrets: Arc<dyn SecretResolver>,
        emitter: NodeEmitter,
        cancellation: CancellationToken,
        spans: SpanScope,
    ) -> Self {
        Self {
            execution_id,
            node_id,
            user_id,
            secrets,
            emitter,
            cancellation,
            spans,
        }
    }

    /// Node-scoped emitter for `node.progress` and `sub.*` events.
    #[must_use]
    pub fn emitter(&self) -> &NodeEmitter {
        &self.emitter
    }

    /// Recorder handle for nested spans (`llm_call`, `retrieval`, `tool`).
    #[must_use]
    pub fn spans(&self) -> &SpanScope {
        &self.spans
    }

    /// The cancellation token for this run. Long-running nodes should
    /// `select!` against `cancelled()` at their suspension points.
    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Bail out with [`NodeError::Cancelled`] if cancellation was requested.
    pub fn check_cancelled(&self) -> Result<(), NodeError> {
        if self.is_cancelled() {
            Err(NodeError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Resolve a credential for this run's user against the node's config.
    pub async fn resolve_secret(
        &self,
        logical_key: &str,
        config: &FxHashMap<String, Value>,
    ) -> Option<String> {
        self.secrets
            .resolve(self.user_id.as_deref(), logical_key, config)
            .await
    }

    /// Like [`resolve_secret`](Self::resolve_secret), but failing the node
    /// when the credential is absent.
    pub async fn require_secret(
        &self,
        logical_key: &str,
        config: &FxHashMap<String, Value>,
    ) -> Result<String, NodeError> {
        self.resolve_secret(logical_key, config)
            .await
            .ok_or_else(|| NodeError::SecretNotFound {
                key: logical_key.to_string(),
            })
    }
}

/// What a successful node run produced.
#[derive(Clone, Debug, Default)]
pub struct NodeOutput {
    /// Output-field name → value. Field names are the node type's declared
    /// output schema; `_display_metadata` is reserved for the engine.
    pub outputs: FxHashMap<String, Value>,
    /// Money spent by this run.
    pub cost: Cost,
    /// Tokens consumed by this run.
    pub tokens: TokenUsage,
}

impl NodeOutput {
    #[must_use]
    pub fn new(outputs: FxHashMap<String, Value>) -> Self {
        Self {
            outputs,
            ..Default::default()
        }
    }

    /// Single-field output, the common case.
    #[must_use]
    pub fn with_output(name: impl Into<String>, value: Value) -> Self {
        let mut outputs = FxHashMap::default();
        outputs.insert(name.into(), value);
        Self::new(outputs)
    }

    #[must_use]
    pub fn and_output(mut self, name: impl Into<String>, value: Value) -> Self {
        self.outputs.insert(name.into(), value);
        self
    }

    #[must_use]
    pub fn with_cost(mut self, cost: Cost) -> Self {
        self.cost = cost;
        self
    }

    #[must_use]
    pub fn with_tokens(mut self, tokens: TokenUsage) -> Self {
        self.tokens = tokens;
        self
    }
}

/// Errors a node run can end with.
///
/// The kind carries retry semantics: the scheduler retries
/// [`Transient`](Self::Transient) failures with backoff and treats
/// everything else as final for the node.
#[derive(Debug, Error, Diagnostic)]
pub enum NodeError {
    /// A required input was absent after routing.
    #[error("missing required input: {what}")]
    #[diagnostic(
        code(nodeflow::node::missing_input),
        help("Connect an upstream node that produces `{what}`, or set it in the node config.")
    )]
    MissingInput { what: String },

    /// The node rejected its input or configuration.
    #[error("validation failed: {0}")]
    #[diagnostic(code(nodeflow::node::validation))]
    Validation(String),

    /// A retryable provider failure: network timeout, 5xx, rate limit.
    #[error("transient failure: {message}")]
    #[diagnostic(
        code(nodeflow::node::transient),
        help("The scheduler retries these automatically with backoff.")
    )]
    Transient { message: String },

    /// A non-retryable provider failure: 4xx, auth, quota exhausted.
    #[error("permanent failure: {message}")]
    #[diagnostic(code(nodeflow::node::permanent))]
    Permanent { message: String },

    /// A credential the node needs could not be resolved.
    #[error("secret not found: {key}")]
    #[diagnostic(
        code(nodeflow::node::secret_not_found),
        help("Store the credential in the vault or provide `{key}` in the node config.")
    )]
    SecretNotFound { key: String },

    /// The run observed cancellation.
    #[error("cancelled")]
    #[diagnostic(code(nodeflow::node::cancelled))]
    Cancelled,

    /// The run exceeded its per-node timeout and the grace period.
    #[error("timed out after {timeout_ms} ms")]
    #[diagnostic(code(nodeflow::node::timeout))]
    Timeout { timeout_ms: u64 },

    /// JSON (de)serialization failed inside the node.
    #[error(transparent)]
    #[diagnostic(code(nodeflow::node::serde))]
    Serde(#[from] serde_json::Error),

    /// An engine invariant was violated.
    #[error("internal error: {0}")]
    #[diagnostic(code(nodeflow::node::internal))]
    Internal(String),
}

impl NodeError {
    /// Whether the scheduler may retry this failure.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Stable kind tag used in snapshots, events, and span records.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingInput { .. } => "missing_input",
            Self::Validation(_) | Self::Serde(_) => "validation",
            Self::Transient { .. } => "transient",
            Self::Permanent { .. } => "permanent",
            Self::SecretNotFound { .. } => "secret_not_found",
            Self::Cancelled => "cancelled",
            Self::Timeout { .. } => "timeout",
            Self::Internal(_) => "internal",
        }
    }

    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent {
            message: message.into(),
        }
    }
}
