//! The data router: synthesises a target node's input map from the
//! outputs of its ancestors.
//!
//! Routing runs as a three-phase pipeline per target node:
//!
//! 1. **Collection** — direct sources (edge predecessors) always
//!    participate; transitive ancestors join only for target categories
//!    that want broad context (agents, content generation).
//! 2. **Deterministic mapping** — the declarative pattern table
//!    ([`patterns`]), then critical-field extraction ([`extraction`]),
//!    then config injection. Direct sources always beat indirect ones, and
//!    with intelligent routing off the result is byte-identical across
//!    runs.
//! 3. **Optional intelligent routing** — a single time-bounded
//!    [`RoutingAdvisor`] call that may fill gaps or arbitrate conflicts,
//!    but never replaces the deterministic result
//!    ([`intelligent`]).
//!
//! Every routed key carries an [`InputOrigin`] tag; the router emits
//! `routing.started`/`routing.completed` events and records one `routing`
//! span per target node.

mod extraction;
mod intelligent;
mod patterns;

pub use intelligent::{AdvisorError, AdvisorRequest, RoutingAdvisor, SourcePreview};
pub use patterns::{SourceClass, classify};

use std::sync::Arc;
use std::time::Duration;

use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde_json::{Value, json};
use thiserror::Error;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::event_bus::{EventDraft, EventKind, ExecutionEventHub};
use crate::registry::{NodeCategory, NodeDescriptor};
use crate::trace::{SpanStatus, SpanType, TraceRecorder};
use crate::types::{Cost, TokenUsage};
use crate::utils::json_ext::{DEFAULT_PREVIEW_LEN, preview_value};
use crate::workflow::NodeSpec;

use intelligent::{AdvisedKey, parse_advised_key};

/// Default wall-clock bound on one advisor call.
pub const DEFAULT_ADVISOR_TIMEOUT: Duration = Duration::from_secs(8);

/// One upstream node's contribution to routing.
#[derive(Clone, Debug)]
pub struct SourceData {
    pub node_id: String,
    pub node_type: String,
    pub node_label: String,
    pub category: NodeCategory,
    /// The node's published outputs, immutable once written.
    pub outputs: Arc<FxHashMap<String, Value>>,
    /// Whether an edge connects this source to the target directly.
    pub is_direct: bool,
}

/// Where a routed input value came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputOrigin {
    Direct,
    Indirect,
    Extraction,
    Config,
    Intelligent,
}

impl InputOrigin {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Indirect => "indirect",
            Self::Extraction => "extraction",
            Self::Config => "config",
            Self::Intelligent => "intelligent",
        }
    }
}

/// The router's product: the input map plus an origin tag per key.
#[derive(Clone, Debug, Default)]
pub struct RoutedInputs {
    pub values: FxHashMap<String, Value>,
    origins: FxHashMap<String, InputOrigin>,
}

impl RoutedInputs {
    /// Set a key unconditionally.
    pub fn set(&mut self, key: &str, value: Value, origin: InputOrigin) {
        self.values.insert(key.to_string(), value);
        self.origins.insert(key.to_string(), origin);
    }

    /// Set a key only when absent.
    pub fn set_if_missing(&mut self, key: &str, value: Value, origin: InputOrigin) {
        if !self.values.contains_key(key) {
            self.set(key, value, origin);
        }
    }

    #[must_use]
    pub fn origin(&self, key: &str) -> Option<InputOrigin> {
        self.origins.get(key).copied()
    }

    /// Key → origin tag, with keys sorted for stable event payloads.
    #[must_use]
    pub fn origins_json(&self) -> Value {
        let mut keys: Vec<&String> = self.origins.keys().collect();
        keys.sort();
        let map: serde_json::Map<String, Value> = keys
            .into_iter()
            .map(|k| (k.clone(), json!(self.origins[k].as_str())))
            .collect();
        Value::Object(map)
    }
}

/// Routing failed in a way that fails the target node.
#[derive(Debug, Error, Diagnostic)]
pub enum RoutingError {
    #[error("node {node_id} is missing required input `{field}` after routing")]
    #[diagnostic(
        code(nodeflow::router::missing_input),
        help("Connect an upstream node that produces `{field}` or set it in the node config.")
    )]
    MissingInput { node_id: String, field: String },
}

/// What the scheduler hands the router for one target node.
pub struct RoutingRequest<'a> {
    pub target: &'a NodeSpec,
    pub descriptor: &'a NodeDescriptor,
    /// Direct sources, in edge declaration order.
    pub direct_sources: Vec<SourceData>,
    /// Completed transitive ancestors, topologically ordered,
    /// `is_direct = false`.
    pub ancestor_sources: Vec<SourceData>,
    /// Runtime inputs for entry nodes, applied before any mapping.
    pub seed: Vec<(String, Value)>,
    pub use_intelligent_routing: bool,
}

/// Observability handles for one routing run.
pub struct RoutingHooks<'a> {
    pub hub: &'a Arc<ExecutionEventHub>,
    pub recorder: &'a Arc<TraceRecorder>,
    pub trace_id: &'a str,
    pub parent_span_id: &'a str,
    pub cancellation: &'a CancellationToken,
}

/// The routing pipeline. One instance serves a whole engine; all state is
/// per-call.
pub struct DataRouter {
    advisor: Option<Arc<dyn RoutingAdvisor>>,
    advisor_timeout: Duration,
}

impl Default for DataRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl DataRouter {
    /// A purely deterministic router.
    #[must_use]
    pub fn new() -> Self {
        Self {
            advisor: None,
            advisor_timeout: DEFAULT_ADVISOR_TIMEOUT,
        }
    }

    /// Enable the intelligent layer with the given advisor.
    #[must_use]
    pub fn with_advisor(mut self, advisor: Arc<dyn RoutingAdvisor>) -> Self {
        self.advisor = Some(advisor);
        self
    }

    #[must_use]
    pub fn with_advisor_timeout(mut self, advisor_timeout: Duration) -> Self {
        self.advisor_timeout = advisor_timeout;
        self
    }

    /// Run the full pipeline for one target node.
    pub async fn route(
        &self,
        request: &RoutingRequest<'_>,
        hooks: &RoutingHooks<'_>,
    ) -> Result<RoutedInputs, RoutingError> {
        let target_id = &request.target.id;

        // Phase 1: which sources participate.
        let include_ancestors = request.descriptor.category.wants_transitive_context();
        let sources: Vec<&SourceData> = request
            .direct_sources
            .iter()
            .chain(
                request
                    .ancestor_sources
                    .iter()
                    .filter(|_| include_ancestors),
            )
            .collect();

        let _ = hooks.hub.emit(
            EventDraft::node(EventKind::RoutingStarted, target_id.clone()).with_payload(json!({
                "target_type": request.target.node_type,
                "direct_sources": request.direct_sources.iter().map(|s| &s.node_id).collect::<Vec<_>>(),
                "indirect_sources": sources.iter().filter(|s| !s.is_direct).map(|s| &s.node_id).collect::<Vec<_>>(),
            })),
        );
        let span_id = hooks.recorder.start_span(
            hooks.trace_id,
            Some(hooks.parent_span_id),
            SpanType::Routing,
            &format!("route:{target_id}"),
            source_summary(&sources),
        );

        let result = self.route_inner(request, &sources, hooks).await;

        match &result {
            Ok(inputs) => {
                hooks.recorder.end_span(
                    &span_id,
                    SpanStatus::Completed,
                    json!({"inputs": inputs.origins_json()}),
                    Cost::ZERO,
                    TokenUsage::default(),
                    None,
                );
                let _ = hooks.hub.emit(
                    EventDraft::node(EventKind::RoutingCompleted, target_id.clone())
                        .with_payload(json!({"inputs": inputs.origins_json()})),
                );
            }
            Err(err) => {
                hooks.recorder.end_span(
                    &span_id,
                    SpanStatus::Failed,
                    Value::Null,
                    Cost::ZERO,
                    TokenUsage::default(),
                    Some(err.to_string()),
                );
            }
        }
        result
    }

    async fn route_inner(
        &self,
        request: &RoutingRequest<'_>,
        sources: &[&SourceData],
        hooks: &RoutingHooks<'_>,
    ) -> Result<RoutedInputs, RoutingError> {
        let mut inputs = RoutedInputs::default();
        let mut direct_conflicts: Vec<String> = Vec::new();

        // Runtime inputs for entry nodes go in first; a direct source may
        // still override them.
        for (key, value) in &request.seed {
            inputs.set(key, value.clone(), InputOrigin::Config);
        }

        // Phase 2a: pattern table. Direct sources first (unconditional, in
        // edge order), then indirect sources (only-if-missing).
        for source in sources.iter().filter(|s| s.is_direct) {
            patterns::apply_source(&mut inputs, source, &mut direct_conflicts);
        }
        for source in sources.iter().filter(|s| !s.is_direct) {
            patterns::apply_source(&mut inputs, source, &mut direct_conflicts);
        }

        // Phase 2b: critical-field extraction over all collected sources.
        let owned: Vec<SourceData> = sources.iter().map(|s| (*s).clone()).collect();
        let target_class = classify(&request.target.node_type, request.descriptor.category);
        extraction::extract_critical_fields(
            &request.target.node_type,
            target_class,
            &mut inputs,
            &owned,
        );

        // Phase 2c: config literals as fallbacks for declared inputs.
        for field in &request.descriptor.input_schema {
            if !inputs.values.contains_key(&field.name) {
                if let Some(value) = request.target.config.get(&field.name) {
                    inputs.set(&field.name, value.clone(), InputOrigin::Config);
                }
            }
        }

        // Phase 3: the intelligent layer, only when deterministic routing
        // left something to arbitrate.
        let unsatisfied: Vec<&str> = request
            .descriptor
            .required_inputs()
            .filter(|f| !inputs.values.contains_key(&f.name))
            .map(|f| f.name.as_str())
            .collect();
        if request.use_intelligent_routing
            && (!direct_conflicts.is_empty() || !unsatisfied.is_empty())
        {
            if let Some(advisor) = &self.advisor {
                self.consult_advisor(request, sources, &mut inputs, advisor, hooks)
                    .await;
            }
        }

        // The final map is validated against the target's input schema:
        // undeclared keys accumulated by the broad mapping rules are
        // projected away, and every required field must be present. Nodes
        // that declare no inputs accept the map as-is.
        if !request.descriptor.input_schema.is_empty() {
            let undeclared: Vec<String> = inputs
                .values
                .keys()
                .filter(|k| !request.descriptor.has_input_field(k))
                .cloned()
                .collect();
            for key in undeclared {
                inputs.values.remove(&key);
                inputs.origins.remove(&key);
            }
        }
        if let Some(field) = request
            .descriptor
            .required_inputs()
            .find(|f| !inputs.values.contains_key(&f.name))
        {
            return Err(RoutingError::MissingInput {
                node_id: request.target.id.clone(),
                field: field.name.clone(),
            });
        }

        Ok(inputs)
    }

    async fn consult_advisor(
        &self,
        request: &RoutingRequest<'_>,
        sources: &[&SourceData],
        inputs: &mut RoutedInputs,
        advisor: &Arc<dyn RoutingAdvisor>,
        hooks: &RoutingHooks<'_>,
    ) {
        let advisor_request = AdvisorRequest {
            target_type: request.target.node_type.clone(),
            target_inputs: request
                .descriptor
                .input_schema
                .iter()
                .map(|f| (f.name.clone(), f.description.clone()))
                .collect(),
            sources: sources
                .iter()
                .flat_map(|s| {
                    s.outputs.iter().map(|(key, value)| SourcePreview {
                        source_id: s.node_id.clone(),
                        source_type: s.node_type.clone(),
                        key: key.clone(),
                        preview: preview_value(value, DEFAULT_PREVIEW_LEN),
                    })
                })
                .collect(),
            current_mapping: inputs
                .origins
                .iter()
                .map(|(k, v)| (k.clone(), v.as_str().to_string()))
                .collect(),
        };

        // The call is bounded by the advisor timeout and aborted on
        // execution cancellation; either way routing falls back to the
        // deterministic result.
        let advised = tokio::select! {
            () = hooks.cancellation.cancelled() => {
                tracing::debug!(
                    target: "nodeflow::router",
                    node_id = %request.target.id,
                    "intelligent routing aborted by cancellation"
                );
                return;
            }
            outcome = timeout(self.advisor_timeout, advisor.advise(advisor_request)) => outcome,
        };
        let mapping = match advised {
            Ok(Ok(mapping)) => mapping,
            Ok(Err(err)) => {
                tracing::warn!(
                    target: "nodeflow::router",
                    node_id = %request.target.id,
                    error = %err,
                    "intelligent routing failed; using deterministic result"
                );
                return;
            }
            Err(_) => {
                tracing::warn!(
                    target: "nodeflow::router",
                    node_id = %request.target.id,
                    timeout_ms = self.advisor_timeout.as_millis() as u64,
                    "intelligent routing timed out; using deterministic result"
                );
                return;
            }
        };

        // Apply in sorted key order so identical advice yields identical
        // results.
        let mut advised_keys: Vec<(&String, &String)> = mapping.iter().collect();
        advised_keys.sort();
        for (input_name, source_key) in advised_keys {
            if !request.descriptor.has_input_field(input_name) {
                tracing::debug!(
                    target: "nodeflow::router",
                    node_id = %request.target.id,
                    input_name,
                    "advisor proposed an undeclared input field; ignored"
                );
                continue;
            }
            let value = match parse_advised_key(source_key) {
                AdvisedKey::Pinned { source_id, key } => sources
                    .iter()
                    .find(|s| s.node_id == source_id)
                    .and_then(|s| s.outputs.get(key)),
                AdvisedKey::Bare(key) => sources.iter().find_map(|s| s.outputs.get(key)),
            };
            if let Some(value) = value {
                inputs.set(input_name, value.clone(), InputOrigin::Intelligent);
            }
        }
    }
}

/// Span input snapshot: which sources were on the table, with previews.
fn source_summary(sources: &[&SourceData]) -> Value {
    let entries: Vec<Value> = sources
        .iter()
        .map(|s| {
            let mut keys: Vec<&String> = s.outputs.keys().collect();
            keys.sort();
            json!({
                "node_id": s.node_id,
                "node_type": s.node_type,
                "is_direct": s.is_direct,
                "keys": keys,
            })
        })
        .collect();
    json!({ "sources": entries })
}
