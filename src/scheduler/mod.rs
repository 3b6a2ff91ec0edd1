//! The executor: validates a workflow, runs its nodes in parallel partial
//! order, and drives events, spans, retries, and cancellation.
//!
//! One [`Scheduler`] instance owns one execution. The model is a bounded
//! worker pool over a readiness frontier:
//!
//! - a node becomes **ready** when every node feeding it has completed;
//! - ready nodes are spawned onto the pool (default width
//!   `min(8, node count)`);
//! - a permanent node failure cancels in-flight siblings and skips every
//!   node that has not started;
//! - an external cancel request does the same, with the execution ending
//!   `cancelled` instead of `failed`.
//!
//! All shared mutable state — node statuses, published outputs, cost and
//! token totals — lives behind one mutex in [`ExecutionState`]; workers
//! hold it only to snapshot predecessors and to publish their own result,
//! never across I/O.

pub mod retry;
pub mod state;

pub use retry::RetryPolicy;
pub use state::{ErrorInfo, ExecutionSnapshot, ExecutionState, NodeRunState, NodeSnapshot};

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::{Value, json};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::display::DISPLAY_METADATA_KEY;
use crate::display::FormatterRegistry;
use crate::event_bus::{EventDraft, EventKind, ExecutionEventHub, NodeEmitter};
use crate::node::{Node, NodeContext, NodeError, NodeOutput};
use crate::registry::NodeRegistry;
use crate::router::{DataRouter, RoutingError, RoutingHooks, RoutingRequest, SourceData};
use crate::secrets::SecretResolver;
use crate::trace::{SpanScope, SpanStatus, SpanType, TraceRecorder};
use crate::types::{ExecutionStatus, NodeStatus};
use crate::utils::json_ext::{DEFAULT_PREVIEW_LEN, preview_map};
use crate::workflow::{Topology, ValidationError, Workflow, validate};

/// Per-execution options supplied by the caller of the façade.
#[derive(Clone, Debug)]
pub struct RunOptions {
    /// Runtime inputs handed to the designated entry nodes.
    pub entry_inputs: FxHashMap<String, Value>,
    /// Restrict execution to these entry nodes; default is every node
    /// without incoming edges.
    pub entry_nodes: Option<Vec<String>>,
    pub use_intelligent_routing: bool,
    pub timeout_per_node: Option<Duration>,
    /// Retries after the first attempt for transient failures.
    pub max_retries_per_node: u32,
    pub user_id: Option<String>,
    /// Worker pool width; default `min(8, node count)`.
    pub max_concurrency: Option<usize>,
    /// Base backoff between retries.
    pub retry_base: Duration,
    /// How long a node may keep running after its cancellation token was
    /// set before it is abandoned.
    pub grace_period: Duration,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            entry_inputs: FxHashMap::default(),
            entry_nodes: None,
            use_intelligent_routing: false,
            timeout_per_node: None,
            max_retries_per_node: 2,
            user_id: None,
            max_concurrency: None,
            retry_base: Duration::from_millis(250),
            grace_period: Duration::from_secs(2),
        }
    }
}

/// Default worker pool cap.
const DEFAULT_POOL_WIDTH: usize = 8;

enum NodeOutcome {
    Completed,
    Failed(ErrorInfo),
    Cancelled,
    Skipped,
}

struct RunDeps {
    workflow: Arc<Workflow>,
    registry: Arc<NodeRegistry>,
    formatters: Arc<FormatterRegistry>,
    secrets: Arc<dyn SecretResolver>,
    router: Arc<DataRouter>,
    recorder: Arc<TraceRecorder>,
    hub: Arc<ExecutionEventHub>,
    shared: Arc<Mutex<ExecutionState>>,
    options: RunOptions,
    cancel: CancellationToken,
    semaphore: Arc<Semaphore>,
}

/// Trace identifiers and the validated topology, shared by all workers.
struct RunScope {
    trace_id: String,
    workflow_span_id: String,
    topology: Arc<Topology>,
}

/// Drives one execution to a terminal state.
pub struct Scheduler {
    deps: Arc<RunDeps>,
}

impl Scheduler {
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        workflow: Arc<Workflow>,
        registry: Arc<NodeRegistry>,
        formatters: Arc<FormatterRegistry>,
        secrets: Arc<dyn SecretResolver>,
        router: Arc<DataRouter>,
        recorder: Arc<TraceRecorder>,
        hub: Arc<ExecutionEventHub>,
        shared: Arc<Mutex<ExecutionState>>,
        options: RunOptions,
        cancel: CancellationToken,
    ) -> Self {
        let width = options
            .max_concurrency
            .unwrap_or_else(|| DEFAULT_POOL_WIDTH.min(workflow.nodes.len()))
            .max(1);
        Self {
            deps: Arc::new(RunDeps {
                workflow,
                registry,
                formatters,
                secrets,
                router,
                recorder,
                hub,
                shared,
                options,
                cancel,
                semaphore: Arc::new(Semaphore::new(width)),
            }),
        }
    }

    /// Run the execution to completion. Consumes the scheduler; the caller
    /// observes progress through the hub and the shared state.
    #[instrument(skip(self), fields(execution_id = %self.deps.hub.execution_id()))]
    pub async fn run(self) {
        let deps = self.deps;

        // Validation is pure: nothing is emitted or recorded until it
        // succeeds.
        let topology = match validate(
            &deps.workflow,
            &deps.registry,
            deps.options.entry_nodes.as_deref(),
        ) {
            Ok(topology) => topology,
            Err(err) => {
                fail_at_validation(&deps, &err);
                return;
            }
        };
        let topology = Arc::new(topology);

        // Instantiate every node up front; descriptors were just checked.
        let mut instances: FxHashMap<String, Arc<dyn Node>> = FxHashMap::default();
        for node in &deps.workflow.nodes {
            if let Ok(descriptor) = deps.registry.descriptor(&node.node_type) {
                instances.insert(node.id.clone(), descriptor.instantiate());
            }
        }

        {
            let mut shared = deps.shared.lock();
            shared.status = ExecutionStatus::Running;
            shared.started_at = Utc::now();
        }
        let _ = deps.hub.emit(
            EventDraft::execution(EventKind::ExecutionStarted).with_payload(json!({
                "workflow_id": deps.workflow.id,
                "workflow_name": deps.workflow.name,
            })),
        );

        let (execution_id, user_id) = {
            let shared = deps.shared.lock();
            (shared.execution_id.clone(), shared.user_id.clone())
        };
        let trace_id =
            deps.recorder
                .start_trace(&deps.workflow.id, &execution_id, user_id.as_deref());
        let workflow_span_id = deps.recorder.start_span(
            &trace_id,
            None,
            SpanType::Workflow,
            &deps.workflow.name,
            Value::Null,
        );
        let scope = Arc::new(RunScope {
            trace_id: trace_id.clone(),
            workflow_span_id: workflow_span_id.clone(),
            topology: Arc::clone(&topology),
        });

        // Announce the plan: reachable nodes are pending; unreachable ones
        // are skipped outright, and anything depending on them follows.
        let no_spawned = FxHashSet::default();
        for node_id in &topology.order {
            if topology.reachable.contains(node_id) {
                let _ = deps
                    .hub
                    .emit(EventDraft::node(EventKind::NodePending, node_id.clone()));
            } else {
                mark_skipped(&deps, node_id);
                skip_descendants(&deps, &topology, node_id, &no_spawned);
            }
        }

        let mut join_set: JoinSet<(String, NodeOutcome)> = JoinSet::new();
        let mut spawned: FxHashSet<String> = FxHashSet::default();
        let mut halted = false;

        loop {
            if deps.cancel.is_cancelled() && !halted {
                halted = true;
                skip_unstarted(&deps, &topology, &spawned);
            }
            if !halted {
                for node_id in ready_nodes(&deps, &topology, &spawned) {
                    spawned.insert(node_id.clone());
                    if let Some(node) = deps.shared.lock().nodes.get_mut(&node_id) {
                        node.status = NodeStatus::Ready;
                    }
                    let instance = match instances.get(&node_id) {
                        Some(instance) => Arc::clone(instance),
                        None => continue,
                    };
                    join_set.spawn(run_node(
                        Arc::clone(&deps),
                        Arc::clone(&scope),
                        node_id,
                        instance,
                    ));
                }
            }

            let Some(joined) = join_set.join_next().await else {
                break;
            };
            match joined {
                Ok((node_id, outcome)) => match outcome {
                    NodeOutcome::Completed => {}
                    NodeOutcome::Failed(info) => {
                        if !halted {
                            halted = true;
                            {
                                let mut shared = deps.shared.lock();
                                if shared.error.is_none() {
                                    shared.error = Some(info);
                                }
                            }
                            // Stop the rest of the graph: in-flight nodes
                            // see the token, unstarted ones are skipped.
                            deps.cancel.cancel();
                            skip_unstarted(&deps, &topology, &spawned);
                        }
                        skip_descendants(&deps, &topology, &node_id, &spawned);
                    }
                    NodeOutcome::Cancelled | NodeOutcome::Skipped => {
                        skip_descendants(&deps, &topology, &node_id, &spawned);
                    }
                },
                Err(join_err) => {
                    tracing::error!(
                        target: "nodeflow::scheduler",
                        error = %join_err,
                        "node worker panicked"
                    );
                    let mut shared = deps.shared.lock();
                    if shared.error.is_none() {
                        shared.error =
                            Some(ErrorInfo::new("internal", join_err.to_string()));
                    }
                    drop(shared);
                    if !halted {
                        halted = true;
                        deps.cancel.cancel();
                        skip_unstarted(&deps, &topology, &spawned);
                    }
                }
            }
        }

        // Terminal bookkeeping: status, final event, workflow span, trace.
        let (final_status, error, total_cost, total_tokens) = {
            let mut shared = deps.shared.lock();
            let any_failed = shared
                .nodes
                .values()
                .any(|n| n.status == NodeStatus::Failed);
            let status = if shared.cancel_requested {
                ExecutionStatus::Cancelled
            } else if any_failed || shared.error.is_some() {
                ExecutionStatus::Failed
            } else {
                ExecutionStatus::Completed
            };
            shared.status = status;
            shared.completed_at = Some(Utc::now());
            (
                status,
                shared.error.clone(),
                shared.total_cost,
                shared.total_tokens,
            )
        };

        let (event_kind, span_status) = match final_status {
            ExecutionStatus::Completed => (EventKind::ExecutionCompleted, SpanStatus::Completed),
            ExecutionStatus::Cancelled => (EventKind::ExecutionCancelled, SpanStatus::Cancelled),
            _ => (EventKind::ExecutionFailed, SpanStatus::Failed),
        };
        let mut draft = EventDraft::execution(event_kind);
        if let Some(error) = &error {
            draft = draft.with_payload(json!({ "error": error }));
        }
        let _ = deps.hub.emit(draft);

        deps.recorder.end_span(
            &workflow_span_id,
            span_status,
            json!({
                "total_cost": total_cost,
                "total_tokens": total_tokens,
            }),
            total_cost,
            total_tokens,
            error.map(|e| e.message),
        );
        deps.recorder.finalize_trace(&trace_id, final_status).await;
        deps.hub.close();
    }
}

fn fail_at_validation(deps: &RunDeps, err: &ValidationError) {
    let kind = match err {
        ValidationError::CyclicGraph => "cyclic_graph",
        ValidationError::UnknownNodeType { .. } => "unknown_node_type",
        _ => "validation",
    };
    let info = ErrorInfo::new(kind, err.to_string());
    {
        let mut shared = deps.shared.lock();
        shared.status = ExecutionStatus::Failed;
        shared.completed_at = Some(Utc::now());
        shared.error = Some(info.clone());
    }
    let _ = deps
        .hub
        .emit(EventDraft::execution(EventKind::ExecutionStarted));
    let _ = deps.hub.emit(
        EventDraft::execution(EventKind::ExecutionFailed)
            .with_payload(json!({ "error": info })),
    );
    deps.hub.close();
}

/// Reachable, unspawned nodes whose predecessors have all completed.
/// Designated entry nodes are ready from the start.
fn ready_nodes(deps: &RunDeps, topology: &Topology, spawned: &FxHashSet<String>) -> Vec<String> {
    let shared = deps.shared.lock();
    topology
        .order
        .iter()
        .filter(|id| topology.reachable.contains(*id))
        .filter(|id| !spawned.contains(*id))
        .filter(|id| {
            shared
                .nodes
                .get(*id)
                .is_some_and(|n| n.status == NodeStatus::Pending)
        })
        .filter(|id| {
            topology.entries.contains(*id)
                || topology
                    .predecessors(&deps.workflow, id)
                    .iter()
                    .all(|pred| {
                        shared
                            .nodes
                            .get(*pred)
                            .is_some_and(|n| n.status == NodeStatus::Completed)
                    })
        })
        .cloned()
        .collect()
}

fn mark_skipped(deps: &RunDeps, node_id: &str) {
    {
        let mut shared = deps.shared.lock();
        let Some(node) = shared.nodes.get_mut(node_id) else {
            return;
        };
        // Pending nodes, and ready nodes that never reached the pool.
        if !matches!(node.status, NodeStatus::Pending | NodeStatus::Ready) {
            return;
        }
        node.status = NodeStatus::Skipped;
        node.completed_at = Some(Utc::now());
    }
    let _ = deps
        .hub
        .emit(EventDraft::node(EventKind::NodeSkipped, node_id.to_string()));
}

/// Skip every reachable node that has not been handed to the pool yet.
fn skip_unstarted(deps: &RunDeps, topology: &Topology, spawned: &FxHashSet<String>) {
    for node_id in &topology.order {
        if topology.reachable.contains(node_id) && !spawned.contains(node_id) {
            mark_skipped(deps, node_id);
        }
    }
}

/// Skip the still-pending descendants of a node that ended without
/// completing.
fn skip_descendants(
    deps: &RunDeps,
    topology: &Topology,
    node_id: &str,
    spawned: &FxHashSet<String>,
) {
    let mut queue: Vec<String> = topology
        .successors(&deps.workflow, node_id)
        .into_iter()
        .map(str::to_string)
        .collect();
    while let Some(current) = queue.pop() {
        if spawned.contains(&current) {
            continue;
        }
        mark_skipped(deps, &current);
        queue.extend(
            topology
                .successors(&deps.workflow, &current)
                .into_iter()
                .map(str::to_string),
        );
    }
}

/// The per-node worker: routing, execution with retries, publication.
async fn run_node(
    deps: Arc<RunDeps>,
    scope: Arc<RunScope>,
    node_id: String,
    instance: Arc<dyn Node>,
) -> (String, NodeOutcome) {
    let Ok(_permit) = Arc::clone(&deps.semaphore).acquire_owned().await else {
        return (node_id, NodeOutcome::Skipped);
    };
    if deps.cancel.is_cancelled() {
        mark_skipped(&deps, &node_id);
        return (node_id, NodeOutcome::Skipped);
    }

    let Some(spec) = deps.workflow.node(&node_id).cloned() else {
        let info = ErrorInfo::new("internal", format!("node {node_id} missing from workflow"));
        return (node_id, NodeOutcome::Failed(info));
    };
    let Ok(descriptor) = deps.registry.descriptor(&spec.node_type).cloned() else {
        let info = ErrorInfo::new(
            "unknown_node_type",
            format!("node type {} vanished from registry", spec.node_type),
        );
        return (node_id, NodeOutcome::Failed(info));
    };

    {
        let mut shared = deps.shared.lock();
        if let Some(node) = shared.nodes.get_mut(&node_id) {
            node.status = NodeStatus::Running;
            node.started_at = Some(Utc::now());
        }
    }
    let _ = deps.hub.emit(
        EventDraft::node(EventKind::NodeStarted, node_id.clone()).with_payload(json!({
            "node_type": spec.node_type,
            "label": spec.label,
        })),
    );
    let node_span_id = deps.recorder.start_span(
        &scope.trace_id,
        Some(&scope.workflow_span_id),
        SpanType::Node,
        &node_id,
        Value::Null,
    );

    // Routing: collect completed sources, then run the pipeline.
    let (direct_sources, ancestor_sources) = collect_sources(&deps, &scope.topology, &node_id);
    let seed: Vec<(String, Value)> = if scope.topology.entries.contains(&node_id) {
        let mut seed: Vec<(String, Value)> = deps
            .options
            .entry_inputs
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        seed.sort_by(|a, b| a.0.cmp(&b.0));
        seed
    } else {
        Vec::new()
    };
    let request = RoutingRequest {
        target: &spec,
        descriptor: &descriptor,
        direct_sources,
        ancestor_sources,
        seed,
        use_intelligent_routing: deps.options.use_intelligent_routing,
    };
    let hooks = RoutingHooks {
        hub: &deps.hub,
        recorder: &deps.recorder,
        trace_id: &scope.trace_id,
        parent_span_id: &node_span_id,
        cancellation: &deps.cancel,
    };
    let routed = match deps.router.route(&request, &hooks).await {
        Ok(routed) => routed,
        Err(RoutingError::MissingInput { field, .. }) => {
            let err = NodeError::MissingInput { what: field };
            let info = fail_node(&deps, &node_id, &node_span_id, &err);
            return (node_id, NodeOutcome::Failed(info));
        }
    };
    deps.recorder.set_span_inputs(
        &node_span_id,
        preview_map(&routed.values, DEFAULT_PREVIEW_LEN),
    );

    let node_cancel = deps.cancel.child_token();
    let (execution_id, user_id) = {
        let shared = deps.shared.lock();
        (shared.execution_id.clone(), shared.user_id.clone())
    };
    let ctx = NodeContext::new(
        execution_id,
        node_id.clone(),
        user_id,
        Arc::clone(&deps.secrets),
        NodeEmitter::new(Arc::clone(&deps.hub), node_id.clone()),
        node_cancel.clone(),
        SpanScope::new(
            Arc::clone(&deps.recorder),
            scope.trace_id.clone(),
            node_span_id.clone(),
        ),
    );

    // Retries are internal: the stream sees one started/completed pair no
    // matter how many attempts it took.
    let policy = RetryPolicy {
        max_retries: deps.options.max_retries_per_node,
        base: deps.options.retry_base,
        ..RetryPolicy::default()
    };
    let mut attempt: u32 = 0;
    let result = loop {
        {
            let mut shared = deps.shared.lock();
            if let Some(node) = shared.nodes.get_mut(&node_id) {
                node.attempts += 1;
            }
        }
        let outcome = execute_bounded(
            instance.as_ref(),
            &routed.values,
            &spec.config,
            ctx.clone(),
            &node_cancel,
            deps.options.timeout_per_node,
            deps.options.grace_period,
        )
        .await;
        match outcome {
            Err(err)
                if err.is_retryable()
                    && attempt < policy.max_retries
                    && !deps.cancel.is_cancelled() =>
            {
                let delay = policy.delay(attempt);
                tracing::debug!(
                    target: "nodeflow::scheduler",
                    node_id = %node_id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient node failure; backing off before retry"
                );
                sleep(delay).await;
                attempt += 1;
            }
            other => break other,
        }
    };

    match result {
        Ok(output) => {
            let outcome = complete_node(&deps, &node_id, &spec.node_type, &node_span_id, output);
            (node_id, outcome)
        }
        Err(NodeError::Cancelled) => {
            {
                let mut shared = deps.shared.lock();
                if let Some(node) = shared.nodes.get_mut(&node_id) {
                    node.status = NodeStatus::Cancelled;
                    node.completed_at = Some(Utc::now());
                }
            }
            deps.recorder.end_span(
                &node_span_id,
                SpanStatus::Cancelled,
                Value::Null,
                crate::types::Cost::ZERO,
                crate::types::TokenUsage::default(),
                Some("cancelled".to_string()),
            );
            (node_id, NodeOutcome::Cancelled)
        }
        Err(err) => {
            let info = fail_node(&deps, &node_id, &node_span_id, &err);
            (node_id, NodeOutcome::Failed(info))
        }
    }
}

/// Build the router's view of this node's completed sources: direct
/// predecessors in edge order, then transitive ancestors in topological
/// order. Only published (completed) sources participate.
fn collect_sources(
    deps: &RunDeps,
    topology: &Topology,
    node_id: &str,
) -> (Vec<SourceData>, Vec<SourceData>) {
    let shared = deps.shared.lock();
    let mut direct: Vec<SourceData> = Vec::new();
    let mut seen_direct: FxHashSet<String> = FxHashSet::default();
    for edge in topology.incoming_edges(&deps.workflow, node_id) {
        let source_id = edge.source_node_id.as_str();
        if !seen_direct.insert(source_id.to_string()) {
            continue;
        }
        if let Some(source) = make_source(deps, &shared, source_id, true) {
            direct.push(source);
        }
    }

    let mut ancestors: Vec<SourceData> = Vec::new();
    for ancestor_id in topology.ancestors(&deps.workflow, node_id) {
        if seen_direct.contains(&ancestor_id) {
            continue;
        }
        if let Some(source) = make_source(deps, &shared, &ancestor_id, false) {
            ancestors.push(source);
        }
    }
    (direct, ancestors)
}

fn make_source(
    deps: &RunDeps,
    shared: &ExecutionState,
    source_id: &str,
    is_direct: bool,
) -> Option<SourceData> {
    let outputs = shared.outputs.get(source_id)?;
    let spec = deps.workflow.node(source_id)?;
    let descriptor = deps.registry.descriptor(&spec.node_type).ok()?;
    Some(SourceData {
        node_id: spec.id.clone(),
        node_type: spec.node_type.clone(),
        node_label: spec.label.clone(),
        category: descriptor.category,
        outputs: Arc::clone(outputs),
        is_direct,
    })
}

/// Run `execute` under the cancellation token, the optional per-node
/// timeout, and the grace period.
async fn execute_bounded(
    node: &dyn Node,
    inputs: &FxHashMap<String, Value>,
    config: &FxHashMap<String, Value>,
    ctx: NodeContext,
    token: &CancellationToken,
    limit: Option<Duration>,
    grace: Duration,
) -> Result<NodeOutput, NodeError> {
    let fut = node.execute(inputs, config, ctx);
    tokio::pin!(fut);
    match limit {
        None => {
            tokio::select! {
                result = &mut fut => result,
                () = token.cancelled() => {
                    // Give a cooperative node the grace period to unwind,
                    // then abandon it.
                    match timeout(grace, &mut fut).await {
                        Ok(result) => result,
                        Err(_) => Err(NodeError::Cancelled),
                    }
                }
            }
        }
        Some(limit) => {
            tokio::select! {
                result = &mut fut => result,
                () = token.cancelled() => {
                    match timeout(grace, &mut fut).await {
                        Ok(result) => result,
                        Err(_) => Err(NodeError::Cancelled),
                    }
                }
                () = sleep(limit) => {
                    token.cancel();
                    let _ = timeout(grace, &mut fut).await;
                    Err(NodeError::Timeout {
                        timeout_ms: limit.as_millis() as u64,
                    })
                }
            }
        }
    }
}

/// Success path: display metadata, atomic publication, totals, span,
/// event.
fn complete_node(
    deps: &RunDeps,
    node_id: &str,
    node_type: &str,
    span_id: &str,
    output: NodeOutput,
) -> NodeOutcome {
    let NodeOutput {
        mut outputs,
        cost,
        tokens,
    } = output;
    // The display key belongs to the engine, whatever the node emitted.
    outputs.remove(DISPLAY_METADATA_KEY);
    let display = deps.formatters.format(node_type, &outputs);
    outputs.insert(DISPLAY_METADATA_KEY.to_string(), display.to_value());

    let outputs_preview = preview_map(&outputs, DEFAULT_PREVIEW_LEN);
    {
        let mut shared = deps.shared.lock();
        if let Err(message) = shared.publish_output(node_id, outputs) {
            drop(shared);
            let err = NodeError::Internal(message);
            let info = fail_node(deps, node_id, span_id, &err);
            return NodeOutcome::Failed(info);
        }
        if let Some(node) = shared.nodes.get_mut(node_id) {
            node.status = NodeStatus::Completed;
            node.completed_at = Some(Utc::now());
            node.cost = cost;
            node.tokens = tokens;
        }
        shared.total_cost += cost;
        shared.total_tokens += tokens;
    }

    deps.recorder.end_span(
        span_id,
        SpanStatus::Completed,
        outputs_preview,
        cost,
        tokens,
        None,
    );
    let _ = deps.hub.emit(
        EventDraft::node(EventKind::NodeCompleted, node_id.to_string()).with_payload(json!({
            "cost": cost,
            "tokens": tokens,
            "display_type": display.display_type,
        })),
    );
    NodeOutcome::Completed
}

/// Failure path: state, span, `node.failed` event.
fn fail_node(deps: &RunDeps, node_id: &str, span_id: &str, err: &NodeError) -> ErrorInfo {
    let info = ErrorInfo::from(err);
    {
        let mut shared = deps.shared.lock();
        if let Some(node) = shared.nodes.get_mut(node_id) {
            node.status = NodeStatus::Failed;
            node.completed_at = Some(Utc::now());
            node.error = Some(info.clone());
        }
    }
    deps.recorder.end_span(
        span_id,
        SpanStatus::Failed,
        Value::Null,
        crate::types::Cost::ZERO,
        crate::types::TokenUsage::default(),
        Some(info.message.clone()),
    );
    let _ = deps.hub.emit(
        EventDraft::node(EventKind::NodeFailed, node_id.to_string())
            .with_payload(json!({ "error": info })),
    );
    info
}
