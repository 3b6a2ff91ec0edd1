//! Execution tracing: spans, traces, and the buffered recorder.
//!
//! Every execution produces one [`Trace`] — a tree of [`Span`]s rooted at a
//! workflow-type span — describing what ran, what it consumed, and what it
//! cost. The [`TraceRecorder`] buffers writes through a bounded queue and a
//! worker task so the executor never blocks on the sink; the only blocking
//! point is [`TraceRecorder::finalize_trace`], which flushes and waits.
//!
//! Sink failures are counted and logged; they never fail an execution.

mod recorder;
mod sink;

pub use recorder::{TraceRecorder, TraceRecorderMetrics};
pub use sink::{MemoryTraceSink, NullTraceSink, SinkError, TraceSink};

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{Cost, ExecutionStatus, TokenUsage};

/// What a span measures.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanType {
    Workflow,
    Node,
    Routing,
    LlmCall,
    Retrieval,
    Tool,
}

/// Terminal status of a span (or `Running` while open).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// One timed operation within an execution.
///
/// Spans form a tree through `parent_span_id`; the root is always the
/// workflow span. `inputs`/`outputs` are snapshots (bounded previews, not
/// the raw artifacts) so a trace stays storable.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Span {
    pub span_id: String,
    pub trace_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<String>,
    pub span_type: SpanType,
    pub name: String,
    pub status: SpanStatus,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Milliseconds, measured on a monotonic clock.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub inputs: Value,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub outputs: Value,
    pub cost: Cost,
    pub tokens: TokenUsage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub metadata: Value,
}

/// The root record of one execution's observability data.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Trace {
    pub trace_id: String,
    pub workflow_id: String,
    pub execution_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub status: ExecutionStatus,
    pub total_cost: Cost,
    pub total_tokens: TokenUsage,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub metadata: Value,
}

/// A node's window into the trace: a recorder handle pinned to the node's
/// own span, so nested spans (`llm_call`, `retrieval`, `tool`) land in the
/// right place in the tree.
#[derive(Clone)]
pub struct SpanScope {
    recorder: Arc<TraceRecorder>,
    trace_id: String,
    parent_span_id: String,
}

impl SpanScope {
    #[must_use]
    pub fn new(recorder: Arc<TraceRecorder>, trace_id: String, parent_span_id: String) -> Self {
        Self {
            recorder,
            trace_id,
            parent_span_id,
        }
    }

    /// Open a child span under this scope's parent. Returns the span id.
    pub fn start(&self, span_type: SpanType, name: &str, inputs: Value) -> String {
        self.recorder.start_span(
            &self.trace_id,
            Some(&self.parent_span_id),
            span_type,
            name,
            inputs,
        )
    }

    /// Attach model/provider attribution to an open span.
    pub fn annotate_model(&self, span_id: &str, model: &str, provider: &str) {
        self.recorder.annotate_span(span_id, |span| {
            span.model = Some(model.to_string());
            span.provider = Some(provider.to_string());
        });
    }

    /// Close a child span opened through [`start`](Self::start).
    pub fn end(
        &self,
        span_id: &str,
        status: SpanStatus,
        outputs: Value,
        cost: Cost,
        tokens: TokenUsage,
        error: Option<String>,
    ) {
        self.recorder
            .end_span(span_id, status, outputs, cost, tokens, error);
    }
}
