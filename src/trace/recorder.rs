//! The buffered trace recorder.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use chrono::Utc;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::sync::{Notify, oneshot};
use uuid::Uuid;

use super::sink::TraceSink;
use super::{Span, SpanStatus, SpanType, Trace};
use crate::types::{Cost, ExecutionStatus, TokenUsage};

/// Counters describing recorder health.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceRecorderMetrics {
    /// Commands waiting for the sink worker.
    pub queued: usize,
    /// Span/trace updates dropped on queue overflow.
    pub dropped: usize,
    /// Sink writes that returned an error.
    pub sink_failures: usize,
}

enum SinkCommand {
    WriteTrace(Trace),
    WriteSpan(Span),
    Finalize {
        trace_id: String,
        status: ExecutionStatus,
        ack: oneshot::Sender<()>,
    },
    Shutdown,
}

impl SinkCommand {
    fn droppable(&self) -> bool {
        matches!(self, Self::WriteTrace(_) | Self::WriteSpan(_))
    }
}

struct QueueShared {
    queue: Mutex<VecDeque<SinkCommand>>,
    notify: Notify,
    capacity: usize,
    dropped: AtomicUsize,
    sink_failures: AtomicUsize,
}

impl QueueShared {
    /// Push a command, evicting the oldest droppable entry on overflow.
    /// Finalize and shutdown commands are always accepted.
    fn enqueue(&self, command: SinkCommand) {
        let mut queue = self.queue.lock();
        if command.droppable() && queue.len() >= self.capacity {
            if let Some(pos) = queue.iter().position(SinkCommand::droppable) {
                queue.remove(pos);
                let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::warn!(
                    target: "nodeflow::trace",
                    total_dropped = total,
                    "trace queue overflow; dropped oldest span update"
                );
            }
        }
        queue.push_back(command);
        drop(queue);
        self.notify.notify_one();
    }
}

struct TraceEntry {
    trace: Trace,
}

struct SpanEntry {
    span: Span,
    started: Instant,
}

#[derive(Default)]
struct RecorderState {
    traces: FxHashMap<String, TraceEntry>,
    spans: FxHashMap<String, SpanEntry>,
}

/// Builds the span tree for each execution and streams records to a
/// [`TraceSink`] from a background worker.
///
/// All methods except [`finalize_trace`](Self::finalize_trace) are
/// non-blocking: they update in-memory state and enqueue a write. The
/// worker drains the queue asynchronously; a failing sink is counted and
/// logged but never surfaces to callers.
pub struct TraceRecorder {
    shared: Arc<QueueShared>,
    state: Mutex<RecorderState>,
}

impl TraceRecorder {
    /// Create a recorder and spawn its sink worker on the current runtime.
    #[must_use]
    pub fn spawn(sink: Arc<dyn TraceSink>, queue_capacity: usize) -> Arc<Self> {
        let shared = Arc::new(QueueShared {
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            capacity: queue_capacity.max(1),
            dropped: AtomicUsize::new(0),
            sink_failures: AtomicUsize::new(0),
        });
        tokio::spawn(Self::worker(Arc::clone(&shared), sink));
        Arc::new(Self {
            shared,
            state: Mutex::new(RecorderState::default()),
        })
    }

    /// Open a trace for one execution. Returns the new `trace_id`.
    pub fn start_trace(
        &self,
        workflow_id: &str,
        execution_id: &str,
        user_id: Option<&str>,
    ) -> String {
        let trace_id = Uuid::new_v4().to_string();
        let trace = Trace {
            trace_id: trace_id.clone(),
            workflow_id: workflow_id.to_string(),
            execution_id: execution_id.to_string(),
            user_id: user_id.map(str::to_string),
            started_at: Utc::now(),
            completed_at: None,
            status: ExecutionStatus::Running,
            total_cost: Cost::ZERO,
            total_tokens: TokenUsage::default(),
            metadata: Value::Null,
        };
        self.shared.enqueue(SinkCommand::WriteTrace(trace.clone()));
        self.state
            .lock()
            .traces
            .insert(trace_id.clone(), TraceEntry { trace });
        trace_id
    }

    /// Open a span under `trace_id`. `inputs` should already be a bounded
    /// preview, not a raw artifact.
    pub fn start_span(
        &self,
        trace_id: &str,
        parent_span_id: Option<&str>,
        span_type: SpanType,
        name: &str,
        inputs: Value,
    ) -> String {
        let span_id = Uuid::new_v4().to_string();
        let span = Span {
            span_id: span_id.clone(),
            trace_id: trace_id.to_string(),
            parent_span_id: parent_span_id.map(str::to_string),
            span_type,
            name: name.to_string(),
            status: SpanStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            duration_ms: None,
            inputs,
            outputs: Value::Null,
            cost: Cost::ZERO,
            tokens: TokenUsage::default(),
            model: None,
            provider: None,
            error: None,
            metadata: Value::Null,
        };
        self.state.lock().spans.insert(
            span_id.clone(),
            SpanEntry {
                span,
                started: Instant::now(),
            },
        );
        span_id
    }

    /// Mutate an open span in place (model/provider/metadata annotations).
    /// Unknown span ids are ignored.
    pub fn annotate_span(&self, span_id: &str, annotate: impl FnOnce(&mut Span)) {
        if let Some(entry) = self.state.lock().spans.get_mut(span_id) {
            annotate(&mut entry.span);
        }
    }

    /// Record the routed inputs of a span after it was opened.
    pub fn set_span_inputs(&self, span_id: &str, inputs: Value) {
        self.annotate_span(span_id, |span| span.inputs = inputs);
    }

    /// Close a span, roll its cost/tokens into the trace totals, and queue
    /// the finished record for the sink.
    pub fn end_span(
        &self,
        span_id: &str,
        status: SpanStatus,
        outputs: Value,
        cost: Cost,
        tokens: TokenUsage,
        error: Option<String>,
    ) {
        let mut state = self.state.lock();
        let Some(mut entry) = state.spans.remove(span_id) else {
            tracing::debug!(target: "nodeflow::trace", span_id, "end_span on unknown span");
            return;
        };
        entry.span.status = status;
        entry.span.completed_at = Some(Utc::now());
        entry.span.duration_ms = Some(entry.started.elapsed().as_millis() as u64);
        entry.span.outputs = outputs;
        entry.span.cost = cost;
        entry.span.tokens = tokens;
        entry.span.error = error;
        if let Some(trace) = state.traces.get_mut(&entry.span.trace_id) {
            trace.trace.total_cost += cost;
            trace.trace.total_tokens += tokens;
        }
        drop(state);
        self.shared.enqueue(SinkCommand::WriteSpan(entry.span));
    }

    /// Mark the trace terminal and wait for every buffered write to reach
    /// the sink. This is the one recorder call that blocks.
    pub async fn finalize_trace(&self, trace_id: &str, status: ExecutionStatus) {
        let final_trace = {
            let mut state = self.state.lock();
            state.traces.remove(trace_id).map(|mut entry| {
                entry.trace.status = status;
                entry.trace.completed_at = Some(Utc::now());
                entry.trace
            })
        };
        if let Some(trace) = final_trace {
            self.shared.enqueue(SinkCommand::WriteTrace(trace));
        }
        let (ack, done) = oneshot::channel();
        self.shared.enqueue(SinkCommand::Finalize {
            trace_id: trace_id.to_string(),
            status,
            ack,
        });
        if done.await.is_err() {
            tracing::warn!(
                target: "nodeflow::trace",
                trace_id,
                "trace worker stopped before finalize acknowledgement"
            );
        }
    }

    #[must_use]
    pub fn metrics(&self) -> TraceRecorderMetrics {
        TraceRecorderMetrics {
            queued: self.shared.queue.lock().len(),
            dropped: self.shared.dropped.load(Ordering::Relaxed),
            sink_failures: self.shared.sink_failures.load(Ordering::Relaxed),
        }
    }

    async fn worker(shared: Arc<QueueShared>, sink: Arc<dyn TraceSink>) {
        loop {
            let command = loop {
                if let Some(cmd) = shared.queue.lock().pop_front() {
                    break cmd;
                }
                shared.notify.notified().await;
            };
            let result = match &command {
                SinkCommand::WriteTrace(trace) => sink.record_trace(trace).await,
                SinkCommand::WriteSpan(span) => sink.record_span(span).await,
                SinkCommand::Finalize {
                    trace_id, status, ..
                } => sink.finalize_trace(trace_id, *status).await,
                SinkCommand::Shutdown => break,
            };
            if let Err(err) = result {
                shared.sink_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(target: "nodeflow::trace", error = %err, "trace sink write failed");
            }
            if let SinkCommand::Finalize { ack, .. } = command {
                let _ = ack.send(());
            }
        }
    }
}

impl Drop for TraceRecorder {
    fn drop(&mut self) {
        self.shared.enqueue(SinkCommand::Shutdown);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::MemoryTraceSink;
    use serde_json::json;

    #[tokio::test]
    async fn span_records_flow_to_sink_on_finalize() {
        let sink = MemoryTraceSink::new();
        let recorder = TraceRecorder::spawn(Arc::new(sink.clone()), 64);

        let trace_id = recorder.start_trace("wf-1", "exec-1", Some("user-9"));
        let root = recorder.start_span(&trace_id, None, SpanType::Workflow, "wf-1", Value::Null);
        let child = recorder.start_span(
            &trace_id,
            Some(&root),
            SpanType::Node,
            "chat",
            json!({"query": "hello"}),
        );
        recorder.end_span(
            &child,
            SpanStatus::Completed,
            json!({"response": "hi"}),
            Cost::from_micros(1_500),
            TokenUsage::new(10, 5),
            None,
        );
        recorder.end_span(
            &root,
            SpanStatus::Completed,
            Value::Null,
            Cost::ZERO,
            TokenUsage::default(),
            None,
        );
        recorder
            .finalize_trace(&trace_id, ExecutionStatus::Completed)
            .await;

        let spans = sink.spans();
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0].name, "chat");
        assert_eq!(spans[0].parent_span_id.as_deref(), Some(root.as_str()));
        assert!(spans[0].duration_ms.is_some());

        // Final trace header carries the accumulated totals.
        let traces = sink.traces();
        let last = traces.last().unwrap();
        assert_eq!(last.total_cost, Cost::from_micros(1_500));
        assert_eq!(last.total_tokens.total, 15);
        assert_eq!(last.status, ExecutionStatus::Completed);
        assert_eq!(sink.finalized().len(), 1);
    }

    #[tokio::test]
    async fn overflow_drops_oldest_span_but_never_finalize() {
        let sink = MemoryTraceSink::new();
        let recorder = TraceRecorder::spawn(Arc::new(sink.clone()), 2);

        // No await between these calls, so the worker cannot drain and the
        // queue must evict.
        let trace_id = recorder.start_trace("wf-1", "exec-1", None);
        for i in 0..6 {
            let span = recorder.start_span(
                &trace_id,
                None,
                SpanType::Node,
                &format!("n{i}"),
                Value::Null,
            );
            recorder.end_span(
                &span,
                SpanStatus::Completed,
                Value::Null,
                Cost::ZERO,
                TokenUsage::default(),
                None,
            );
        }
        recorder
            .finalize_trace(&trace_id, ExecutionStatus::Completed)
            .await;

        assert!(recorder.metrics().dropped > 0);
        assert_eq!(sink.finalized().len(), 1);
    }
}
