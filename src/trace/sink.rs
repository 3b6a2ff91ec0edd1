//! The write-side interface of the trace pipeline.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{Span, Trace};
use crate::types::ExecutionStatus;

/// Destination for trace and span records.
///
/// The production implementation writes to an external database; the engine
/// only ever talks to this interface. Implementations may buffer internally
/// and must tolerate concurrent writers.
#[async_trait]
pub trait TraceSink: Send + Sync {
    /// Record (or upsert) the trace header.
    async fn record_trace(&self, trace: &Trace) -> Result<(), SinkError>;

    /// Record a finished span.
    async fn record_span(&self, span: &Span) -> Result<(), SinkError>;

    /// Mark the trace terminal. Called exactly once per trace.
    async fn finalize_trace(&self, trace_id: &str, status: ExecutionStatus)
    -> Result<(), SinkError>;
}

/// Opaque sink failure. Counted and logged by the recorder, never
/// propagated to the execution.
#[derive(Debug, thiserror::Error)]
#[error("trace sink error: {0}")]
pub struct SinkError(pub String);

/// Sink that discards everything; the default for tests and for embedders
/// that do not persist traces.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTraceSink;

#[async_trait]
impl TraceSink for NullTraceSink {
    async fn record_trace(&self, _trace: &Trace) -> Result<(), SinkError> {
        Ok(())
    }

    async fn record_span(&self, _span: &Span) -> Result<(), SinkError> {
        Ok(())
    }

    async fn finalize_trace(
        &self,
        _trace_id: &str,
        _status: ExecutionStatus,
    ) -> Result<(), SinkError> {
        Ok(())
    }
}

/// In-memory sink capturing everything for test assertions.
#[derive(Clone, Default)]
pub struct MemoryTraceSink {
    inner: Arc<Mutex<MemoryTraceState>>,
}

#[derive(Default)]
struct MemoryTraceState {
    traces: Vec<Trace>,
    spans: Vec<Span>,
    finalized: Vec<(String, ExecutionStatus)>,
}

impl MemoryTraceSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn traces(&self) -> Vec<Trace> {
        self.inner.lock().traces.clone()
    }

    #[must_use]
    pub fn spans(&self) -> Vec<Span> {
        self.inner.lock().spans.clone()
    }

    #[must_use]
    pub fn finalized(&self) -> Vec<(String, ExecutionStatus)> {
        self.inner.lock().finalized.clone()
    }
}

#[async_trait]
impl TraceSink for MemoryTraceSink {
    async fn record_trace(&self, trace: &Trace) -> Result<(), SinkError> {
        self.inner.lock().traces.push(trace.clone());
        Ok(())
    }

    async fn record_span(&self, span: &Span) -> Result<(), SinkError> {
        self.inner.lock().spans.push(span.clone());
        Ok(())
    }

    async fn finalize_trace(
        &self,
        trace_id: &str,
        status: ExecutionStatus,
    ) -> Result<(), SinkError> {
        self.inner
            .lock()
            .finalized
            .push((trace_id.to_string(), status));
        Ok(())
    }
}
