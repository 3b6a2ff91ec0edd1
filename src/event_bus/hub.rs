//! The per-execution event hub: ordered backlog plus live broadcast.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use chrono::Utc;
use futures_util::stream::{self, BoxStream, StreamExt};
use miette::Diagnostic;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::time::timeout;

use super::event::{EventDraft, ExecutionEvent};

/// Snapshot of hub health for monitoring and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubMetrics {
    /// Maximum number of events buffered per subscriber before lag occurs.
    pub capacity: usize,
    /// Total count of events dropped due to slow subscribers.
    pub dropped: usize,
    /// Events retained in the backlog.
    pub backlog_len: usize,
    /// Currently attached subscribers.
    pub subscribers: usize,
}

/// Error returned when publishing to a hub that has already been closed.
#[derive(Debug, Error, Diagnostic)]
pub enum EmitError {
    #[error("event hub closed: execution already reached a terminal state")]
    #[diagnostic(code(nodeflow::event_bus::closed))]
    Closed,
}

struct HubInner {
    backlog: Vec<ExecutionEvent>,
    sender: Option<broadcast::Sender<ExecutionEvent>>,
    next_seq: u64,
}

/// Ordered, multi-consumer event stream for one execution.
///
/// The hub keeps the complete ordered backlog for the lifetime of the
/// execution, so a subscriber attaching at any point replays history before
/// receiving live events. Live fan-out rides a Tokio broadcast channel with
/// a bounded per-subscriber buffer; overflow drops oldest events for that
/// subscriber (counted in [`HubMetrics::dropped`]), and lifecycle events
/// are transparently re-fetched from the backlog so they are never lost.
pub struct ExecutionEventHub {
    execution_id: String,
    capacity: usize,
    inner: Mutex<HubInner>,
    subscribers: AtomicUsize,
    ever_subscribed: AtomicBool,
    dropped: AtomicUsize,
}

impl ExecutionEventHub {
    /// Create a hub for `execution_id` with the given per-subscriber buffer
    /// capacity (clamped to at least 1 to satisfy the broadcast API).
    #[must_use]
    pub fn new(execution_id: String, capacity: usize) -> Arc<Self> {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Arc::new(Self {
            execution_id,
            capacity,
            inner: Mutex::new(HubInner {
                backlog: Vec::new(),
                sender: Some(sender),
                next_seq: 0,
            }),
            subscribers: AtomicUsize::new(0),
            ever_subscribed: AtomicBool::new(false),
            dropped: AtomicUsize::new(0),
        })
    }

    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    /// Stamp and publish an event. Returns the assigned sequence number.
    ///
    /// Sequence numbers are allocated under the hub lock, so `seq` order,
    /// backlog order, and broadcast order all agree.
    pub fn emit(&self, draft: EventDraft) -> Result<u64, EmitError> {
        let mut inner = self.inner.lock();
        let Some(sender) = inner.sender.clone() else {
            return Err(EmitError::Closed);
        };
        let seq = inner.next_seq;
        inner.next_seq += 1;
        let event = ExecutionEvent {
            execution_id: self.execution_id.clone(),
            seq,
            at: Utc::now(),
            kind: draft.kind,
            node_id: draft.node_id,
            agent: draft.agent,
            task: draft.task,
            payload: draft.payload,
        };
        inner.backlog.push(event.clone());
        // No receivers is fine; the backlog still records the event.
        let _ = sender.send(event);
        Ok(seq)
    }

    /// Subscribe, receiving the backlog so far followed by live events.
    pub fn subscribe(self: &Arc<Self>) -> EventStream {
        let inner = self.inner.lock();
        // Snapshot and live receiver are taken under the same lock, so no
        // event can fall between the backlog and the broadcast.
        let pending: VecDeque<ExecutionEvent> = inner.backlog.iter().cloned().collect();
        let receiver = inner.sender.as_ref().map(|s| s.subscribe());
        drop(inner);
        self.subscribers.fetch_add(1, Ordering::SeqCst);
        self.ever_subscribed.store(true, Ordering::SeqCst);
        EventStream {
            hub: Arc::clone(self),
            pending,
            receiver,
            last_seq: None,
        }
    }

    /// Stop accepting events and let live subscribers drain and finish.
    ///
    /// Closing the stream never cancels the execution; that is an explicit
    /// scheduler operation.
    pub fn close(&self) {
        self.inner.lock().sender = None;
    }

    /// Clone of the ordered backlog, mainly for tests and snapshots.
    #[must_use]
    pub fn backlog(&self) -> Vec<ExecutionEvent> {
        self.inner.lock().backlog.clone()
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.load(Ordering::SeqCst)
    }

    /// Whether anyone ever subscribed. Streams nobody has looked at are
    /// not garbage-collected.
    #[must_use]
    pub fn has_been_subscribed(&self) -> bool {
        self.ever_subscribed.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.lock().sender.is_none()
    }

    #[must_use]
    pub fn metrics(&self) -> HubMetrics {
        HubMetrics {
            capacity: self.capacity,
            dropped: self.dropped.load(Ordering::Relaxed),
            backlog_len: self.inner.lock().backlog.len(),
            subscribers: self.subscriber_count(),
        }
    }

    fn record_lag(&self, missed: u64) {
        if missed == 0 {
            return;
        }
        let increment = usize::try_from(missed).unwrap_or(usize::MAX);
        let total = self
            .dropped
            .fetch_add(increment, Ordering::Relaxed)
            .saturating_add(increment);
        tracing::warn!(
            target: "nodeflow::event_bus",
            execution_id = %self.execution_id,
            missed,
            total_dropped = total,
            "subscriber lagged; dropping oldest non-lifecycle events"
        );
    }

    /// Lifecycle events newer than `after_seq`, fetched from the backlog to
    /// repair a lagged subscriber.
    fn missed_lifecycle(&self, after_seq: Option<u64>) -> Vec<ExecutionEvent> {
        let inner = self.inner.lock();
        inner
            .backlog
            .iter()
            .filter(|e| after_seq.is_none_or(|s| e.seq > s))
            .filter(|e| e.kind.is_lifecycle())
            .cloned()
            .collect()
    }

    /// Every event newer than `after_seq`; used to drain on close.
    fn events_after(&self, after_seq: Option<u64>) -> Vec<ExecutionEvent> {
        let inner = self.inner.lock();
        inner
            .backlog
            .iter()
            .filter(|e| after_seq.is_none_or(|s| e.seq > s))
            .cloned()
            .collect()
    }
}

/// A subscriber handle yielding events in `seq` order.
pub struct EventStream {
    hub: Arc<ExecutionEventHub>,
    pending: VecDeque<ExecutionEvent>,
    receiver: Option<broadcast::Receiver<ExecutionEvent>>,
    last_seq: Option<u64>,
}

impl EventStream {
    /// Receive the next event, or `None` once the hub is closed and fully
    /// drained.
    pub async fn recv(&mut self) -> Option<ExecutionEvent> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                if self.seen(event.seq) {
                    continue;
                }
                self.last_seq = Some(event.seq);
                return Some(event);
            }
            let Some(receiver) = self.receiver.as_mut() else {
                return None;
            };
            match receiver.recv().await {
                Ok(event) => {
                    if self.seen(event.seq) {
                        continue;
                    }
                    self.last_seq = Some(event.seq);
                    return Some(event);
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    self.hub.record_lag(missed);
                    let repaired = self.hub.missed_lifecycle(self.last_seq);
                    self.pending.extend(repaired);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    // The hub closed while we were behind; anything still
                    // missing is in the backlog.
                    self.receiver = None;
                    let remaining = self.hub.events_after(self.last_seq);
                    self.pending.extend(remaining);
                    if self.pending.is_empty() {
                        return None;
                    }
                }
            }
        }
    }

    /// Receive with a deadline. `None` on timeout or end of stream.
    pub async fn next_timeout(&mut self, duration: Duration) -> Option<ExecutionEvent> {
        timeout(duration, self.recv()).await.ok().flatten()
    }

    /// Metrics of the hub backing this stream.
    #[must_use]
    pub fn metrics(&self) -> HubMetrics {
        self.hub.metrics()
    }

    /// Convert into a boxed async stream for transport combinators
    /// (SSE framing, `StreamExt::map`, ...).
    pub fn into_async_stream(self) -> BoxStream<'static, ExecutionEvent> {
        stream::unfold(self, |mut s| async move {
            s.recv().await.map(|event| (event, s))
        })
        .boxed()
    }

    fn seen(&self, seq: u64) -> bool {
        self.last_seq.is_some_and(|last| seq <= last)
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        self.hub.subscribers.fetch_sub(1, Ordering::SeqCst);
    }
}
