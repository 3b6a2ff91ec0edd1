//! Per-execution event streaming.
//!
//! Every execution owns one [`ExecutionEventHub`]: an ordered,
//! multi-consumer stream of typed [`ExecutionEvent`]s. Nodes and the
//! scheduler publish through the hub; transports subscribe and receive the
//! full backlog followed by live events.
//!
//! ```text
//! Scheduler / Router / Nodes
//!     │ emit()
//!     ▼
//! ExecutionEventHub ── backlog (ordered, seq-stamped)
//!     │ broadcast
//!     ├─────────┬──────────┐
//!     ▼         ▼          ▼
//!   SSE      stdout     MemorySink
//! stream      sink      (tests)
//! ```
//!
//! Delivery guarantees:
//! - `seq` is monotonic per execution.
//! - Subscribers attached at any point receive the backlog in order, then
//!   live events.
//! - Per-subscriber buffering is bounded; a slow subscriber loses oldest
//!   events (counted in [`HubMetrics`]), but lifecycle events are
//!   recovered from the backlog and are never lost.

mod emitter;
mod event;
mod hub;
mod sink;

pub use emitter::NodeEmitter;
pub use event::{EventDraft, EventKind, ExecutionEvent};
pub use hub::{EmitError, EventStream, ExecutionEventHub, HubMetrics};
pub use sink::{ChannelSink, EventSink, JsonLinesSink, MemorySink, StdOutSink, pump};
