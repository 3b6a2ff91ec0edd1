//! Output targets for execution events.
//!
//! Sinks are how the transport layer and tests consume a stream without
//! writing their own receive loop: [`pump`] drains an [`EventStream`] into
//! any [`EventSink`] on a background task.

use std::any::type_name;
use std::fs::File;
use std::io::{self, Result as IoResult, Stdout, Write};
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex as ParkingMutex;
use tokio::task::JoinHandle;

use super::event::ExecutionEvent;
use super::hub::EventStream;
use crate::telemetry::{PlainFormatter, TelemetryFormatter};

/// Abstraction over an output target that consumes full event objects.
pub trait EventSink: Send {
    /// Handle one event. The sink decides how to serialise/format it.
    ///
    /// The engine calls this at most once per event per sink. Implementations
    /// should return quickly; a sink that blocks stalls only its own pump
    /// task, never the producer.
    fn handle(&mut self, event: &ExecutionEvent) -> IoResult<()>;

    /// A stable, human-friendly identifier for this sink instance.
    fn name(&self) -> String {
        type_name::<Self>().to_string()
    }
}

/// Drain `stream` into `sink` on a background task.
///
/// Sink errors are logged and do not stop the pump; the task ends when the
/// stream does.
pub fn pump(mut stream: EventStream, mut sink: Box<dyn EventSink>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = stream.recv().await {
            if let Err(err) = sink.handle(&event) {
                tracing::warn!(
                    target: "nodeflow::event_bus",
                    sink = %sink.name(),
                    error = %err,
                    "event sink error"
                );
            }
        }
    })
}

/// Stdout sink with pluggable formatting.
pub struct StdOutSink<F: TelemetryFormatter = PlainFormatter> {
    handle: Stdout,
    formatter: F,
}

impl Default for StdOutSink {
    fn default() -> Self {
        Self {
            handle: io::stdout(),
            formatter: PlainFormatter::new(),
        }
    }
}

impl<F: TelemetryFormatter> StdOutSink<F> {
    pub fn with_formatter(formatter: F) -> Self {
        Self {
            handle: io::stdout(),
            formatter,
        }
    }
}

impl<F: TelemetryFormatter + Send> EventSink for StdOutSink<F> {
    fn handle(&mut self, event: &ExecutionEvent) -> IoResult<()> {
        let rendered = self.formatter.render_event(event).join_lines();
        self.handle.write_all(rendered.as_bytes())?;
        self.handle.flush()
    }
}

/// In-memory sink for testing and snapshots.
#[derive(Clone, Default)]
pub struct MemorySink {
    entries: Arc<ParkingMutex<Vec<ExecutionEvent>>>,
}

impl MemorySink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Clone of all captured events, without holding the mutex.
    #[must_use]
    pub fn snapshot(&self) -> Vec<ExecutionEvent> {
        self.entries.lock().clone()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl EventSink for MemorySink {
    fn handle(&mut self, event: &ExecutionEvent) -> IoResult<()> {
        self.entries.lock().push(event.clone());
        Ok(())
    }
}

/// JSON Lines sink for machine-readable structured logging.
///
/// One wire-format JSON object per line, suitable for log aggregation and
/// automated assertions:
///
/// ```json
/// {"execution_id":"…","seq":3,"at":"2025-11-03T12:34:56.789Z","kind":"node.completed","node_id":"chat"}
/// ```
pub struct JsonLinesSink {
    handle: Box<dyn Write + Send>,
}

impl JsonLinesSink {
    pub fn new(handle: Box<dyn Write + Send>) -> Self {
        Self { handle }
    }

    pub fn to_stdout() -> Self {
        Self::new(Box::new(io::stdout()))
    }

    /// Write events to a file (created or truncated).
    pub fn to_file(path: impl AsRef<Path>) -> IoResult<Self> {
        let file = File::create(path)?;
        Ok(Self::new(Box::new(file)))
    }
}

impl EventSink for JsonLinesSink {
    fn handle(&mut self, event: &ExecutionEvent) -> IoResult<()> {
        let json = serde_json::to_string(&event.to_wire_json())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        writeln!(self.handle, "{json}")?;
        self.handle.flush()
    }

    fn name(&self) -> String {
        "JsonLinesSink".to_string()
    }
}

/// Channel sink for streaming events to async consumers (SSE, WebSocket,
/// dashboards). Forwards every event into a flume channel.
pub struct ChannelSink {
    tx: flume::Sender<ExecutionEvent>,
}

impl ChannelSink {
    #[must_use]
    pub fn new(tx: flume::Sender<ExecutionEvent>) -> Self {
        Self { tx }
    }
}

impl EventSink for ChannelSink {
    fn handle(&mut self, event: &ExecutionEvent) -> IoResult<()> {
        self.tx
            .send(event.clone())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "channel receiver dropped"))
    }
}
