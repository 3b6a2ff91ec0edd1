//! Human-readable event rendering and tracing setup.

use crate::event_bus::{EventKind, ExecutionEvent};

pub const CONTEXT_COLOR: &str = "\x1b[32m"; // green
pub const LINE_COLOR: &str = "\x1b[35m"; // magenta
pub const ERROR_COLOR: &str = "\x1b[31m"; // red
pub const RESET_COLOR: &str = "\x1b[0m";

/// Rendered output for one event, ready for a sink to write.
#[derive(Clone, Debug, Default)]
pub struct EventRender {
    pub context: Option<String>,
    pub lines: Vec<String>,
}

impl EventRender {
    #[must_use]
    pub fn join_lines(&self) -> String {
        self.lines.join("")
    }
}

/// Formats events for human-facing sinks.
pub trait TelemetryFormatter: Send + Sync {
    fn render_event(&self, event: &ExecutionEvent) -> EventRender;
}

/// One line per event, coloured by severity.
pub struct PlainFormatter;

impl PlainFormatter {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Default for PlainFormatter {
    fn default() -> Self {
        Self::new()
    }
}

impl TelemetryFormatter for PlainFormatter {
    fn render_event(&self, event: &ExecutionEvent) -> EventRender {
        let color = match event.kind {
            EventKind::ExecutionFailed | EventKind::NodeFailed => ERROR_COLOR,
            _ => LINE_COLOR,
        };
        let suffix = if event.payload.is_null() {
            String::new()
        } else {
            format!(" {}", event.payload)
        };
        let line = format!("{color}{event}{suffix}{RESET_COLOR}\n");
        EventRender {
            context: Some(event.kind.as_str().to_string()),
            lines: vec![line],
        }
    }
}

/// Install the process-wide tracing subscriber: env-filtered fmt output
/// plus span-trace capture for error reports.
///
/// Respects `RUST_LOG`; defaults to `info` for the crate. Calling it twice
/// is harmless — the second call is ignored.
pub fn init_tracing() {
    use tracing_error::ErrorLayer;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("nodeflow=info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(ErrorLayer::default())
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_bus::{EventDraft, ExecutionEventHub};

    #[test]
    fn failed_events_render_in_error_color() {
        let hub = ExecutionEventHub::new("exec".into(), 4);
        hub.emit(EventDraft::node(EventKind::NodeFailed, "n")).unwrap();
        let event = hub.backlog().remove(0);
        let render = PlainFormatter::new().render_event(&event);
        assert!(render.join_lines().starts_with(ERROR_COLOR));
        assert_eq!(render.context.as_deref(), Some("node.failed"));
    }
}
