//! Event types emitted during workflow execution.

use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// The closed set of event kinds an execution can emit.
///
/// Transports serialise the kind as its dotted wire name, e.g.
/// `"node.completed"`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "execution.started")]
    ExecutionStarted,
    #[serde(rename = "execution.completed")]
    ExecutionCompleted,
    #[serde(rename = "execution.failed")]
    ExecutionFailed,
    #[serde(rename = "execution.cancelled")]
    ExecutionCancelled,
    #[serde(rename = "node.pending")]
    NodePending,
    #[serde(rename = "node.started")]
    NodeStarted,
    #[serde(rename = "node.progress")]
    NodeProgress,
    #[serde(rename = "node.completed")]
    NodeCompleted,
    #[serde(rename = "node.failed")]
    NodeFailed,
    #[serde(rename = "node.skipped")]
    NodeSkipped,
    #[serde(rename = "routing.started")]
    RoutingStarted,
    #[serde(rename = "routing.completed")]
    RoutingCompleted,
    #[serde(rename = "sub.agent_started")]
    SubAgentStarted,
    #[serde(rename = "sub.agent_thinking")]
    SubAgentThinking,
    #[serde(rename = "sub.tool_called")]
    SubToolCalled,
    #[serde(rename = "sub.agent_completed")]
    SubAgentCompleted,
}

impl EventKind {
    /// Wire name of this kind (`"execution.started"`, `"node.failed"`, ...).
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ExecutionStarted => "execution.started",
            Self::ExecutionCompleted => "execution.completed",
            Self::ExecutionFailed => "execution.failed",
            Self::ExecutionCancelled => "execution.cancelled",
            Self::NodePending => "node.pending",
            Self::NodeStarted => "node.started",
            Self::NodeProgress => "node.progress",
            Self::NodeCompleted => "node.completed",
            Self::NodeFailed => "node.failed",
            Self::NodeSkipped => "node.skipped",
            Self::RoutingStarted => "routing.started",
            Self::RoutingCompleted => "routing.completed",
            Self::SubAgentStarted => "sub.agent_started",
            Self::SubAgentThinking => "sub.agent_thinking",
            Self::SubToolCalled => "sub.tool_called",
            Self::SubAgentCompleted => "sub.agent_completed",
        }
    }

    /// Lifecycle events must survive subscriber lag; everything else may be
    /// dropped under backpressure.
    #[must_use]
    pub fn is_lifecycle(&self) -> bool {
        matches!(
            self,
            Self::ExecutionStarted
                | Self::ExecutionCompleted
                | Self::ExecutionFailed
                | Self::ExecutionCancelled
                | Self::NodeStarted
                | Self::NodeCompleted
                | Self::NodeFailed
        )
    }

    /// Returns `true` for the events that end a stream.
    #[must_use]
    pub fn is_execution_terminal(&self) -> bool {
        matches!(
            self,
            Self::ExecutionCompleted | Self::ExecutionFailed | Self::ExecutionCancelled
        )
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One event on an execution's stream.
///
/// `seq` is assigned by the hub at publish time and is monotonic per
/// execution; `at` is the publish wall-clock timestamp.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExecutionEvent {
    pub execution_id: String,
    pub seq: u64,
    pub at: DateTime<Utc>,
    pub kind: EventKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,
}

/// An event before the hub stamps `seq` and `at`.
#[derive(Clone, Debug)]
pub struct EventDraft {
    pub kind: EventKind,
    pub node_id: Option<String>,
    pub agent: Option<String>,
    pub task: Option<String>,
    pub payload: Value,
}

impl EventDraft {
    #[must_use]
    pub fn execution(kind: EventKind) -> Self {
        Self {
            kind,
            node_id: None,
            agent: None,
            task: None,
            payload: Value::Null,
        }
    }

    #[must_use]
    pub fn node(kind: EventKind, node_id: impl Into<String>) -> Self {
        Self {
            kind,
            node_id: Some(node_id.into()),
            agent: None,
            task: None,
            payload: Value::Null,
        }
    }

    #[must_use]
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    #[must_use]
    pub fn with_agent(mut self, agent: impl Into<String>) -> Self {
        self.agent = Some(agent.into());
        self
    }

    #[must_use]
    pub fn with_task(mut self, task: impl Into<String>) -> Self {
        self.task = Some(task.into());
        self
    }
}

impl ExecutionEvent {
    /// Wire representation: RFC 3339 timestamp with millisecond precision
    /// and the dotted kind name, ready for SSE/WebSocket framing.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use nodeflow::event_bus::{EventDraft, EventKind, ExecutionEventHub};
    ///
    /// let hub = ExecutionEventHub::new("exec-1".into(), 16);
    /// hub.emit(EventDraft::execution(EventKind::ExecutionStarted)).unwrap();
    /// let event = hub.backlog().remove(0);
    /// let wire = event.to_wire_json();
    /// assert_eq!(wire["kind"], "execution.started");
    /// assert_eq!(wire["seq"], 0);
    /// ```
    #[must_use]
    pub fn to_wire_json(&self) -> Value {
        let mut obj = json!({
            "execution_id": self.execution_id,
            "seq": self.seq,
            "at": self.at.to_rfc3339_opts(SecondsFormat::Millis, true),
            "kind": self.kind.as_str(),
        });
        let map = obj.as_object_mut().expect("wire event is an object");
        if let Some(node_id) = &self.node_id {
            map.insert("node_id".into(), json!(node_id));
        }
        if let Some(agent) = &self.agent {
            map.insert("agent".into(), json!(agent));
        }
        if let Some(task) = &self.task {
            map.insert("task".into(), json!(task));
        }
        if !self.payload.is_null() {
            map.insert("payload".into(), self.payload.clone());
        }
        obj
    }
}

impl fmt::Display for ExecutionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.node_id {
            Some(node_id) => write!(f, "#{} {} [{}]", self.seq, self.kind, node_id),
            None => write!(f, "#{} {}", self.seq, self.kind),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_wire_names_round_trip_through_serde() {
        let kinds = [
            EventKind::ExecutionStarted,
            EventKind::NodeProgress,
            EventKind::RoutingCompleted,
            EventKind::SubToolCalled,
        ];
        for kind in kinds {
            let encoded = serde_json::to_string(&kind).unwrap();
            assert_eq!(encoded, format!("\"{}\"", kind.as_str()));
            let decoded: EventKind = serde_json::from_str(&encoded).unwrap();
            assert_eq!(decoded, kind);
        }
    }

    #[test]
    fn lifecycle_classification() {
        assert!(EventKind::ExecutionCancelled.is_lifecycle());
        assert!(EventKind::NodeFailed.is_lifecycle());
        assert!(!EventKind::NodeProgress.is_lifecycle());
        assert!(!EventKind::RoutingStarted.is_lifecycle());
        assert!(!EventKind::SubAgentThinking.is_lifecycle());
    }
}
