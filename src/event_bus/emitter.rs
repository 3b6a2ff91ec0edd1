//! Node-scoped event emission.

use std::sync::Arc;

use serde_json::Value;

use super::event::{EventDraft, EventKind};
use super::hub::ExecutionEventHub;

/// Emitter handed to a node through its execution context.
///
/// Scopes every emitted event to the owning node, so node authors cannot
/// forge lifecycle events or impersonate other nodes; the only kinds
/// reachable from here are `node.progress` and the `sub.*` family used by
/// multi-agent nodes.
#[derive(Clone)]
pub struct NodeEmitter {
    hub: Arc<ExecutionEventHub>,
    node_id: String,
}

impl NodeEmitter {
    #[must_use]
    pub fn new(hub: Arc<ExecutionEventHub>, node_id: String) -> Self {
        Self { hub, node_id }
    }

    /// Emit a `node.progress` event with an arbitrary payload.
    pub fn progress(&self, payload: Value) {
        self.emit(EventDraft::node(EventKind::NodeProgress, self.node_id.clone()).with_payload(payload));
    }

    /// Emit a `sub.agent_started` event for a named sub-agent.
    pub fn agent_started(&self, agent: impl Into<String>, task: impl Into<String>) {
        self.emit(
            EventDraft::node(EventKind::SubAgentStarted, self.node_id.clone())
                .with_agent(agent)
                .with_task(task),
        );
    }

    /// Emit a `sub.agent_thinking` event with an opaque payload.
    pub fn agent_thinking(&self, agent: impl Into<String>, payload: Value) {
        self.emit(
            EventDraft::node(EventKind::SubAgentThinking, self.node_id.clone())
                .with_agent(agent)
                .with_payload(payload),
        );
    }

    /// Emit a `sub.tool_called` event.
    pub fn tool_called(&self, agent: impl Into<String>, tool: impl Into<String>, payload: Value) {
        self.emit(
            EventDraft::node(EventKind::SubToolCalled, self.node_id.clone())
                .with_agent(agent)
                .with_task(tool)
                .with_payload(payload),
        );
    }

    /// Emit a `sub.agent_completed` event.
    pub fn agent_completed(&self, agent: impl Into<String>, payload: Value) {
        self.emit(
            EventDraft::node(EventKind::SubAgentCompleted, self.node_id.clone())
                .with_agent(agent)
                .with_payload(payload),
        );
    }

    fn emit(&self, draft: EventDraft) {
        // A closed hub means the execution is already terminal; late
        // progress from a straggling node has nowhere to go.
        if self.hub.emit(draft).is_err() {
            tracing::debug!(
                target: "nodeflow::event_bus",
                node_id = %self.node_id,
                "dropped event emitted after stream close"
            );
        }
    }
}
