//! Per-execution mutable state and the immutable snapshots observers see.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::node::NodeError;
use crate::types::{Cost, ExecutionStatus, NodeStatus, TokenUsage};

/// Serialisable error description carried in snapshots and events.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub kind: String,
    pub message: String,
}

impl ErrorInfo {
    #[must_use]
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

impl From<&NodeError> for ErrorInfo {
    fn from(err: &NodeError) -> Self {
        Self::new(err.kind(), err.to_string())
    }
}

/// Live state of one node within an execution.
#[derive(Clone, Debug)]
pub struct NodeRunState {
    pub status: NodeStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cost: Cost,
    pub tokens: TokenUsage,
    pub error: Option<ErrorInfo>,
    /// Execute attempts, including retries.
    pub attempts: u32,
}

impl NodeRunState {
    fn new() -> Self {
        Self {
            status: NodeStatus::Pending,
            started_at: None,
            completed_at: None,
            cost: Cost::ZERO,
            tokens: TokenUsage::default(),
            error: None,
            attempts: 0,
        }
    }
}

/// The single shared mutable record of one execution.
///
/// Exclusively owned by the scheduler behind one mutex; workers take the
/// lock only to read predecessor outputs and to publish their own
/// completion. No I/O happens under the lock. Observers only ever receive
/// [`ExecutionSnapshot`]s.
#[derive(Debug)]
pub struct ExecutionState {
    pub execution_id: String,
    pub workflow_id: String,
    pub user_id: Option<String>,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub nodes: FxHashMap<String, NodeRunState>,
    /// Published outputs per completed node. Written at most once per node
    /// and immutable afterwards; routers clone the `Arc`, never the map.
    pub outputs: FxHashMap<String, Arc<FxHashMap<String, Value>>>,
    pub total_cost: Cost,
    pub total_tokens: TokenUsage,
    pub error: Option<ErrorInfo>,
    /// Set when an external cancel request arrived.
    pub cancel_requested: bool,
}

impl ExecutionState {
    #[must_use]
    pub fn new(
        execution_id: String,
        workflow_id: String,
        user_id: Option<String>,
        node_ids: impl IntoIterator<Item = String>,
    ) -> Self {
        let nodes = node_ids
            .into_iter()
            .map(|id| (id, NodeRunState::new()))
            .collect();
        Self {
            execution_id,
            workflow_id,
            user_id,
            status: ExecutionStatus::Pending,
            started_at: Utc::now(),
            completed_at: None,
            nodes,
            outputs: FxHashMap::default(),
            total_cost: Cost::ZERO,
            total_tokens: TokenUsage::default(),
            error: None,
            cancel_requested: false,
        }
    }

    /// Publish a node's outputs. Enforces the at-most-once invariant.
    pub fn publish_output(
        &mut self,
        node_id: &str,
        outputs: FxHashMap<String, Value>,
    ) -> Result<(), String> {
        if self.outputs.contains_key(node_id) {
            return Err(format!("outputs for node {node_id} published twice"));
        }
        self.outputs.insert(node_id.to_string(), Arc::new(outputs));
        Ok(())
    }

    /// Immutable copy for observers. Node entries are sorted by id so two
    /// identical executions produce identical snapshots.
    #[must_use]
    pub fn snapshot(&self) -> ExecutionSnapshot {
        let mut nodes: Vec<NodeSnapshot> = self
            .nodes
            .iter()
            .map(|(node_id, state)| NodeSnapshot {
                node_id: node_id.clone(),
                status: state.status,
                started_at: state.started_at,
                completed_at: state.completed_at,
                cost: state.cost,
                tokens: state.tokens,
                error: state.error.clone(),
            })
            .collect();
        nodes.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        ExecutionSnapshot {
            execution_id: self.execution_id.clone(),
            workflow_id: self.workflow_id.clone(),
            status: self.status,
            started_at: self.started_at,
            completed_at: self.completed_at,
            total_cost: self.total_cost,
            total_tokens: self.total_tokens,
            nodes,
            error: self.error.clone(),
        }
    }
}

/// Immutable view of one node's progress.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub node_id: String,
    pub status: NodeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub cost: Cost,
    pub tokens: TokenUsage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

/// Immutable view of a whole execution, as returned to transports.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecutionSnapshot {
    pub execution_id: String,
    pub workflow_id: String,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub total_cost: Cost,
    pub total_tokens: TokenUsage,
    pub nodes: Vec<NodeSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

impl ExecutionSnapshot {
    /// Node entry by id.
    #[must_use]
    pub fn node(&self, node_id: &str) -> Option<&NodeSnapshot> {
        self.nodes.iter().find(|n| n.node_id == node_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn outputs_publish_at_most_once() {
        let mut state = ExecutionState::new(
            "exec".into(),
            "wf".into(),
            None,
            ["a".to_string()],
        );
        let mut outputs = FxHashMap::default();
        outputs.insert("text".to_string(), json!("hi"));
        state.publish_output("a", outputs.clone()).unwrap();
        assert!(state.publish_output("a", outputs).is_err());
    }

    #[test]
    fn snapshot_sorts_nodes_by_id() {
        let state = ExecutionState::new(
            "exec".into(),
            "wf".into(),
            None,
            ["c".to_string(), "a".to_string(), "b".to_string()],
        );
        let snapshot = state.snapshot();
        let ids: Vec<&str> = snapshot.nodes.iter().map(|n| n.node_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }
}
