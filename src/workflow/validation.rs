//! Structural validation and topology extraction.
//!
//! [`validate`] runs before any node does: it checks node ids, edge
//! endpoints, node types, handle names, and acyclicity, and produces the
//! [`Topology`] the scheduler and router drive execution from. Validation
//! is pure: no events, no spans, no state.

use miette::Diagnostic;
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::VecDeque;
use thiserror::Error;

use super::{Edge, Workflow};
use crate::registry::NodeRegistry;

/// Why a workflow failed validation.
#[derive(Debug, Error, Diagnostic)]
pub enum ValidationError {
    #[error("duplicate node id: {node_id}")]
    #[diagnostic(code(nodeflow::workflow::duplicate_node_id))]
    DuplicateNodeId { node_id: String },

    #[error("edge {edge_id} references missing node: {node_id}")]
    #[diagnostic(code(nodeflow::workflow::missing_endpoint))]
    MissingEndpoint { edge_id: String, node_id: String },

    #[error("node {node_id} has unknown type: {node_type}")]
    #[diagnostic(
        code(nodeflow::workflow::unknown_node_type),
        help("Register the node type before loading workflows that use it.")
    )]
    UnknownNodeType { node_id: String, node_type: String },

    #[error("edge {edge_id}: source handle `{handle}` is not an output of {node_id}")]
    #[diagnostic(code(nodeflow::workflow::unknown_source_handle))]
    UnknownSourceHandle {
        edge_id: String,
        node_id: String,
        handle: String,
    },

    #[error("edge {edge_id}: target handle `{handle}` is not an input of {node_id}")]
    #[diagnostic(code(nodeflow::workflow::unknown_target_handle))]
    UnknownTargetHandle {
        edge_id: String,
        node_id: String,
        handle: String,
    },

    #[error("workflow contains a cycle")]
    #[diagnostic(
        code(nodeflow::workflow::cyclic_graph),
        help("Workflows must be acyclic; remove the back edge.")
    )]
    CyclicGraph,

    #[error("designated entry node does not exist: {node_id}")]
    #[diagnostic(code(nodeflow::workflow::unknown_entry))]
    UnknownEntryNode { node_id: String },
}

/// The validated shape of a workflow, in the form execution needs it:
/// adjacency, a topological order, entry points, and the reachable set.
#[derive(Debug)]
pub struct Topology {
    /// All node ids in one valid topological order.
    pub order: Vec<String>,
    /// Incoming edge indices (into `workflow.edges`) per node, in edge
    /// declaration order.
    pub incoming: FxHashMap<String, Vec<usize>>,
    /// Outgoing edge indices per node, in edge declaration order.
    pub outgoing: FxHashMap<String, Vec<usize>>,
    /// Entry points execution starts from.
    pub entries: Vec<String>,
    /// Nodes reachable from the entries; the rest are skipped.
    pub reachable: FxHashSet<String>,
}

impl Topology {
    /// Distinct predecessor ids of `node_id`, in edge order.
    #[must_use]
    pub fn predecessors<'a>(&self, workflow: &'a Workflow, node_id: &str) -> Vec<&'a str> {
        let mut seen = FxHashSet::default();
        let mut out = Vec::new();
        for &edge_idx in self.incoming.get(node_id).map_or(&[][..], Vec::as_slice) {
            let source = workflow.edges[edge_idx].source_node_id.as_str();
            if seen.insert(source) {
                out.push(source);
            }
        }
        out
    }

    /// Distinct successor ids of `node_id`, in edge order.
    #[must_use]
    pub fn successors<'a>(&self, workflow: &'a Workflow, node_id: &str) -> Vec<&'a str> {
        let mut seen = FxHashSet::default();
        let mut out = Vec::new();
        for &edge_idx in self.outgoing.get(node_id).map_or(&[][..], Vec::as_slice) {
            let target = workflow.edges[edge_idx].target_node_id.as_str();
            if seen.insert(target) {
                out.push(target);
            }
        }
        out
    }

    /// All ancestors of `node_id` (transitive predecessors), returned in
    /// topological order for deterministic iteration.
    #[must_use]
    pub fn ancestors(&self, workflow: &Workflow, node_id: &str) -> Vec<String> {
        let mut seen: FxHashSet<String> = FxHashSet::default();
        let mut queue: VecDeque<&str> = self
            .predecessors(workflow, node_id)
            .into_iter()
            .collect();
        while let Some(current) = queue.pop_front() {
            if !seen.insert(current.to_string()) {
                continue;
            }
            for pred in self.predecessors(workflow, current) {
                queue.push_back(pred);
            }
        }
        self.order
            .iter()
            .filter(|id| seen.contains(*id))
            .cloned()
            .collect()
    }

    /// Incoming edges of `node_id`, in declaration order.
    #[must_use]
    pub fn incoming_edges<'a>(&self, workflow: &'a Workflow, node_id: &str) -> Vec<&'a Edge> {
        self.incoming
            .get(node_id)
            .map_or(&[][..], Vec::as_slice)
            .iter()
            .map(|&idx| &workflow.edges[idx])
            .collect()
    }
}

/// Validate a workflow against the registry and extract its topology.
///
/// `entry_override` restricts execution to the given entry nodes; by
/// default every node without incoming edges is an entry. Nodes not
/// reachable from the entries stay in the topology but are flagged for
/// skipping.
pub fn validate(
    workflow: &Workflow,
    registry: &NodeRegistry,
    entry_override: Option<&[String]>,
) -> Result<Topology, ValidationError> {
    // Unique node ids.
    let mut node_ids: FxHashSet<&str> = FxHashSet::default();
    for node in &workflow.nodes {
        if !node_ids.insert(node.id.as_str()) {
            return Err(ValidationError::DuplicateNodeId {
                node_id: node.id.clone(),
            });
        }
    }

    // Every node type must be registered.
    for node in &workflow.nodes {
        if !registry.contains(&node.node_type) {
            return Err(ValidationError::UnknownNodeType {
                node_id: node.id.clone(),
                node_type: node.node_type.clone(),
            });
        }
    }

    // Edge endpoints and handle names.
    let mut incoming: FxHashMap<String, Vec<usize>> = FxHashMap::default();
    let mut outgoing: FxHashMap<String, Vec<usize>> = FxHashMap::default();
    for node in &workflow.nodes {
        incoming.insert(node.id.clone(), Vec::new());
        outgoing.insert(node.id.clone(), Vec::new());
    }
    for (idx, edge) in workflow.edges.iter().enumerate() {
        for endpoint in [&edge.source_node_id, &edge.target_node_id] {
            if !node_ids.contains(endpoint.as_str()) {
                return Err(ValidationError::MissingEndpoint {
                    edge_id: edge.id.clone(),
                    node_id: endpoint.clone(),
                });
            }
        }
        if let Some(handle) = &edge.source_handle {
            let source = workflow.node(&edge.source_node_id).expect("endpoint checked");
            let descriptor = registry
                .descriptor(&source.node_type)
                .expect("type checked");
            if !descriptor.has_output_field(handle) {
                return Err(ValidationError::UnknownSourceHandle {
                    edge_id: edge.id.clone(),
                    node_id: source.id.clone(),
                    handle: handle.clone(),
                });
            }
        }
        if let Some(handle) = &edge.target_handle {
            let target = workflow.node(&edge.target_node_id).expect("endpoint checked");
            let descriptor = registry
                .descriptor(&target.node_type)
                .expect("type checked");
            if !descriptor.has_input_field(handle) {
                return Err(ValidationError::UnknownTargetHandle {
                    edge_id: edge.id.clone(),
                    node_id: target.id.clone(),
                    handle: handle.clone(),
                });
            }
        }
        outgoing
            .get_mut(&edge.source_node_id)
            .expect("initialised above")
            .push(idx);
        incoming
            .get_mut(&edge.target_node_id)
            .expect("initialised above")
            .push(idx);
    }

    // Kahn's algorithm: topological order, or a cycle.
    let mut indegree: FxHashMap<&str, usize> = workflow
        .nodes
        .iter()
        .map(|n| (n.id.as_str(), incoming[&n.id].len()))
        .collect();
    let mut queue: VecDeque<&str> = workflow
        .nodes
        .iter()
        .map(|n| n.id.as_str())
        .filter(|id| indegree[id] == 0)
        .collect();
    let mut order: Vec<String> = Vec::with_capacity(workflow.nodes.len());
    while let Some(current) = queue.pop_front() {
        order.push(current.to_string());
        for &edge_idx in &outgoing[current] {
            let target = workflow.edges[edge_idx].target_node_id.as_str();
            let remaining = indegree.get_mut(target).expect("initialised above");
            *remaining -= 1;
            if *remaining == 0 {
                queue.push_back(target);
            }
        }
    }
    if order.len() != workflow.nodes.len() {
        return Err(ValidationError::CyclicGraph);
    }

    // Entry points: explicit override, or every source node.
    let entries: Vec<String> = match entry_override {
        Some(ids) => {
            for id in ids {
                if !node_ids.contains(id.as_str()) {
                    return Err(ValidationError::UnknownEntryNode {
                        node_id: id.clone(),
                    });
                }
            }
            ids.to_vec()
        }
        None => workflow
            .nodes
            .iter()
            .filter(|n| incoming[&n.id].is_empty())
            .map(|n| n.id.clone())
            .collect(),
    };

    // Forward reachability from the entries.
    let mut reachable: FxHashSet<String> = FxHashSet::default();
    let mut queue: VecDeque<&str> = entries.iter().map(String::as_str).collect();
    while let Some(current) = queue.pop_front() {
        if !reachable.insert(current.to_string()) {
            continue;
        }
        for &edge_idx in &outgoing[current] {
            queue.push_back(workflow.edges[edge_idx].target_node_id.as_str());
        }
    }

    Ok(Topology {
        order,
        incoming,
        outgoing,
        entries,
        reachable,
    })
}
