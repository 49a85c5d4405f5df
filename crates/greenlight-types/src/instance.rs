//! Workflow instances: running executions of workflow definitions
//!
//! An instance tracks the frontier (`current_node_ids`) — the set of
//! node ids the execution is currently "at", one per live parallel
//! branch — plus fan-in arrival bookkeeping and the trigger payload.
//! There is no in-memory suspension: every wait is represented by this
//! row and its pending actions.

use crate::definition::{DefinitionId, NodeId};
use crate::tenant::{TenantId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Unique identifier for a workflow instance
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstanceId(pub String);

impl InstanceId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn short(&self) -> &str {
        &self.0[..8.min(self.0.len())]
    }
}

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle status of a workflow instance
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    /// Actively executing or suspended at approval nodes
    #[default]
    Running,
    /// Every branch reached completion
    Completed,
    /// A rejection decision (or failed policy check) aborted the run
    Rejected,
    /// Execution failed; frozen for operator inspection
    Error,
}

impl InstanceStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Rejected | Self::Error)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Rejected => "rejected",
            Self::Error => "error",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "rejected" => Some(Self::Rejected),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One running execution of a workflow definition
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkflowInstance {
    /// Unique instance identifier
    pub id: InstanceId,
    /// The definition this instance executes
    pub definition_id: DefinitionId,
    /// Owning tenant
    pub tenant_id: TenantId,
    /// Current status
    pub status: InstanceStatus,
    /// The frontier: node ids of live branches (suspended approvals)
    pub current_node_ids: BTreeSet<NodeId>,
    /// Fan-in bookkeeping: join node → predecessor nodes that arrived
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub arrivals: BTreeMap<NodeId, BTreeSet<NodeId>>,
    /// The payload of the triggering domain event
    pub trigger_payload: serde_json::Value,
    /// Execution error detail, set when status is `Error`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Who triggered the instance
    pub created_by: UserId,
    /// When the instance was created
    pub created_at: DateTime<Utc>,
    /// When the instance was last updated
    pub updated_at: DateTime<Utc>,
}

impl WorkflowInstance {
    /// Create a new running instance
    pub fn new(
        definition_id: DefinitionId,
        tenant_id: TenantId,
        created_by: UserId,
        trigger_payload: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: InstanceId::generate(),
            definition_id,
            tenant_id,
            status: InstanceStatus::Running,
            current_node_ids: BTreeSet::new(),
            arrivals: BTreeMap::new(),
            trigger_payload,
            error: None,
            created_by,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == InstanceStatus::Running
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Add a node to the frontier
    pub fn enter(&mut self, node_id: NodeId) {
        self.current_node_ids.insert(node_id);
        self.touch();
    }

    /// Remove a node from the frontier
    pub fn leave(&mut self, node_id: &NodeId) {
        self.current_node_ids.remove(node_id);
        self.touch();
    }

    /// Record that a branch arrived at a join node from `from`.
    /// Returns the number of distinct arrivals recorded so far.
    pub fn record_arrival(&mut self, join: NodeId, from: NodeId) -> usize {
        let entry = self.arrivals.entry(join).or_default();
        entry.insert(from);
        entry.len()
    }

    /// Arrivals recorded for a join node
    pub fn arrivals_for(&self, join: &NodeId) -> Option<&BTreeSet<NodeId>> {
        self.arrivals.get(join)
    }

    /// Clear arrival bookkeeping once a join has fired
    pub fn clear_arrivals(&mut self, join: &NodeId) {
        self.arrivals.remove(join);
    }

    /// Mark the instance completed; clears the frontier
    pub fn complete(&mut self) {
        self.status = InstanceStatus::Completed;
        self.current_node_ids.clear();
        self.arrivals.clear();
        self.touch();
    }

    /// Mark the instance rejected; clears the frontier
    pub fn reject(&mut self) {
        self.status = InstanceStatus::Rejected;
        self.current_node_ids.clear();
        self.arrivals.clear();
        self.touch();
    }

    /// Mark the instance errored, freezing the frontier at the failing
    /// node for operator inspection. Not cleared on purpose.
    pub fn fail(&mut self, node_id: NodeId, detail: impl Into<String>) {
        self.status = InstanceStatus::Error;
        self.error = Some(detail.into());
        self.current_node_ids.clear();
        self.current_node_ids.insert(node_id);
        self.touch();
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn make_instance() -> WorkflowInstance {
        WorkflowInstance::new(
            DefinitionId::new("def-1"),
            TenantId::new("acme"),
            UserId::new("emp-1"),
            json!({"days": 5}),
        )
    }

    #[test]
    fn test_new_instance() {
        let inst = make_instance();
        assert!(inst.is_running());
        assert!(!inst.is_terminal());
        assert!(inst.current_node_ids.is_empty());
        assert_eq!(inst.trigger_payload["days"], 5);
    }

    #[test]
    fn test_frontier() {
        let mut inst = make_instance();
        inst.enter(NodeId::new("approval-1"));
        inst.enter(NodeId::new("approval-2"));
        assert_eq!(inst.current_node_ids.len(), 2);

        inst.leave(&NodeId::new("approval-1"));
        assert_eq!(inst.current_node_ids.len(), 1);
    }

    #[test]
    fn test_complete_clears_frontier() {
        let mut inst = make_instance();
        inst.enter(NodeId::new("approval"));
        inst.complete();

        assert_eq!(inst.status, InstanceStatus::Completed);
        assert!(inst.is_terminal());
        assert!(inst.current_node_ids.is_empty());
    }

    #[test]
    fn test_reject_clears_frontier() {
        let mut inst = make_instance();
        inst.enter(NodeId::new("approval"));
        inst.record_arrival(NodeId::new("join"), NodeId::new("a"));
        inst.reject();

        assert_eq!(inst.status, InstanceStatus::Rejected);
        assert!(inst.current_node_ids.is_empty());
        assert!(inst.arrivals.is_empty());
    }

    #[test]
    fn test_fail_freezes_frontier_at_failing_node() {
        let mut inst = make_instance();
        inst.enter(NodeId::new("a"));
        inst.enter(NodeId::new("b"));
        inst.fail(NodeId::new("b"), "missing successor edge");

        assert_eq!(inst.status, InstanceStatus::Error);
        assert!(inst.is_terminal());
        assert_eq!(
            inst.current_node_ids.iter().collect::<Vec<_>>(),
            vec![&NodeId::new("b")]
        );
        assert_eq!(inst.error.as_deref(), Some("missing successor edge"));
    }

    #[test]
    fn test_arrival_bookkeeping() {
        let mut inst = make_instance();
        let join = NodeId::new("join");

        assert_eq!(inst.record_arrival(join.clone(), NodeId::new("a")), 1);
        assert_eq!(inst.record_arrival(join.clone(), NodeId::new("b")), 2);
        // Re-arrival from the same predecessor is not double-counted.
        assert_eq!(inst.record_arrival(join.clone(), NodeId::new("a")), 2);

        assert_eq!(inst.arrivals_for(&join).unwrap().len(), 2);
        inst.clear_arrivals(&join);
        assert!(inst.arrivals_for(&join).is_none());
    }

    #[test]
    fn test_status_roundtrip() {
        for status in [
            InstanceStatus::Running,
            InstanceStatus::Completed,
            InstanceStatus::Rejected,
            InstanceStatus::Error,
        ] {
            assert_eq!(InstanceStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(InstanceStatus::parse("paused"), None);
    }
}
