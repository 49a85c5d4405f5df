//! Workflow actions: durable suspension records
//!
//! An action is created when execution reaches an approval node and is
//! the unit of suspension/resumption: "waiting for a human" is a
//! `pending` row, not a blocked task. An action is mutated exactly once
//! — by a human decision, by the SLA sweeper, or by instance-level
//! supersession — and never deleted.

use crate::definition::NodeId;
use crate::instance::InstanceId;
use crate::tenant::{TenantId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for a workflow action
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActionId(pub String);

impl ActionId {
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

impl std::fmt::Display for ActionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle status of an action
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    /// Waiting for a decision
    #[default]
    Pending,
    /// Approved by a human or the SLA sweeper
    Approved,
    /// Rejected by a human, the SLA sweeper, or supersession
    Rejected,
}

impl ActionStatus {
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

impl std::fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A decision on a pending action
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    #[default]
    Approved,
    Rejected,
}

impl Decision {
    pub fn to_status(self) -> ActionStatus {
        match self {
            Self::Approved => ActionStatus::Approved,
            Self::Rejected => ActionStatus::Rejected,
        }
    }
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Approved => write!(f, "approved"),
            Self::Rejected => write!(f, "rejected"),
        }
    }
}

/// SLA policy snapshot.
///
/// Copied onto the action at creation time so later policy edits cannot
/// retroactively change escalation behavior for in-flight instances.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SlaPolicy {
    /// Days a pending action may wait before auto-resolution
    pub auto_approve_days: u32,
    /// The decision applied on SLA breach
    #[serde(default)]
    pub default_decision: Decision,
}

impl SlaPolicy {
    pub fn auto_approve(days: u32) -> Self {
        Self {
            auto_approve_days: days,
            default_decision: Decision::Approved,
        }
    }
}

/// A durable record of a node execution awaiting a decision
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkflowAction {
    /// Unique action identifier
    pub id: ActionId,
    /// The instance this action belongs to
    pub instance_id: InstanceId,
    /// Owning tenant
    pub tenant_id: TenantId,
    /// The node this action suspended at
    pub node_id: NodeId,
    /// Kind of the node ("approval")
    pub node_type: String,
    /// The role whose members may decide
    pub assignee_role: String,
    /// A specific user the action was routed to, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignee_user_id: Option<UserId>,
    /// Current status
    pub status: ActionStatus,
    /// Why the decision was made
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision_reason: Option<String>,
    /// Who decided; `None` for system/auto resolutions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decided_by: Option<UserId>,
    /// When the decision was made
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decided_at: Option<DateTime<Utc>>,
    /// When the SLA sweeper should auto-resolve this action
    #[serde(skip_serializing_if = "Option::is_none")]
    pub escalate_at: Option<DateTime<Utc>>,
    /// SLA snapshot taken at creation time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sla: Option<SlaPolicy>,
    /// When the action was created
    pub created_at: DateTime<Utc>,
}

impl WorkflowAction {
    /// Create a pending action for an approval node
    pub fn pending(
        instance_id: InstanceId,
        tenant_id: TenantId,
        node_id: NodeId,
        assignee_role: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ActionId::generate(),
            instance_id,
            tenant_id,
            node_id,
            node_type: "approval".to_string(),
            assignee_role: assignee_role.into(),
            assignee_user_id: None,
            status: ActionStatus::Pending,
            decision_reason: None,
            decided_by: None,
            decided_at: None,
            escalate_at: None,
            sla: None,
            created_at,
        }
    }

    /// Attach an SLA snapshot and the concrete deadline derived from it
    pub fn with_sla(mut self, sla: SlaPolicy, escalate_at: DateTime<Utc>) -> Self {
        self.sla = Some(sla);
        self.escalate_at = Some(escalate_at);
        self
    }

    pub fn with_assignee(mut self, user: UserId) -> Self {
        self.assignee_user_id = Some(user);
        self
    }

    pub fn is_pending(&self) -> bool {
        self.status.is_pending()
    }

    /// Apply a decision's fields in place.
    ///
    /// This is bookkeeping only — the authoritative pending→resolved
    /// transition is the store's conditional update.
    pub fn resolve(
        &mut self,
        status: ActionStatus,
        decided_by: Option<UserId>,
        reason: Option<String>,
        decided_at: DateTime<Utc>,
    ) {
        self.status = status;
        self.decided_by = decided_by;
        self.decision_reason = reason;
        self.decided_at = Some(decided_at);
    }
}
