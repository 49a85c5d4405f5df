//! Workflow definitions: tenant-scoped approval graphs
//!
//! A WorkflowDefinition is a directed graph where nodes are typed
//! execution steps (trigger, policy check, approval, ...) and edges are
//! transitions. Definitions are immutable once published — edits create
//! a new version.

use crate::action::{Decision, SlaPolicy};
use crate::edge::{Branch, Edge};
use crate::tenant::{TenantId, UserId};
use crate::{Violation, WorkflowError, WorkflowResult};
use chrono::{DateTime, Utc};
use greenlight_rules::Rule;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

// ── Identifiers ──────────────────────────────────────────────────────

/// Unique identifier for a workflow definition
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DefinitionId(pub String);

impl DefinitionId {
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

impl std::fmt::Display for DefinitionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a workflow node
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Definition Status ────────────────────────────────────────────────

/// Lifecycle status of a definition
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DefinitionStatus {
    /// Freely editable, cannot be instantiated
    #[default]
    Draft,
    /// Immutable, instantiable
    Published,
}

impl DefinitionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Published => "published",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "draft" => Some(Self::Draft),
            "published" => Some(Self::Published),
            _ => None,
        }
    }
}

// ── Node ─────────────────────────────────────────────────────────────

/// A node in the workflow graph
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Unique identifier within this workflow
    pub id: NodeId,
    /// Human-readable label shown in the graph editor
    #[serde(default)]
    pub label: String,
    /// Node type and its configuration
    #[serde(flatten)]
    pub kind: NodeKind,
}

impl Node {
    pub fn new(id: impl Into<String>, label: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            id: NodeId::new(id),
            label: label.into(),
            kind,
        }
    }

    /// Create a trigger node
    pub fn trigger(id: impl Into<String>, event: impl Into<String>) -> Self {
        let event = event.into();
        Self::new(
            id,
            format!("On {}", event),
            NodeKind::Trigger { event },
        )
    }

    /// Create an approval node bound to a role
    pub fn approval(id: impl Into<String>, approver_role: impl Into<String>) -> Self {
        let role = approver_role.into();
        Self::new(
            id,
            format!("{} approval", role),
            NodeKind::Approval {
                approver_role: role,
                sla: None,
            },
        )
    }

    /// Create a policy-check node
    pub fn policy_check(id: impl Into<String>, rule: impl Into<String>) -> Self {
        Self::new(id, "Policy check", NodeKind::PolicyCheck { rule: rule.into() })
    }

    /// Create a condition node
    pub fn condition(id: impl Into<String>, rule: impl Into<String>) -> Self {
        Self::new(id, "Condition", NodeKind::Condition { rule: rule.into() })
    }

    /// Create a parallel fan-out node
    pub fn parallel(id: impl Into<String>) -> Self {
        Self::new(id, "Parallel", NodeKind::Parallel)
    }

    /// Create a completion node
    pub fn complete(id: impl Into<String>) -> Self {
        Self::new(id, "Complete", NodeKind::Complete)
    }

    /// Create a notification node
    pub fn notify(id: impl Into<String>, template: impl Into<String>) -> Self {
        Self::new(
            id,
            "Notify",
            NodeKind::Notify {
                template: template.into(),
                recipient_role: None,
            },
        )
    }

    /// Create an escalation marker node
    pub fn escalate(id: impl Into<String>, after_days: u32, default_decision: Decision) -> Self {
        Self::new(
            id,
            format!("Escalate after {} days", after_days),
            NodeKind::Escalate {
                after_days,
                default_decision,
            },
        )
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Attach an SLA snapshot to an approval node (no-op on other kinds)
    pub fn with_sla(mut self, policy: SlaPolicy) -> Self {
        if let NodeKind::Approval { sla, .. } = &mut self.kind {
            *sla = Some(policy);
        }
        self
    }
}

/// The type of a workflow node, with per-variant configuration.
///
/// Dispatch in the execution engine matches on this enum, so a new
/// node type cannot be added without the stepping logic handling it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "config", rename_all = "snake_case")]
pub enum NodeKind {
    /// The entry point; fires when the named domain event occurs
    Trigger { event: String },
    /// Evaluates a rule against the trigger payload; follows the pass
    /// or fail edge
    PolicyCheck { rule: String },
    /// Suspends the branch until a member of `approver_role` decides
    Approval {
        approver_role: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sla: Option<SlaPolicy>,
    },
    /// Sends a notification and continues
    Notify {
        template: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        recipient_role: Option<String>,
    },
    /// Creates a task for a role and continues
    AssignTask { task: String, assignee_role: String },
    /// Writes an audit entry and continues
    AuditLog { message: String },
    /// Renders a document and continues
    GenerateDoc { template: String },
    /// Updates the status of a domain entity and continues
    UpdateStatus { entity: String, status: String },
    /// Annotates the preceding approval with an SLA deadline; never
    /// executed as a step
    Escalate {
        after_days: u32,
        #[serde(default)]
        default_decision: Decision,
    },
    /// Evaluates a rule; follows the true or false edge
    Condition { rule: String },
    /// Fans out one branch per outgoing edge
    Parallel,
    /// Terminates a branch; the instance completes when every branch
    /// has terminated
    Complete,
}

impl NodeKind {
    /// Stable lowercase name, used for audit rows and action records
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Trigger { .. } => "trigger",
            Self::PolicyCheck { .. } => "policy_check",
            Self::Approval { .. } => "approval",
            Self::Notify { .. } => "notify",
            Self::AssignTask { .. } => "assign_task",
            Self::AuditLog { .. } => "audit_log",
            Self::GenerateDoc { .. } => "generate_doc",
            Self::UpdateStatus { .. } => "update_status",
            Self::Escalate { .. } => "escalate",
            Self::Condition { .. } => "condition",
            Self::Parallel => "parallel",
            Self::Complete => "complete",
        }
    }

    /// Does reaching this node suspend the branch?
    pub fn is_suspending(&self) -> bool {
        matches!(self, Self::Approval { .. })
    }

    /// The rule text carried by this node, if any
    pub fn rule(&self) -> Option<&str> {
        match self {
            Self::PolicyCheck { rule } | Self::Condition { rule } => Some(rule),
            _ => None,
        }
    }
}

// ── Workflow Definition ──────────────────────────────────────────────

/// A workflow definition — an immutable, versioned approval graph
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Unique identifier
    pub id: DefinitionId,
    /// Owning tenant
    pub tenant_id: TenantId,
    /// Human-readable name
    pub name: String,
    /// Description of what this workflow automates
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// Lifecycle status
    pub status: DefinitionStatus,
    /// Version, bumped on each published edit
    pub version: u32,
    /// The nodes of the graph
    pub nodes: Vec<Node>,
    /// The edges of the graph
    pub edges: Vec<Edge>,
    /// Who authored this definition
    pub created_by: UserId,
    /// When this definition was created
    pub created_at: DateTime<Utc>,
}

impl WorkflowDefinition {
    /// Create a new draft definition
    pub fn new(tenant_id: TenantId, name: impl Into<String>, created_by: UserId) -> Self {
        Self {
            id: DefinitionId::generate(),
            tenant_id,
            name: name.into(),
            description: String::new(),
            status: DefinitionStatus::Draft,
            version: 1,
            nodes: Vec::new(),
            edges: Vec::new(),
            created_by,
            created_at: Utc::now(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Add a node to the graph
    pub fn add_node(&mut self, node: Node) -> WorkflowResult<()> {
        if self.status == DefinitionStatus::Published {
            return Err(WorkflowError::Immutable(self.id.clone()));
        }
        if self.nodes.iter().any(|n| n.id == node.id) {
            return Err(WorkflowError::DuplicateNodeId(node.id));
        }
        self.nodes.push(node);
        Ok(())
    }

    /// Add an edge to the graph
    pub fn add_edge(&mut self, edge: Edge) -> WorkflowResult<()> {
        if self.status == DefinitionStatus::Published {
            return Err(WorkflowError::Immutable(self.id.clone()));
        }
        if !self.nodes.iter().any(|n| n.id == edge.from) {
            return Err(WorkflowError::NodeNotFound(edge.from));
        }
        if !self.nodes.iter().any(|n| n.id == edge.to) {
            return Err(WorkflowError::NodeNotFound(edge.to));
        }
        if self
            .edges
            .iter()
            .any(|e| e.from == edge.from && e.to == edge.to)
        {
            return Err(WorkflowError::DuplicateEdge {
                from: edge.from,
                to: edge.to,
            });
        }
        self.edges.push(edge);
        Ok(())
    }

    /// Get a node by ID
    pub fn get_node(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.iter().find(|n| &n.id == id)
    }

    /// The single trigger node, if present
    pub fn trigger_node(&self) -> Option<&Node> {
        self.nodes
            .iter()
            .find(|n| matches!(n.kind, NodeKind::Trigger { .. }))
    }

    /// Outgoing edges from a node
    pub fn outgoing_edges(&self, node_id: &NodeId) -> Vec<&Edge> {
        self.edges.iter().filter(|e| &e.from == node_id).collect()
    }

    /// Incoming edges to a node
    pub fn incoming_edges(&self, node_id: &NodeId) -> Vec<&Edge> {
        self.edges.iter().filter(|e| &e.to == node_id).collect()
    }

    /// The outgoing edge carrying a specific branch label
    pub fn branch_edge(&self, node_id: &NodeId, branch: Branch) -> Option<&Edge> {
        self.edges
            .iter()
            .find(|e| &e.from == node_id && e.branch == Some(branch))
    }

    /// Find all nodes reachable from a given node via BFS
    pub fn reachable_from(&self, start: &NodeId) -> HashSet<NodeId> {
        let mut visited = HashSet::new();
        let mut queue = vec![start.clone()];

        while let Some(current) = queue.pop() {
            if visited.insert(current.clone()) {
                for edge in self.outgoing_edges(&current) {
                    if !visited.contains(&edge.to) {
                        queue.push(edge.to.clone());
                    }
                }
            }
        }

        visited
    }

    /// Validate the definition for structural correctness.
    ///
    /// Collects every violation rather than stopping at the first, so
    /// the graph editor can show them all at once. An empty list means
    /// the definition may be published.
    pub fn validate(&self) -> Vec<Violation> {
        let mut violations = Vec::new();

        // Exactly one trigger node
        let trigger_count = self
            .nodes
            .iter()
            .filter(|n| matches!(n.kind, NodeKind::Trigger { .. }))
            .count();
        match trigger_count {
            0 => violations.push(Violation::NoTriggerNode),
            1 => {}
            count => violations.push(Violation::MultipleTriggerNodes { count }),
        }

        // Unique node ids
        let mut seen = HashSet::new();
        for node in &self.nodes {
            if !seen.insert(&node.id) {
                violations.push(Violation::DuplicateNode {
                    node: node.id.clone(),
                });
            }
        }

        // Edge endpoints exist; no edge may target the trigger
        for edge in &self.edges {
            if self.get_node(&edge.from).is_none() {
                violations.push(Violation::UnknownEdgeSource {
                    node: edge.from.clone(),
                });
            }
            match self.get_node(&edge.to) {
                None => violations.push(Violation::UnknownEdgeTarget {
                    node: edge.to.clone(),
                }),
                Some(target) if matches!(target.kind, NodeKind::Trigger { .. }) => {
                    violations.push(Violation::EdgeIntoTrigger {
                        from: edge.from.clone(),
                    });
                }
                Some(_) => {}
            }
        }

        // Every node reachable from the trigger
        if trigger_count == 1 {
            if let Some(trigger) = self.trigger_node() {
                let reachable = self.reachable_from(&trigger.id);
                for node in &self.nodes {
                    if !reachable.contains(&node.id) {
                        violations.push(Violation::UnreachableNode {
                            node: node.id.clone(),
                        });
                    }
                }
            }
        }

        // Per-kind structural rules
        for node in &self.nodes {
            let outgoing = self.outgoing_edges(&node.id);
            match &node.kind {
                NodeKind::Condition { .. } => {
                    let has_true = outgoing.iter().any(|e| e.branch == Some(Branch::True));
                    let has_false = outgoing.iter().any(|e| e.branch == Some(Branch::False));
                    if outgoing.len() != 2 || !has_true || !has_false {
                        violations.push(Violation::ConditionBranches {
                            node: node.id.clone(),
                        });
                    }
                }
                NodeKind::PolicyCheck { .. } => {
                    if !outgoing.iter().any(|e| e.branch == Some(Branch::Pass)) {
                        violations.push(Violation::MissingPassEdge {
                            node: node.id.clone(),
                        });
                    }
                }
                NodeKind::Parallel => {
                    if outgoing.len() < 2 {
                        violations.push(Violation::ParallelFanOut {
                            node: node.id.clone(),
                            outgoing: outgoing.len(),
                        });
                    }
                }
                _ => {}
            }

            // Rules must parse
            if let Some(rule) = node.kind.rule() {
                if let Err(err) = Rule::parse(rule) {
                    violations.push(Violation::InvalidRule {
                        node: node.id.clone(),
                        message: err.to_string(),
                    });
                }
            }
        }

        violations
    }

    /// Publish the definition, freezing it. Fails with the full
    /// violation list while the graph is structurally invalid.
    pub fn publish(&mut self) -> WorkflowResult<()> {
        if self.status == DefinitionStatus::Published {
            return Err(WorkflowError::Immutable(self.id.clone()));
        }
        let violations = self.validate();
        if !violations.is_empty() {
            return Err(WorkflowError::Invalid(violations));
        }
        self.status = DefinitionStatus::Published;
        Ok(())
    }

    /// Derive a new editable draft from this definition
    pub fn new_version(&self) -> Self {
        let mut next = self.clone();
        next.id = DefinitionId::generate();
        next.status = DefinitionStatus::Draft;
        next.version = self.version + 1;
        next.created_at = Utc::now();
        next
    }

    /// Total number of nodes
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Total number of edges
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }
}
