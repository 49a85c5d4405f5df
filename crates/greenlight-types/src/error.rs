//! Workflow error types and structural violations

use crate::action::ActionId;
use crate::definition::{DefinitionId, NodeId};
use crate::instance::InstanceId;
use serde::Serialize;

/// Result type alias for workflow operations
pub type WorkflowResult<T> = Result<T, WorkflowError>;

/// A structural violation found while validating a definition.
///
/// Validation collects every violation so the graph editor can show
/// them all at once; publish is blocked until the list is empty.
#[derive(Clone, Debug, PartialEq, Serialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Violation {
    #[error("workflow has no trigger node")]
    NoTriggerNode,

    #[error("workflow has {count} trigger nodes, expected exactly one")]
    MultipleTriggerNodes { count: usize },

    #[error("duplicate node id '{node}'")]
    DuplicateNode { node: NodeId },

    #[error("edge references unknown source node '{node}'")]
    UnknownEdgeSource { node: NodeId },

    #[error("edge references unknown target node '{node}'")]
    UnknownEdgeTarget { node: NodeId },

    #[error("edge from '{from}' targets the trigger node")]
    EdgeIntoTrigger { from: NodeId },

    #[error("node '{node}' is not reachable from the trigger")]
    UnreachableNode { node: NodeId },

    #[error("condition node '{node}' must have exactly one true edge and one false edge")]
    ConditionBranches { node: NodeId },

    #[error("policy check node '{node}' has no pass edge")]
    MissingPassEdge { node: NodeId },

    #[error("parallel node '{node}' has {outgoing} outgoing edges, expected at least two")]
    ParallelFanOut { node: NodeId, outgoing: usize },

    #[error("rule on node '{node}' does not parse: {message}")]
    InvalidRule { node: NodeId, message: String },
}

/// Errors from workflow domain operations
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("duplicate node id '{0}'")]
    DuplicateNodeId(NodeId),

    #[error("node '{0}' not found")]
    NodeNotFound(NodeId),

    #[error("duplicate edge {from} -> {to}")]
    DuplicateEdge { from: NodeId, to: NodeId },

    #[error("workflow definition '{0}' not found")]
    DefinitionNotFound(DefinitionId),

    #[error("workflow definition '{0}' is not published")]
    NotPublished(DefinitionId),

    #[error("workflow definition '{0}' is published and immutable")]
    Immutable(DefinitionId),

    #[error("workflow definition is invalid: {}", summarize(.0))]
    Invalid(Vec<Violation>),

    #[error("workflow instance '{0}' not found")]
    InstanceNotFound(InstanceId),

    #[error("workflow instance '{0}' is already terminal")]
    InstanceTerminal(InstanceId),

    #[error("workflow action '{0}' not found")]
    ActionNotFound(ActionId),

    #[error("execution failed at node '{node}': {detail}")]
    Execution { node: NodeId, detail: String },
}

fn summarize(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
