//! Workflow edges: directed transitions between nodes
//!
//! Edges connect nodes in the workflow graph. Outgoing edges of
//! condition and policy-check nodes carry a branch label so the engine
//! knows which edge to follow for each evaluation outcome; all other
//! edges are unlabeled.

use crate::definition::NodeId;
use serde::{Deserialize, Serialize};

/// An edge in the workflow graph
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    /// Source node
    pub from: NodeId,
    /// Target node
    pub to: NodeId,
    /// Branch label for condition/policy-check outgoing edges
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<Branch>,
}

impl Edge {
    /// Create an unlabeled edge
    pub fn new(from: NodeId, to: NodeId) -> Self {
        Self {
            from,
            to,
            branch: None,
        }
    }

    /// Create a branch-labeled edge
    pub fn branched(from: NodeId, to: NodeId, branch: Branch) -> Self {
        Self {
            from,
            to,
            branch: Some(branch),
        }
    }
}

/// Branch labels on outgoing edges.
///
/// `True`/`False` belong to condition nodes, `Pass`/`Fail` to
/// policy-check nodes. Exactly one labeled edge is taken per
/// evaluation — never both.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Branch {
    True,
    False,
    Pass,
    Fail,
}

impl std::fmt::Display for Branch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::True => write!(f, "true"),
            Self::False => write!(f, "false"),
            Self::Pass => write!(f, "pass"),
            Self::Fail => write!(f, "fail"),
        }
    }
}
