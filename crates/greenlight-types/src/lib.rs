//! Workflow domain types for Greenlight
//!
//! Greenlight routes HR events (leave requests, expense claims,
//! onboarding, offboarding) through tenant-scoped approval graphs. This
//! crate holds the domain model shared by the store, the execution
//! engine, and the HTTP surface:
//!
//! - [`WorkflowDefinition`] — an immutable, versioned graph of typed
//!   nodes and edges, with structural validation
//! - [`WorkflowInstance`] — one running execution: frontier, fan-in
//!   bookkeeping, trigger payload
//! - [`WorkflowAction`] — a durable suspension record awaiting a
//!   human (or auto) decision
//! - [`AuditEntry`] — append-only, hash-chained transition record
//!
//! The key property of the model: "waiting for a human" is a `pending`
//! action row, never a blocked task. Every suspension point is durable.

#![deny(unsafe_code)]

pub mod action;
pub mod audit;
pub mod definition;
pub mod edge;
mod error;
pub mod instance;
pub mod tenant;

pub use action::{ActionId, ActionStatus, Decision, SlaPolicy, WorkflowAction};
pub use audit::{AuditEntry, AuditEvent, AuditId};
pub use definition::{
    DefinitionId, DefinitionStatus, Node, NodeId, NodeKind, WorkflowDefinition,
};
pub use edge::{Branch, Edge};
pub use error::{Violation, WorkflowError, WorkflowResult};
pub use instance::{InstanceId, InstanceStatus, WorkflowInstance};
pub use tenant::{TenantId, UserId};
