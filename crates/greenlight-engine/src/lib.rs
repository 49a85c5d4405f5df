//! Workflow execution engine for Greenlight
//!
//! The engine advances tenant-scoped approval graphs: it steps through
//! non-suspending node types, suspends branches at approval nodes by
//! opening durable `pending` action rows, and resumes from those rows
//! when a decision (human or SLA-driven) arrives. There is no in-memory
//! waiting — the engine is a set of independently-invokable, idempotent
//! state transitions over store rows.
//!
//! # Key principle
//!
//! **The engine coordinates; it never performs domain work directly.**
//! Notifications, task creation, and document generation go through the
//! [`EffectSink`] seam; decisions go through the store's conditional
//! pending→resolved transition, which is what makes concurrent deciders
//! and overlapping escalation ticks safe.
//!
//! # Architecture
//!
//! - [`Executor`] — start/resume/decide/dry-run stepping over a
//!   definition and an instance frontier
//! - [`EscalationSweeper`] — the periodic SLA job, built once at
//!   startup with an injected store, clock, and batch ceiling
//! - [`Clock`] — time source, swappable for tests
//! - [`EffectSink`] — delivery seam for side-effecting nodes
//!
//! # Example
//!
//! ```rust
//! use greenlight_engine::{Executor, SystemClock, TracingEffectSink};
//! use greenlight_store::{DefinitionStore, InMemoryWorkflowStorage};
//! use greenlight_types::*;
//! use std::sync::Arc;
//!
//! # let rt = tokio::runtime::Runtime::new().unwrap();
//! # rt.block_on(async {
//! let store = Arc::new(InMemoryWorkflowStorage::new());
//! let executor = Executor::new(
//!     Arc::clone(&store),
//!     Arc::new(TracingEffectSink),
//!     Arc::new(SystemClock),
//! );
//!
//! let tenant = TenantId::new("acme");
//! let mut def = WorkflowDefinition::new(tenant.clone(), "Leave", UserId::new("admin"));
//! def.add_node(Node::trigger("trigger", "leave.submitted")).unwrap();
//! def.add_node(Node::approval("manager", "manager")).unwrap();
//! def.add_node(Node::complete("done")).unwrap();
//! def.add_edge(Edge::new(NodeId::new("trigger"), NodeId::new("manager"))).unwrap();
//! def.add_edge(Edge::new(NodeId::new("manager"), NodeId::new("done"))).unwrap();
//! def.publish().unwrap();
//! store.create_definition(def.clone()).await.unwrap();
//!
//! let instance = executor
//!     .start(&tenant, &def.id, UserId::new("emp-1"), serde_json::json!({"days": 3}))
//!     .await
//!     .unwrap();
//! assert!(instance.is_running());
//! # });
//! ```

#![deny(unsafe_code)]

pub mod clock;
pub mod effects;
mod error;
pub mod executor;
pub mod sweeper;

pub use clock::{Clock, ManualClock, SystemClock};
pub use effects::{EffectSink, RecordingEffectSink, SideEffect, TracingEffectSink};
pub use error::{EngineError, EngineResult};
pub use executor::{DecideOutcome, Executor, SimulatedApproval, SimulatedStep, Simulation};
pub use sweeper::{EscalationSweeper, SweepReport};
