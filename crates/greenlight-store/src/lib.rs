//! Storage contract for the workflow engine.
//!
//! This crate defines the persistence seams the execution engine and
//! HTTP surface are written against:
//! - workflow definitions (immutable once published)
//! - workflow instances (frontier + fan-in state)
//! - workflow actions (durable suspension records and both race guards)
//! - the append-only, hash-chained audit log
//!
//! Design stance:
//! - Postgres is the transactional source of truth; the in-memory
//!   adapter mirrors its semantics for tests and development.
//! - Every read and write is tenant-filtered. A row belonging to
//!   another tenant is indistinguishable from a missing row.
//! - "Exactly one pending→resolved transition" is a storage guarantee
//!   (conditional update), not an engine courtesy.

#![deny(unsafe_code)]
#![warn(rust_2018_idioms)]

mod chain;
mod error;
pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;
mod traits;

pub use error::{StorageError, StorageResult};
pub use memory::InMemoryWorkflowStorage;
#[cfg(feature = "postgres")]
pub use postgres::PgWorkflowStorage;
pub use traits::{
    ActionStore, AuditStore, DefinitionStore, InstanceStore, QueryWindow, WorkflowStorage,
};
