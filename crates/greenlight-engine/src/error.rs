//! Engine error types

use greenlight_store::StorageError;
use greenlight_types::WorkflowError;

/// Result type alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors surfaced by the execution engine and the sweeper.
///
/// Execution-time faults (missing successor, unresolvable rule) are NOT
/// errors at this level — they freeze the instance in `error` status
/// and are reported through the instance itself, not through `Err`.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}
