//! Shared application state

use greenlight_engine::{EffectSink, Executor};
use greenlight_store::WorkflowStorage;
use std::sync::Arc;

/// The storage backend behind a trait object so the binary can pick
/// Postgres or in-memory at startup.
pub type SharedStorage = Arc<dyn WorkflowStorage>;

/// The executor over trait-object collaborators.
pub type SharedExecutor = Executor<dyn WorkflowStorage, dyn EffectSink>;

/// State shared by every handler
#[derive(Clone)]
pub struct AppState {
    pub store: SharedStorage,
    pub executor: Arc<SharedExecutor>,
}
