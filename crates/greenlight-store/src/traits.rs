use crate::StorageResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use greenlight_types::{
    ActionId, ActionStatus, AuditEntry, AuditEvent, DefinitionId, InstanceId, TenantId, UserId,
    WorkflowAction, WorkflowDefinition, WorkflowInstance,
};

/// Generic query window for paged reads.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryWindow {
    pub limit: usize,
    pub offset: usize,
}

/// Storage interface for workflow definitions.
///
/// Reads are tenant-filtered: a definition belonging to another tenant
/// is indistinguishable from one that does not exist.
#[async_trait]
pub trait DefinitionStore: Send + Sync {
    /// Insert a new definition (draft or already published).
    async fn create_definition(&self, definition: WorkflowDefinition) -> StorageResult<()>;

    /// Get one definition by id.
    async fn get_definition(
        &self,
        tenant_id: &TenantId,
        id: &DefinitionId,
    ) -> StorageResult<Option<WorkflowDefinition>>;

    /// List definitions newest-first.
    async fn list_definitions(
        &self,
        tenant_id: &TenantId,
        window: QueryWindow,
    ) -> StorageResult<Vec<WorkflowDefinition>>;

    /// Persist a published definition over its draft row.
    ///
    /// Conditional on the stored row still being a draft; a concurrent
    /// publish surfaces as `InvariantViolation`.
    async fn publish_definition(&self, definition: &WorkflowDefinition) -> StorageResult<()>;
}

/// Storage interface for workflow instances.
#[async_trait]
pub trait InstanceStore: Send + Sync {
    async fn create_instance(&self, instance: WorkflowInstance) -> StorageResult<()>;

    async fn get_instance(
        &self,
        tenant_id: &TenantId,
        id: &InstanceId,
    ) -> StorageResult<Option<WorkflowInstance>>;

    /// Replace the stored frontier/status/arrival state.
    async fn update_instance(&self, instance: &WorkflowInstance) -> StorageResult<()>;

    /// List instances newest-activity-first.
    async fn list_instances(
        &self,
        tenant_id: &TenantId,
        window: QueryWindow,
    ) -> StorageResult<Vec<WorkflowInstance>>;
}

/// Storage interface for workflow actions — the durable suspension
/// records. This trait owns both race guards of the system.
#[async_trait]
pub trait ActionStore: Send + Sync {
    /// Insert a pending action. Fails with `Conflict` if a pending
    /// action already exists for the same `(instance_id, node_id)`.
    async fn create_action(&self, action: WorkflowAction) -> StorageResult<()>;

    async fn get_action(
        &self,
        tenant_id: &TenantId,
        id: &ActionId,
    ) -> StorageResult<Option<WorkflowAction>>;

    /// Pending actions assigned to a role, oldest first.
    async fn pending_actions_for_role(
        &self,
        tenant_id: &TenantId,
        role: &str,
        window: QueryWindow,
    ) -> StorageResult<Vec<WorkflowAction>>;

    /// All still-pending actions of one instance.
    async fn pending_actions_for_instance(
        &self,
        tenant_id: &TenantId,
        instance_id: &InstanceId,
    ) -> StorageResult<Vec<WorkflowAction>>;

    /// Every action of one instance, oldest first (audit trail).
    async fn actions_for_instance(
        &self,
        tenant_id: &TenantId,
        instance_id: &InstanceId,
    ) -> StorageResult<Vec<WorkflowAction>>;

    /// The decision guard: perform the pending→resolved transition iff
    /// the action is still pending.
    ///
    /// Returns `Ok(true)` when this call won the transition and
    /// `Ok(false)` when the action was already resolved — the loser of
    /// a decide/decide or decide/sweep race observes `false` and must
    /// not advance the instance.
    async fn resolve_action(
        &self,
        tenant_id: &TenantId,
        id: &ActionId,
        status: ActionStatus,
        decided_by: Option<&UserId>,
        reason: Option<&str>,
        decided_at: DateTime<Utc>,
    ) -> StorageResult<bool>;

    /// Pending actions whose SLA deadline has elapsed, oldest deadline
    /// first, bounded by `limit`. Spans all tenants — the sweep is a
    /// system-wide job.
    async fn due_actions(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> StorageResult<Vec<WorkflowAction>>;
}

/// Storage interface for the append-only audit chain.
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Append an event and return the stored, hash-linked entry.
    async fn append_audit(&self, event: AuditEvent) -> StorageResult<AuditEntry>;

    /// Read entries newest-first, optionally filtered to one entity.
    async fn list_audit(
        &self,
        tenant_id: &TenantId,
        entity_id: Option<&str>,
        window: QueryWindow,
    ) -> StorageResult<Vec<AuditEntry>>;
}

/// Unified storage bundle used by the engine and the HTTP surface.
pub trait WorkflowStorage:
    DefinitionStore + InstanceStore + ActionStore + AuditStore + Send + Sync
{
}

impl<T> WorkflowStorage for T where
    T: DefinitionStore + InstanceStore + ActionStore + AuditStore + Send + Sync
{
}
