//! In-memory reference implementation of the storage traits.
//!
//! Deterministic and test-friendly; mirrors the Postgres adapter's
//! semantics exactly, including both race guards. Production
//! deployments use the transactional backend.

use crate::chain::compute_audit_hash;
use crate::traits::{ActionStore, AuditStore, DefinitionStore, InstanceStore, QueryWindow};
use crate::{StorageError, StorageResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use greenlight_types::{
    ActionId, ActionStatus, AuditEntry, AuditEvent, AuditId, DefinitionId, DefinitionStatus,
    InstanceId, TenantId, UserId, WorkflowAction, WorkflowDefinition, WorkflowInstance,
};
use std::collections::HashMap;
use std::sync::RwLock;

/// In-memory workflow storage adapter.
#[derive(Default)]
pub struct InMemoryWorkflowStorage {
    definitions: RwLock<HashMap<DefinitionId, WorkflowDefinition>>,
    instances: RwLock<HashMap<InstanceId, WorkflowInstance>>,
    actions: RwLock<HashMap<ActionId, WorkflowAction>>,
    audits: RwLock<HashMap<TenantId, Vec<AuditEntry>>>,
}

impl InMemoryWorkflowStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DefinitionStore for InMemoryWorkflowStorage {
    async fn create_definition(&self, definition: WorkflowDefinition) -> StorageResult<()> {
        let mut guard = self
            .definitions
            .write()
            .map_err(|_| StorageError::Backend("definitions lock poisoned".to_string()))?;

        if guard.contains_key(&definition.id) {
            return Err(StorageError::Conflict(format!(
                "definition {} already exists",
                definition.id
            )));
        }
        guard.insert(definition.id.clone(), definition);
        Ok(())
    }

    async fn get_definition(
        &self,
        tenant_id: &TenantId,
        id: &DefinitionId,
    ) -> StorageResult<Option<WorkflowDefinition>> {
        let guard = self
            .definitions
            .read()
            .map_err(|_| StorageError::Backend("definitions lock poisoned".to_string()))?;
        Ok(guard
            .get(id)
            .filter(|d| &d.tenant_id == tenant_id)
            .cloned())
    }

    async fn list_definitions(
        &self,
        tenant_id: &TenantId,
        window: QueryWindow,
    ) -> StorageResult<Vec<WorkflowDefinition>> {
        let guard = self
            .definitions
            .read()
            .map_err(|_| StorageError::Backend("definitions lock poisoned".to_string()))?;
        let mut values = guard
            .values()
            .filter(|d| &d.tenant_id == tenant_id)
            .cloned()
            .collect::<Vec<_>>();
        values.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(apply_window(values, window))
    }

    async fn publish_definition(&self, definition: &WorkflowDefinition) -> StorageResult<()> {
        let mut guard = self
            .definitions
            .write()
            .map_err(|_| StorageError::Backend("definitions lock poisoned".to_string()))?;

        let stored = guard
            .get_mut(&definition.id)
            .filter(|d| d.tenant_id == definition.tenant_id)
            .ok_or_else(|| {
                StorageError::NotFound(format!("definition {} not found", definition.id))
            })?;

        if stored.status != DefinitionStatus::Draft {
            return Err(StorageError::InvariantViolation(format!(
                "definition {} is not a draft",
                definition.id
            )));
        }
        *stored = definition.clone();
        Ok(())
    }
}

#[async_trait]
impl InstanceStore for InMemoryWorkflowStorage {
    async fn create_instance(&self, instance: WorkflowInstance) -> StorageResult<()> {
        let mut guard = self
            .instances
            .write()
            .map_err(|_| StorageError::Backend("instances lock poisoned".to_string()))?;

        if guard.contains_key(&instance.id) {
            return Err(StorageError::Conflict(format!(
                "instance {} already exists",
                instance.id
            )));
        }
        guard.insert(instance.id.clone(), instance);
        Ok(())
    }

    async fn get_instance(
        &self,
        tenant_id: &TenantId,
        id: &InstanceId,
    ) -> StorageResult<Option<WorkflowInstance>> {
        let guard = self
            .instances
            .read()
            .map_err(|_| StorageError::Backend("instances lock poisoned".to_string()))?;
        Ok(guard
            .get(id)
            .filter(|i| &i.tenant_id == tenant_id)
            .cloned())
    }

    async fn update_instance(&self, instance: &WorkflowInstance) -> StorageResult<()> {
        let mut guard = self
            .instances
            .write()
            .map_err(|_| StorageError::Backend("instances lock poisoned".to_string()))?;

        let stored = guard
            .get_mut(&instance.id)
            .filter(|i| i.tenant_id == instance.tenant_id)
            .ok_or_else(|| {
                StorageError::NotFound(format!("instance {} not found", instance.id))
            })?;
        *stored = instance.clone();
        Ok(())
    }

    async fn list_instances(
        &self,
        tenant_id: &TenantId,
        window: QueryWindow,
    ) -> StorageResult<Vec<WorkflowInstance>> {
        let guard = self
            .instances
            .read()
            .map_err(|_| StorageError::Backend("instances lock poisoned".to_string()))?;
        let mut values = guard
            .values()
            .filter(|i| &i.tenant_id == tenant_id)
            .cloned()
            .collect::<Vec<_>>();
        values.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(apply_window(values, window))
    }
}

#[async_trait]
impl ActionStore for InMemoryWorkflowStorage {
    async fn create_action(&self, action: WorkflowAction) -> StorageResult<()> {
        let mut guard = self
            .actions
            .write()
            .map_err(|_| StorageError::Backend("actions lock poisoned".to_string()))?;

        if guard.contains_key(&action.id) {
            return Err(StorageError::Conflict(format!(
                "action {} already exists",
                action.id
            )));
        }
        let open_exists = guard.values().any(|a| {
            a.instance_id == action.instance_id
                && a.node_id == action.node_id
                && a.status.is_pending()
        });
        if open_exists {
            return Err(StorageError::Conflict(format!(
                "pending action already exists for instance {} node {}",
                action.instance_id, action.node_id
            )));
        }
        guard.insert(action.id.clone(), action);
        Ok(())
    }

    async fn get_action(
        &self,
        tenant_id: &TenantId,
        id: &ActionId,
    ) -> StorageResult<Option<WorkflowAction>> {
        let guard = self
            .actions
            .read()
            .map_err(|_| StorageError::Backend("actions lock poisoned".to_string()))?;
        Ok(guard
            .get(id)
            .filter(|a| &a.tenant_id == tenant_id)
            .cloned())
    }

    async fn pending_actions_for_role(
        &self,
        tenant_id: &TenantId,
        role: &str,
        window: QueryWindow,
    ) -> StorageResult<Vec<WorkflowAction>> {
        let guard = self
            .actions
            .read()
            .map_err(|_| StorageError::Backend("actions lock poisoned".to_string()))?;
        let mut values = guard
            .values()
            .filter(|a| {
                &a.tenant_id == tenant_id && a.assignee_role == role && a.status.is_pending()
            })
            .cloned()
            .collect::<Vec<_>>();
        values.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(apply_window(values, window))
    }

    async fn pending_actions_for_instance(
        &self,
        tenant_id: &TenantId,
        instance_id: &InstanceId,
    ) -> StorageResult<Vec<WorkflowAction>> {
        let guard = self
            .actions
            .read()
            .map_err(|_| StorageError::Backend("actions lock poisoned".to_string()))?;
        let mut values = guard
            .values()
            .filter(|a| {
                &a.tenant_id == tenant_id && &a.instance_id == instance_id && a.status.is_pending()
            })
            .cloned()
            .collect::<Vec<_>>();
        values.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(values)
    }

    async fn actions_for_instance(
        &self,
        tenant_id: &TenantId,
        instance_id: &InstanceId,
    ) -> StorageResult<Vec<WorkflowAction>> {
        let guard = self
            .actions
            .read()
            .map_err(|_| StorageError::Backend("actions lock poisoned".to_string()))?;
        let mut values = guard
            .values()
            .filter(|a| &a.tenant_id == tenant_id && &a.instance_id == instance_id)
            .cloned()
            .collect::<Vec<_>>();
        values.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(values)
    }

    async fn resolve_action(
        &self,
        tenant_id: &TenantId,
        id: &ActionId,
        status: ActionStatus,
        decided_by: Option<&UserId>,
        reason: Option<&str>,
        decided_at: DateTime<Utc>,
    ) -> StorageResult<bool> {
        if status.is_pending() {
            return Err(StorageError::InvalidInput(
                "cannot resolve an action back to pending".to_string(),
            ));
        }
        let mut guard = self
            .actions
            .write()
            .map_err(|_| StorageError::Backend("actions lock poisoned".to_string()))?;

        let action = guard
            .get_mut(id)
            .filter(|a| &a.tenant_id == tenant_id)
            .ok_or_else(|| StorageError::NotFound(format!("action {} not found", id)))?;

        // The conditional transition: only a pending action moves.
        if !action.status.is_pending() {
            return Ok(false);
        }
        action.resolve(
            status,
            decided_by.cloned(),
            reason.map(|r| r.to_string()),
            decided_at,
        );
        Ok(true)
    }

    async fn due_actions(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> StorageResult<Vec<WorkflowAction>> {
        let guard = self
            .actions
            .read()
            .map_err(|_| StorageError::Backend("actions lock poisoned".to_string()))?;
        let mut values = guard
            .values()
            .filter(|a| a.status.is_pending() && a.escalate_at.is_some_and(|at| at <= now))
            .cloned()
            .collect::<Vec<_>>();
        values.sort_by_key(|a| a.escalate_at);
        if limit > 0 {
            values.truncate(limit);
        }
        Ok(values)
    }
}

#[async_trait]
impl AuditStore for InMemoryWorkflowStorage {
    async fn append_audit(&self, event: AuditEvent) -> StorageResult<AuditEntry> {
        let mut guard = self
            .audits
            .write()
            .map_err(|_| StorageError::Backend("audit lock poisoned".to_string()))?;

        let chain = guard.entry(event.tenant_id.clone()).or_default();
        let previous_hash = chain.last().map(|e| e.hash.clone());
        let sequence = chain.len() as u64 + 1;
        let hash = compute_audit_hash(&event, previous_hash.as_deref(), sequence)?;

        let entry = AuditEntry {
            id: AuditId::generate(),
            tenant_id: event.tenant_id,
            sequence,
            entity_type: event.entity_type,
            entity_id: event.entity_id,
            action: event.action,
            actor_id: event.actor_id,
            reason: event.reason,
            details: event.details,
            previous_hash,
            hash,
            created_at: event.created_at,
        };

        chain.push(entry.clone());
        Ok(entry)
    }

    async fn list_audit(
        &self,
        tenant_id: &TenantId,
        entity_id: Option<&str>,
        window: QueryWindow,
    ) -> StorageResult<Vec<AuditEntry>> {
        let guard = self
            .audits
            .read()
            .map_err(|_| StorageError::Backend("audit lock poisoned".to_string()))?;
        let mut values = guard
            .get(tenant_id)
            .map(|chain| {
                chain
                    .iter()
                    .filter(|e| entity_id.map_or(true, |id| e.entity_id == id))
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        values.sort_by(|a, b| b.sequence.cmp(&a.sequence));
        Ok(apply_window(values, window))
    }
}

fn apply_window<T>(items: Vec<T>, window: QueryWindow) -> Vec<T> {
    let iter = items.into_iter().skip(window.offset);
    if window.limit == 0 {
        iter.collect()
    } else {
        iter.take(window.limit).collect()
    }
}
