//! PostgreSQL adapter for workflow storage.
//!
//! Postgres is the transactional source of truth. The two race guards
//! live here as conditional statements whose affected-row count gates
//! the caller:
//!
//! - the decision guard is `UPDATE workflow_actions SET ... WHERE id =
//!   $n AND status = 'pending'` — the loser of a concurrent decide (or
//!   an overlapping sweep tick) observes zero rows and must no-op;
//! - the single-pending invariant is a partial unique index over
//!   `(instance_id, node_id) WHERE status = 'pending'`.

use crate::chain::compute_audit_hash;
use crate::traits::{ActionStore, AuditStore, DefinitionStore, InstanceStore, QueryWindow};
use crate::{StorageError, StorageResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use greenlight_types::{
    ActionId, ActionStatus, AuditEntry, AuditEvent, AuditId, DefinitionId, DefinitionStatus,
    InstanceId, InstanceStatus, NodeId, SlaPolicy, TenantId, UserId, WorkflowAction,
    WorkflowDefinition, WorkflowInstance,
};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Acquire, Row};
use std::collections::{BTreeMap, BTreeSet};

/// PostgreSQL-backed workflow storage adapter.
#[derive(Clone)]
pub struct PgWorkflowStorage {
    pool: PgPool,
}

impl PgWorkflowStorage {
    /// Connect to PostgreSQL and initialize the required schema.
    pub async fn connect(database_url: &str) -> StorageResult<Self> {
        Self::connect_with_options(database_url, 10, 5).await
    }

    /// Connect with explicit pool parameters.
    pub async fn connect_with_options(
        database_url: &str,
        max_connections: u32,
        connect_timeout_secs: u64,
    ) -> StorageResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(std::time::Duration::from_secs(connect_timeout_secs))
            .connect(database_url)
            .await
            .map_err(|e| StorageError::Backend(format!("failed to connect postgres: {e}")))?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Create the adapter from an existing pool.
    pub async fn from_pool(pool: PgPool) -> StorageResult<Self> {
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn init_schema(&self) -> StorageResult<()> {
        let ddl = [
            r#"
            CREATE TABLE IF NOT EXISTS workflow_definitions (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                name TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                status TEXT NOT NULL,
                version INTEGER NOT NULL,
                graph JSONB NOT NULL,
                created_by TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL
            )
            "#,
            r#"
            CREATE INDEX IF NOT EXISTS idx_workflow_definitions_tenant
                ON workflow_definitions (tenant_id, created_at DESC)
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS workflow_instances (
                id TEXT PRIMARY KEY,
                workflow_id TEXT NOT NULL,
                tenant_id TEXT NOT NULL,
                status TEXT NOT NULL,
                current_node_ids JSONB NOT NULL,
                arrivals JSONB NOT NULL,
                trigger_payload JSONB NOT NULL,
                error TEXT,
                created_by TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )
            "#,
            r#"
            CREATE INDEX IF NOT EXISTS idx_workflow_instances_tenant
                ON workflow_instances (tenant_id, updated_at DESC)
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS workflow_actions (
                id TEXT PRIMARY KEY,
                instance_id TEXT NOT NULL,
                tenant_id TEXT NOT NULL,
                node_id TEXT NOT NULL,
                node_type TEXT NOT NULL,
                assignee_role TEXT NOT NULL,
                assignee_user_id TEXT,
                status TEXT NOT NULL,
                decision_reason TEXT,
                decided_by TEXT,
                decided_at TIMESTAMPTZ,
                escalate_at TIMESTAMPTZ,
                sla JSONB,
                created_at TIMESTAMPTZ NOT NULL
            )
            "#,
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS idx_workflow_actions_single_pending
                ON workflow_actions (instance_id, node_id) WHERE status = 'pending'
            "#,
            r#"
            CREATE INDEX IF NOT EXISTS idx_workflow_actions_due
                ON workflow_actions (escalate_at) WHERE status = 'pending'
            "#,
            r#"
            CREATE INDEX IF NOT EXISTS idx_workflow_actions_role
                ON workflow_actions (tenant_id, assignee_role) WHERE status = 'pending'
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS audit_logs (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                sequence BIGINT NOT NULL,
                entity_type TEXT NOT NULL,
                entity_id TEXT NOT NULL,
                action TEXT NOT NULL,
                actor_id TEXT,
                reason TEXT,
                details JSONB NOT NULL,
                previous_hash TEXT,
                hash TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                UNIQUE (tenant_id, sequence)
            )
            "#,
            r#"
            CREATE INDEX IF NOT EXISTS idx_audit_logs_entity
                ON audit_logs (tenant_id, entity_id)
            "#,
        ];

        for stmt in ddl {
            sqlx::query(stmt)
                .execute(&self.pool)
                .await
                .map_err(|e| StorageError::Backend(format!("schema init failed: {e}")))?;
        }
        Ok(())
    }
}

#[async_trait]
impl DefinitionStore for PgWorkflowStorage {
    async fn create_definition(&self, definition: WorkflowDefinition) -> StorageResult<()> {
        let graph = graph_json(&definition)?;

        sqlx::query(
            r#"
            INSERT INTO workflow_definitions
                (id, tenant_id, name, description, status, version, graph, created_by, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(definition.id.0.clone())
        .bind(definition.tenant_id.0.clone())
        .bind(definition.name.clone())
        .bind(definition.description.clone())
        .bind(definition.status.as_str())
        .bind(definition.version as i32)
        .bind(graph)
        .bind(definition.created_by.0.clone())
        .bind(definition.created_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_conflict)?;

        Ok(())
    }

    async fn get_definition(
        &self,
        tenant_id: &TenantId,
        id: &DefinitionId,
    ) -> StorageResult<Option<WorkflowDefinition>> {
        let row = sqlx::query(
            r#"
            SELECT id, tenant_id, name, description, status, version, graph, created_by, created_at
              FROM workflow_definitions
             WHERE id = $1 AND tenant_id = $2
            "#,
        )
        .bind(id.0.clone())
        .bind(tenant_id.0.clone())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?;

        row.map(definition_row_to_record).transpose()
    }

    async fn list_definitions(
        &self,
        tenant_id: &TenantId,
        window: QueryWindow,
    ) -> StorageResult<Vec<WorkflowDefinition>> {
        let rows = if window.limit == 0 {
            sqlx::query(
                r#"
                SELECT id, tenant_id, name, description, status, version, graph, created_by, created_at
                  FROM workflow_definitions
                 WHERE tenant_id = $1
                 ORDER BY created_at DESC
                 OFFSET $2
                "#,
            )
            .bind(tenant_id.0.clone())
            .bind(to_i64(window.offset)?)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?
        } else {
            sqlx::query(
                r#"
                SELECT id, tenant_id, name, description, status, version, graph, created_by, created_at
                  FROM workflow_definitions
                 WHERE tenant_id = $1
                 ORDER BY created_at DESC
                 LIMIT $2 OFFSET $3
                "#,
            )
            .bind(tenant_id.0.clone())
            .bind(to_i64(window.limit)?)
            .bind(to_i64(window.offset)?)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?
        };

        rows.into_iter().map(definition_row_to_record).collect()
    }

    async fn publish_definition(&self, definition: &WorkflowDefinition) -> StorageResult<()> {
        let graph = graph_json(definition)?;

        let result = sqlx::query(
            r#"
            UPDATE workflow_definitions
               SET status = $1,
                   name = $2,
                   description = $3,
                   version = $4,
                   graph = $5
             WHERE id = $6
               AND tenant_id = $7
               AND status = 'draft'
            "#,
        )
        .bind(definition.status.as_str())
        .bind(definition.name.clone())
        .bind(definition.description.clone())
        .bind(definition.version as i32)
        .bind(graph)
        .bind(definition.id.0.clone())
        .bind(definition.tenant_id.0.clone())
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?;

        if result.rows_affected() == 0 {
            let exists = self
                .get_definition(&definition.tenant_id, &definition.id)
                .await?
                .is_some();
            if exists {
                return Err(StorageError::InvariantViolation(format!(
                    "definition {} is not a draft",
                    definition.id
                )));
            }
            return Err(StorageError::NotFound(format!(
                "definition {} not found",
                definition.id
            )));
        }

        Ok(())
    }
}

#[async_trait]
impl InstanceStore for PgWorkflowStorage {
    async fn create_instance(&self, instance: WorkflowInstance) -> StorageResult<()> {
        let frontier = to_json(&instance.current_node_ids)?;
        let arrivals = to_json(&instance.arrivals)?;

        sqlx::query(
            r#"
            INSERT INTO workflow_instances
                (id, workflow_id, tenant_id, status, current_node_ids, arrivals,
                 trigger_payload, error, created_by, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(instance.id.0.clone())
        .bind(instance.definition_id.0.clone())
        .bind(instance.tenant_id.0.clone())
        .bind(instance.status.as_str())
        .bind(frontier)
        .bind(arrivals)
        .bind(instance.trigger_payload.clone())
        .bind(instance.error.clone())
        .bind(instance.created_by.0.clone())
        .bind(instance.created_at)
        .bind(instance.updated_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_conflict)?;

        Ok(())
    }

    async fn get_instance(
        &self,
        tenant_id: &TenantId,
        id: &InstanceId,
    ) -> StorageResult<Option<WorkflowInstance>> {
        let row = sqlx::query(
            r#"
            SELECT id, workflow_id, tenant_id, status, current_node_ids, arrivals,
                   trigger_payload, error, created_by, created_at, updated_at
              FROM workflow_instances
             WHERE id = $1 AND tenant_id = $2
            "#,
        )
        .bind(id.0.clone())
        .bind(tenant_id.0.clone())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?;

        row.map(instance_row_to_record).transpose()
    }

    async fn update_instance(&self, instance: &WorkflowInstance) -> StorageResult<()> {
        let frontier = to_json(&instance.current_node_ids)?;
        let arrivals = to_json(&instance.arrivals)?;

        let result = sqlx::query(
            r#"
            UPDATE workflow_instances
               SET status = $1,
                   current_node_ids = $2,
                   arrivals = $3,
                   error = $4,
                   updated_at = $5
             WHERE id = $6 AND tenant_id = $7
            "#,
        )
        .bind(instance.status.as_str())
        .bind(frontier)
        .bind(arrivals)
        .bind(instance.error.clone())
        .bind(instance.updated_at)
        .bind(instance.id.0.clone())
        .bind(instance.tenant_id.0.clone())
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!(
                "instance {} not found",
                instance.id
            )));
        }

        Ok(())
    }

    async fn list_instances(
        &self,
        tenant_id: &TenantId,
        window: QueryWindow,
    ) -> StorageResult<Vec<WorkflowInstance>> {
        let rows = if window.limit == 0 {
            sqlx::query(
                r#"
                SELECT id, workflow_id, tenant_id, status, current_node_ids, arrivals,
                       trigger_payload, error, created_by, created_at, updated_at
                  FROM workflow_instances
                 WHERE tenant_id = $1
                 ORDER BY updated_at DESC
                 OFFSET $2
                "#,
            )
            .bind(tenant_id.0.clone())
            .bind(to_i64(window.offset)?)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?
        } else {
            sqlx::query(
                r#"
                SELECT id, workflow_id, tenant_id, status, current_node_ids, arrivals,
                       trigger_payload, error, created_by, created_at, updated_at
                  FROM workflow_instances
                 WHERE tenant_id = $1
                 ORDER BY updated_at DESC
                 LIMIT $2 OFFSET $3
                "#,
            )
            .bind(tenant_id.0.clone())
            .bind(to_i64(window.limit)?)
            .bind(to_i64(window.offset)?)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?
        };

        rows.into_iter().map(instance_row_to_record).collect()
    }
}

#[async_trait]
impl ActionStore for PgWorkflowStorage {
    async fn create_action(&self, action: WorkflowAction) -> StorageResult<()> {
        let sla = action.sla.map(|s| to_json(&s)).transpose()?;

        sqlx::query(
            r#"
            INSERT INTO workflow_actions
                (id, instance_id, tenant_id, node_id, node_type, assignee_role,
                 assignee_user_id, status, decision_reason, decided_by, decided_at,
                 escalate_at, sla, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(action.id.0.clone())
        .bind(action.instance_id.0.clone())
        .bind(action.tenant_id.0.clone())
        .bind(action.node_id.0.clone())
        .bind(action.node_type.clone())
        .bind(action.assignee_role.clone())
        .bind(action.assignee_user_id.as_ref().map(|u| u.0.clone()))
        .bind(action.status.as_str())
        .bind(action.decision_reason.clone())
        .bind(action.decided_by.as_ref().map(|u| u.0.clone()))
        .bind(action.decided_at)
        .bind(action.escalate_at)
        .bind(sla)
        .bind(action.created_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_conflict)?;

        Ok(())
    }

    async fn get_action(
        &self,
        tenant_id: &TenantId,
        id: &ActionId,
    ) -> StorageResult<Option<WorkflowAction>> {
        let row = sqlx::query(
            r#"
            SELECT id, instance_id, tenant_id, node_id, node_type, assignee_role,
                   assignee_user_id, status, decision_reason, decided_by, decided_at,
                   escalate_at, sla, created_at
              FROM workflow_actions
             WHERE id = $1 AND tenant_id = $2
            "#,
        )
        .bind(id.0.clone())
        .bind(tenant_id.0.clone())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?;

        row.map(action_row_to_record).transpose()
    }

    async fn pending_actions_for_role(
        &self,
        tenant_id: &TenantId,
        role: &str,
        window: QueryWindow,
    ) -> StorageResult<Vec<WorkflowAction>> {
        let rows = if window.limit == 0 {
            sqlx::query(
                r#"
                SELECT id, instance_id, tenant_id, node_id, node_type, assignee_role,
                       assignee_user_id, status, decision_reason, decided_by, decided_at,
                       escalate_at, sla, created_at
                  FROM workflow_actions
                 WHERE tenant_id = $1 AND assignee_role = $2 AND status = 'pending'
                 ORDER BY created_at ASC
                 OFFSET $3
                "#,
            )
            .bind(tenant_id.0.clone())
            .bind(role)
            .bind(to_i64(window.offset)?)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?
        } else {
            sqlx::query(
                r#"
                SELECT id, instance_id, tenant_id, node_id, node_type, assignee_role,
                       assignee_user_id, status, decision_reason, decided_by, decided_at,
                       escalate_at, sla, created_at
                  FROM workflow_actions
                 WHERE tenant_id = $1 AND assignee_role = $2 AND status = 'pending'
                 ORDER BY created_at ASC
                 LIMIT $3 OFFSET $4
                "#,
            )
            .bind(tenant_id.0.clone())
            .bind(role)
            .bind(to_i64(window.limit)?)
            .bind(to_i64(window.offset)?)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?
        };

        rows.into_iter().map(action_row_to_record).collect()
    }

    async fn pending_actions_for_instance(
        &self,
        tenant_id: &TenantId,
        instance_id: &InstanceId,
    ) -> StorageResult<Vec<WorkflowAction>> {
        let rows = sqlx::query(
            r#"
            SELECT id, instance_id, tenant_id, node_id, node_type, assignee_role,
                   assignee_user_id, status, decision_reason, decided_by, decided_at,
                   escalate_at, sla, created_at
              FROM workflow_actions
             WHERE tenant_id = $1 AND instance_id = $2 AND status = 'pending'
             ORDER BY created_at ASC
            "#,
        )
        .bind(tenant_id.0.clone())
        .bind(instance_id.0.clone())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?;

        rows.into_iter().map(action_row_to_record).collect()
    }

    async fn actions_for_instance(
        &self,
        tenant_id: &TenantId,
        instance_id: &InstanceId,
    ) -> StorageResult<Vec<WorkflowAction>> {
        let rows = sqlx::query(
            r#"
            SELECT id, instance_id, tenant_id, node_id, node_type, assignee_role,
                   assignee_user_id, status, decision_reason, decided_by, decided_at,
                   escalate_at, sla, created_at
              FROM workflow_actions
             WHERE tenant_id = $1 AND instance_id = $2
             ORDER BY created_at ASC
            "#,
        )
        .bind(tenant_id.0.clone())
        .bind(instance_id.0.clone())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?;

        rows.into_iter().map(action_row_to_record).collect()
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

        let result = sqlx::query(
            r#"
            UPDATE workflow_actions
               SET status = $1,
                   decided_by = $2,
                   decision_reason = $3,
                   decided_at = $4
             WHERE id = $5
               AND tenant_id = $6
               AND status = 'pending'
            "#,
        )
        .bind(status.as_str())
        .bind(decided_by.map(|u| u.0.clone()))
        .bind(reason)
        .bind(decided_at)
        .bind(id.0.clone())
        .bind(tenant_id.0.clone())
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?;

        if result.rows_affected() == 0 {
            let exists = self.get_action(tenant_id, id).await?.is_some();
            if !exists {
                return Err(StorageError::NotFound(format!("action {} not found", id)));
            }
            // Already resolved — the caller lost the race.
            return Ok(false);
        }

        Ok(true)
    }

    async fn due_actions(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> StorageResult<Vec<WorkflowAction>> {
        let rows = if limit == 0 {
            sqlx::query(
                r#"
                SELECT id, instance_id, tenant_id, node_id, node_type, assignee_role,
                       assignee_user_id, status, decision_reason, decided_by, decided_at,
                       escalate_at, sla, created_at
                  FROM workflow_actions
                 WHERE status = 'pending' AND escalate_at IS NOT NULL AND escalate_at <= $1
                 ORDER BY escalate_at ASC
                "#,
            )
            .bind(now)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?
        } else {
            sqlx::query(
                r#"
                SELECT id, instance_id, tenant_id, node_id, node_type, assignee_role,
                       assignee_user_id, status, decision_reason, decided_by, decided_at,
                       escalate_at, sla, created_at
                  FROM workflow_actions
                 WHERE status = 'pending' AND escalate_at IS NOT NULL AND escalate_at <= $1
                 ORDER BY escalate_at ASC
                 LIMIT $2
                "#,
            )
            .bind(now)
            .bind(to_i64(limit)?)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?
        };

        rows.into_iter().map(action_row_to_record).collect()
    }
}

#[async_trait]
impl AuditStore for PgWorkflowStorage {
    async fn append_audit(&self, event: AuditEvent) -> StorageResult<AuditEntry> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let conn = tx
            .acquire()
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        sqlx::query("LOCK TABLE audit_logs IN EXCLUSIVE MODE")
            .execute(&mut *conn)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let last = sqlx::query(
            r#"
            SELECT sequence, hash FROM audit_logs
             WHERE tenant_id = $1
             ORDER BY sequence DESC
             LIMIT 1
            "#,
        )
        .bind(event.tenant_id.0.clone())
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?;

        let (sequence, previous_hash) = if let Some(row) = last {
            let seq: i64 = row
                .try_get("sequence")
                .map_err(|e| StorageError::Backend(e.to_string()))?;
            let prev: String = row
                .try_get("hash")
                .map_err(|e| StorageError::Backend(e.to_string()))?;
            (seq + 1, Some(prev))
        } else {
            (1_i64, None)
        };

        let hash = compute_audit_hash(&event, previous_hash.as_deref(), sequence as u64)?;
        let id = AuditId::generate();

        sqlx::query(
            r#"
            INSERT INTO audit_logs
                (id, tenant_id, sequence, entity_type, entity_id, action, actor_id,
                 reason, details, previous_hash, hash, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(id.0.clone())
        .bind(event.tenant_id.0.clone())
        .bind(sequence)
        .bind(event.entity_type.clone())
        .bind(event.entity_id.clone())
        .bind(event.action.clone())
        .bind(event.actor_id.as_ref().map(|u| u.0.clone()))
        .bind(event.reason.clone())
        .bind(event.details.clone())
        .bind(previous_hash.clone())
        .bind(hash.clone())
        .bind(event.created_at)
        .execute(&mut *conn)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        Ok(AuditEntry {
            id,
            tenant_id: event.tenant_id,
            sequence: sequence as u64,
            entity_type: event.entity_type,
            entity_id: event.entity_id,
            action: event.action,
            actor_id: event.actor_id,
            reason: event.reason,
            details: event.details,
            previous_hash,
            hash,
            created_at: event.created_at,
        })
    }

    async fn list_audit(
        &self,
        tenant_id: &TenantId,
        entity_id: Option<&str>,
        window: QueryWindow,
    ) -> StorageResult<Vec<AuditEntry>> {
        let limit = if window.limit == 0 {
            i64::MAX
        } else {
            to_i64(window.limit)?
        };

        let rows = match entity_id {
            Some(entity) => sqlx::query(
                r#"
                SELECT id, tenant_id, sequence, entity_type, entity_id, action, actor_id,
                       reason, details, previous_hash, hash, created_at
                  FROM audit_logs
                 WHERE tenant_id = $1 AND entity_id = $2
                 ORDER BY sequence DESC
                 LIMIT $3 OFFSET $4
                "#,
            )
            .bind(tenant_id.0.clone())
            .bind(entity)
            .bind(limit)
            .bind(to_i64(window.offset)?)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?,
            None => sqlx::query(
                r#"
                SELECT id, tenant_id, sequence, entity_type, entity_id, action, actor_id,
                       reason, details, previous_hash, hash, created_at
                  FROM audit_logs
                 WHERE tenant_id = $1
                 ORDER BY sequence DESC
                 LIMIT $2 OFFSET $3
                "#,
            )
            .bind(tenant_id.0.clone())
            .bind(limit)
            .bind(to_i64(window.offset)?)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?,
        };

        rows.into_iter().map(audit_row_to_record).collect()
    }
}

// ── Row mapping ──────────────────────────────────────────────────────

fn definition_row_to_record(row: sqlx::postgres::PgRow) -> StorageResult<WorkflowDefinition> {
    let graph: serde_json::Value = row
        .try_get("graph")
        .map_err(|e| StorageError::Backend(e.to_string()))?;
    let graph: StoredGraph = serde_json::from_value(graph)
        .map_err(|e| StorageError::Serialization(e.to_string()))?;

    let status: String = row
        .try_get("status")
        .map_err(|e| StorageError::Backend(e.to_string()))?;
    let version: i32 = row
        .try_get("version")
        .map_err(|e| StorageError::Backend(e.to_string()))?;

    Ok(WorkflowDefinition {
        id: DefinitionId::new(get_text(&row, "id")?),
        tenant_id: TenantId::new(get_text(&row, "tenant_id")?),
        name: get_text(&row, "name")?,
        description: get_text(&row, "description")?,
        status: DefinitionStatus::parse(&status).ok_or_else(|| {
            StorageError::Serialization(format!("unknown definition status `{status}`"))
        })?,
        version: version as u32,
        nodes: graph.nodes,
        edges: graph.edges,
        created_by: UserId::new(get_text(&row, "created_by")?),
        created_at: row
            .try_get("created_at")
            .map_err(|e| StorageError::Backend(e.to_string()))?,
    })
}

fn instance_row_to_record(row: sqlx::postgres::PgRow) -> StorageResult<WorkflowInstance> {
    let frontier_json: serde_json::Value = row
        .try_get("current_node_ids")
        .map_err(|e| StorageError::Backend(e.to_string()))?;
    let current_node_ids: BTreeSet<NodeId> = serde_json::from_value(frontier_json)
        .map_err(|e| StorageError::Serialization(e.to_string()))?;

    let arrivals_json: serde_json::Value = row
        .try_get("arrivals")
        .map_err(|e| StorageError::Backend(e.to_string()))?;
    let arrivals: BTreeMap<NodeId, BTreeSet<NodeId>> = serde_json::from_value(arrivals_json)
        .map_err(|e| StorageError::Serialization(e.to_string()))?;

    let status: String = row
        .try_get("status")
        .map_err(|e| StorageError::Backend(e.to_string()))?;

    Ok(WorkflowInstance {
        id: InstanceId::new(get_text(&row, "id")?),
        definition_id: DefinitionId::new(get_text(&row, "workflow_id")?),
        tenant_id: TenantId::new(get_text(&row, "tenant_id")?),
        status: InstanceStatus::parse(&status).ok_or_else(|| {
            StorageError::Serialization(format!("unknown instance status `{status}`"))
        })?,
        current_node_ids,
        arrivals,
        trigger_payload: row
            .try_get("trigger_payload")
            .map_err(|e| StorageError::Backend(e.to_string()))?,
        error: row
            .try_get("error")
            .map_err(|e| StorageError::Backend(e.to_string()))?,
        created_by: UserId::new(get_text(&row, "created_by")?),
        created_at: row
            .try_get("created_at")
            .map_err(|e| StorageError::Backend(e.to_string()))?,
        updated_at: row
            .try_get("updated_at")
            .map_err(|e| StorageError::Backend(e.to_string()))?,
    })
}

fn action_row_to_record(row: sqlx::postgres::PgRow) -> StorageResult<WorkflowAction> {
    let status: String = row
        .try_get("status")
        .map_err(|e| StorageError::Backend(e.to_string()))?;
    let sla_json: Option<serde_json::Value> = row
        .try_get("sla")
        .map_err(|e| StorageError::Backend(e.to_string()))?;
    let sla: Option<SlaPolicy> = sla_json
        .map(|v| serde_json::from_value(v).map_err(|e| StorageError::Serialization(e.to_string())))
        .transpose()?;

    let assignee_user_id: Option<String> = row
        .try_get("assignee_user_id")
        .map_err(|e| StorageError::Backend(e.to_string()))?;
    let decided_by: Option<String> = row
        .try_get("decided_by")
        .map_err(|e| StorageError::Backend(e.to_string()))?;

    Ok(WorkflowAction {
        id: ActionId::new(get_text(&row, "id")?),
        instance_id: InstanceId::new(get_text(&row, "instance_id")?),
        tenant_id: TenantId::new(get_text(&row, "tenant_id")?),
        node_id: NodeId::new(get_text(&row, "node_id")?),
        node_type: get_text(&row, "node_type")?,
        assignee_role: get_text(&row, "assignee_role")?,
        assignee_user_id: assignee_user_id.map(UserId::new),
        status: ActionStatus::parse(&status).ok_or_else(|| {
            StorageError::Serialization(format!("unknown action status `{status}`"))
        })?,
        decision_reason: row
            .try_get("decision_reason")
            .map_err(|e| StorageError::Backend(e.to_string()))?,
        decided_by: decided_by.map(UserId::new),
        decided_at: row
            .try_get("decided_at")
            .map_err(|e| StorageError::Backend(e.to_string()))?,
        escalate_at: row
            .try_get("escalate_at")
            .map_err(|e| StorageError::Backend(e.to_string()))?,
        sla,
        created_at: row
            .try_get("created_at")
            .map_err(|e| StorageError::Backend(e.to_string()))?,
    })
}

fn audit_row_to_record(row: sqlx::postgres::PgRow) -> StorageResult<AuditEntry> {
    let actor_id: Option<String> = row
        .try_get("actor_id")
        .map_err(|e| StorageError::Backend(e.to_string()))?;
    let sequence: i64 = row
        .try_get("sequence")
        .map_err(|e| StorageError::Backend(e.to_string()))?;

    Ok(AuditEntry {
        id: AuditId::new(get_text(&row, "id")?),
        tenant_id: TenantId::new(get_text(&row, "tenant_id")?),
        sequence: sequence as u64,
        entity_type: get_text(&row, "entity_type")?,
        entity_id: get_text(&row, "entity_id")?,
        action: get_text(&row, "action")?,
        actor_id: actor_id.map(UserId::new),
        reason: row
            .try_get("reason")
            .map_err(|e| StorageError::Backend(e.to_string()))?,
        details: row
            .try_get("details")
            .map_err(|e| StorageError::Backend(e.to_string()))?,
        previous_hash: row
            .try_get("previous_hash")
            .map_err(|e| StorageError::Backend(e.to_string()))?,
        hash: get_text(&row, "hash")?,
        created_at: row
            .try_get("created_at")
            .map_err(|e| StorageError::Backend(e.to_string()))?,
    })
}

// ── Helpers ──────────────────────────────────────────────────────────

/// The nodes + edges of a definition as one JSONB column.
#[derive(serde::Serialize, serde::Deserialize)]
struct StoredGraph {
    nodes: Vec<greenlight_types::Node>,
    edges: Vec<greenlight_types::Edge>,
}

fn graph_json(definition: &WorkflowDefinition) -> StorageResult<serde_json::Value> {
    to_json(&StoredGraph {
        nodes: definition.nodes.clone(),
        edges: definition.edges.clone(),
    })
}

fn get_text(row: &sqlx::postgres::PgRow, column: &str) -> StorageResult<String> {
    row.try_get::<String, _>(column)
        .map_err(|e| StorageError::Backend(e.to_string()))
}

fn to_json<T: serde::Serialize>(value: &T) -> StorageResult<serde_json::Value> {
    serde_json::to_value(value).map_err(|e| StorageError::Serialization(e.to_string()))
}

fn map_sqlx_conflict(err: sqlx::Error) -> StorageError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.code().as_deref() == Some("23505") {
            return StorageError::Conflict(db_err.message().to_string());
        }
    }
    StorageError::Backend(err.to_string())
}

fn to_i64(value: usize) -> StorageResult<i64> {
    i64::try_from(value)
        .map_err(|_| StorageError::InvalidInput("window value too large".to_string()))
}
