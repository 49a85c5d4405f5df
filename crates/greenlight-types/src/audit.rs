//! Audit entries: append-only record of every state transition
//!
//! Audit rows outlive the instances they describe and are never
//! updated or deleted. Stored entries are sequence-numbered and
//! hash-chained per tenant; the chain is computed by the store.

use crate::tenant::{TenantId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for an audit entry
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AuditId(pub String);

impl AuditId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for AuditId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An audit event to append — what the caller knows
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Owning tenant
    pub tenant_id: TenantId,
    /// Kind of entity the event concerns ("workflow_instance", ...)
    pub entity_type: String,
    /// Identifier of that entity
    pub entity_id: String,
    /// What happened ("instance_started", "action_decided", ...)
    pub action: String,
    /// Who caused it; `None` for system/auto actions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor_id: Option<UserId>,
    /// Free-form reason
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Structured detail payload
    pub details: serde_json::Value,
    /// When the event occurred
    pub created_at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(
        tenant_id: TenantId,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id,
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            action: action.into(),
            actor_id: None,
            reason: None,
            details: serde_json::Value::Null,
            created_at: Utc::now(),
        }
    }

    pub fn with_actor(mut self, actor: UserId) -> Self {
        self.actor_id = Some(actor);
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

/// A stored audit entry — the event plus its place in the chain
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Unique entry identifier
    pub id: AuditId,
    /// Owning tenant
    pub tenant_id: TenantId,
    /// Position in the tenant's chain, starting at 1
    pub sequence: u64,
    /// Kind of entity the event concerns
    pub entity_type: String,
    /// Identifier of that entity
    pub entity_id: String,
    /// What happened
    pub action: String,
    /// Who caused it; `None` for system/auto actions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor_id: Option<UserId>,
    /// Free-form reason
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Structured detail payload
    pub details: serde_json::Value,
    /// Hash of the previous entry in this tenant's chain
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_hash: Option<String>,
    /// Hash over this entry and the previous hash
    pub hash: String,
    /// When the event occurred
    pub created_at: DateTime<Utc>,
}
