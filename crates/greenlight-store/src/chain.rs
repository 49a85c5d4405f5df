//! Audit chain hashing, shared by every adapter.

use crate::{StorageError, StorageResult};
use greenlight_types::AuditEvent;

/// Hash an audit event into its tenant's chain.
pub(crate) fn compute_audit_hash(
    event: &AuditEvent,
    previous_hash: Option<&str>,
    sequence: u64,
) -> StorageResult<String> {
    let serializable = serde_json::json!({
        "previous_hash": previous_hash,
        "sequence": sequence,
        "tenant_id": event.tenant_id.0,
        "entity_type": event.entity_type,
        "entity_id": event.entity_id,
        "action": event.action,
        "actor_id": event.actor_id.as_ref().map(|id| id.0.clone()),
        "reason": event.reason,
        "details": event.details,
        "created_at": event.created_at,
    });
    let serialized = serde_json::to_vec(&serializable)
        .map_err(|e| StorageError::Serialization(e.to_string()))?;
    Ok(blake3::hash(&serialized).to_hex().to_string())
}
