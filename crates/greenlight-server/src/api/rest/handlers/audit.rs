//! Audit trail handlers.

use crate::api::rest::state::AppState;
use crate::error::ApiResult;
use crate::tenant::TenantContext;
use axum::{
    extract::{Query, State},
    Json,
};
use greenlight_store::QueryWindow;
use greenlight_types::AuditEntry;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct AuditQuery {
    #[serde(default)]
    pub entity_id: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: Option<usize>,
}

/// List audit entries newest-first, optionally for one entity.
pub async fn list_audit(
    State(state): State<AppState>,
    ctx: TenantContext,
    Query(query): Query<AuditQuery>,
) -> ApiResult<Json<Vec<AuditEntry>>> {
    let window = QueryWindow {
        limit: query.limit.unwrap_or(100),
        offset: query.offset.unwrap_or(0),
    };
    let entries = state
        .store
        .list_audit(&ctx.tenant_id, query.entity_id.as_deref(), window)
        .await?;
    Ok(Json(entries))
}
