//! Action inbox and decision handlers.

use crate::api::rest::state::AppState;
use crate::error::{ApiError, ApiResult};
use crate::tenant::TenantContext;
use axum::{
    extract::{Path, Query, State},
    Json,
};
use greenlight_store::QueryWindow;
use greenlight_types::{ActionId, ActionStatus, Decision, InstanceStatus, WorkflowAction};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct PendingQuery {
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct DecidePayload {
    pub decision: Decision,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DecideResponse {
    /// False when the action was already resolved — the caller lost the
    /// race, which is a no-op, not a failure.
    pub applied: bool,
    pub action_status: ActionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_status: Option<InstanceStatus>,
}

/// List pending actions assigned to the caller's role, oldest first.
pub async fn pending_actions(
    State(state): State<AppState>,
    ctx: TenantContext,
    Query(query): Query<PendingQuery>,
) -> ApiResult<Json<Vec<WorkflowAction>>> {
    let window = QueryWindow {
        limit: query.limit.unwrap_or(50),
        offset: query.offset.unwrap_or(0),
    };
    let actions = state
        .store
        .pending_actions_for_role(&ctx.tenant_id, &ctx.role, window)
        .await?;
    Ok(Json(actions))
}

/// Decide a pending action: the guarded pending→resolved transition
/// followed by a resume of the owning instance when this caller won.
pub async fn decide_action(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(id): Path<String>,
    Json(payload): Json<DecidePayload>,
) -> ApiResult<Json<DecideResponse>> {
    let action_id = ActionId::new(id.clone());
    let action = state
        .store
        .get_action(&ctx.tenant_id, &action_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("action '{id}' not found")))?;

    // Tenant filters make a mismatch unreachable; if it ever fires the
    // row mapping is broken and nothing may proceed on this action.
    if action.tenant_id != ctx.tenant_id {
        return Err(ApiError::TenantMismatch(format!(
            "action '{id}' belongs to another tenant"
        )));
    }

    if action.assignee_role != ctx.role {
        return Err(ApiError::RoleMismatch(format!(
            "action is assigned to role '{}'",
            action.assignee_role
        )));
    }

    let outcome = state
        .executor
        .decide(
            &ctx.tenant_id,
            &action_id,
            payload.decision,
            &ctx.user_id,
            payload.reason,
        )
        .await?;

    Ok(Json(DecideResponse {
        applied: outcome.applied,
        action_status: outcome.action.status,
        instance_status: outcome.instance.map(|instance| instance.status),
    }))
}
