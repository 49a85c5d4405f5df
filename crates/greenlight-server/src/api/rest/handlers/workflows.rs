//! Workflow definition and instance handlers.

use crate::api::rest::state::AppState;
use crate::error::{ApiError, ApiResult};
use crate::tenant::TenantContext;
use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::{DateTime, Utc};
use greenlight_engine::Simulation;
use greenlight_store::QueryWindow;
use greenlight_types::{
    DefinitionId, Edge, InstanceId, Node, WorkflowAction, WorkflowDefinition, WorkflowInstance,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Default page size for listings
const DEFAULT_LIMIT: usize = 50;

#[derive(Debug, Deserialize)]
pub struct GraphPayload {
    pub nodes: Vec<Node>,
    pub connections: Vec<Edge>,
}

#[derive(Debug, Deserialize)]
pub struct CreateWorkflowPayload {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub workflow: GraphPayload,
    /// Publish immediately; otherwise the definition stays a draft.
    #[serde(default)]
    pub publish: bool,
}

#[derive(Debug, Deserialize)]
pub struct StartWorkflowPayload {
    #[serde(default)]
    pub trigger_payload: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct ExecuteWorkflowPayload {
    #[serde(default)]
    pub name: Option<String>,
    pub workflow: GraphPayload,
    #[serde(default)]
    pub trigger_payload: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: Option<usize>,
}

impl ListQuery {
    fn window(&self) -> QueryWindow {
        QueryWindow {
            limit: self.limit.unwrap_or(DEFAULT_LIMIT),
            offset: self.offset.unwrap_or(0),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DefinitionSummary {
    pub id: DefinitionId,
    pub name: String,
    pub status: greenlight_types::DefinitionStatus,
    pub version: u32,
    pub nodes: usize,
    pub edges: usize,
    pub created_at: DateTime<Utc>,
}

impl From<&WorkflowDefinition> for DefinitionSummary {
    fn from(def: &WorkflowDefinition) -> Self {
        Self {
            id: def.id.clone(),
            name: def.name.clone(),
            status: def.status,
            version: def.version,
            nodes: def.node_count(),
            edges: def.edge_count(),
            created_at: def.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct InstanceDetailResponse {
    pub instance: WorkflowInstance,
    pub actions: Vec<WorkflowAction>,
}

/// Create a workflow definition, optionally publishing it right away.
pub async fn create_workflow(
    State(state): State<AppState>,
    ctx: TenantContext,
    Json(payload): Json<CreateWorkflowPayload>,
) -> ApiResult<Json<WorkflowDefinition>> {
    let mut definition = build_definition(
        &ctx,
        &payload.name,
        payload.description.as_deref(),
        payload.workflow,
    )?;
    if payload.publish {
        definition.publish().map_err(ApiError::from)?;
    }
    state.store.create_definition(definition.clone()).await?;

    tracing::info!(
        tenant_id = %ctx.tenant_id,
        definition_id = %definition.id,
        status = definition.status.as_str(),
        "workflow definition created"
    );
    Ok(Json(definition))
}

/// List the tenant's workflow definitions.
pub async fn list_workflows(
    State(state): State<AppState>,
    ctx: TenantContext,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Vec<DefinitionSummary>>> {
    let definitions = state
        .store
        .list_definitions(&ctx.tenant_id, query.window())
        .await?;
    Ok(Json(definitions.iter().map(DefinitionSummary::from).collect()))
}

/// Fetch one workflow definition.
pub async fn get_workflow(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(id): Path<String>,
) -> ApiResult<Json<WorkflowDefinition>> {
    let definition = state
        .store
        .get_definition(&ctx.tenant_id, &DefinitionId::new(id.clone()))
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("workflow '{id}' not found")))?;
    Ok(Json(definition))
}

/// Validate and publish a draft definition, freezing it.
pub async fn publish_workflow(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(id): Path<String>,
) -> ApiResult<Json<WorkflowDefinition>> {
    let mut definition = state
        .store
        .get_definition(&ctx.tenant_id, &DefinitionId::new(id.clone()))
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("workflow '{id}' not found")))?;

    definition.publish().map_err(ApiError::from)?;
    state.store.publish_definition(&definition).await?;

    tracing::info!(
        tenant_id = %ctx.tenant_id,
        definition_id = %definition.id,
        version = definition.version,
        "workflow definition published"
    );
    Ok(Json(definition))
}

/// Start an instance of a published definition.
pub async fn start_workflow(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(id): Path<String>,
    Json(payload): Json<StartWorkflowPayload>,
) -> ApiResult<Json<WorkflowInstance>> {
    let instance = state
        .executor
        .start(
            &ctx.tenant_id,
            &DefinitionId::new(id),
            ctx.user_id.clone(),
            payload.trigger_payload.unwrap_or(Value::Null),
        )
        .await?;
    Ok(Json(instance))
}

/// Stateless dry run: simulate an unsaved graph without persisting an
/// instance. Used by the editor's preview.
pub async fn execute_workflow(
    State(state): State<AppState>,
    ctx: TenantContext,
    Json(payload): Json<ExecuteWorkflowPayload>,
) -> ApiResult<Json<Simulation>> {
    let name = payload.name.as_deref().unwrap_or("preview");
    let definition = build_definition(&ctx, name, None, payload.workflow)?;
    let simulation = state
        .executor
        .dry_run(&definition, payload.trigger_payload.unwrap_or(Value::Null))?;
    Ok(Json(simulation))
}

/// List the tenant's workflow instances.
pub async fn list_instances(
    State(state): State<AppState>,
    ctx: TenantContext,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Vec<WorkflowInstance>>> {
    let instances = state
        .store
        .list_instances(&ctx.tenant_id, query.window())
        .await?;
    Ok(Json(instances))
}

/// Fetch one instance together with its action trail.
pub async fn get_instance(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(id): Path<String>,
) -> ApiResult<Json<InstanceDetailResponse>> {
    let instance_id = InstanceId::new(id.clone());
    let instance = state
        .store
        .get_instance(&ctx.tenant_id, &instance_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("instance '{id}' not found")))?;
    let actions = state
        .store
        .actions_for_instance(&ctx.tenant_id, &instance_id)
        .await?;
    Ok(Json(InstanceDetailResponse { instance, actions }))
}

fn build_definition(
    ctx: &TenantContext,
    name: &str,
    description: Option<&str>,
    graph: GraphPayload,
) -> ApiResult<WorkflowDefinition> {
    let mut definition =
        WorkflowDefinition::new(ctx.tenant_id.clone(), name, ctx.user_id.clone());
    if let Some(description) = description {
        definition = definition.with_description(description);
    }
    for node in graph.nodes {
        definition
            .add_node(node)
            .map_err(|err| ApiError::BadRequest(err.to_string()))?;
    }
    for edge in graph.connections {
        definition
            .add_edge(edge)
            .map_err(|err| ApiError::BadRequest(err.to_string()))?;
    }
    Ok(definition)
}
