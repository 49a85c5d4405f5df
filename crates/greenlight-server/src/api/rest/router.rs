//! API router configuration

use super::handlers;
use super::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Create the main API router
pub fn create_router(state: AppState) -> Router {
    let api_routes = Router::new()
        // Health
        .route("/health", get(handlers::health_check))
        // Definitions
        .route(
            "/workflows",
            post(handlers::create_workflow).get(handlers::list_workflows),
        )
        .route("/workflows/execute", post(handlers::execute_workflow))
        // Instances
        .route("/workflows/instances", get(handlers::list_instances))
        .route("/workflows/instances/:id", get(handlers::get_instance))
        // Actions
        .route(
            "/workflows/actions/pending",
            get(handlers::pending_actions),
        )
        .route(
            "/workflows/actions/:id/decide",
            post(handlers::decide_action),
        )
        // Audit
        .route("/workflows/audit", get(handlers::list_audit))
        // Definition by id (after the static sub-paths)
        .route("/workflows/:id", get(handlers::get_workflow))
        .route("/workflows/:id/publish", post(handlers::publish_workflow))
        .route("/workflows/:id/start", post(handlers::start_workflow));

    Router::new()
        .nest("/api/v1", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::rest::state::{AppState, SharedStorage};
    use crate::tenant::{ROLE_HEADER, TENANT_HEADER, USER_HEADER};
    use axum::body::Body;
    use axum::http::{Method, Request, StatusCode};
    use greenlight_engine::{EffectSink, Executor, SystemClock, TracingEffectSink};
    use greenlight_store::InMemoryWorkflowStorage;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn app() -> Router {
        let store: SharedStorage = Arc::new(InMemoryWorkflowStorage::new());
        let effects: Arc<dyn EffectSink> = Arc::new(TracingEffectSink);
        let executor = Arc::new(Executor::new(
            Arc::clone(&store),
            effects,
            Arc::new(SystemClock),
        ));
        create_router(AppState { store, executor })
    }

    async fn send(
        app: &Router,
        method: Method,
        uri: &str,
        role: &str,
        tenant: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(TENANT_HEADER, tenant)
            .header(USER_HEADER, format!("user-{role}"))
            .header(ROLE_HEADER, role);

        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&body).unwrap()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    fn leave_workflow(publish: bool) -> Value {
        json!({
            "name": "Leave approval",
            "description": "Routes leave requests through manager approval",
            "publish": publish,
            "workflow": {
                "nodes": [
                    {"id": "trigger", "label": "On leave.submitted", "type": "trigger",
                     "config": {"event": "leave.submitted"}},
                    {"id": "manager", "label": "Manager approval", "type": "approval",
                     "config": {"approver_role": "manager"}},
                    {"id": "done", "label": "Complete", "type": "complete"}
                ],
                "connections": [
                    {"from": "trigger", "to": "manager"},
                    {"from": "manager", "to": "done"}
                ]
            }
        })
    }

    #[tokio::test]
    async fn health_endpoint() {
        let app = app();
        let (status, body) =
            send(&app, Method::GET, "/api/v1/health", "employee", "acme", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn missing_tenant_headers_are_unauthorized() {
        let app = app();
        let request = Request::builder()
            .method(Method::GET)
            .uri("/api/v1/workflows")
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn full_approval_flow_over_http() {
        let app = app();

        // Create + publish the definition.
        let (status, definition) = send(
            &app,
            Method::POST,
            "/api/v1/workflows",
            "hr-admin",
            "acme",
            Some(leave_workflow(true)),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(definition["status"], "published");
        let definition_id = definition["id"].as_str().unwrap().to_string();

        // Start an instance.
        let (status, instance) = send(
            &app,
            Method::POST,
            &format!("/api/v1/workflows/{definition_id}/start"),
            "employee",
            "acme",
            Some(json!({"trigger_payload": {"days": 3}})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(instance["status"], "running");
        let instance_id = instance["id"].as_str().unwrap().to_string();

        // The manager sees the pending action.
        let (status, pending) = send(
            &app,
            Method::GET,
            "/api/v1/workflows/actions/pending",
            "manager",
            "acme",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let pending = pending.as_array().unwrap();
        assert_eq!(pending.len(), 1);
        let action_id = pending[0]["id"].as_str().unwrap().to_string();

        // An hr caller may not decide a manager action.
        let (status, body) = send(
            &app,
            Method::POST,
            &format!("/api/v1/workflows/actions/{action_id}/decide"),
            "hr",
            "acme",
            Some(json!({"decision": "approved"})),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["code"], "ROLE_MISMATCH");

        // The manager approves.
        let (status, decided) = send(
            &app,
            Method::POST,
            &format!("/api/v1/workflows/actions/{action_id}/decide"),
            "manager",
            "acme",
            Some(json!({"decision": "approved", "reason": "ok"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(decided["applied"], true);
        assert_eq!(decided["instance_status"], "completed");

        // A second identical decision is a reported no-op, not an error.
        let (status, replay) = send(
            &app,
            Method::POST,
            &format!("/api/v1/workflows/actions/{action_id}/decide"),
            "manager",
            "acme",
            Some(json!({"decision": "rejected"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(replay["applied"], false);
        assert_eq!(replay["action_status"], "approved");

        // The instance detail shows the decided action.
        let (status, detail) = send(
            &app,
            Method::GET,
            &format!("/api/v1/workflows/instances/{instance_id}"),
            "employee",
            "acme",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(detail["instance"]["status"], "completed");
        assert_eq!(detail["actions"][0]["status"], "approved");

        // The audit trail recorded the lifecycle.
        let (status, audit) = send(
            &app,
            Method::GET,
            "/api/v1/workflows/audit",
            "hr-admin",
            "acme",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let actions: Vec<&str> = audit
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["action"].as_str().unwrap())
            .collect();
        assert!(actions.contains(&"instance_started"));
        assert!(actions.contains(&"action_decided"));
        assert!(actions.contains(&"instance_completed"));
    }

    #[tokio::test]
    async fn draft_then_publish_flow() {
        let app = app();

        let (status, definition) = send(
            &app,
            Method::POST,
            "/api/v1/workflows",
            "hr-admin",
            "acme",
            Some(leave_workflow(false)),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(definition["status"], "draft");
        let definition_id = definition["id"].as_str().unwrap().to_string();

        // Starting a draft is a conflict.
        let (status, _) = send(
            &app,
            Method::POST,
            &format!("/api/v1/workflows/{definition_id}/start"),
            "employee",
            "acme",
            Some(json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, published) = send(
            &app,
            Method::POST,
            &format!("/api/v1/workflows/{definition_id}/publish"),
            "hr-admin",
            "acme",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(published["status"], "published");
    }

    #[tokio::test]
    async fn invalid_graph_returns_all_violations() {
        let app = app();

        // No trigger, and a dangling edge.
        let payload = json!({
            "name": "Broken",
            "publish": true,
            "workflow": {
                "nodes": [
                    {"id": "done", "type": "complete"}
                ],
                "connections": []
            }
        });
        let (status, body) = send(
            &app,
            Method::POST,
            "/api/v1/workflows",
            "hr-admin",
            "acme",
            Some(payload),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["code"], "VALIDATION_ERROR");
        assert!(body["details"]
            .as_array()
            .unwrap()
            .iter()
            .any(|v| v["kind"] == "no_trigger_node"));
    }

    #[tokio::test]
    async fn definitions_are_tenant_isolated() {
        let app = app();

        let (_, definition) = send(
            &app,
            Method::POST,
            "/api/v1/workflows",
            "hr-admin",
            "acme",
            Some(leave_workflow(true)),
        )
        .await;
        let definition_id = definition["id"].as_str().unwrap().to_string();

        // The other tenant cannot see it at all.
        let (status, _) = send(
            &app,
            Method::GET,
            &format!("/api/v1/workflows/{definition_id}"),
            "hr-admin",
            "globex",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn dry_run_previews_unsaved_graph() {
        let app = app();

        let payload = json!({
            "workflow": leave_workflow(false)["workflow"],
            "trigger_payload": {"days": 3}
        });
        let (status, simulation) = send(
            &app,
            Method::POST,
            "/api/v1/workflows/execute",
            "hr-admin",
            "acme",
            Some(payload),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(simulation["status"], "running");
        assert_eq!(simulation["approvals"][0]["approver_role"], "manager");

        // Nothing was persisted.
        let (_, instances) = send(
            &app,
            Method::GET,
            "/api/v1/workflows/instances",
            "hr-admin",
            "acme",
            None,
        )
        .await;
        assert!(instances.as_array().unwrap().is_empty());
    }
}
