//! Error types for greenlight-server

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use greenlight_engine::EngineError;
use greenlight_store::StorageError;
use greenlight_types::{Violation, WorkflowError};
use serde::Serialize;
use thiserror::Error;

/// API-level errors
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (or owned by another tenant)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Bad request
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Structurally invalid workflow graph
    #[error("Workflow definition is invalid ({} violation(s))", .0.len())]
    Validation(Vec<Violation>),

    /// Conflict (already published, duplicate, ...)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Missing or unusable tenant context headers
    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    /// Caller's role does not match the action's assignee role
    #[error("Role mismatch: {0}")]
    RoleMismatch(String),

    /// A request referenced a tenant other than the session tenant.
    /// Always fatal, never silently corrected.
    #[error("Tenant mismatch: {0}")]
    TenantMismatch(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_ERROR"),
            ApiError::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
            ApiError::Unauthenticated(_) => (StatusCode::UNAUTHORIZED, "UNAUTHENTICATED"),
            ApiError::RoleMismatch(_) => (StatusCode::FORBIDDEN, "ROLE_MISMATCH"),
            ApiError::TenantMismatch(_) => (StatusCode::FORBIDDEN, "TENANT_MISMATCH"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };

        let details = match &self {
            ApiError::Validation(violations) => serde_json::to_value(violations).ok(),
            _ => None,
        };

        let body = ErrorResponse {
            error: self.to_string(),
            code: code.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(message) => ApiError::NotFound(message),
            StorageError::Conflict(message) => ApiError::Conflict(message),
            StorageError::InvariantViolation(message) => ApiError::Conflict(message),
            StorageError::InvalidInput(message) => ApiError::BadRequest(message),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<WorkflowError> for ApiError {
    fn from(err: WorkflowError) -> Self {
        match err {
            WorkflowError::Invalid(violations) => ApiError::Validation(violations),
            WorkflowError::DefinitionNotFound(_)
            | WorkflowError::InstanceNotFound(_)
            | WorkflowError::ActionNotFound(_) => ApiError::NotFound(err.to_string()),
            WorkflowError::NotPublished(_) | WorkflowError::Immutable(_) => {
                ApiError::Conflict(err.to_string())
            }
            other => ApiError::BadRequest(other.to_string()),
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Workflow(inner) => inner.into(),
            EngineError::Storage(inner) => inner.into(),
        }
    }
}

/// Result type alias for API operations
pub type ApiResult<T> = Result<T, ApiError>;
