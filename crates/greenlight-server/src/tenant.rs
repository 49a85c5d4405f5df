//! Tenant context extraction
//!
//! Authentication itself is an upstream collaborator: the gateway
//! terminates the session and forwards the caller's identity as
//! headers. Handlers never see credentials — only this resolved
//! context — and every store call they make is filtered by its
//! `tenant_id`.

use crate::error::ApiError;
use async_trait::async_trait;
use axum::{extract::FromRequestParts, http::request::Parts};
use greenlight_types::{TenantId, UserId};

pub const TENANT_HEADER: &str = "x-tenant-id";
pub const USER_HEADER: &str = "x-user-id";
pub const ROLE_HEADER: &str = "x-user-role";

/// The caller's resolved tenant, identity, and role
#[derive(Clone, Debug)]
pub struct TenantContext {
    pub tenant_id: TenantId,
    pub user_id: UserId,
    pub role: String,
}

#[async_trait]
impl<S> FromRequestParts<S> for TenantContext
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        };

        let tenant_id = header(TENANT_HEADER)
            .ok_or_else(|| ApiError::Unauthenticated(format!("missing {TENANT_HEADER} header")))?;
        let user_id = header(USER_HEADER)
            .ok_or_else(|| ApiError::Unauthenticated(format!("missing {USER_HEADER} header")))?;
        let role = header(ROLE_HEADER)
            .ok_or_else(|| ApiError::Unauthenticated(format!("missing {ROLE_HEADER} header")))?;

        Ok(TenantContext {
            tenant_id: TenantId::new(tenant_id),
            user_id: UserId::new(user_id),
            role,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    async fn extract(request: Request<()>) -> Result<TenantContext, ApiError> {
        let (mut parts, _) = request.into_parts();
        TenantContext::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn test_full_context() {
        let request = Request::builder()
            .header(TENANT_HEADER, "acme")
            .header(USER_HEADER, "emp-1")
            .header(ROLE_HEADER, "manager")
            .body(())
            .unwrap();

        let ctx = extract(request).await.unwrap();
        assert_eq!(ctx.tenant_id, TenantId::new("acme"));
        assert_eq!(ctx.user_id, UserId::new("emp-1"));
        assert_eq!(ctx.role, "manager");
    }

    #[tokio::test]
    async fn test_missing_tenant_is_unauthenticated() {
        let request = Request::builder()
            .header(USER_HEADER, "emp-1")
            .header(ROLE_HEADER, "manager")
            .body(())
            .unwrap();

        let result = extract(request).await;
        assert!(matches!(result, Err(ApiError::Unauthenticated(_))));
    }

    #[tokio::test]
    async fn test_blank_header_rejected() {
        let request = Request::builder()
            .header(TENANT_HEADER, "  ")
            .header(USER_HEADER, "emp-1")
            .header(ROLE_HEADER, "manager")
            .body(())
            .unwrap();

        let result = extract(request).await;
        assert!(matches!(result, Err(ApiError::Unauthenticated(_))));
    }
}
