//! HTTP surface
//!
//! Upstream authentication is represented by [`trusted_header_auth`], which
//! trusts identity headers set by a fronting proxy.

use axum::extract::Request;
use axum::http::HeaderMap;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tracing::debug;

use crate::middleware::{resolve_tenant, AuthenticatedUser, CurrentTenant, TenantLayer};
use crate::tenant::{TenantId, TenantStatus};

/// Header carrying the caller's stack (tenant) id
pub const STACK_ID_HEADER: &str = "x-stack-id";

/// Header carrying the caller's login
pub const USER_HEADER: &str = "x-user";

/// Build the router: health check plus tenant-aware API routes
pub fn router(layer: TenantLayer) -> Router {
    let tenant_path = format!("{}/tenant", layer.api_prefix().trim_end_matches('/'));

    Router::new()
        .route(&tenant_path, get(tenant_info))
        .layer(middleware::from_fn_with_state(layer, resolve_tenant))
        .layer(middleware::from_fn(trusted_header_auth))
        .route("/healthz", get(healthz))
}

async fn healthz() -> &'static str {
    "ok"
}

/// Attach an [`AuthenticatedUser`] derived from proxy-set headers
pub async fn trusted_header_auth(mut request: Request, next: Next) -> Response {
    match user_from_headers(request.headers()) {
        Some(user) => {
            request.extensions_mut().insert(user);
        }
        None => debug!(path = %request.uri().path(), "request has no identity headers"),
    }
    next.run(request).await
}

fn user_from_headers(headers: &HeaderMap) -> Option<AuthenticatedUser> {
    let tenant_id = headers
        .get(STACK_ID_HEADER)?
        .to_str()
        .ok()?
        .parse::<TenantId>()
        .ok()?;
    let login = headers
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    Some(AuthenticatedUser { login, tenant_id })
}

/// Response body of the tenant info endpoint
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantInfo {
    /// Tenant the request resolved to
    pub tenant_id: TenantId,
    /// Login of the caller
    pub user: String,
    /// "healthy" or "degraded"
    pub status: &'static str,
    /// Why the context is degraded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Redacted session descriptor
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,
}

async fn tenant_info(
    CurrentTenant(tenant): CurrentTenant,
    request: Request,
) -> Json<TenantInfo> {
    let user = request
        .extensions()
        .get::<AuthenticatedUser>()
        .map(|u| u.login.clone())
        .unwrap_or_default();
    let (status, reason) = match tenant.status() {
        TenantStatus::Healthy => ("healthy", None),
        TenantStatus::Degraded { reason } => ("degraded", Some(reason.clone())),
    };
    Json(TenantInfo {
        tenant_id: tenant.tenant_id(),
        user,
        status,
        reason,
        session: tenant.session().map(|s| s.descriptor().to_string()),
    })
}
