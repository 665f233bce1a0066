//! Request-scoped tenant resolution
//!
//! [`resolve_tenant`] runs after authentication. For API requests carrying an
//! [`AuthenticatedUser`] it attaches the tenant's `Arc<TenantContext>` to the
//! request; handlers read it back with [`CurrentTenant`].

use std::sync::Arc;

use axum::extract::{FromRequestParts, Request, State};
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::Response;
use tracing::{debug, trace};

use crate::tenant::{TenantCache, TenantContext, TenantId};
use crate::Error;

/// Identity established by the authentication layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    /// Login of the user
    pub login: String,
    /// Tenant the user belongs to
    pub tenant_id: TenantId,
}

/// State for [`resolve_tenant`]
#[derive(Clone)]
pub struct TenantLayer {
    cache: TenantCache,
    api_prefix: Arc<str>,
}

impl TenantLayer {
    /// Resolve tenants from `cache` for paths under `api_prefix`
    pub fn new(cache: TenantCache, api_prefix: impl Into<Arc<str>>) -> Self {
        Self {
            cache,
            api_prefix: api_prefix.into(),
        }
    }

    /// Path prefix that receives tenant resolution
    pub fn api_prefix(&self) -> &str {
        &self.api_prefix
    }
}

/// Attach the caller's tenant context to API requests.
///
/// Requests outside the API prefix, or without an authenticated user, pass
/// through untouched. Never rejects a request.
pub async fn resolve_tenant(
    State(layer): State<TenantLayer>,
    mut request: Request,
    next: Next,
) -> Response {
    if !request.uri().path().starts_with(layer.api_prefix()) {
        return next.run(request).await;
    }

    let Some(user) = request.extensions().get::<AuthenticatedUser>().cloned() else {
        debug!(path = %request.uri().path(), "no authenticated user, skipping tenant resolution");
        return next.run(request).await;
    };

    let tenant = layer.cache.get_or_build(user.tenant_id).await;
    trace!(tenant = %user.tenant_id, login = %user.login, "attached tenant context");
    request.extensions_mut().insert(tenant);
    next.run(request).await
}

/// Extractor for the tenant context attached by [`resolve_tenant`]
#[derive(Debug, Clone)]
pub struct CurrentTenant(pub Arc<TenantContext>);

impl<S> FromRequestParts<S> for CurrentTenant
where
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Arc<TenantContext>>()
            .cloned()
            .map(CurrentTenant)
            .ok_or_else(|| {
                Error::internal_with_context("middleware", "no tenant context on request")
            })
    }
}
