//! Stories about requests picking up their tenant's context

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::Value;
use tower::ServiceExt;

use tenant_bridge::server::router;

use super::helpers::{Bridge, FakeConfigSource};

fn request(path: &str, stack_id: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(path);
    if let Some(id) = stack_id {
        builder = builder.header("x-stack-id", id).header("x-user", "admin");
    }
    builder.body(Body::empty()).unwrap()
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

/// Story: A tenant with a valid ConfigMap gets a working session
#[tokio::test]
async fn story_configured_tenant_gets_its_session() {
    let source = Arc::new(FakeConfigSource::default());
    source.put_sqlite("42-mt-config", "/data/t42.db", "1");
    let bridge = Bridge::start(source);
    let app = router(bridge.layer.clone());

    let (status, body) = send(&app, request("/api/tenant", Some("42"))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["tenantId"], 42);
    assert_eq!(body["user"], "admin");
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["session"], "sqlite:///data/t42.db");

    bridge.stop().await;
}

/// Story: A tenant without a ConfigMap is served with a degraded context
///
/// The request is not rejected; the handler sees no session.
#[tokio::test]
async fn story_unconfigured_tenant_is_degraded_not_rejected() {
    let bridge = Bridge::start(Arc::new(FakeConfigSource::default()));
    let app = router(bridge.layer.clone());

    let (status, body) = send(&app, request("/api/tenant", Some("7"))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["reason"], "config map 7-mt-config not found");
    assert!(body.get("session").is_none());

    bridge.stop().await;
}

/// Story: An unreachable API server degrades the tenant instead of failing requests
#[tokio::test]
async fn story_fetch_failure_degrades_tenant() {
    let source = Arc::new(FakeConfigSource::default());
    source.put_sqlite("42-mt-config", "/data/t42.db", "1");
    source.fail_fetches(true);
    let bridge = Bridge::start(source);
    let app = router(bridge.layer.clone());

    let (status, body) = send(&app, request("/api/tenant", Some("42"))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "degraded");

    bridge.stop().await;
}

/// Story: Many requests for one tenant share a single context build
#[tokio::test]
async fn story_requests_share_one_build() {
    let source = Arc::new(FakeConfigSource::default());
    source.put_sqlite("42-mt-config", "/data/t42.db", "1");
    let bridge = Bridge::start(source.clone());
    let app = router(bridge.layer.clone());

    let requests: Vec<_> = (0..10)
        .map(|_| {
            let app = app.clone();
            tokio::spawn(async move { send(&app, request("/api/tenant", Some("42"))).await })
        })
        .collect();
    for req in requests {
        let (status, _) = req.await.unwrap();
        assert_eq!(status, StatusCode::OK);
    }

    assert_eq!(source.fetches(), 1);
    assert!(bridge.cache.contains(42.into()));

    bridge.stop().await;
}

/// Story: Requests outside the API prefix never touch tenant state
#[tokio::test]
async fn story_health_checks_skip_tenant_resolution() {
    let source = Arc::new(FakeConfigSource::default());
    let bridge = Bridge::start(source.clone());
    let app = router(bridge.layer.clone());

    let response = app
        .clone()
        .oneshot(request("/healthz", Some("42")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(source.fetches(), 0);

    bridge.stop().await;
}

/// Story: An API request without identity passes the middleware, but a
/// handler that needs a tenant reports the missing context
#[tokio::test]
async fn story_anonymous_api_request_has_no_tenant() {
    let source = Arc::new(FakeConfigSource::default());
    let bridge = Bridge::start(source.clone());
    let app = router(bridge.layer.clone());

    let (status, body) = send(&app, request("/api/tenant", None)).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["kind"], "Status");
    assert_eq!(source.fetches(), 0);

    bridge.stop().await;
}
