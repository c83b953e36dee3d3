//! Route-level integration tests, exercised via `tower::ServiceExt::oneshot`
//! against an in-memory persistence backend, asserting request/response
//! bodies without a live server.

use std::sync::Arc;

use aseo_core::config::ServiceConfig;
use aseo_core::persistence::{MemPersistence, Persistence};
use aseo_api::routes::build_router;
use aseo_api::state::AppState;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

fn test_state() -> AppState {
    let persistence: Arc<dyn Persistence> = Arc::new(MemPersistence::new());
    AppState::new(persistence, &ServiceConfig::default())
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}

#[tokio::test]
async fn register_tenant_then_register_site_with_issued_key() {
    let router = build_router(test_state());

    let register = json_request(
        "POST",
        "/tenants",
        json!({"name": "Acme", "email": "a@acme.test", "plan_type": "free", "billing_cycle": "monthly"}),
    );
    let response = router.clone().oneshot(register).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await;
    let api_key = body["api_key"].as_str().unwrap().to_string();
    assert!(api_key.starts_with("aseo_"));
    assert_eq!(body["allowance"], 100);

    let site_request = Request::builder()
        .method("POST")
        .uri("/sites")
        .header("content-type", "application/json")
        .header("x-api-key", &api_key)
        .body(Body::from(serde_json::to_vec(&json!({"url": "https://example.test"})).unwrap()))
        .unwrap();
    let response = router.clone().oneshot(site_request).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await;
    assert_eq!(body["status"], "pending");

    let duplicate = Request::builder()
        .method("POST")
        .uri("/sites")
        .header("content-type", "application/json")
        .header("x-api-key", &api_key)
        .body(Body::from(serde_json::to_vec(&json!({"url": "https://example.test"})).unwrap()))
        .unwrap();
    let response = router.oneshot(duplicate).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn missing_credential_is_rejected_with_401() {
    let router = build_router(test_state());
    let request = Request::builder().method("GET").uri("/sites").body(Body::empty()).unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["error"], "invalid_credential");
}

#[tokio::test]
async fn admin_routes_require_shared_secret() {
    let router = build_router(test_state());

    let unauthenticated = Request::builder()
        .method("POST")
        .uri("/billing/reset")
        .body(Body::empty())
        .unwrap();
    let response = router.clone().oneshot(unauthenticated).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let authenticated = Request::builder()
        .method("POST")
        .uri("/billing/reset")
        .header("x-admin-key", "change-me")
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(authenticated).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn usage_snapshot_reflects_plan_allowance() {
    let state = test_state();
    let router = build_router(state.clone());

    let register = json_request(
        "POST",
        "/tenants",
        json!({"name": "Beta", "email": "b@beta.test", "plan_type": "pro", "billing_cycle": "monthly"}),
    );
    let response = router.clone().oneshot(register).await.unwrap();
    let body = body_json(response).await;
    let api_key = body["api_key"].as_str().unwrap().to_string();

    let usage_request = Request::builder()
        .method("GET")
        .uri("/usage")
        .header("x-api-key", &api_key)
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(usage_request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["plan_id"], "pro");
    assert_eq!(body["allowance"], 1000);
    // The `TenantCredential` extractor's own gate check already recorded one
    // `api_call` usage event before this handler re-reads the live count.
    assert_eq!(body["current_usage"], 1);
}

#[tokio::test]
async fn rotating_credential_invalidates_the_old_one() {
    let router = build_router(test_state());

    let register = json_request(
        "POST",
        "/tenants",
        json!({"name": "Gamma", "email": "g@gamma.test", "plan_type": "free", "billing_cycle": "monthly"}),
    );
    let response = router.clone().oneshot(register).await.unwrap();
    let body = body_json(response).await;
    let old_key = body["api_key"].as_str().unwrap().to_string();

    let rotate_request = Request::builder()
        .method("POST")
        .uri("/tenants/credential/rotate")
        .header("x-api-key", &old_key)
        .body(Body::empty())
        .unwrap();
    let response = router.clone().oneshot(rotate_request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let new_key = body["api_key"].as_str().unwrap().to_string();
    assert_ne!(old_key, new_key);

    let stale_request = Request::builder()
        .method("GET")
        .uri("/usage")
        .header("x-api-key", &old_key)
        .body(Body::empty())
        .unwrap();
    let response = router.clone().oneshot(stale_request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let fresh_request = Request::builder()
        .method("GET")
        .uri("/usage")
        .header("x-api-key", &new_key)
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(fresh_request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn health_check_requires_no_credential() {
    let router = build_router(test_state());
    let request = Request::builder().method("GET").uri("/health").body(Body::empty()).unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
