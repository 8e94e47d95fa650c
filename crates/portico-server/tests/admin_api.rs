//! Integration tests for the cache-management admin surface, run against an
//! in-process durable tier.

use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use serde_json::{Value, json};
use tower::ServiceExt;

use portico_authz::{AuthorityContext, AuthzResult, RoleSource, RoleTablePolicy};
use portico_cache::{CacheKey, HybridCache, MemoryStore, NS_USER, USER_PROFILE};
use portico_server::{AppState, build_app};

struct FixedRoleSource(Vec<String>);

#[async_trait]
impl RoleSource for FixedRoleSource {
    async fn roles_for(&self, _user_id: &str) -> AuthzResult<Vec<String>> {
        Ok(self.0.clone())
    }
}

fn test_state() -> AppState {
    let cache = Arc::new(HybridCache::new(Some(MemoryStore::shared())));
    AppState::new(
        cache,
        Arc::new(FixedRoleSource(vec!["customer".to_string()])),
        Arc::new(RoleTablePolicy),
    )
}

fn test_app(state: &AppState) -> Router {
    build_app(state.clone())
}

fn admin_request(method: &str, uri: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("x-portico-user", "admin-1")
        .header("x-portico-roles", "admin,customer");
    match body {
        Some(json) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn status_requires_authentication() {
    let app = test_app(&test_state());

    let response = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/admin/cache/status")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn status_requires_admin_role() {
    let app = test_app(&test_state());

    let response = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/admin/cache/status")
                .header("x-portico-user", "u1")
                .header("x-portico-roles", "customer")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn status_reports_cache_shape() {
    let app = test_app(&test_state());

    let response = app
        .oneshot(admin_request("GET", "/admin/cache/status", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["durableAvailable"], Value::Bool(true));
    assert!(body["memoryEntries"].is_u64());
    assert!(body["metrics"]["memoryHits"].is_u64());
    assert!(body["metrics"]["sourceHits"].is_u64());
}

#[tokio::test]
async fn invalidate_rejects_missing_fields() {
    let state = test_state();

    // Missing key.
    let response = test_app(&state)
        .oneshot(admin_request(
            "POST",
            "/admin/cache/invalidate",
            Some(json!({ "namespace": "user" })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Missing namespace.
    let response = test_app(&state)
        .oneshot(admin_request(
            "POST",
            "/admin/cache/invalidate",
            Some(json!({ "key": "u1:profile" })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Unknown namespace.
    let response = test_app(&state)
        .oneshot(admin_request(
            "POST",
            "/admin/cache/invalidate",
            Some(json!({ "key": "u1:profile", "namespace": "bogus" })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn invalidate_key_accepts_encoded_segments_and_reports_counts() {
    let state = test_state();

    // A key whose first segment contains the delimiter, stored escaped.
    let key = CacheKey::new(NS_USER, &["a:b", "profile"]);
    state
        .cache
        .insert(&key, &"cached", &USER_PROFILE)
        .await
        .unwrap();

    // The logical key is the rendered form minus the namespace prefix.
    let response = test_app(&state)
        .oneshot(admin_request(
            "POST",
            "/admin/cache/invalidate",
            Some(json!({ "key": "a%3Ab:profile", "namespace": "user" })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["removedEntries"], json!(2));
    assert_eq!(state.cache.peek::<String>(&key, &USER_PROFILE).await, None);

    // Repeating the call finds nothing left to remove.
    let response = test_app(&state)
        .oneshot(admin_request(
            "POST",
            "/admin/cache/invalidate",
            Some(json!({ "key": "a%3Ab:profile", "namespace": "user" })),
        ))
        .await
        .unwrap();
    let body = json_body(response).await;
    assert_eq!(body["removedEntries"], json!(0));
}

#[tokio::test]
async fn invalidate_user_clears_cached_decisions() {
    let state = test_state();

    // Warm a decision so there is something to invalidate.
    let ctx = AuthorityContext::new("u1", "products", "read");
    let first = state.authority.check_authority(&ctx).await;
    assert!(first.allowed);
    assert!(!first.is_cached());

    let response = test_app(&state)
        .oneshot(admin_request(
            "POST",
            "/admin/cache/invalidate-user",
            Some(json!({ "userId": "u1" })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["status"], "ok");
    assert!(body["removedEntries"].as_u64().unwrap() >= 1);

    // The next check recomputes.
    let again = state.authority.check_authority(&ctx).await;
    assert!(!again.is_cached());
}

#[tokio::test]
async fn invalidate_user_requires_user_id() {
    let response = test_app(&test_state())
        .oneshot(admin_request(
            "POST",
            "/admin/cache/invalidate-user",
            Some(json!({})),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn invalidate_all_is_idempotent() {
    let state = test_state();

    let _ = state
        .authority
        .check_authority(&AuthorityContext::new("u1", "products", "read"))
        .await;

    let response = test_app(&state)
        .oneshot(admin_request("POST", "/admin/cache/invalidate-all", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert!(body["removedEntries"].as_u64().unwrap() >= 1);

    // Calling again on an empty namespace still succeeds.
    let response = test_app(&state)
        .oneshot(admin_request("POST", "/admin/cache/invalidate-all", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["removedEntries"], json!(0));
}

#[tokio::test]
async fn reset_metrics_zeroes_counters() {
    let state = test_state();

    let _ = state
        .authority
        .check_authority(&AuthorityContext::new("u1", "products", "read"))
        .await;
    assert!(state.cache.metrics().source_hits > 0);

    let response = test_app(&state)
        .oneshot(admin_request("POST", "/admin/cache/reset-metrics", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let snapshot = state.cache.metrics();
    assert_eq!(snapshot.source_hits, 0);
    assert_eq!(snapshot.memory_misses, 0);
}
