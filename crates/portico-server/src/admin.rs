//! Cache-management admin endpoints.
//!
//! # Endpoints
//!
//! - `GET  /admin/cache/status` — tier sizes, durable availability, metrics
//! - `POST /admin/cache/invalidate` — one key (`{"key", "namespace"}`)
//! - `POST /admin/cache/invalidate-namespace` — a whole namespace
//! - `POST /admin/cache/invalidate-user` — a user's authority decisions
//! - `POST /admin/cache/invalidate-all` — the entire authority namespace
//! - `POST /admin/cache/reset-metrics` — zero the counters
//!
//! All operations are idempotent and safe to repeat. Requests missing their
//! identifying fields are rejected with 400 before any invalidation runs.
//!
//! Access requires the `admin` role. Identity and roles arrive in the
//! `x-portico-user`/`x-portico-roles` headers set by the upstream auth
//! gateway — this process trusts the gateway and never verifies tokens
//! itself.

use axum::extract::{FromRequestParts, State};
use axum::http::request::Parts;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use portico_authz::ROLE_ADMIN;
use portico_cache::{CacheKey, NS_AUTHORITY, NS_SITE, NS_USER};

use crate::error::ApiError;
use crate::state::AppState;

/// Identity and role headers injected by the auth gateway.
const USER_HEADER: &str = "x-portico-user";
const ROLES_HEADER: &str = "x-portico-roles";

/// Extractor asserting the caller holds the `admin` role.
pub struct AdminAuth {
    pub user_id: String,
    pub roles: Vec<String>,
}

impl<S> FromRequestParts<S> for AdminAuth
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get(USER_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        if user_id.is_empty() {
            return Err(ApiError::unauthorized("Authentication required"));
        }

        let roles: Vec<String> = parts
            .headers
            .get(ROLES_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .split(',')
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty())
            .collect();

        if !roles.iter().any(|r| r == ROLE_ADMIN) {
            return Err(ApiError::forbidden("Admin role required"));
        }

        Ok(AdminAuth { user_id, roles })
    }
}

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidateKeyRequest {
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub namespace: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidateNamespaceRequest {
    #[serde(default)]
    pub namespace: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidateUserRequest {
    #[serde(default)]
    pub user_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidationOutcome {
    pub status: &'static str,
    pub removed_entries: usize,
}

impl InvalidationOutcome {
    fn ok(removed_entries: usize) -> Json<Self> {
        Json(Self {
            status: "ok",
            removed_entries,
        })
    }
}

/// Map a caller-supplied namespace string onto the crate's namespace
/// constants. Unknown namespaces are a client error, not a silent no-op.
fn resolve_namespace(namespace: &str) -> Result<&'static str, ApiError> {
    match namespace {
        ns if ns == NS_SITE => Ok(NS_SITE),
        ns if ns == NS_USER => Ok(NS_USER),
        ns if ns == NS_AUTHORITY => Ok(NS_AUTHORITY),
        other => Err(ApiError::bad_request(format!(
            "unknown namespace '{other}'"
        ))),
    }
}

fn require(field: Option<String>, name: &str) -> Result<String, ApiError> {
    match field {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(ApiError::bad_request(format!("'{name}' is required"))),
    }
}

// =============================================================================
// Handlers
// =============================================================================

/// GET /admin/cache/status
pub async fn cache_status(
    State(state): State<AppState>,
    _admin: AdminAuth,
) -> impl IntoResponse {
    Json(state.cache.status().await)
}

/// POST /admin/cache/invalidate
pub async fn invalidate_key(
    State(state): State<AppState>,
    _admin: AdminAuth,
    Json(body): Json<InvalidateKeyRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let namespace = resolve_namespace(&require(body.namespace, "namespace")?)?;
    let logical_key = require(body.key, "key")?;

    // The logical key is the rendered key minus its namespace prefix, with
    // segments already encoded; re-encoding here would make keys with
    // escaped segments unreachable.
    let key = CacheKey::from_encoded(namespace, &logical_key);
    let removed = state.cache.invalidate(&key).await;

    tracing::info!(key = %key, removed = removed, "admin invalidated cache key");
    Ok(InvalidationOutcome::ok(removed))
}

/// POST /admin/cache/invalidate-namespace
pub async fn invalidate_namespace(
    State(state): State<AppState>,
    _admin: AdminAuth,
    Json(body): Json<InvalidateNamespaceRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let namespace = resolve_namespace(&require(body.namespace, "namespace")?)?;
    let removed = state.cache.invalidate_namespace(namespace).await;

    tracing::info!(namespace = %namespace, removed = removed, "admin invalidated namespace");
    Ok(InvalidationOutcome::ok(removed))
}

/// POST /admin/cache/invalidate-user
pub async fn invalidate_user(
    State(state): State<AppState>,
    _admin: AdminAuth,
    Json(body): Json<InvalidateUserRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = require(body.user_id, "userId")?;
    let removed = state.authority.invalidate_user_authority(&user_id).await;
    Ok(InvalidationOutcome::ok(removed))
}

/// POST /admin/cache/invalidate-all
pub async fn invalidate_all(
    State(state): State<AppState>,
    _admin: AdminAuth,
) -> impl IntoResponse {
    let removed = state.authority.invalidate_all_authority().await;
    InvalidationOutcome::ok(removed)
}

/// POST /admin/cache/reset-metrics
pub async fn reset_metrics(
    State(state): State<AppState>,
    _admin: AdminAuth,
) -> impl IntoResponse {
    state.cache.reset_metrics();
    tracing::info!("admin reset cache metrics");
    Json(serde_json::json!({ "status": "ok" }))
}

// =============================================================================
// Routes
// =============================================================================

/// The cache-management routes, to be nested into the application router.
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/admin/cache/status", get(cache_status))
        .route("/admin/cache/invalidate", post(invalidate_key))
        .route(
            "/admin/cache/invalidate-namespace",
            post(invalidate_namespace),
        )
        .route("/admin/cache/invalidate-user", post(invalidate_user))
        .route("/admin/cache/invalidate-all", post(invalidate_all))
        .route("/admin/cache/reset-metrics", post(reset_metrics))
}
