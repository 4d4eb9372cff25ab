//! System, health and introspection endpoints.

use axum::extract::{Json, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;

use crate::extract::request_headers;
use crate::state::AppState;
use crate::types::{BucketInfo, BucketsResponse, HealthResponse, IdentityResponse};

/// Check server health.
///
/// Returns server status, version, uptime and which counter store is in use.
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Server is healthy", body = HealthResponse),
    ),
    tag = "System"
)]
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.uptime_secs(),
        store: state.store_backend().to_string(),
        pass_through: state.is_pass_through(),
    })
}

/// List the configured rate-limit buckets.
#[utoipa::path(
    get,
    path = "/v1/buckets",
    responses(
        (status = 200, description = "Bucket policies", body = BucketsResponse),
    ),
    tag = "Rate limiting"
)]
pub async fn list_buckets(State(state): State<AppState>) -> impl IntoResponse {
    Json(BucketsResponse {
        buckets: state.buckets().iter().map(BucketInfo::from).collect(),
    })
}

/// Show the identifier the caller resolves to.
#[utoipa::path(
    get,
    path = "/v1/identify",
    responses(
        (status = 200, description = "Resolved identifier", body = IdentityResponse),
    ),
    tag = "Rate limiting"
)]
pub async fn identify(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    let id = state.identify(&request_headers(&headers));
    Json(IdentityResponse::from(&id))
}

/// Prometheus-compatible metrics endpoint.
pub async fn metrics_endpoint(State(state): State<AppState>) -> impl IntoResponse {
    let body = state
        .metrics()
        .render(state.store_backend(), state.uptime_secs());

    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        body,
    )
}
