//! Admin endpoints: counter resets and block list management.
//!
//! All routes here sit behind the admin bearer token.

use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Json, Path, Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;

use phoenix_guard_service::identity::ClientIdentifier;

use crate::error::ApiError;
use crate::state::AppState;
use crate::types::{BlockRequest, BlockStatus, IdentifierParams};

use super::{parse_bucket, resolve_identifier};

fn identifier(raw: &str) -> Result<ClientIdentifier, ApiError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(ApiError::BadRequest("identifier must not be empty".into()));
    }
    Ok(ClientIdentifier::from_raw(raw))
}

/// Reset a client's counter in a bucket.
#[utoipa::path(
    delete,
    path = "/admin/limit/{bucket}",
    params(
        ("bucket" = String, Path, description = "Bucket name"),
        IdentifierParams,
    ),
    responses(
        (status = 200, description = "Counter cleared"),
        (status = 401, description = "Missing or invalid admin token", body = crate::error::ErrorBody),
        (status = 404, description = "Unknown bucket", body = crate::error::ErrorBody),
    ),
    tag = "Admin"
)]
pub async fn reset_limit(
    State(state): State<AppState>,
    Path(bucket): Path<String>,
    Query(params): Query<IdentifierParams>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let bucket = parse_bucket(&bucket)?;
    let id = resolve_identifier(&state, &headers, &params)?;
    state.reset(bucket, &id).await?;
    tracing::info!(%bucket, identifier = %id, "rate limit counter reset by admin");
    Ok(Json(serde_json::json!({ "success": true, "identifier": id.as_str() })))
}

/// Check whether an identifier is blocked.
#[utoipa::path(
    get,
    path = "/admin/blocks/{identifier}",
    params(("identifier" = String, Path, description = "Client identifier")),
    responses(
        (status = 200, description = "Block status", body = BlockStatus),
        (status = 401, description = "Missing or invalid admin token", body = crate::error::ErrorBody),
    ),
    tag = "Admin"
)]
pub async fn block_status(
    State(state): State<AppState>,
    Path(raw): Path<String>,
) -> Result<Json<BlockStatus>, ApiError> {
    let id = identifier(&raw)?;
    let blocked = state.is_blocked(&id).await?;
    Ok(Json(BlockStatus {
        identifier: id.as_str().to_string(),
        blocked,
    }))
}

/// Block an identifier.
///
/// The body is optional; without `duration_seconds` the configured default
/// (one hour) applies.
#[utoipa::path(
    put,
    path = "/admin/blocks/{identifier}",
    params(("identifier" = String, Path, description = "Client identifier")),
    request_body(content = BlockRequest, description = "Optional block duration"),
    responses(
        (status = 200, description = "Identifier blocked", body = BlockStatus),
        (status = 400, description = "Invalid duration", body = crate::error::ErrorBody),
        (status = 401, description = "Missing or invalid admin token", body = crate::error::ErrorBody),
    ),
    tag = "Admin"
)]
pub async fn block(
    State(state): State<AppState>,
    Path(raw): Path<String>,
    body: Bytes,
) -> Result<Json<BlockStatus>, ApiError> {
    let id = identifier(&raw)?;
    let request: BlockRequest = if body.is_empty() {
        BlockRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| ApiError::BadRequest(e.to_string()))?
    };
    let duration = match request.duration_seconds {
        Some(0) => return Err(ApiError::BadRequest("duration_seconds must be positive".into())),
        Some(secs) => Some(Duration::from_secs(secs)),
        None => None,
    };
    state.block(&id, duration).await?;
    Ok(Json(BlockStatus {
        identifier: id.as_str().to_string(),
        blocked: true,
    }))
}

/// Remove an identifier from the block list.
#[utoipa::path(
    delete,
    path = "/admin/blocks/{identifier}",
    params(("identifier" = String, Path, description = "Client identifier")),
    responses(
        (status = 200, description = "Identifier unblocked", body = BlockStatus),
        (status = 401, description = "Missing or invalid admin token", body = crate::error::ErrorBody),
    ),
    tag = "Admin"
)]
pub async fn unblock(
    State(state): State<AppState>,
    Path(raw): Path<String>,
) -> Result<Json<BlockStatus>, ApiError> {
    let id = identifier(&raw)?;
    state.unblock(&id).await?;
    Ok(Json(BlockStatus {
        identifier: id.as_str().to_string(),
        blocked: false,
    }))
}
