//! Decision endpoints for callers that enforce the result themselves.

use axum::extract::{Json, Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::error::{ApiError, apply_decision_headers};
use crate::state::AppState;
use crate::types::{AttackResponse, DecisionResponse, IdentifierParams};

use super::{parse_bucket, resolve_identifier};

/// Count one request against a bucket.
///
/// The identifier is resolved from the request headers unless given as
/// `?identifier=`, which requires the admin bearer token. Answers 200 when allowed and 429 when the quota is
/// exhausted; both carry the `X-RateLimit-*` headers, and 429 adds
/// `Retry-After`.
#[utoipa::path(
    post,
    path = "/v1/limit/{bucket}",
    params(
        ("bucket" = String, Path, description = "Bucket name: contact, api, analytics or strict"),
        IdentifierParams,
    ),
    responses(
        (status = 200, description = "Request allowed", body = DecisionResponse),
        (status = 401, description = "`identifier` given without the admin token", body = crate::error::ErrorBody),
        (status = 404, description = "Unknown bucket", body = crate::error::ErrorBody),
        (status = 429, description = "Quota exhausted", body = DecisionResponse),
        (status = 503, description = "Counter store failed", body = crate::error::ErrorBody),
    ),
    tag = "Rate limiting"
)]
pub async fn check_limit(
    State(state): State<AppState>,
    Path(bucket): Path<String>,
    Query(params): Query<IdentifierParams>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let bucket = parse_bucket(&bucket)?;
    let id = resolve_identifier(&state, &headers, &params)?;
    let decision = state.limit(bucket, &id).await?;

    let status = if decision.success {
        StatusCode::OK
    } else {
        StatusCode::TOO_MANY_REQUESTS
    };
    let mut response = (status, Json(DecisionResponse::new(bucket, &id, &decision))).into_response();
    apply_decision_headers(&mut response, &decision);
    Ok(response)
}

/// Count one request for attack detection.
///
/// Reports whether the client is over the per-minute threshold. Flagging
/// does not block the client unless auto-block is configured.
#[utoipa::path(
    post,
    path = "/v1/attack/check",
    params(IdentifierParams),
    responses(
        (status = 200, description = "Detector result", body = AttackResponse),
        (status = 401, description = "`identifier` given without the admin token", body = crate::error::ErrorBody),
        (status = 503, description = "Counter store failed", body = crate::error::ErrorBody),
    ),
    tag = "Abuse"
)]
pub async fn check_attack(
    State(state): State<AppState>,
    Query(params): Query<IdentifierParams>,
    headers: HeaderMap,
) -> Result<Json<AttackResponse>, ApiError> {
    let id = resolve_identifier(&state, &headers, &params)?;
    let attack = state.check_for_attack(&id).await?;
    Ok(Json(AttackResponse {
        identifier: id.as_str().to_string(),
        attack,
    }))
}
