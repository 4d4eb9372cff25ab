//! Bearer token check for the admin routes.

use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;

use crate::error::ApiError;
use crate::state::AppState;

/// Requires `Authorization: Bearer <admin token>`.
///
/// With no admin token configured the admin surface is closed: every
/// request is answered with 401.
pub async fn admin_auth_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if !has_admin_bearer(&state, req.headers()) {
        return Err(ApiError::Unauthorized);
    }
    Ok(next.run(req).await)
}

/// True when `headers` carry the configured admin bearer token. Always
/// false when no token is configured.
pub(crate) fn has_admin_bearer(state: &AppState, headers: &HeaderMap) -> bool {
    let Some(auth) = state.auth() else {
        return false;
    };

    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|token| auth.check_bearer(token))
}
