//! HTTP API route handlers.

pub mod admin;
pub mod limit;
pub mod system;

use axum::http::HeaderMap;

use phoenix_guard_service::bucket::Bucket;
use phoenix_guard_service::identity::ClientIdentifier;

use crate::error::ApiError;
use crate::extract::request_headers;
use crate::middleware::auth::has_admin_bearer;
use crate::state::AppState;
use crate::types::IdentifierParams;

fn parse_bucket(name: &str) -> Result<Bucket, ApiError> {
    name.parse().map_err(ApiError::NotFound)
}

/// Explicit `?identifier=` if given, otherwise resolved from the headers.
///
/// Naming another client's identifier would let a caller spend its quota or
/// get it blocked, so the override needs the admin bearer token.
fn resolve_identifier(
    state: &AppState,
    headers: &HeaderMap,
    params: &IdentifierParams,
) -> Result<ClientIdentifier, ApiError> {
    match params.identifier.as_deref().map(str::trim) {
        Some(id) if !id.is_empty() => {
            if !has_admin_bearer(state, headers) {
                return Err(ApiError::Unauthorized);
            }
            Ok(ClientIdentifier::from_raw(id))
        }
        _ => Ok(state.identify(&request_headers(headers))),
    }
}
