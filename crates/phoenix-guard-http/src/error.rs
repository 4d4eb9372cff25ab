//! HTTP error mapping for service errors and rate-limit denials.

use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use utoipa::ToSchema;

use phoenix_guard_service::error::ServiceError;
use phoenix_guard_service::rate_limit::RateLimitDecision;

/// Errors returned by HTTP handlers and middleware.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("client is blocked")]
    Blocked,

    /// Quota exhausted. Carries the decision so the response gets the
    /// quota headers and `Retry-After`.
    #[error("too many requests")]
    TooManyRequests(Box<RateLimitDecision>),

    #[error("counter store unavailable: {0}")]
    StoreUnavailable(String),
}

impl From<ServiceError> for ApiError {
    fn from(e: ServiceError) -> Self {
        match e {
            ServiceError::Blocked => Self::Blocked,
            ServiceError::Store(e) => Self::StoreUnavailable(e.to_string()),
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct ErrorBody {
    /// Error code (e.g. "bad_request", "too_many_requests", "blocked").
    pub(crate) error: String,
    /// Human-readable error detail, if available.
    pub(crate) detail: Option<String>,
}

/// Copies a decision's quota headers onto a response.
pub(crate) fn apply_decision_headers(response: &mut Response, decision: &RateLimitDecision) {
    let headers = response.headers_mut();
    for (name, value) in decision.headers() {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(&value),
        ) {
            headers.insert(name, value);
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error, detail) = match &self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", Some(msg.clone())),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", Some(msg.clone())),
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized", None),
            ApiError::Blocked => (StatusCode::FORBIDDEN, "blocked", None),
            ApiError::TooManyRequests(decision) => (
                StatusCode::TOO_MANY_REQUESTS,
                "too_many_requests",
                decision
                    .retry_after
                    .map(|secs| format!("retry after {secs} seconds")),
            ),
            ApiError::StoreUnavailable(msg) => {
                tracing::error!(%msg, "counter store unavailable");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "store_unavailable",
                    Some(msg.clone()),
                )
            }
        };

        let body = ErrorBody {
            error: error.to_string(),
            detail,
        };

        let mut response = (status, axum::Json(body)).into_response();
        if let ApiError::TooManyRequests(decision) = &self {
            apply_decision_headers(&mut response, decision);
        }
        response
    }
}
