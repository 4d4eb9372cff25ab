//! Request correlation: `X-Request-Id` propagation and a per-request span
//! naming the client the request resolved to.

use axum::extract::{Request, State};
use axum::http::{HeaderName, HeaderValue};
use axum::middleware::Next;
use axum::response::Response;
use tracing::Instrument;
use uuid::Uuid;

use crate::extract::request_headers;
use crate::state::AppState;

static X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Longest client-supplied request ID that is echoed back.
const MAX_REQUEST_ID_LEN: usize = 128;

/// Ensures every request carries an `X-Request-Id` header.
///
/// A client-supplied ID is kept when it is short printable ASCII; anything
/// else is replaced by a UUID v4 so clients cannot inject arbitrary text into
/// the logs. Every log line for the request carries `request_id` and the
/// resolved `client` identifier with its `source`.
pub async fn request_id_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    let request_id = req
        .headers()
        .get(&X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .filter(|id| is_acceptable(id))
        .map_or_else(|| Uuid::new_v4().to_string(), String::from);
    let client = state.identify(&request_headers(req.headers()));

    let value = HeaderValue::from_str(&request_id).ok();
    if let Some(val) = &value {
        req.headers_mut().insert(X_REQUEST_ID.clone(), val.clone());
    }

    let span = tracing::info_span!(
        "request",
        request_id = %request_id,
        client = %client,
        source = client.source().label(),
    );
    let mut response = next.run(req).instrument(span).await;

    if let Some(val) = value {
        response.headers_mut().insert(X_REQUEST_ID.clone(), val);
    }
    response
}

fn is_acceptable(id: &str) -> bool {
    !id.is_empty() && id.len() <= MAX_REQUEST_ID_LEN && id.bytes().all(|b| b.is_ascii_graphic())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_short_printable_ids() {
        assert!(is_acceptable("my-custom-id-123"));
        assert!(is_acceptable(&"a".repeat(MAX_REQUEST_ID_LEN)));
    }

    #[test]
    fn rejects_empty_long_or_spaced_ids() {
        assert!(!is_acceptable(""));
        assert!(!is_acceptable(&"a".repeat(MAX_REQUEST_ID_LEN + 1)));
        assert!(!is_acceptable("two words"));
    }
}
