//! Rate-limiting middleware for embedding the guard in an axum router.
//!
//! ```ignore
//! let contact = Router::new()
//!     .route("/api/contact", post(submit))
//!     .layer(from_fn_with_state(
//!         BucketGuard::new(state.clone(), Bucket::Contact),
//!         guard_middleware,
//!     ));
//! ```

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;

use phoenix_guard_service::bucket::Bucket;

use crate::error::{ApiError, apply_decision_headers};
use crate::extract::request_headers;
use crate::state::AppState;

/// Middleware state: the application state plus the bucket to enforce.
#[derive(Clone)]
pub struct BucketGuard {
    state: AppState,
    bucket: Bucket,
}

impl BucketGuard {
    pub fn new(state: AppState, bucket: Bucket) -> Self {
        Self { state, bucket }
    }
}

/// Rejects blocked clients (403), counts the request for attack detection,
/// and enforces the bucket quota (429 with `Retry-After`). Allowed
/// responses carry the `X-RateLimit-*` headers.
pub async fn guard_middleware(
    State(guard): State<BucketGuard>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let headers = request_headers(req.headers());
    let (id, decision) = guard.state.guard(guard.bucket, &headers).await?;

    if !decision.success {
        tracing::info!(
            bucket = %guard.bucket,
            identifier = %id,
            retry_after = ?decision.retry_after,
            "rate limit exceeded",
        );
        return Err(ApiError::TooManyRequests(Box::new(decision)));
    }

    let mut response = next.run(req).await;
    apply_decision_headers(&mut response, &decision);
    Ok(response)
}
