//! Request and response bodies for the HTTP API.

use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use phoenix_guard_service::bucket::{Bucket, BucketPolicy};
use phoenix_guard_service::identity::{ClientIdentifier, IdentifierSource};
use phoenix_guard_service::rate_limit::RateLimitDecision;

/// Server health information.
#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    /// Always "ok" when the server answers.
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    /// Counter store backend: "memory", "redis" or "none".
    pub store: String,
    /// True when no counter store is configured and every check passes.
    pub pass_through: bool,
}

/// Resolved client identifier.
#[derive(Serialize, ToSchema)]
pub struct IdentityResponse {
    pub identifier: String,
    pub source: IdentifierSource,
}

impl From<&ClientIdentifier> for IdentityResponse {
    fn from(id: &ClientIdentifier) -> Self {
        Self {
            identifier: id.as_str().to_string(),
            source: id.source(),
        }
    }
}

/// One configured bucket policy.
#[derive(Serialize, ToSchema)]
pub struct BucketInfo {
    pub bucket: Bucket,
    pub limit: u64,
    pub window_seconds: u64,
}

impl From<BucketPolicy> for BucketInfo {
    fn from(p: BucketPolicy) -> Self {
        Self {
            bucket: p.bucket(),
            limit: p.limit(),
            window_seconds: p.window().as_secs(),
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct BucketsResponse {
    pub buckets: Vec<BucketInfo>,
}

/// Rate-limit decision as returned by `POST /v1/limit/{bucket}`.
#[derive(Serialize, ToSchema)]
pub struct DecisionResponse {
    pub bucket: Bucket,
    pub identifier: String,
    pub success: bool,
    pub limit: u64,
    pub remaining: u64,
    /// ISO-8601 timestamp at which the window frees up.
    pub reset: String,
    /// Seconds until a retry may succeed; only present when denied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

impl DecisionResponse {
    pub fn new(bucket: Bucket, id: &ClientIdentifier, d: &RateLimitDecision) -> Self {
        Self {
            bucket,
            identifier: id.as_str().to_string(),
            success: d.success,
            limit: d.limit,
            remaining: d.remaining,
            reset: d.reset_iso(),
            retry_after: d.retry_after,
        }
    }
}

/// Optional explicit identifier, honoured only with the admin bearer token.
/// When absent the caller's request headers are used to resolve one.
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct IdentifierParams {
    pub identifier: Option<String>,
}

#[derive(Serialize, ToSchema)]
pub struct AttackResponse {
    pub identifier: String,
    /// True when the client is over the attack threshold.
    pub attack: bool,
}

#[derive(Serialize, ToSchema)]
pub struct BlockStatus {
    pub identifier: String,
    pub blocked: bool,
}

/// Body for `PUT /admin/blocks/{identifier}`.
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct BlockRequest {
    /// Block duration in seconds; defaults to the configured duration.
    pub duration_seconds: Option<u64>,
}
