//! Per-client sliding-window rate limiting.
//!
//! Transport-agnostic core. The sliding-window accounting itself lives in the
//! [`CounterStore`]; this module builds keys, applies the bucket policy and
//! turns the store's answer into a [`RateLimitDecision`].

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use tracing::{debug, warn};

use crate::bucket::{Bucket, BucketPolicy, BucketTable};
use crate::clock::{self, Clock};
use crate::error::ServiceError;
use crate::identity::{ClientIdentifier, IdentityPolicy, RequestHeaders};
use crate::store::{self, CounterStore, StoreError};

pub const HEADER_LIMIT: &str = "X-RateLimit-Limit";
pub const HEADER_REMAINING: &str = "X-RateLimit-Remaining";
pub const HEADER_RESET: &str = "X-RateLimit-Reset";
pub const HEADER_RETRY_AFTER: &str = "Retry-After";

/// What to do when the counter store errors.
///
/// A missing store is not a failure: limiters without one run in
/// pass-through mode regardless of this setting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailMode {
    /// Allow the request and log the failure.
    #[default]
    Open,
    /// Deny the request and log the failure.
    Closed,
    /// Return the store error to the caller.
    Propagate,
}

impl FailMode {
    pub fn label(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closed => "closed",
            Self::Propagate => "propagate",
        }
    }
}

impl fmt::Display for FailMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for FailMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "open" => Ok(Self::Open),
            "closed" => Ok(Self::Closed),
            "propagate" => Ok(Self::Propagate),
            other => Err(format!(
                "unknown fail mode '{other}' (expected open, closed or propagate)"
            )),
        }
    }
}

/// Outcome of one rate-limit check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub success: bool,
    pub limit: u64,
    /// Never negative.
    pub remaining: u64,
    /// When the current window frees up.
    pub reset: DateTime<Utc>,
    /// Seconds until a retry may succeed. Only set on denial.
    pub retry_after: Option<u64>,
}

impl RateLimitDecision {
    fn new(limit: u64, count: u64, reset: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        let success = count <= limit;
        Self {
            success,
            limit,
            remaining: limit.saturating_sub(count),
            reset,
            retry_after: (!success).then(|| retry_after_secs(reset, now)),
        }
    }

    /// `X-RateLimit-Reset` value: ISO-8601 UTC with milliseconds.
    pub fn reset_iso(&self) -> String {
        self.reset.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    /// Response headers describing this decision.
    ///
    /// `Retry-After` is only included when the request was denied.
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = vec![
            (HEADER_LIMIT, self.limit.to_string()),
            (HEADER_REMAINING, self.remaining.to_string()),
            (HEADER_RESET, self.reset_iso()),
        ];
        if let Some(secs) = self.retry_after {
            headers.push((HEADER_RETRY_AFTER, secs.to_string()));
        }
        headers
    }
}

/// `ceil((reset - now) / 1s)`, clamped at zero.
fn retry_after_secs(reset: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    let ms = (reset - now).num_milliseconds().max(0) as u64;
    ms.div_ceil(1000)
}

/// Rate limiter bound to one bucket policy.
#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<RateLimiterInner>,
}

struct RateLimiterInner {
    policy: BucketPolicy,
    store: Option<Arc<dyn CounterStore>>,
    identity: IdentityPolicy,
    fail_mode: FailMode,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    /// Creates a limiter. Without a store it runs in pass-through mode.
    pub fn new(
        policy: BucketPolicy,
        store: Option<Arc<dyn CounterStore>>,
        identity: IdentityPolicy,
        fail_mode: FailMode,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Arc::new(RateLimiterInner {
                policy,
                store,
                identity,
                fail_mode,
                clock,
            }),
        }
    }

    pub fn policy(&self) -> BucketPolicy {
        self.inner.policy
    }

    pub fn bucket(&self) -> Bucket {
        self.inner.policy.bucket()
    }

    pub fn is_pass_through(&self) -> bool {
        self.inner.store.is_none()
    }

    /// Resolves the request's identifier and checks it against the bucket.
    pub async fn limit(&self, headers: &RequestHeaders) -> Result<RateLimitDecision, ServiceError> {
        let id = self.inner.identity.resolve(headers);
        self.check(&id).await
    }

    /// Checks an already-resolved identifier against the bucket.
    pub async fn check(&self, id: &ClientIdentifier) -> Result<RateLimitDecision, ServiceError> {
        let policy = self.inner.policy;
        let now = self.inner.clock.now();

        let Some(store) = &self.inner.store else {
            return Ok(self.full_quota(now));
        };

        let key = store::rate_limit_key(policy.bucket().label(), id.as_str());
        match store.hit_window(&key, policy.limit(), policy.window()).await {
            Ok(hit) => {
                let decision = RateLimitDecision::new(policy.limit(), hit.count, hit.reset_at, now);
                debug!(
                    bucket = %policy.bucket(),
                    identifier = %id,
                    count = hit.count,
                    success = decision.success,
                    "rate limit checked",
                );
                Ok(decision)
            }
            Err(e) => self.on_store_error(e, now),
        }
    }

    /// Clears the counter for the request's identifier in this bucket.
    pub async fn reset(&self, headers: &RequestHeaders) -> Result<(), ServiceError> {
        let id = self.inner.identity.resolve(headers);
        self.reset_identifier(&id).await
    }

    /// Clears the counter for `id` in this bucket. No-op in pass-through mode.
    pub async fn reset_identifier(&self, id: &ClientIdentifier) -> Result<(), ServiceError> {
        let Some(store) = &self.inner.store else {
            return Ok(());
        };
        let key = store::rate_limit_key(self.bucket().label(), id.as_str());
        store.delete(&key).await?;
        debug!(bucket = %self.bucket(), identifier = %id, "rate limit counter reset");
        Ok(())
    }

    fn full_quota(&self, now: DateTime<Utc>) -> RateLimitDecision {
        let policy = self.inner.policy;
        RateLimitDecision::new(policy.limit(), 0, clock::after(now, policy.window()), now)
    }

    fn on_store_error(
        &self,
        error: StoreError,
        now: DateTime<Utc>,
    ) -> Result<RateLimitDecision, ServiceError> {
        let policy = self.inner.policy;
        match self.inner.fail_mode {
            FailMode::Open => {
                warn!(bucket = %policy.bucket(), %error, "counter store failed; allowing request");
                Ok(self.full_quota(now))
            }
            FailMode::Closed => {
                warn!(bucket = %policy.bucket(), %error, "counter store failed; denying request");
                let reset = clock::after(now, policy.window());
                Ok(RateLimitDecision::new(
                    policy.limit(),
                    policy.limit().saturating_add(1),
                    reset,
                    now,
                ))
            }
            FailMode::Propagate => Err(error.into()),
        }
    }
}

/// One limiter per bucket, built once from a [`BucketTable`].
#[derive(Clone)]
pub struct RateLimiters {
    contact: RateLimiter,
    api: RateLimiter,
    analytics: RateLimiter,
    strict: RateLimiter,
}

impl RateLimiters {
    pub fn new(
        table: &BucketTable,
        store: Option<Arc<dyn CounterStore>>,
        identity: IdentityPolicy,
        fail_mode: FailMode,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let build = |bucket: Bucket| {
            RateLimiter::new(
                table.get(bucket),
                store.clone(),
                identity,
                fail_mode,
                clock.clone(),
            )
        };
        Self {
            contact: build(Bucket::Contact),
            api: build(Bucket::Api),
            analytics: build(Bucket::Analytics),
            strict: build(Bucket::Strict),
        }
    }

    pub fn get(&self, bucket: Bucket) -> &RateLimiter {
        match bucket {
            Bucket::Contact => &self.contact,
            Bucket::Api => &self.api,
            Bucket::Analytics => &self.analytics,
            Bucket::Strict => &self.strict,
        }
    }
}
