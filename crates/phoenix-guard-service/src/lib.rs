//! Phoenix Guard Service: core logic for client identification, rate
//! limiting and abuse detection.
//!
//! This crate contains all transport-agnostic logic: identifier resolution,
//! bucket policies, the sliding-window limiter, the attack detector and
//! block list, counter stores, metrics and admin authentication.
//!
//! The HTTP crate (`phoenix-guard-http`) depends on this crate and provides
//! the axum adapter.
//!
//! **Zero transport dependencies**: no axum, no hyper.

pub mod attack;
pub mod auth;
pub mod bucket;
pub mod clock;
pub mod error;
pub mod identity;
pub mod metrics;
pub mod rate_limit;
pub mod store;

use std::sync::Arc;
use std::time::{Duration, Instant};

use attack::{AttackDetector, AttackPolicy, AttackVerdict};
use auth::AuthProvider;
use bucket::{Bucket, BucketTable};
use clock::{Clock, SystemClock};
use error::ServiceError;
use identity::{ClientIdentifier, IdentityPolicy, RequestHeaders};
use metrics::{Metrics, Outcome};
use rate_limit::{FailMode, RateLimitDecision, RateLimiters};
use store::{CounterStore, MemoryStore, MeteredStore};

/// Configuration subset relevant to the service layer.
///
/// Transport-specific config (ports, CORS origins) stays in the binary
/// crate's `Config` struct.
#[derive(Debug, Clone, Default)]
pub struct ServiceConfig {
    pub buckets: BucketTable,
    pub identity: IdentityPolicy,
    pub fail_mode: FailMode,
    pub attack: AttackPolicy,
    /// Block identifiers as soon as the attack detector flags them.
    pub auto_block: bool,
    pub admin_token: Option<String>,
}

/// Shared service state, cloneable across all transport handlers.
///
/// Wraps all business-layer components in an `Arc`. Transport crates
/// receive this and delegate all logic to it.
#[derive(Clone)]
pub struct ServiceState {
    inner: Arc<Inner>,
}

struct Inner {
    identity: IdentityPolicy,
    buckets: BucketTable,
    limiters: RateLimiters,
    detector: AttackDetector,
    auto_block: bool,
    metrics: Arc<Metrics>,
    auth: Option<AuthProvider>,
    store_backend: &'static str,
    memory_store: Option<MemoryStore>,
    start_time: Instant,
}

impl ServiceState {
    /// Creates the service state. `None` store means pass-through mode.
    pub fn new(config: &ServiceConfig, store: Option<Arc<dyn CounterStore>>) -> Self {
        Self::build(config, store, None, Arc::new(SystemClock))
    }

    /// Creates a state backed by a fresh in-process store.
    pub fn with_memory_store(config: &ServiceConfig) -> Self {
        Self::with_memory_store_and_clock(config, Arc::new(SystemClock))
    }

    /// In-process store driven by `clock` (tests use a `ManualClock`).
    pub fn with_memory_store_and_clock(config: &ServiceConfig, clock: Arc<dyn Clock>) -> Self {
        let memory = MemoryStore::with_clock(clock.clone());
        let store: Arc<dyn CounterStore> = Arc::new(memory.clone());
        Self::build(config, Some(store), Some(memory), clock)
    }

    /// Creates an in-memory state with default policies (for tests and
    /// ephemeral use).
    pub fn new_in_memory() -> Self {
        Self::with_memory_store(&ServiceConfig::default())
    }

    fn build(
        config: &ServiceConfig,
        store: Option<Arc<dyn CounterStore>>,
        memory_store: Option<MemoryStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let metrics = Arc::new(Metrics::new());
        let store_backend = store.as_ref().map_or("none", |s| s.backend());
        let store: Option<Arc<dyn CounterStore>> = store.map(|s| {
            Arc::new(MeteredStore::new(s, metrics.clone())) as Arc<dyn CounterStore>
        });

        Self {
            inner: Arc::new(Inner {
                identity: config.identity,
                buckets: config.buckets.clone(),
                limiters: RateLimiters::new(
                    &config.buckets,
                    store.clone(),
                    config.identity,
                    config.fail_mode,
                    clock,
                ),
                detector: AttackDetector::new(store, config.attack, config.fail_mode),
                auto_block: config.auto_block,
                metrics,
                auth: AuthProvider::new(config.admin_token.clone()),
                store_backend,
                memory_store,
                start_time: Instant::now(),
            }),
        }
    }

    // --- Accessors ---

    pub fn identity_policy(&self) -> IdentityPolicy {
        self.inner.identity
    }

    pub fn buckets(&self) -> &BucketTable {
        &self.inner.buckets
    }

    pub fn limiters(&self) -> &RateLimiters {
        &self.inner.limiters
    }

    pub fn detector(&self) -> &AttackDetector {
        &self.inner.detector
    }

    pub fn metrics(&self) -> &Metrics {
        &self.inner.metrics
    }

    pub fn auth(&self) -> Option<&AuthProvider> {
        self.inner.auth.as_ref()
    }

    pub fn store_backend(&self) -> &'static str {
        self.inner.store_backend
    }

    pub fn is_pass_through(&self) -> bool {
        self.inner.store_backend == "none"
    }

    pub fn auto_block(&self) -> bool {
        self.inner.auto_block
    }

    pub fn uptime_secs(&self) -> u64 {
        self.inner.start_time.elapsed().as_secs()
    }

    // --- Operations ---

    pub fn identify(&self, headers: &RequestHeaders) -> ClientIdentifier {
        self.inner.identity.resolve(headers)
    }

    /// Checks `id` against `bucket` and records the outcome.
    pub async fn limit(
        &self,
        bucket: Bucket,
        id: &ClientIdentifier,
    ) -> Result<RateLimitDecision, ServiceError> {
        let limiter = self.inner.limiters.get(bucket);
        let decision = limiter.check(id).await?;
        let outcome = if limiter.is_pass_through() {
            Outcome::PassThrough
        } else if decision.success {
            Outcome::Allowed
        } else {
            Outcome::Denied
        };
        self.inner.metrics.record_decision(bucket, outcome);
        Ok(decision)
    }

    pub async fn reset(&self, bucket: Bucket, id: &ClientIdentifier) -> Result<(), ServiceError> {
        self.inner.limiters.get(bucket).reset_identifier(id).await
    }

    /// Runs the attack detector for `id`, blocking it when auto-block is on.
    ///
    /// Only a real threshold crossing counts as a flag or triggers a block;
    /// a store failure answers per the fail mode and shows up as a store
    /// error.
    pub async fn check_for_attack(&self, id: &ClientIdentifier) -> Result<bool, ServiceError> {
        let verdict = self.inner.detector.assess(id).await?;
        if verdict == AttackVerdict::Attack {
            self.inner.metrics.record_attack_flag();
            if self.inner.auto_block {
                self.block(id, None).await?;
            }
        }
        Ok(verdict.is_hostile())
    }

    pub async fn block(
        &self,
        id: &ClientIdentifier,
        duration: Option<Duration>,
    ) -> Result<(), ServiceError> {
        self.inner.detector.block_identifier(id, duration).await?;
        self.inner.metrics.record_block();
        Ok(())
    }

    pub async fn unblock(&self, id: &ClientIdentifier) -> Result<(), ServiceError> {
        self.inner.detector.unblock_identifier(id).await
    }

    pub async fn is_blocked(&self, id: &ClientIdentifier) -> Result<bool, ServiceError> {
        self.inner.detector.is_blocked(id).await
    }

    /// Full admission check for one request against `bucket`: block list,
    /// attack accounting, then the bucket quota.
    ///
    /// Returns `ServiceError::Blocked` for blocked clients; otherwise the
    /// limiter's decision, which may be a denial.
    pub async fn guard(
        &self,
        bucket: Bucket,
        headers: &RequestHeaders,
    ) -> Result<(ClientIdentifier, RateLimitDecision), ServiceError> {
        let id = self.identify(headers);

        if self.is_blocked(&id).await? {
            self.inner.metrics.record_blocked_request();
            return Err(ServiceError::Blocked);
        }

        if self.check_for_attack(&id).await? && self.inner.auto_block {
            self.inner.metrics.record_blocked_request();
            return Err(ServiceError::Blocked);
        }

        let decision = self.limit(bucket, &id).await?;
        Ok((id, decision))
    }

    // --- Maintenance ---

    /// Drops expired entries from the in-process store. Returns how many
    /// were removed; always 0 for other backends.
    pub fn cleanup_expired(&self) -> usize {
        self.inner
            .memory_store
            .as_ref()
            .map_or(0, MemoryStore::cleanup)
    }
}
