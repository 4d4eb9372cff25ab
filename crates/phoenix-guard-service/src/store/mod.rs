//! Counter store: the shared state behind rate limits, attack counters and
//! block records.
//!
//! The limiter and detector only compute keys and interpret results; the
//! store owns every counter and guarantees per-key atomicity.

mod memory;
mod metered;
mod redis;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub use self::memory::MemoryStore;
pub use self::metered::MeteredStore;
pub use self::redis::RedisStore;

/// Counter store failure.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Backend unreachable or returned an error.
    #[error("counter store backend error: {0}")]
    Backend(String),

    /// Backend returned something we could not interpret.
    #[error("unexpected counter store reply: {0}")]
    Protocol(String),
}

impl From<::redis::RedisError> for StoreError {
    fn from(e: ::redis::RedisError) -> Self {
        Self::Backend(e.to_string())
    }
}

/// Result of one attempt against a sliding window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowHit {
    /// Hits inside the window plus this attempt. Above the limit when the
    /// attempt was rejected; rejected attempts are not recorded.
    pub count: u64,
    /// When the window next has room for a hit: the oldest hit's expiry when
    /// recorded, otherwise the expiry that brings the count under the limit.
    pub reset_at: DateTime<Utc>,
}

/// Atomic counter primitives keyed by arbitrary strings.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Records a hit in the sliding window at `key` if fewer than `limit`
    /// hits are already inside it. Check and record are one atomic step.
    async fn hit_window(
        &self,
        key: &str,
        limit: u64,
        window: Duration,
    ) -> Result<WindowHit, StoreError>;

    /// Increments the counter at `key`. The first increment sets its expiry
    /// to `ttl`; later increments leave it alone.
    async fn incr_with_ttl(&self, key: &str, ttl: Duration) -> Result<u64, StoreError>;

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;

    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Short backend name for health and metrics output.
    fn backend(&self) -> &'static str;
}

pub(crate) fn rate_limit_key(bucket: &str, identifier: &str) -> String {
    format!("ratelimit:{bucket}:{identifier}")
}

pub(crate) fn attack_key(identifier: &str) -> String {
    format!("attack:{identifier}")
}

pub(crate) fn block_key(identifier: &str) -> String {
    format!("blocked:{identifier}")
}
