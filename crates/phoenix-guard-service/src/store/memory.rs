//! In-process counter store for single-instance deployments and tests.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use super::{CounterStore, StoreError, WindowHit};
use crate::clock::{self, Clock, SystemClock};

struct Expiring<T> {
    value: T,
    expires_at: DateTime<Utc>,
}

/// Sharded in-memory store. Each key is updated under its shard lock, so
/// operations on one key are atomic.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<MemoryInner>,
}

struct MemoryInner {
    clock: Arc<dyn Clock>,
    /// Hit timestamps per sliding window, oldest first.
    windows: DashMap<String, Expiring<VecDeque<DateTime<Utc>>>>,
    counters: DashMap<String, Expiring<u64>>,
    values: DashMap<String, Expiring<String>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(MemoryInner {
                clock,
                windows: DashMap::new(),
                counters: DashMap::new(),
                values: DashMap::new(),
            }),
        }
    }

    /// Removes expired entries (background cleanup). Returns how many went.
    pub fn cleanup(&self) -> usize {
        let now = self.inner.clock.now();
        let before = self.len();
        self.inner.windows.retain(|_, e| e.expires_at > now);
        self.inner.counters.retain(|_, e| e.expires_at > now);
        self.inner.values.retain(|_, e| e.expires_at > now);
        before.saturating_sub(self.len())
    }

    /// Number of live and not-yet-cleaned entries.
    pub fn len(&self) -> usize {
        self.inner.windows.len() + self.inner.counters.len() + self.inner.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn hit_window(
        &self,
        key: &str,
        limit: u64,
        window: Duration,
    ) -> Result<WindowHit, StoreError> {
        let now = self.inner.clock.now();
        let cutoff = clock::before(now, window);

        let mut entry = self
            .inner
            .windows
            .entry(key.to_string())
            .or_insert_with(|| Expiring {
                value: VecDeque::new(),
                expires_at: now,
            });
        let hits = &mut entry.value_mut().value;

        while hits.front().is_some_and(|t| *t <= cutoff) {
            hits.pop_front();
        }

        let held = hits.len() as u64;
        let (count, freeing) = if held < limit {
            hits.push_back(now);
            (held + 1, hits.front().copied())
        } else {
            // Room returns once all but `limit - 1` of the held hits age out
            let index = usize::try_from(held - limit).unwrap_or(usize::MAX);
            (held + 1, hits.get(index).copied())
        };

        let newest = hits.back().copied().unwrap_or(now);
        entry.value_mut().expires_at = clock::after(newest, window);

        Ok(WindowHit {
            count,
            reset_at: clock::after(freeing.unwrap_or(now), window),
        })
    }

    async fn incr_with_ttl(&self, key: &str, ttl: Duration) -> Result<u64, StoreError> {
        let now = self.inner.clock.now();
        let mut entry = self
            .inner
            .counters
            .entry(key.to_string())
            .or_insert_with(|| Expiring {
                value: 0,
                expires_at: now,
            });
        let counter = entry.value_mut();

        if counter.value > 0 && counter.expires_at <= now {
            // Expired but not yet cleaned up
            counter.value = 0;
        }
        counter.value += 1;
        if counter.value == 1 {
            counter.expires_at = clock::after(now, ttl);
        }
        Ok(counter.value)
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let expires_at = clock::after(self.inner.clock.now(), ttl);
        self.inner.values.insert(
            key.to_string(),
            Expiring {
                value: value.to_string(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let now = self.inner.clock.now();
        let live = |expires_at: DateTime<Utc>| expires_at > now;
        Ok(self
            .inner
            .values
            .get(key)
            .is_some_and(|e| live(e.expires_at))
            || self
                .inner
                .counters
                .get(key)
                .is_some_and(|e| live(e.expires_at))
            || self
                .inner
                .windows
                .get(key)
                .is_some_and(|e| live(e.expires_at)))
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.inner.windows.remove(key);
        self.inner.counters.remove(key);
        self.inner.values.remove(key);
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
