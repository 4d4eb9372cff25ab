//! Store decorator that feeds backend failures into the metrics.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::{CounterStore, StoreError, WindowHit};
use crate::metrics::Metrics;

/// Counts backend failures before handing them to the caller, so they show
/// up in metrics even when the fail mode swallows them.
pub struct MeteredStore {
    inner: Arc<dyn CounterStore>,
    metrics: Arc<Metrics>,
}

impl MeteredStore {
    pub fn new(inner: Arc<dyn CounterStore>, metrics: Arc<Metrics>) -> Self {
        Self { inner, metrics }
    }

    fn observe<T>(&self, result: Result<T, StoreError>) -> Result<T, StoreError> {
        if result.is_err() {
            self.metrics.record_store_error();
        }
        result
    }
}

#[async_trait]
impl CounterStore for MeteredStore {
    async fn hit_window(
        &self,
        key: &str,
        limit: u64,
        window: Duration,
    ) -> Result<WindowHit, StoreError> {
        self.observe(self.inner.hit_window(key, limit, window).await)
    }

    async fn incr_with_ttl(&self, key: &str, ttl: Duration) -> Result<u64, StoreError> {
        self.observe(self.inner.incr_with_ttl(key, ttl).await)
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        self.observe(self.inner.set_with_ttl(key, value, ttl).await)
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        self.observe(self.inner.exists(key).await)
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.observe(self.inner.delete(key).await)
    }

    fn backend(&self) -> &'static str {
        self.inner.backend()
    }
}
