//! Coarse abuse detection and the identifier block list.
//!
//! The detector counts every request per identifier across all buckets.
//! Crossing the threshold only reports a suspected attack; putting the
//! identifier on the block list is a separate call left to the caller.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::error::ServiceError;
use crate::identity::ClientIdentifier;
use crate::rate_limit::FailMode;
use crate::store::{self, CounterStore, StoreError};

/// Detection and blocking parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttackPolicy {
    /// Requests per window above which an identifier is flagged.
    pub threshold: u64,
    /// Length of the counting window.
    pub window: Duration,
    /// Block duration when the caller does not pass one.
    pub block_duration: Duration,
}

impl Default for AttackPolicy {
    fn default() -> Self {
        Self {
            threshold: 50,
            window: Duration::from_secs(60),
            block_duration: Duration::from_secs(60 * 60),
        }
    }
}

/// Outcome of counting one request against the attack threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttackVerdict {
    Clean,
    /// Over the threshold for the current window.
    Attack,
    /// The store failed; `hostile` is what the fail mode says to assume.
    Unknown { hostile: bool },
}

impl AttackVerdict {
    /// Whether the request should be treated as part of an attack.
    pub fn is_hostile(self) -> bool {
        match self {
            Self::Clean => false,
            Self::Attack => true,
            Self::Unknown { hostile } => hostile,
        }
    }
}

#[derive(Clone)]
pub struct AttackDetector {
    store: Option<Arc<dyn CounterStore>>,
    policy: AttackPolicy,
    fail_mode: FailMode,
}

impl AttackDetector {
    /// Without a store every check reports "no attack, not blocked".
    pub fn new(
        store: Option<Arc<dyn CounterStore>>,
        policy: AttackPolicy,
        fail_mode: FailMode,
    ) -> Self {
        Self {
            store,
            policy,
            fail_mode,
        }
    }

    pub fn policy(&self) -> AttackPolicy {
        self.policy
    }

    /// Counts one request for `id` and reports whether it is over the
    /// threshold for the current window.
    pub async fn check_for_attack(&self, id: &ClientIdentifier) -> Result<bool, ServiceError> {
        self.assess(id).await.map(AttackVerdict::is_hostile)
    }

    /// Like [`check_for_attack`](Self::check_for_attack), but keeps a real
    /// threshold crossing apart from a store failure.
    pub async fn assess(&self, id: &ClientIdentifier) -> Result<AttackVerdict, ServiceError> {
        let Some(store) = &self.store else {
            return Ok(AttackVerdict::Clean);
        };

        match store
            .incr_with_ttl(&store::attack_key(id.as_str()), self.policy.window)
            .await
        {
            Ok(count) => {
                let attack = count > self.policy.threshold;
                if attack && count == self.policy.threshold + 1 {
                    // Log once per window, not on every request past the line
                    warn!(identifier = %id, count, "suspected attack: request threshold exceeded");
                }
                Ok(if attack {
                    AttackVerdict::Attack
                } else {
                    AttackVerdict::Clean
                })
            }
            Err(e) => self
                .degrade(e, "attack check")
                .map(|hostile| AttackVerdict::Unknown { hostile }),
        }
    }

    /// Puts `id` on the block list for `duration` (default from the policy).
    pub async fn block_identifier(
        &self,
        id: &ClientIdentifier,
        duration: Option<Duration>,
    ) -> Result<(), ServiceError> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        let duration = duration.unwrap_or(self.policy.block_duration);
        store
            .set_with_ttl(&store::block_key(id.as_str()), "1", duration)
            .await?;
        info!(identifier = %id, seconds = duration.as_secs(), "identifier blocked");
        Ok(())
    }

    /// Whether a live block record exists for `id`.
    pub async fn is_blocked(&self, id: &ClientIdentifier) -> Result<bool, ServiceError> {
        let Some(store) = &self.store else {
            return Ok(false);
        };
        match store.exists(&store::block_key(id.as_str())).await {
            Ok(blocked) => Ok(blocked),
            Err(e) => self.degrade(e, "block lookup"),
        }
    }

    /// Removes the block record for `id`, if any.
    pub async fn unblock_identifier(&self, id: &ClientIdentifier) -> Result<(), ServiceError> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        store.delete(&store::block_key(id.as_str())).await?;
        info!(identifier = %id, "identifier unblocked");
        Ok(())
    }

    fn degrade(&self, error: StoreError, what: &str) -> Result<bool, ServiceError> {
        match self.fail_mode {
            FailMode::Open => {
                warn!(%error, "{what} failed; treating client as clean");
                Ok(false)
            }
            FailMode::Closed => {
                warn!(%error, "{what} failed; treating client as hostile");
                Ok(true)
            }
            FailMode::Propagate => Err(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::identity::IdentifierSource;
    use crate::store::MemoryStore;

    fn detector() -> (AttackDetector, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::starting_now());
        let store: Arc<dyn CounterStore> = Arc::new(MemoryStore::with_clock(clock.clone()));
        (
            AttackDetector::new(Some(store), AttackPolicy::default(), FailMode::Open),
            clock,
        )
    }

    fn id(s: &str) -> ClientIdentifier {
        ClientIdentifier::new(s, IdentifierSource::RealIp)
    }

    #[tokio::test]
    async fn store_failure_is_not_an_attack() {
        struct Down;

        #[async_trait::async_trait]
        impl CounterStore for Down {
            async fn hit_window(
                &self,
                _: &str,
                _: u64,
                _: Duration,
            ) -> Result<store::WindowHit, StoreError> {
                Err(StoreError::Backend("down".into()))
            }
            async fn incr_with_ttl(&self, _: &str, _: Duration) -> Result<u64, StoreError> {
                Err(StoreError::Backend("down".into()))
            }
            async fn set_with_ttl(&self, _: &str, _: &str, _: Duration) -> Result<(), StoreError> {
                Err(StoreError::Backend("down".into()))
            }
            async fn exists(&self, _: &str) -> Result<bool, StoreError> {
                Err(StoreError::Backend("down".into()))
            }
            async fn delete(&self, _: &str) -> Result<(), StoreError> {
                Err(StoreError::Backend("down".into()))
            }
            fn backend(&self) -> &'static str {
                "down"
            }
        }

        let down = |fail_mode| {
            AttackDetector::new(Some(Arc::new(Down)), AttackPolicy::default(), fail_mode)
        };

        let closed = down(FailMode::Closed);
        let verdict = closed.assess(&id("Y")).await.unwrap();
        assert_eq!(verdict, AttackVerdict::Unknown { hostile: true });
        assert!(closed.check_for_attack(&id("Y")).await.unwrap());

        let open = down(FailMode::Open);
        assert_eq!(
            open.assess(&id("Y")).await.unwrap(),
            AttackVerdict::Unknown { hostile: false }
        );
    }

    #[tokio::test]
    async fn flags_after_threshold_without_blocking() {
        let (detector, _) = detector();
        let y = id("Y");

        for call in 1..=50 {
            assert!(!detector.check_for_attack(&y).await.unwrap(), "call {call}");
        }
        assert!(detector.check_for_attack(&y).await.unwrap());
        assert!(detector.check_for_attack(&y).await.unwrap());
        assert!(!detector.is_blocked(&y).await.unwrap());
    }

    #[tokio::test]
    async fn counter_resets_after_window() {
        let (detector, clock) = detector();
        let y = id("Y");

        for _ in 0..51 {
            detector.check_for_attack(&y).await.unwrap();
        }
        assert!(detector.check_for_attack(&y).await.unwrap());

        clock.advance(Duration::from_secs(61));
        assert!(!detector.check_for_attack(&y).await.unwrap());
    }

    #[tokio::test]
    async fn counters_are_per_identifier() {
        let (detector, _) = detector();
        for _ in 0..60 {
            detector.check_for_attack(&id("A")).await.unwrap();
        }
        assert!(!detector.check_for_attack(&id("B")).await.unwrap());
    }

    #[tokio::test]
    async fn block_lifecycle() {
        let (detector, clock) = detector();
        let y = id("Y");

        detector.block_identifier(&y, None).await.unwrap();
        assert!(detector.is_blocked(&y).await.unwrap());
        assert!(!detector.is_blocked(&id("Z")).await.unwrap());

        clock.advance(Duration::from_secs(3599));
        assert!(detector.is_blocked(&y).await.unwrap());
        clock.advance(Duration::from_secs(1));
        assert!(!detector.is_blocked(&y).await.unwrap());

        detector
            .block_identifier(&y, Some(Duration::from_secs(30)))
            .await
            .unwrap();
        assert!(detector.is_blocked(&y).await.unwrap());
        detector.unblock_identifier(&y).await.unwrap();
        assert!(!detector.is_blocked(&y).await.unwrap());
    }

    #[tokio::test]
    async fn no_store_is_always_clean() {
        let detector = AttackDetector::new(None, AttackPolicy::default(), FailMode::Closed);
        let y = id("Y");
        for _ in 0..100 {
            assert!(!detector.check_for_attack(&y).await.unwrap());
        }
        detector.block_identifier(&y, None).await.unwrap();
        assert!(!detector.is_blocked(&y).await.unwrap());
    }
}
