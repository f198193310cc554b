//! Fault-injecting log wrapper for chaos testing.
//!
//! Delegates to an inner log but fails operations at a configured rate. A
//! failed append never reaches the inner log, so the inner log is the oracle
//! for "what was actually persisted".

use std::sync::{
    Arc,
    atomic::{AtomicU64, AtomicUsize, Ordering},
};

use async_trait::async_trait;
use courier_proto::{ConversationKey, Message};

use super::{MessageLog, StorageError};

const DEFAULT_SEED: u64 = 0x1234_5678_9ABC_DEF0;

/// Log wrapper that randomly injects failures.
///
/// Failures are drawn from a deterministic LCG, so the same seed and the same
/// operation order reproduce the same failures.
#[derive(Clone)]
pub struct ChaoticLog<L: MessageLog> {
    inner: L,
    /// 0.0 never fails, 1.0 always fails
    failure_rate: f64,
    rng_state: Arc<AtomicU64>,
    operation_count: Arc<AtomicUsize>,
    injected_failures: Arc<AtomicUsize>,
}

impl<L: MessageLog> ChaoticLog<L> {
    /// Wrap `inner` with the default seed.
    ///
    /// # Panics
    ///
    /// Panics if `failure_rate` is not in [0.0, 1.0]
    pub fn new(inner: L, failure_rate: f64) -> Self {
        Self::with_seed(inner, failure_rate, DEFAULT_SEED)
    }

    /// Wrap `inner` with an explicit seed.
    ///
    /// # Panics
    ///
    /// Panics if `failure_rate` is not in [0.0, 1.0]
    pub fn with_seed(inner: L, failure_rate: f64, seed: u64) -> Self {
        assert!(
            (0.0..=1.0).contains(&failure_rate),
            "failure_rate must be between 0.0 and 1.0, got {failure_rate}"
        );

        Self {
            inner,
            failure_rate,
            rng_state: Arc::new(AtomicU64::new(seed)),
            operation_count: Arc::new(AtomicUsize::new(0)),
            injected_failures: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// A wrapper whose every operation fails.
    pub fn failing(inner: L) -> Self {
        Self::new(inner, 1.0)
    }

    /// Underlying log, for checking invariants after chaos.
    pub fn inner(&self) -> &L {
        &self.inner
    }

    /// Operations attempted through this wrapper.
    pub fn operation_count(&self) -> usize {
        self.operation_count.load(Ordering::Relaxed)
    }

    /// Operations that were failed on purpose.
    pub fn injected_failures(&self) -> usize {
        self.injected_failures.load(Ordering::Relaxed)
    }

    fn roll(&self) -> Result<(), StorageError> {
        // LCG constants from Numerical Recipes
        const A: u64 = 1_664_525;
        const C: u64 = 1_013_904_223;
        const M: u64 = 1u64 << 32;

        self.operation_count.fetch_add(1, Ordering::Relaxed);
        let step = |state: u64| (A.wrapping_mul(state).wrapping_add(C)) % M;

        let previous = self
            .rng_state
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |s| Some(step(s)))
            .unwrap_or_else(|current| current);
        let sample = (step(previous) as f64) / (M as f64);

        if sample < self.failure_rate {
            self.injected_failures.fetch_add(1, Ordering::Relaxed);
            return Err(StorageError::Unavailable("chaotic failure injection".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl<L: MessageLog> MessageLog for ChaoticLog<L> {
    async fn append(
        &self,
        keys: &[ConversationKey],
        message: &Message,
    ) -> Result<(), StorageError> {
        self.roll()?;
        self.inner.append(keys, message).await
    }

    async fn range(
        &self,
        key: &ConversationKey,
        limit: usize,
    ) -> Result<Vec<Message>, StorageError> {
        self.roll()?;
        self.inner.range(key, limit).await
    }

    async fn count(&self, key: &ConversationKey) -> Result<u64, StorageError> {
        self.roll()?;
        self.inner.count(key).await
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use courier_proto::{Target, UserId};
    use uuid::Uuid;

    use super::*;
    use crate::storage::MemoryLog;

    fn broadcast(n: u128) -> Message {
        Message::new(
            Uuid::from_u128(n),
            Target::Broadcast,
            "x",
            UserId::new("u1"),
            "alice",
            Utc.timestamp_opt(0, 0).unwrap(),
        )
    }

    #[tokio::test]
    async fn always_failing_never_touches_inner() {
        let log = ChaoticLog::failing(MemoryLog::new());

        let result = log.append(&[ConversationKey::Broadcast], &broadcast(1)).await;

        assert!(matches!(result, Err(StorageError::Unavailable(_))));
        assert_eq!(log.inner().total_entries(), 0);
        assert_eq!(log.operation_count(), 1);
        assert_eq!(log.injected_failures(), 1);
    }

    #[tokio::test]
    async fn zero_rate_is_transparent() {
        let log = ChaoticLog::new(MemoryLog::new(), 0.0);

        for n in 0..10 {
            log.append(&[ConversationKey::Broadcast], &broadcast(n)).await.unwrap();
        }

        assert_eq!(log.count(&ConversationKey::Broadcast).await.unwrap(), 10);
        assert_eq!(log.injected_failures(), 0);
    }

    #[tokio::test]
    async fn same_seed_same_failures() {
        async fn pattern(seed: u64) -> Vec<bool> {
            let log = ChaoticLog::with_seed(MemoryLog::new(), 0.5, seed);
            let mut out = Vec::new();
            for n in 0..32 {
                out.push(log.append(&[ConversationKey::Broadcast], &broadcast(n)).await.is_ok());
            }
            out
        }

        assert_eq!(pattern(42).await, pattern(42).await);
    }

    #[test]
    #[should_panic(expected = "failure_rate must be between 0.0 and 1.0")]
    fn rejects_out_of_range_rate() {
        let _ = ChaoticLog::new(MemoryLog::new(), 1.5);
    }
}
