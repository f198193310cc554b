//! Environment abstraction for deterministic testing.
//!
//! Decouples routing logic from system resources (wall clock, randomness).
//! Production uses [`crate::SystemEnv`]; the harness uses a seeded
//! simulation environment so message ids and timestamps are reproducible.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Abstract environment providing time and randomness.
///
/// # Invariants
///
/// - `now()` never goes backwards within one environment instance
/// - `random_bytes()` uses cryptographically secure entropy in production
pub trait Environment: Clone + Send + Sync + 'static {
    /// Current wall-clock time, used to stamp messages.
    fn now(&self) -> DateTime<Utc>;

    /// Fills the provided buffer with random bytes.
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Generates a random `u64`.
    ///
    /// Used for connection ids.
    fn random_u64(&self) -> u64 {
        let mut bytes = [0u8; 8];
        self.random_bytes(&mut bytes);
        u64::from_be_bytes(bytes)
    }

    /// Generates a fresh RFC 4122 version 4 message id.
    fn message_id(&self) -> Uuid {
        let mut bytes = [0u8; 16];
        self.random_bytes(&mut bytes);
        uuid::Builder::from_random_bytes(bytes).into_uuid()
    }
}
