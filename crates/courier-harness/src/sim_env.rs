//! Seeded environment for reproducible runs.
//!
//! Message ids, connection ids and timestamps all come from one ChaCha stream
//! and one simulated clock, so two runs with the same seed stamp identical
//! messages.

#![allow(clippy::disallowed_types, reason = "short critical sections, never held across await")]

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Duration, TimeZone, Utc};
use courier_server::Environment;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Default seed when a test does not care.
pub const DEFAULT_SEED: u64 = 0x00C0_FFEE;

/// Deterministic [`Environment`].
///
/// The clock starts at 2024-01-01T00:00:00Z and moves forward one millisecond
/// on every [`Environment::now`] call, so consecutive messages always carry
/// strictly increasing timestamps. Clones share the clock and the RNG.
#[derive(Clone)]
pub struct SimEnv {
    state: Arc<Mutex<SimState>>,
}

struct SimState {
    rng: ChaCha8Rng,
    now: DateTime<Utc>,
}

impl SimEnv {
    /// Environment seeded with [`DEFAULT_SEED`].
    pub fn new() -> Self {
        Self::with_seed(DEFAULT_SEED)
    }

    /// Environment seeded with `seed`.
    pub fn with_seed(seed: u64) -> Self {
        let epoch = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single().unwrap_or_default();
        Self {
            state: Arc::new(Mutex::new(SimState {
                rng: ChaCha8Rng::seed_from_u64(seed),
                now: epoch,
            })),
        }
    }

    /// Move the clock forward without reading it.
    pub fn advance(&self, by: Duration) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.now += by;
    }

    /// Current simulated time, without ticking.
    pub fn peek(&self) -> DateTime<Utc> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).now
    }
}

impl Default for SimEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SimEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimEnv").field("now", &self.peek()).finish_non_exhaustive()
    }
}

impl Environment for SimEnv {
    fn now(&self) -> DateTime<Utc> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.now += Duration::milliseconds(1);
        state.now
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.rng.fill_bytes(buffer);
    }
}
