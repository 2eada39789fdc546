//! Monotonic clock abstraction.
//!
//! Heartbeat freshness (spec invariant 7 / P8) and visibility-timeout
//! expiry must be evaluated against a monotonic source, never wall clock
//! time — a system clock step must not resurrect a dead agent or re-deliver
//! a message early. Production code uses [`SystemClock`]; tests use
//! [`SteerableClock`] to advance time deterministically (spec §9 Design
//! Notes: "in tests substitute ... a steerable clock").

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A source of monotonic instants, injectable so sweepers and lease timers
/// can be driven deterministically in tests.
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now(&self) -> Instant;
}

#[derive(Debug, Clone, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock whose `now()` is the process start instant plus a manually
/// advanced offset. Lets tests simulate "3 missed heartbeats" or "the
/// visibility timeout elapsed" without sleeping.
#[derive(Debug, Clone)]
pub struct SteerableClock {
    origin: Instant,
    offset_ms: Arc<AtomicU64>,
}

impl SteerableClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset_ms: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.offset_ms
            .fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Default for SteerableClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SteerableClock {
    fn now(&self) -> Instant {
        self.origin + Duration::from_millis(self.offset_ms.load(Ordering::SeqCst))
    }
}

pub type SharedClock = Arc<dyn Clock>;

pub fn system_clock() -> SharedClock {
    Arc::new(SystemClock)
}
