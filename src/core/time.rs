//! Time sources.
//!
//! The conductor never reads the system clock directly. Both clocks are
//! injected at construction so maintenance can be driven deterministically
//! in tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Monotonic nanosecond clock. Drives all timeouts and state transitions.
pub trait NanoClock: Send + Sync {
    fn nano_time(&self) -> u64;
}

/// Millisecond wall clock. Used only for labels and file timestamps,
/// never for ordering.
pub trait EpochClock: Send + Sync {
    fn time_ms(&self) -> u64;
}

/// Monotonic clock backed by `Instant`, anchored at construction.
pub struct SystemNanoClock {
    origin: Instant,
}

impl SystemNanoClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemNanoClock {
    fn default() -> Self {
        Self::new()
    }
}

impl NanoClock for SystemNanoClock {
    fn nano_time(&self) -> u64 {
        let elapsed = self.origin.elapsed();
        elapsed.as_nanos().min(u64::MAX as u128) as u64
    }
}

/// Wall clock backed by `SystemTime`.
pub struct SystemEpochClock;

impl EpochClock for SystemEpochClock {
    fn time_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }
}

/// Hand-advanced clock for tests. Cloning shares the underlying value, so a
/// test rig can advance time while the conductor holds the same clock.
#[derive(Clone, Default)]
pub struct ManualClock {
    ns: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance by `delta_ns` and return the new reading.
    pub fn advance(&self, delta_ns: u64) -> u64 {
        self.ns.fetch_add(delta_ns, Ordering::Relaxed) + delta_ns
    }

    pub fn set(&self, now_ns: u64) {
        self.ns.store(now_ns, Ordering::Relaxed);
    }
}

impl NanoClock for ManualClock {
    fn nano_time(&self) -> u64 {
        self.ns.load(Ordering::Relaxed)
    }
}

impl EpochClock for ManualClock {
    fn time_ms(&self) -> u64 {
        self.ns.load(Ordering::Relaxed) / 1_000_000
    }
}
