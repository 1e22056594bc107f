//! Driver configuration schema (normative defaults).
//!
//! Values are intentionally explicit about their units to avoid confusion.
//! All timeouts are read by the conductor through the injected clock, so a
//! test can scale time without touching the config.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory for memory-mapped log-buffer files.
    pub dir: PathBuf,

    /// Interval between timer-maintenance passes.
    pub timer_interval_ns: u64,
    /// A client with no keepalive for this long loses all registrations.
    pub client_liveness_timeout_ns: u64,
    /// Time an unreferenced publication lingers before closing.
    pub publication_linger_ns: u64,
    /// A draining publication with no receivers for this long moves to linger.
    pub publication_connection_timeout_ns: u64,
    /// An inactive image lingers this long (twice: inactive, then linger).
    pub image_liveness_timeout_ns: u64,

    /// Default term length for network publications. Power of two.
    pub term_buffer_length: u32,
    /// Default term length for shared-memory publications. Power of two.
    pub ipc_term_buffer_length: u32,
    /// Default MTU for network publications.
    pub mtu_length: u32,

    /// Capacity of the client-to-driver command ring.
    pub command_queue_capacity: usize,
    /// Capacity of the receiver-to-conductor command queue.
    pub conductor_queue_capacity: usize,
    /// Commands drained from the client ring per conductor tick.
    pub command_drain_limit: usize,
    /// Per-client broadcast queue depth; events beyond it are dropped.
    pub client_event_queue_capacity: usize,
    /// Slots in the shared counters buffer.
    pub max_counters: usize,

    /// Idle-strategy spin bound for the agent loop.
    pub idle_max_spins: u64,
    /// Idle-strategy yield bound for the agent loop.
    pub idle_max_yields: u64,
    /// Idle-strategy initial park time.
    pub idle_min_park_ns: u64,
    /// Idle-strategy park ceiling.
    pub idle_max_park_ns: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dir: std::env::temp_dir().join("aeronmd"),

            timer_interval_ns: 1_000_000_000,
            client_liveness_timeout_ns: 5_000_000_000,
            publication_linger_ns: 5_000_000_000,
            publication_connection_timeout_ns: 5_000_000_000,
            image_liveness_timeout_ns: 10_000_000_000,

            term_buffer_length: 16 * 1024 * 1024,
            ipc_term_buffer_length: 16 * 1024 * 1024,
            mtu_length: 4096,

            command_queue_capacity: 1024,
            conductor_queue_capacity: 1024,
            command_drain_limit: 10,
            client_event_queue_capacity: 512,
            max_counters: 1024,

            idle_max_spins: 10,
            idle_max_yields: 20,
            idle_min_park_ns: 1_000,
            idle_max_park_ns: 1_000_000,
        }
    }
}
