//! Core primitives for the driver.
//!
//! Module hierarchy follows type dependency order:
//! - time: clock traits and sources
//! - identity: typed entity ids
//! - error: wire-level error codes

pub mod error;
pub mod identity;
pub mod time;

pub use error::ErrorCode;
pub use identity::{
    ClientId, CorrelationId, CounterId, EndpointId, RegistrationId, SessionId, StreamId,
};
pub use time::{EpochClock, ManualClock, NanoClock, SystemEpochClock, SystemNanoClock};
