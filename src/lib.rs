#![forbid(unsafe_code)]

//! Media-driver conductor for an Aeron-style shared-memory/UDP transport.
//!
//! The conductor is the single-threaded control plane: it owns publications,
//! subscriptions, images, and channel endpoints; brokers client commands;
//! drives timers; and instructs the sender and receiver agents through
//! one-way mailboxes.

pub mod channel;
pub mod config;
pub mod core;
pub mod driver;
pub mod error;
pub mod telemetry;

pub use error::{ConfigError, Error};
pub type Result<T> = std::result::Result<T, Error>;

// Re-export the main surface at the crate root for convenience.
pub use crate::channel::{ChannelDescriptor, ChannelUriError, Media};
pub use crate::config::Config;
pub use crate::core::{
    ClientId, CorrelationId, CounterId, EndpointId, EpochClock, ErrorCode, ManualClock, NanoClock,
    RegistrationId, SessionId, StreamId, SystemEpochClock, SystemNanoClock,
};
pub use crate::driver::{
    Agent, AgentRunner, BackoffIdleStrategy, ClientEvent, ClientProxy, CommandRingWriter,
    ConductorCommand, ConductorContext, ConductorError, Counter, Counters, DriverConductor,
    DriverConductorProxy, EventBroadcaster, EventSubscription, FileRawLogFactory, ImageState,
    IpcPublicationState, PublicationState, RawLog, RawLogFactory, ReceiverCommand, ReceiverProxy,
    SenderCommand, SenderProxy, command_ring,
};
