//! Driver control plane.
//!
//! Provides:
//! - The conductor: command handling, registries, timer maintenance
//! - Wire codecs for client commands and events
//! - Mailbox proxies for the sender and receiver agents
//! - Raw-log allocation and shared counters
//! - The agent runner and idle strategy

pub mod agent;
pub mod buffer;
pub mod command;
pub mod conductor;
pub mod counters;
pub mod endpoint;
pub mod events;
pub mod frame;
pub mod image;
pub mod ipc_publication;
pub mod proxy;
pub mod publication;
pub mod subscription;

pub use agent::{Agent, AgentRunner, BackoffIdleStrategy};
pub use buffer::{FileRawLogFactory, RawLog, RawLogError, RawLogFactory};
pub use command::{ClientCommand, CommandError};
pub use conductor::{ConductorContext, ConductorError, DriverConductor, ErrorHandler};
pub use counters::{Counter, Counters, CountersExhausted};
pub use endpoint::{ReceiveChannelEndpoint, SendChannelEndpoint};
pub use events::{ClientEvent, ClientProxy, EventBroadcaster, EventSubscription};
pub use frame::{CommandRingWriter, command_ring};
pub use image::{ImageState, PublicationImage};
pub use ipc_publication::{IpcPublication, IpcPublicationState};
pub use proxy::{
    ConductorCommand, DriverConductorProxy, ReceiverCommand, ReceiverProxy, SenderCommand,
    SenderProxy,
};
pub use publication::{NetworkPublication, PublicationState};
pub use subscription::{SubscriptionLink, SubscriptionTarget};
