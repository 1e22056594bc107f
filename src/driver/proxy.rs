//! One-way mailboxes between the conductor and the data-plane agents.
//!
//! Each proxy exposes only the handful of operations the conductor calls on
//! that collaborator. Commands are fire-and-forget: the conductor never waits
//! for the agent, and an agent acknowledges teardown simply by consuming the
//! command.

use crossbeam::channel::{Receiver, Sender, TrySendError};

use crate::core::{CorrelationId, EndpointId, RegistrationId, SessionId, StreamId};

/// Commands the conductor issues to the sender agent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SenderCommand {
    RegisterSendChannelEndpoint {
        endpoint_id: EndpointId,
        channel: String,
    },
    CloseSendChannelEndpoint {
        endpoint_id: EndpointId,
    },
    NewNetworkPublication {
        registration_id: RegistrationId,
        stream_id: StreamId,
        session_id: SessionId,
        mtu: u32,
        term_length: u32,
        log_file: String,
    },
    RemoveNetworkPublication {
        registration_id: RegistrationId,
    },
    AddDestination {
        registration_id: RegistrationId,
        endpoint: String,
    },
    RemoveDestination {
        registration_id: RegistrationId,
        endpoint: String,
    },
}

/// Commands the conductor issues to the receiver agent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReceiverCommand {
    RegisterReceiveChannelEndpoint {
        endpoint_id: EndpointId,
        channel: String,
    },
    CloseReceiveChannelEndpoint {
        endpoint_id: EndpointId,
    },
    AddSubscription {
        endpoint_id: EndpointId,
        stream_id: StreamId,
    },
    RemoveSubscription {
        endpoint_id: EndpointId,
        stream_id: StreamId,
    },
    NewPublicationImage {
        endpoint_id: EndpointId,
        correlation_id: CorrelationId,
        session_id: SessionId,
        stream_id: StreamId,
        term_length: u32,
        log_file: String,
    },
    RemovePublicationImage {
        endpoint_id: EndpointId,
        correlation_id: CorrelationId,
    },
}

/// Commands from data-plane agents back into the conductor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConductorCommand {
    /// The receiver saw a setup frame for an unknown (session, stream) on one
    /// of its endpoints and asks the conductor to build the image.
    CreatePublicationImage {
        endpoint_id: EndpointId,
        session_id: SessionId,
        stream_id: StreamId,
        initial_term_id: i32,
        active_term_id: i32,
        term_offset: u32,
        term_length: u32,
        mtu: u32,
        source_identity: String,
    },
}

#[derive(Clone)]
pub struct SenderProxy {
    tx: Sender<SenderCommand>,
}

impl SenderProxy {
    /// Build a proxy plus the receiving end the sender agent drains.
    pub fn channel() -> (Self, Receiver<SenderCommand>) {
        let (tx, rx) = crossbeam::channel::unbounded();
        (Self { tx }, rx)
    }

    pub fn send(&self, command: SenderCommand) {
        if self.tx.send(command).is_err() {
            tracing::warn!("sender mailbox closed");
        }
    }
}

#[derive(Clone)]
pub struct ReceiverProxy {
    tx: Sender<ReceiverCommand>,
}

impl ReceiverProxy {
    pub fn channel() -> (Self, Receiver<ReceiverCommand>) {
        let (tx, rx) = crossbeam::channel::unbounded();
        (Self { tx }, rx)
    }

    pub fn send(&self, command: ReceiverCommand) {
        if self.tx.send(command).is_err() {
            tracing::warn!("receiver mailbox closed");
        }
    }
}

/// Handle data-plane agents use to reach the conductor. Bounded: a stalled
/// conductor sheds image-creation requests rather than buffering forever
/// (the receiver will re-request on the next setup frame).
#[derive(Clone)]
pub struct DriverConductorProxy {
    tx: Sender<ConductorCommand>,
}

impl DriverConductorProxy {
    pub fn channel(capacity: usize) -> (Self, Receiver<ConductorCommand>) {
        let (tx, rx) = crossbeam::channel::bounded(capacity);
        (Self { tx }, rx)
    }

    pub fn send(&self, command: ConductorCommand) {
        match self.tx.try_send(command) {
            Ok(()) => {}
            Err(TrySendError::Full(command)) => {
                tracing::warn!(?command, "conductor queue full, command dropped");
            }
            Err(TrySendError::Disconnected(_)) => {
                tracing::warn!("conductor queue closed");
            }
        }
    }
}
