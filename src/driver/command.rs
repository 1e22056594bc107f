//! Client command decoding.
//!
//! Commands arrive as frames on the command ring. Payloads are fixed-layout
//! little-endian flyweights; readers validate every length before a field is
//! read so a malformed frame can never panic the conductor.

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

use super::frame::{FrameError, PayloadError, PayloadReader};
use crate::core::{ClientId, CorrelationId, RegistrationId, StreamId};

pub const ADD_PUBLICATION: u32 = 0x01;
pub const ADD_EXCLUSIVE_PUBLICATION: u32 = 0x02;
pub const REMOVE_PUBLICATION: u32 = 0x03;
pub const ADD_SUBSCRIPTION: u32 = 0x04;
pub const REMOVE_SUBSCRIPTION: u32 = 0x05;
pub const CLIENT_KEEPALIVE: u32 = 0x06;
pub const ADD_DESTINATION: u32 = 0x07;
pub const REMOVE_DESTINATION: u32 = 0x08;

/// Sentinel for "no registration" in `ADD_SUBSCRIPTION`.
pub const NO_REGISTRATION_ID: i64 = -1;

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("unknown command type {msg_type_id:#x}")]
    UnknownType { msg_type_id: u32 },

    #[error("malformed {command} command: {reason}")]
    Malformed {
        command: &'static str,
        reason: String,
    },

    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// A decoded client command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientCommand {
    AddPublication {
        client_id: ClientId,
        correlation_id: CorrelationId,
        stream_id: StreamId,
        channel: String,
        exclusive: bool,
    },
    RemovePublication {
        client_id: ClientId,
        correlation_id: CorrelationId,
        registration_id: RegistrationId,
    },
    AddSubscription {
        client_id: ClientId,
        correlation_id: CorrelationId,
        /// Registration of a specific publication to attach to, or
        /// [`NO_REGISTRATION_ID`] for a network/spy subscription.
        registration_correlation_id: i64,
        stream_id: StreamId,
        channel: String,
    },
    RemoveSubscription {
        client_id: ClientId,
        correlation_id: CorrelationId,
        registration_id: RegistrationId,
    },
    ClientKeepalive {
        client_id: ClientId,
    },
    AddDestination {
        client_id: ClientId,
        correlation_id: CorrelationId,
        registration_id: RegistrationId,
        channel: String,
    },
    RemoveDestination {
        client_id: ClientId,
        correlation_id: CorrelationId,
        registration_id: RegistrationId,
        channel: String,
    },
}

impl ClientCommand {
    pub fn client_id(&self) -> ClientId {
        match self {
            Self::AddPublication { client_id, .. }
            | Self::RemovePublication { client_id, .. }
            | Self::AddSubscription { client_id, .. }
            | Self::RemoveSubscription { client_id, .. }
            | Self::ClientKeepalive { client_id }
            | Self::AddDestination { client_id, .. }
            | Self::RemoveDestination { client_id, .. } => *client_id,
        }
    }

    pub fn correlation_id(&self) -> Option<CorrelationId> {
        match self {
            Self::ClientKeepalive { .. } => None,
            Self::AddPublication { correlation_id, .. }
            | Self::RemovePublication { correlation_id, .. }
            | Self::AddSubscription { correlation_id, .. }
            | Self::RemoveSubscription { correlation_id, .. }
            | Self::AddDestination { correlation_id, .. }
            | Self::RemoveDestination { correlation_id, .. } => Some(*correlation_id),
        }
    }
}

/// Decode a command payload for the given message type.
pub fn decode_command(msg_type_id: u32, payload: &[u8]) -> Result<ClientCommand, CommandError> {
    match msg_type_id {
        ADD_PUBLICATION | ADD_EXCLUSIVE_PUBLICATION => {
            let name = if msg_type_id == ADD_PUBLICATION {
                "add-publication"
            } else {
                "add-exclusive-publication"
            };
            let mut reader = Reader::new(name, payload);
            let command = ClientCommand::AddPublication {
                client_id: ClientId::new(reader.i64()?),
                correlation_id: CorrelationId::new(reader.i64()?),
                stream_id: StreamId::new(reader.i32()?),
                channel: reader.string()?,
                exclusive: msg_type_id == ADD_EXCLUSIVE_PUBLICATION,
            };
            reader.finish()?;
            Ok(command)
        }
        REMOVE_PUBLICATION => {
            let mut reader = Reader::new("remove-publication", payload);
            let command = ClientCommand::RemovePublication {
                client_id: ClientId::new(reader.i64()?),
                correlation_id: CorrelationId::new(reader.i64()?),
                registration_id: RegistrationId::new(reader.i64()?),
            };
            reader.finish()?;
            Ok(command)
        }
        ADD_SUBSCRIPTION => {
            let mut reader = Reader::new("add-subscription", payload);
            let command = ClientCommand::AddSubscription {
                client_id: ClientId::new(reader.i64()?),
                correlation_id: CorrelationId::new(reader.i64()?),
                registration_correlation_id: reader.i64()?,
                stream_id: StreamId::new(reader.i32()?),
                channel: reader.string()?,
            };
            reader.finish()?;
            Ok(command)
        }
        REMOVE_SUBSCRIPTION => {
            let mut reader = Reader::new("remove-subscription", payload);
            let command = ClientCommand::RemoveSubscription {
                client_id: ClientId::new(reader.i64()?),
                correlation_id: CorrelationId::new(reader.i64()?),
                registration_id: RegistrationId::new(reader.i64()?),
            };
            reader.finish()?;
            Ok(command)
        }
        CLIENT_KEEPALIVE => {
            let mut reader = Reader::new("client-keepalive", payload);
            let command = ClientCommand::ClientKeepalive {
                client_id: ClientId::new(reader.i64()?),
            };
            reader.finish()?;
            Ok(command)
        }
        ADD_DESTINATION | REMOVE_DESTINATION => {
            let name = if msg_type_id == ADD_DESTINATION {
                "add-destination"
            } else {
                "remove-destination"
            };
            let mut reader = Reader::new(name, payload);
            let client_id = ClientId::new(reader.i64()?);
            let correlation_id = CorrelationId::new(reader.i64()?);
            let registration_id = RegistrationId::new(reader.i64()?);
            let channel = reader.string()?;
            reader.finish()?;
            Ok(if msg_type_id == ADD_DESTINATION {
                ClientCommand::AddDestination {
                    client_id,
                    correlation_id,
                    registration_id,
                    channel,
                }
            } else {
                ClientCommand::RemoveDestination {
                    client_id,
                    correlation_id,
                    registration_id,
                    channel,
                }
            })
        }
        other => Err(CommandError::UnknownType { msg_type_id: other }),
    }
}

/// Best-effort correlation id recovery from a frame that failed to decode,
/// so the client still gets an `ON_ERROR` for it. Keepalives carry none.
pub fn peek_correlation_id(msg_type_id: u32, payload: &[u8]) -> Option<CorrelationId> {
    if msg_type_id == CLIENT_KEEPALIVE || payload.len() < 16 {
        return None;
    }
    let raw = i64::from_le_bytes(payload[8..16].try_into().ok()?);
    Some(CorrelationId::new(raw))
}

// =============================================================================
// Client-side encoders. The driver never calls these; they define the wire
// contract for client libraries and the test proxy.
// =============================================================================

pub fn encode_add_publication(
    client_id: ClientId,
    correlation_id: CorrelationId,
    stream_id: StreamId,
    channel: &str,
) -> Bytes {
    let mut buf = BytesMut::new();
    buf.put_i64_le(client_id.get());
    buf.put_i64_le(correlation_id.get());
    buf.put_i32_le(stream_id.get());
    put_string(&mut buf, channel);
    buf.freeze()
}

pub fn encode_remove_publication(
    client_id: ClientId,
    correlation_id: CorrelationId,
    registration_id: RegistrationId,
) -> Bytes {
    let mut buf = BytesMut::new();
    buf.put_i64_le(client_id.get());
    buf.put_i64_le(correlation_id.get());
    buf.put_i64_le(registration_id.get());
    buf.freeze()
}

pub fn encode_add_subscription(
    client_id: ClientId,
    correlation_id: CorrelationId,
    registration_correlation_id: i64,
    stream_id: StreamId,
    channel: &str,
) -> Bytes {
    let mut buf = BytesMut::new();
    buf.put_i64_le(client_id.get());
    buf.put_i64_le(correlation_id.get());
    buf.put_i64_le(registration_correlation_id);
    buf.put_i32_le(stream_id.get());
    put_string(&mut buf, channel);
    buf.freeze()
}

pub fn encode_remove_subscription(
    client_id: ClientId,
    correlation_id: CorrelationId,
    registration_id: RegistrationId,
) -> Bytes {
    encode_remove_publication(client_id, correlation_id, registration_id)
}

pub fn encode_client_keepalive(client_id: ClientId) -> Bytes {
    let mut buf = BytesMut::new();
    buf.put_i64_le(client_id.get());
    buf.freeze()
}

pub fn encode_destination(
    client_id: ClientId,
    correlation_id: CorrelationId,
    registration_id: RegistrationId,
    channel: &str,
) -> Bytes {
    let mut buf = BytesMut::new();
    buf.put_i64_le(client_id.get());
    buf.put_i64_le(correlation_id.get());
    buf.put_i64_le(registration_id.get());
    put_string(&mut buf, channel);
    buf.freeze()
}

fn put_string(buf: &mut BytesMut, value: &str) {
    buf.put_i32_le(value.len() as i32);
    buf.put_slice(value.as_bytes());
}

struct Reader<'a> {
    command: &'static str,
    inner: PayloadReader<'a>,
}

impl<'a> Reader<'a> {
    fn new(command: &'static str, buf: &'a [u8]) -> Self {
        Self {
            command,
            inner: PayloadReader::new(buf),
        }
    }

    fn map(&self, error: PayloadError) -> CommandError {
        CommandError::Malformed {
            command: self.command,
            reason: error.to_string(),
        }
    }

    fn i64(&mut self) -> Result<i64, CommandError> {
        self.inner.i64().map_err(|e| self.map(e))
    }

    fn i32(&mut self) -> Result<i32, CommandError> {
        self.inner.i32().map_err(|e| self.map(e))
    }

    fn string(&mut self) -> Result<String, CommandError> {
        self.inner.string().map_err(|e| self.map(e))
    }

    fn finish(&mut self) -> Result<(), CommandError> {
        self.inner.finish().map_err(|e| self.map(e))
    }
}
