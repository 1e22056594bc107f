//! Client-facing event emission.
//!
//! The conductor is the single producer on the broadcast channel; every
//! attached client consumes all events and filters by correlation id. Writes
//! never block: when a subscriber queue is full the event is dropped for that
//! subscriber and the error counter is incremented.

use std::sync::{Arc, Mutex};

use bytes::{BufMut, Bytes, BytesMut};
use crossbeam::channel::{Receiver, Sender, TryRecvError, TrySendError};
use thiserror::Error;

use super::counters::Counter;
use super::frame::{self, FrameError, PayloadError, PayloadReader};
use crate::core::{
    CorrelationId, CounterId, ErrorCode, RegistrationId, SessionId, StreamId,
};

pub const ON_ERROR: u32 = 0x0F01;
pub const ON_AVAILABLE_IMAGE: u32 = 0x0F02;
pub const ON_PUBLICATION_READY: u32 = 0x0F03;
pub const ON_OPERATION_SUCCESS: u32 = 0x0F04;
pub const ON_UNAVAILABLE_IMAGE: u32 = 0x0F05;
pub const ON_SUBSCRIPTION_READY: u32 = 0x0F06;

#[derive(Debug, Error)]
pub enum EventError {
    #[error("unknown event type {msg_type_id:#x}")]
    UnknownType { msg_type_id: u32 },

    #[error("malformed event payload: {0}")]
    Malformed(#[from] PayloadError),

    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// Position counter allocated for one subscriber of an image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubscriberPosition {
    pub counter_id: CounterId,
    pub registration_id: RegistrationId,
}

/// A driver-to-client event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientEvent {
    PublicationReady {
        correlation_id: CorrelationId,
        registration_id: RegistrationId,
        stream_id: StreamId,
        session_id: SessionId,
        position_limit_counter_id: CounterId,
        is_exclusive: bool,
        log_file: String,
    },
    SubscriptionReady {
        correlation_id: CorrelationId,
        channel_status_counter_id: CounterId,
    },
    OperationSuccess {
        correlation_id: CorrelationId,
    },
    AvailableImage {
        correlation_id: CorrelationId,
        session_id: SessionId,
        stream_id: StreamId,
        subscriber_positions: Vec<SubscriberPosition>,
        log_file: String,
        source_identity: String,
    },
    UnavailableImage {
        correlation_id: CorrelationId,
        stream_id: StreamId,
        channel: String,
    },
    Error {
        correlation_id: CorrelationId,
        code: ErrorCode,
        message: String,
    },
}

impl ClientEvent {
    pub fn msg_type_id(&self) -> u32 {
        match self {
            Self::PublicationReady { .. } => ON_PUBLICATION_READY,
            Self::SubscriptionReady { .. } => ON_SUBSCRIPTION_READY,
            Self::OperationSuccess { .. } => ON_OPERATION_SUCCESS,
            Self::AvailableImage { .. } => ON_AVAILABLE_IMAGE,
            Self::UnavailableImage { .. } => ON_UNAVAILABLE_IMAGE,
            Self::Error { .. } => ON_ERROR,
        }
    }

    /// Frame the event for the broadcast channel.
    pub fn encode(&self) -> Result<Bytes, FrameError> {
        let mut buf = BytesMut::new();
        match self {
            Self::PublicationReady {
                correlation_id,
                registration_id,
                stream_id,
                session_id,
                position_limit_counter_id,
                is_exclusive,
                log_file,
            } => {
                buf.put_i64_le(correlation_id.get());
                buf.put_i64_le(registration_id.get());
                buf.put_i32_le(stream_id.get());
                buf.put_i32_le(session_id.get());
                buf.put_i32_le(position_limit_counter_id.get());
                buf.put_u8(u8::from(*is_exclusive));
                put_string(&mut buf, log_file);
            }
            Self::SubscriptionReady {
                correlation_id,
                channel_status_counter_id,
            } => {
                buf.put_i64_le(correlation_id.get());
                buf.put_i32_le(channel_status_counter_id.get());
            }
            Self::OperationSuccess { correlation_id } => {
                buf.put_i64_le(correlation_id.get());
            }
            Self::AvailableImage {
                correlation_id,
                session_id,
                stream_id,
                subscriber_positions,
                log_file,
                source_identity,
            } => {
                buf.put_i64_le(correlation_id.get());
                buf.put_i32_le(session_id.get());
                buf.put_i32_le(stream_id.get());
                buf.put_i32_le(subscriber_positions.len() as i32);
                for position in subscriber_positions {
                    buf.put_i32_le(position.counter_id.get());
                    buf.put_i64_le(position.registration_id.get());
                }
                put_string(&mut buf, log_file);
                put_string(&mut buf, source_identity);
            }
            Self::UnavailableImage {
                correlation_id,
                stream_id,
                channel,
            } => {
                buf.put_i64_le(correlation_id.get());
                buf.put_i32_le(stream_id.get());
                put_string(&mut buf, channel);
            }
            Self::Error {
                correlation_id,
                code,
                message,
            } => {
                buf.put_i64_le(correlation_id.get());
                buf.put_i32_le(code.code());
                put_string(&mut buf, message);
            }
        }
        frame::encode_frame(self.msg_type_id(), &buf)
    }

    /// Decode a framed event. Used by client libraries and test harnesses.
    pub fn decode(framed: &[u8]) -> Result<Self, EventError> {
        let (msg_type_id, payload) = frame::decode_frame(framed)?;
        let mut reader = PayloadReader::new(payload);
        let event = match msg_type_id {
            ON_PUBLICATION_READY => Self::PublicationReady {
                correlation_id: CorrelationId::new(reader.i64()?),
                registration_id: RegistrationId::new(reader.i64()?),
                stream_id: StreamId::new(reader.i32()?),
                session_id: SessionId::new(reader.i32()?),
                position_limit_counter_id: CounterId::new(reader.i32()?),
                is_exclusive: reader.u8()? != 0,
                log_file: reader.string()?,
            },
            ON_SUBSCRIPTION_READY => Self::SubscriptionReady {
                correlation_id: CorrelationId::new(reader.i64()?),
                channel_status_counter_id: CounterId::new(reader.i32()?),
            },
            ON_OPERATION_SUCCESS => Self::OperationSuccess {
                correlation_id: CorrelationId::new(reader.i64()?),
            },
            ON_AVAILABLE_IMAGE => {
                let correlation_id = CorrelationId::new(reader.i64()?);
                let session_id = SessionId::new(reader.i32()?);
                let stream_id = StreamId::new(reader.i32()?);
                let count = reader.i32()?;
                let mut subscriber_positions = Vec::new();
                for _ in 0..count {
                    subscriber_positions.push(SubscriberPosition {
                        counter_id: CounterId::new(reader.i32()?),
                        registration_id: RegistrationId::new(reader.i64()?),
                    });
                }
                Self::AvailableImage {
                    correlation_id,
                    session_id,
                    stream_id,
                    subscriber_positions,
                    log_file: reader.string()?,
                    source_identity: reader.string()?,
                }
            }
            ON_UNAVAILABLE_IMAGE => Self::UnavailableImage {
                correlation_id: CorrelationId::new(reader.i64()?),
                stream_id: StreamId::new(reader.i32()?),
                channel: reader.string()?,
            },
            ON_ERROR => {
                let correlation_id = CorrelationId::new(reader.i64()?);
                let raw_code = reader.i32()?;
                let code = ErrorCode::from_code(raw_code).ok_or(PayloadError {
                    offset: 8,
                    reason: format!("unknown error code {raw_code}"),
                })?;
                Self::Error {
                    correlation_id,
                    code,
                    message: reader.string()?,
                }
            }
            other => return Err(EventError::UnknownType { msg_type_id: other }),
        };
        reader.finish()?;
        Ok(event)
    }
}

fn put_string(buf: &mut BytesMut, value: &str) {
    buf.put_i32_le(value.len() as i32);
    buf.put_slice(value.as_bytes());
}

/// Single-producer broadcast of framed events to all attached clients.
#[derive(Clone, Default)]
pub struct EventBroadcaster {
    subscribers: Arc<Mutex<Vec<Sender<Bytes>>>>,
}

impl EventBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, capacity: usize) -> EventSubscription {
        let (tx, rx) = crossbeam::channel::bounded(capacity);
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(|err| err.into_inner());
        subscribers.push(tx);
        EventSubscription { rx }
    }

    /// Deliver a frame to every subscriber. Returns how many deliveries were
    /// dropped because a queue was full. Disconnected subscribers are pruned.
    pub fn publish(&self, frame: Bytes) -> usize {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(|err| err.into_inner());
        let mut dropped = 0;
        subscribers.retain(|tx| match tx.try_send(frame.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                dropped += 1;
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        });
        dropped
    }
}

/// A client's view of the broadcast channel.
pub struct EventSubscription {
    rx: Receiver<Bytes>,
}

impl EventSubscription {
    pub fn try_next_frame(&self) -> Option<Bytes> {
        match self.rx.try_recv() {
            Ok(frame) => Some(frame),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    pub fn try_next(&self) -> Option<Result<ClientEvent, EventError>> {
        self.try_next_frame().map(|frame| ClientEvent::decode(&frame))
    }
}

/// Conductor-side emitter. Encodes events, publishes them, and accounts for
/// drops on the shared error counter.
pub struct ClientProxy {
    broadcaster: EventBroadcaster,
    error_counter: Counter,
}

impl ClientProxy {
    pub fn new(broadcaster: EventBroadcaster, error_counter: Counter) -> Self {
        Self {
            broadcaster,
            error_counter,
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn on_publication_ready(
        &self,
        correlation_id: CorrelationId,
        registration_id: RegistrationId,
        stream_id: StreamId,
        session_id: SessionId,
        position_limit_counter_id: CounterId,
        is_exclusive: bool,
        log_file: String,
    ) {
        self.emit(ClientEvent::PublicationReady {
            correlation_id,
            registration_id,
            stream_id,
            session_id,
            position_limit_counter_id,
            is_exclusive,
            log_file,
        });
    }

    pub fn on_subscription_ready(
        &self,
        correlation_id: CorrelationId,
        channel_status_counter_id: CounterId,
    ) {
        self.emit(ClientEvent::SubscriptionReady {
            correlation_id,
            channel_status_counter_id,
        });
    }

    pub fn operation_succeeded(&self, correlation_id: CorrelationId) {
        self.emit(ClientEvent::OperationSuccess { correlation_id });
    }

    pub fn on_available_image(
        &self,
        correlation_id: CorrelationId,
        session_id: SessionId,
        stream_id: StreamId,
        subscriber_positions: Vec<SubscriberPosition>,
        log_file: String,
        source_identity: String,
    ) {
        self.emit(ClientEvent::AvailableImage {
            correlation_id,
            session_id,
            stream_id,
            subscriber_positions,
            log_file,
            source_identity,
        });
    }

    pub fn on_unavailable_image(
        &self,
        correlation_id: CorrelationId,
        stream_id: StreamId,
        channel: String,
    ) {
        self.emit(ClientEvent::UnavailableImage {
            correlation_id,
            stream_id,
            channel,
        });
    }

    pub fn on_error(&self, correlation_id: CorrelationId, code: ErrorCode, message: String) {
        tracing::debug!(%correlation_id, code = %code, %message, "error event");
        self.emit(ClientEvent::Error {
            correlation_id,
            code,
            message,
        });
    }

    fn emit(&self, event: ClientEvent) {
        let frame = match event.encode() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(error = %e, "event dropped: exceeds frame bound");
                self.error_counter.increment();
                return;
            }
        };
        let dropped = self.broadcaster.publish(frame);
        if dropped > 0 {
            tracing::warn!(dropped, "event dropped: subscriber queue full");
            for _ in 0..dropped {
                self.error_counter.increment();
            }
        }
    }
}
