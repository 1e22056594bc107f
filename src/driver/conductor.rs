//! The driver conductor.
//!
//! Single-threaded control plane: drains the client command ring, services
//! internal commands from the receiver, and runs timer maintenance. Owns
//! every registry; the sender and receiver only ever see handles the
//! conductor established.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use crossbeam::channel::Receiver;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;

use super::buffer::{
    self, RawLogError, RawLogFactory, check_mtu_length, check_term_length,
};
use super::command::{
    ClientCommand, CommandError, NO_REGISTRATION_ID, decode_command, peek_correlation_id,
};
use super::counters::{Counter, Counters, CountersExhausted};
use super::endpoint::{ReceiveChannelEndpoint, SendChannelEndpoint};
use super::events::{ClientProxy, SubscriberPosition};
use super::frame;
use super::image::{ImageState, PublicationImage};
use super::ipc_publication::{IpcPublication, IpcPublicationState};
use super::proxy::{
    ConductorCommand, ReceiverCommand, ReceiverProxy, SenderCommand, SenderProxy,
};
use super::publication::{
    NetworkPublication, PublicationGeometry, PublicationState, SpyPosition,
};
use super::subscription::{SubscriptionLink, SubscriptionTarget};
use crate::channel::{ChannelDescriptor, ChannelUriError};
use crate::config::Config;
use crate::core::{
    ClientId, CorrelationId, CounterId, EndpointId, EpochClock, ErrorCode, NanoClock,
    RegistrationId, SessionId, StreamId,
};

const IPC_CHANNEL: &str = "aeron:ipc";
/// Correlation ids the driver mints for images, disjoint from client space.
const DRIVER_CORRELATION_BASE: i64 = 1 << 40;

#[derive(Debug, Error)]
pub enum ConductorError {
    #[error(transparent)]
    InvalidChannel(#[from] ChannelUriError),

    #[error("invalid channel: {reason}")]
    InvalidChannelParam { reason: String },

    #[error("unknown publication: {registration_id}")]
    UnknownPublication { registration_id: RegistrationId },

    #[error("unknown subscription: {registration_id}")]
    UnknownSubscription { registration_id: RegistrationId },

    #[error(transparent)]
    MalformedCommand(#[from] CommandError),

    #[error("{0}")]
    Generic(String),

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),
}

impl ConductorError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::InvalidChannel(_) | Self::InvalidChannelParam { .. } => ErrorCode::InvalidChannel,
            Self::UnknownPublication { .. } => ErrorCode::UnknownPublication,
            Self::UnknownSubscription { .. } => ErrorCode::UnknownSubscription,
            Self::MalformedCommand(_) => ErrorCode::MalformedCommand,
            Self::Generic(_) => ErrorCode::GenericError,
            Self::ResourceExhausted(_) => ErrorCode::ResourceExhausted,
        }
    }
}

impl From<RawLogError> for ConductorError {
    fn from(error: RawLogError) -> Self {
        match error {
            RawLogError::InvalidTermLength { .. } | RawLogError::InvalidMtuLength { .. } => {
                Self::InvalidChannelParam {
                    reason: error.to_string(),
                }
            }
            RawLogError::Io { .. } => Self::ResourceExhausted(error.to_string()),
        }
    }
}

impl From<CountersExhausted> for ConductorError {
    fn from(error: CountersExhausted) -> Self {
        Self::ResourceExhausted(error.to_string())
    }
}

/// Callback invoked for every recorded error, before the client event.
pub type ErrorHandler = Box<dyn FnMut(&ConductorError) + Send>;

/// Everything the conductor needs, injected at construction.
pub struct ConductorContext {
    pub config: Config,
    pub nano_clock: Arc<dyn NanoClock>,
    pub epoch_clock: Arc<dyn EpochClock>,
    pub raw_log_factory: Box<dyn RawLogFactory>,
    pub sender_proxy: SenderProxy,
    pub receiver_proxy: ReceiverProxy,
    pub client_proxy: ClientProxy,
    pub command_rx: Receiver<Bytes>,
    pub conductor_rx: Receiver<ConductorCommand>,
    pub counters: Counters,
    pub error_counter: Counter,
    pub error_handler: ErrorHandler,
    /// Fixed seed for session-id assignment; None draws from the OS.
    pub session_id_seed: Option<u64>,
}

struct ClientSession {
    last_keepalive_ns: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PublicationRef {
    Network(RegistrationId),
    Ipc(RegistrationId),
}

/// One client's reference on a publication. Removing the link decrements the
/// publication; the publication itself winds down once all links are gone.
struct PublicationLink {
    client_id: ClientId,
    resource: PublicationRef,
}

pub struct DriverConductor {
    config: Config,
    nano_clock: Arc<dyn NanoClock>,
    epoch_clock: Arc<dyn EpochClock>,
    raw_log_factory: Box<dyn RawLogFactory>,
    sender_proxy: SenderProxy,
    receiver_proxy: ReceiverProxy,
    client_proxy: ClientProxy,
    command_rx: Receiver<Bytes>,
    conductor_rx: Receiver<ConductorCommand>,
    counters: Counters,
    error_counter: Counter,
    error_handler: ErrorHandler,
    rng: StdRng,

    clients: BTreeMap<ClientId, ClientSession>,
    publication_links: BTreeMap<RegistrationId, PublicationLink>,
    network_publications: BTreeMap<RegistrationId, NetworkPublication>,
    ipc_publications: BTreeMap<RegistrationId, IpcPublication>,
    subscriptions: BTreeMap<RegistrationId, SubscriptionLink>,
    images: BTreeMap<CorrelationId, PublicationImage>,
    send_endpoints: BTreeMap<String, SendChannelEndpoint>,
    receive_endpoints: BTreeMap<String, ReceiveChannelEndpoint>,

    next_endpoint_id: i64,
    next_driver_correlation_id: i64,
    last_timer_check_ns: u64,
}

impl DriverConductor {
    pub fn new(ctx: ConductorContext) -> Self {
        let rng = match ctx.session_id_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let now_ns = ctx.nano_clock.nano_time();
        Self {
            config: ctx.config,
            nano_clock: ctx.nano_clock,
            epoch_clock: ctx.epoch_clock,
            raw_log_factory: ctx.raw_log_factory,
            sender_proxy: ctx.sender_proxy,
            receiver_proxy: ctx.receiver_proxy,
            client_proxy: ctx.client_proxy,
            command_rx: ctx.command_rx,
            conductor_rx: ctx.conductor_rx,
            counters: ctx.counters,
            error_counter: ctx.error_counter,
            error_handler: ctx.error_handler,
            rng,
            clients: BTreeMap::new(),
            publication_links: BTreeMap::new(),
            network_publications: BTreeMap::new(),
            ipc_publications: BTreeMap::new(),
            subscriptions: BTreeMap::new(),
            images: BTreeMap::new(),
            send_endpoints: BTreeMap::new(),
            receive_endpoints: BTreeMap::new(),
            next_endpoint_id: 1,
            next_driver_correlation_id: DRIVER_CORRELATION_BASE,
            last_timer_check_ns: now_ns,
        }
    }

    /// One duty cycle: drain commands (bounded), service internal commands,
    /// run timer maintenance when the interval has elapsed. Never blocks.
    pub fn do_work(&mut self) -> usize {
        let mut work_count = 0;
        work_count += self.drain_client_commands();
        work_count += self.drain_conductor_commands();
        work_count += self.timer_check();
        work_count
    }

    /// Deterministic teardown: release every log and counter. Idempotent.
    pub fn on_close(&mut self) {
        for (_, publication) in std::mem::take(&mut self.network_publications) {
            publication.raw_log().delete();
            self.counters.free(publication.position_limit_counter_id);
            for spy in publication.spy_positions() {
                self.counters.free(spy.counter_id);
            }
        }
        for (_, publication) in std::mem::take(&mut self.ipc_publications) {
            publication.raw_log().delete();
            self.counters.free(publication.position_limit_counter_id);
            for sub in publication.subscriber_positions() {
                self.counters.free(sub.counter_id);
            }
        }
        for (_, image) in std::mem::take(&mut self.images) {
            image.raw_log().delete();
            for sub in image.subscriber_positions() {
                self.counters.free(sub.counter_id);
            }
        }
        for (_, endpoint) in std::mem::take(&mut self.receive_endpoints) {
            self.counters.free(endpoint.status_counter_id);
        }
        self.send_endpoints.clear();
        self.subscriptions.clear();
        self.publication_links.clear();
        self.clients.clear();
    }

    // =========================================================================
    // Command ingestion
    // =========================================================================

    fn drain_client_commands(&mut self) -> usize {
        let mut work_count = 0;
        while work_count < self.config.command_drain_limit {
            let Ok(framed) = self.command_rx.try_recv() else {
                break;
            };
            work_count += 1;
            self.on_command_frame(&framed);
        }
        work_count
    }

    fn on_command_frame(&mut self, framed: &[u8]) {
        match frame::decode_frame(framed) {
            Ok((msg_type_id, payload)) => match decode_command(msg_type_id, payload) {
                Ok(command) => self.on_command(command),
                Err(e) => {
                    let correlation_id = peek_correlation_id(msg_type_id, payload);
                    let error = ConductorError::from(e);
                    self.record_error(correlation_id, &error);
                }
            },
            Err(e) => {
                let error = ConductorError::from(CommandError::from(e));
                self.record_error(None, &error);
            }
        }
    }

    fn on_command(&mut self, command: ClientCommand) {
        let correlation_id = command.correlation_id();
        let now_ns = self.nano_clock.nano_time();
        self.on_client_keepalive(command.client_id(), now_ns);

        let result = match command {
            ClientCommand::AddPublication {
                client_id,
                correlation_id,
                stream_id,
                channel,
                exclusive,
            } => self.on_add_publication(client_id, correlation_id, stream_id, &channel, exclusive),
            ClientCommand::RemovePublication {
                correlation_id,
                registration_id,
                ..
            } => self.on_remove_publication(correlation_id, registration_id),
            ClientCommand::AddSubscription {
                client_id,
                correlation_id,
                registration_correlation_id,
                stream_id,
                channel,
            } => self.on_add_subscription(
                client_id,
                correlation_id,
                registration_correlation_id,
                stream_id,
                &channel,
            ),
            ClientCommand::RemoveSubscription {
                correlation_id,
                registration_id,
                ..
            } => self.on_remove_subscription(correlation_id, registration_id),
            ClientCommand::ClientKeepalive { .. } => Ok(()),
            ClientCommand::AddDestination {
                correlation_id,
                registration_id,
                channel,
                ..
            } => self.on_destination(correlation_id, registration_id, &channel, true),
            ClientCommand::RemoveDestination {
                correlation_id,
                registration_id,
                channel,
                ..
            } => self.on_destination(correlation_id, registration_id, &channel, false),
        };

        if let Err(error) = result {
            self.record_error(correlation_id, &error);
        }
    }

    fn record_error(&mut self, correlation_id: Option<CorrelationId>, error: &ConductorError) {
        tracing::debug!(?correlation_id, error = %error, "command error");
        self.error_counter.increment();
        (self.error_handler)(error);
        if let Some(correlation_id) = correlation_id {
            self.client_proxy
                .on_error(correlation_id, error.error_code(), error.to_string());
        }
    }

    fn on_client_keepalive(&mut self, client_id: ClientId, now_ns: u64) {
        self.clients
            .entry(client_id)
            .and_modify(|client| client.last_keepalive_ns = now_ns)
            .or_insert(ClientSession {
                last_keepalive_ns: now_ns,
            });
    }

    // =========================================================================
    // Publications
    // =========================================================================

    fn on_add_publication(
        &mut self,
        client_id: ClientId,
        correlation_id: CorrelationId,
        stream_id: StreamId,
        channel: &str,
        exclusive: bool,
    ) -> Result<(), ConductorError> {
        let descriptor = ChannelDescriptor::parse(channel)?;
        if descriptor.spy {
            return Err(ConductorError::InvalidChannelParam {
                reason: "aeron-spy is a subscription-only prefix".to_string(),
            });
        }

        if descriptor.is_ipc() {
            self.add_ipc_publication(client_id, correlation_id, stream_id, &descriptor, exclusive)
        } else {
            self.add_network_publication(
                client_id,
                correlation_id,
                stream_id,
                channel,
                &descriptor,
                exclusive,
            )
        }
    }

    fn add_network_publication(
        &mut self,
        client_id: ClientId,
        correlation_id: CorrelationId,
        stream_id: StreamId,
        channel: &str,
        descriptor: &ChannelDescriptor,
        exclusive: bool,
    ) -> Result<(), ConductorError> {
        let geometry = self.publication_geometry(
            descriptor,
            exclusive,
            self.config.term_buffer_length,
            self.config.mtu_length,
        )?;

        let (endpoint_id, endpoint_created) = self.ensure_send_endpoint(descriptor, channel)?;

        if !exclusive
            && let Some(existing) = self.find_reusable_network_publication(endpoint_id, stream_id)
        {
            let registration_id = existing;
            let publication = self
                .network_publications
                .get_mut(&registration_id)
                .ok_or_else(|| ConductorError::Generic("publication registry desync".into()))?;
            publication.increment_ref();
            let session_id = publication.session_id;
            let counter_id = publication.position_limit_counter_id;
            let log_file = publication.raw_log().file_name();
            self.publication_links.insert(
                RegistrationId::from(correlation_id),
                PublicationLink {
                    client_id,
                    resource: PublicationRef::Network(registration_id),
                },
            );
            self.client_proxy.on_publication_ready(
                correlation_id,
                registration_id,
                stream_id,
                session_id,
                counter_id,
                false,
                log_file,
            );
            return Ok(());
        }

        let session_id = match descriptor.session_id {
            Some(raw) => {
                let candidate = SessionId::new(raw);
                if self.network_session_in_use(endpoint_id, stream_id, candidate) {
                    self.rollback_send_endpoint(endpoint_id, endpoint_created);
                    return Err(ConductorError::InvalidChannelParam {
                        reason: format!("session-id {raw} already in use"),
                    });
                }
                candidate
            }
            None => self.next_network_session_id(endpoint_id, stream_id),
        };

        let registration_id = RegistrationId::from(correlation_id);
        let raw_log = match self.raw_log_factory.new_network_publication(
            registration_id,
            session_id,
            stream_id,
            geometry.term_length,
        ) {
            Ok(raw_log) => raw_log,
            Err(e) => {
                self.rollback_send_endpoint(endpoint_id, endpoint_created);
                return Err(e.into());
            }
        };

        let counter_id = match self.counters.allocate(format!(
            "pub-lmt: {registration_id} {session_id} {stream_id}"
        )) {
            Ok(counter_id) => counter_id,
            Err(e) => {
                raw_log.delete();
                self.rollback_send_endpoint(endpoint_id, endpoint_created);
                return Err(e.into());
            }
        };
        if let Some(counter) = self.counters.counter(counter_id) {
            counter.set(geometry.initial_position + geometry.term_length as i64 / 2);
        }

        let now_ns = self.nano_clock.nano_time();
        let mut publication = NetworkPublication::new(
            registration_id,
            endpoint_id,
            stream_id,
            session_id,
            exclusive,
            geometry,
            raw_log,
            counter_id,
            now_ns,
        );

        // Attach any spies already watching this channel+stream.
        let spy_subscriptions = self.matching_spy_subscriptions(endpoint_id, stream_id);
        let mut spy_events = Vec::new();
        for subscription_id in spy_subscriptions {
            match self.counters.allocate(format!(
                "spy-pos: {subscription_id} {registration_id} {stream_id}"
            )) {
                Ok(spy_counter_id) => {
                    publication.add_spy(SpyPosition {
                        subscription_id,
                        counter_id: spy_counter_id,
                    });
                    spy_events.push(SubscriberPosition {
                        counter_id: spy_counter_id,
                        registration_id: subscription_id,
                    });
                }
                Err(e) => {
                    let error = ConductorError::from(e);
                    self.record_error(None, &error);
                }
            }
        }

        if let Some(endpoint) = self.send_endpoint_mut(endpoint_id) {
            endpoint.increment();
        }

        let log_file = publication.raw_log().file_name();
        self.sender_proxy.send(SenderCommand::NewNetworkPublication {
            registration_id,
            stream_id,
            session_id,
            mtu: geometry.mtu,
            term_length: geometry.term_length,
            log_file: log_file.clone(),
        });

        self.network_publications.insert(registration_id, publication);
        self.publication_links.insert(
            registration_id,
            PublicationLink {
                client_id,
                resource: PublicationRef::Network(registration_id),
            },
        );

        self.client_proxy.on_publication_ready(
            correlation_id,
            registration_id,
            stream_id,
            session_id,
            counter_id,
            exclusive,
            log_file.clone(),
        );
        for position in spy_events {
            self.client_proxy.on_available_image(
                CorrelationId::new(registration_id.get()),
                session_id,
                stream_id,
                vec![position],
                log_file.clone(),
                channel.to_string(),
            );
        }

        tracing::info!(
            %registration_id, %stream_id, %session_id, channel, "network publication added"
        );
        Ok(())
    }

    fn add_ipc_publication(
        &mut self,
        client_id: ClientId,
        correlation_id: CorrelationId,
        stream_id: StreamId,
        descriptor: &ChannelDescriptor,
        exclusive: bool,
    ) -> Result<(), ConductorError> {
        let geometry = self.publication_geometry(
            descriptor,
            exclusive,
            self.config.ipc_term_buffer_length,
            self.config.mtu_length,
        )?;

        if !exclusive
            && let Some(existing) = self.find_reusable_ipc_publication(stream_id)
        {
            let registration_id = existing;
            let publication = self
                .ipc_publications
                .get_mut(&registration_id)
                .ok_or_else(|| ConductorError::Generic("publication registry desync".into()))?;
            publication.increment_ref();
            let session_id = publication.session_id;
            let counter_id = publication.position_limit_counter_id;
            let log_file = publication.raw_log().file_name();
            self.publication_links.insert(
                RegistrationId::from(correlation_id),
                PublicationLink {
                    client_id,
                    resource: PublicationRef::Ipc(registration_id),
                },
            );
            self.client_proxy.on_publication_ready(
                correlation_id,
                registration_id,
                stream_id,
                session_id,
                counter_id,
                false,
                log_file,
            );
            return Ok(());
        }

        let session_id = match descriptor.session_id {
            Some(raw) => {
                let candidate = SessionId::new(raw);
                if self.ipc_session_in_use(stream_id, candidate) {
                    return Err(ConductorError::InvalidChannelParam {
                        reason: format!("session-id {raw} already in use"),
                    });
                }
                candidate
            }
            None => self.next_ipc_session_id(stream_id),
        };

        let registration_id = RegistrationId::from(correlation_id);
        let raw_log = self.raw_log_factory.new_ipc_publication(
            registration_id,
            session_id,
            stream_id,
            geometry.term_length,
        )?;

        let counter_id = match self.counters.allocate(format!(
            "ipc-pub-lmt: {registration_id} {session_id} {stream_id}"
        )) {
            Ok(counter_id) => counter_id,
            Err(e) => {
                raw_log.delete();
                return Err(e.into());
            }
        };
        if let Some(counter) = self.counters.counter(counter_id) {
            counter.set(geometry.initial_position + geometry.term_length as i64 / 2);
        }

        let now_ns = self.nano_clock.nano_time();
        let mut publication = IpcPublication::new(
            registration_id,
            stream_id,
            session_id,
            exclusive,
            geometry,
            raw_log,
            counter_id,
            now_ns,
        );

        let subscribers: Vec<RegistrationId> = self
            .subscriptions
            .values()
            .filter(|link| link.matches_ipc(stream_id))
            .map(|link| link.registration_id)
            .collect();
        let mut subscriber_events = Vec::new();
        for subscription_id in subscribers {
            match self.counters.allocate(format!(
                "sub-pos: {subscription_id} {registration_id} {stream_id}"
            )) {
                Ok(sub_counter_id) => {
                    publication.add_subscriber(SpyPosition {
                        subscription_id,
                        counter_id: sub_counter_id,
                    });
                    subscriber_events.push(SubscriberPosition {
                        counter_id: sub_counter_id,
                        registration_id: subscription_id,
                    });
                }
                Err(e) => {
                    let error = ConductorError::from(e);
                    self.record_error(None, &error);
                }
            }
        }

        let log_file = publication.raw_log().file_name();
        self.ipc_publications.insert(registration_id, publication);
        self.publication_links.insert(
            registration_id,
            PublicationLink {
                client_id,
                resource: PublicationRef::Ipc(registration_id),
            },
        );

        self.client_proxy.on_publication_ready(
            correlation_id,
            registration_id,
            stream_id,
            session_id,
            counter_id,
            exclusive,
            log_file.clone(),
        );
        for position in subscriber_events {
            self.client_proxy.on_available_image(
                CorrelationId::new(registration_id.get()),
                session_id,
                stream_id,
                vec![position],
                log_file.clone(),
                IPC_CHANNEL.to_string(),
            );
        }

        tracing::info!(%registration_id, %stream_id, %session_id, "ipc publication added");
        Ok(())
    }

    fn on_remove_publication(
        &mut self,
        correlation_id: CorrelationId,
        registration_id: RegistrationId,
    ) -> Result<(), ConductorError> {
        let link = self
            .publication_links
            .remove(&registration_id)
            .ok_or(ConductorError::UnknownPublication { registration_id })?;

        match link.resource {
            PublicationRef::Network(resource_id) => {
                if let Some(publication) = self.network_publications.get_mut(&resource_id) {
                    publication.decrement_ref();
                }
            }
            PublicationRef::Ipc(resource_id) => {
                if let Some(publication) = self.ipc_publications.get_mut(&resource_id) {
                    publication.decrement_ref();
                }
            }
        }

        self.client_proxy.operation_succeeded(correlation_id);
        Ok(())
    }

    /// Validate stream parameters and compute term geometry.
    fn publication_geometry(
        &self,
        descriptor: &ChannelDescriptor,
        exclusive: bool,
        default_term_length: u32,
        default_mtu: u32,
    ) -> Result<PublicationGeometry, ConductorError> {
        let term_length = descriptor.term_length.unwrap_or(default_term_length);
        check_term_length(term_length)?;
        let mtu = descriptor.mtu.unwrap_or(default_mtu);
        check_mtu_length(mtu)?;

        if descriptor.session_id.is_some() && !exclusive {
            return Err(ConductorError::InvalidChannelParam {
                reason: "session-id requires an exclusive publication".to_string(),
            });
        }

        let any_replay = descriptor.initial_term_id.is_some()
            || descriptor.term_id.is_some()
            || descriptor.term_offset.is_some();
        if !any_replay {
            return Ok(PublicationGeometry {
                mtu,
                term_length,
                initial_term_id: 0,
                initial_position: 0,
            });
        }

        if !exclusive {
            return Err(ConductorError::InvalidChannelParam {
                reason: "replay params require an exclusive publication".to_string(),
            });
        }
        if !descriptor.has_replay_params() {
            return Err(ConductorError::InvalidChannelParam {
                reason: "init-term-id, term-id and term-offset must be set together".to_string(),
            });
        }

        let initial_term_id = descriptor.initial_term_id.unwrap_or_default();
        let term_id = descriptor.term_id.unwrap_or_default();
        let term_offset = descriptor.term_offset.unwrap_or_default();
        if term_offset > term_length {
            return Err(ConductorError::InvalidChannelParam {
                reason: format!("term-offset {term_offset} exceeds term-length {term_length}"),
            });
        }

        let bits = buffer::position_bits_to_shift(term_length);
        let initial_position = buffer::compute_position(term_id, term_offset, bits, initial_term_id);
        Ok(PublicationGeometry {
            mtu,
            term_length,
            initial_term_id,
            initial_position,
        })
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    fn on_add_subscription(
        &mut self,
        client_id: ClientId,
        correlation_id: CorrelationId,
        registration_correlation_id: i64,
        stream_id: StreamId,
        channel: &str,
    ) -> Result<(), ConductorError> {
        // Reserved for publication-bound subscriptions; network and spy
        // subscriptions always carry the sentinel.
        if registration_correlation_id != NO_REGISTRATION_ID {
            tracing::debug!(
                registration_correlation_id,
                "publication-bound subscription field ignored"
            );
        }

        let descriptor = ChannelDescriptor::parse(channel)?;
        let registration_id = RegistrationId::from(correlation_id);

        if descriptor.spy {
            self.add_spy_subscription(
                client_id,
                correlation_id,
                registration_id,
                stream_id,
                channel,
                &descriptor,
            )
        } else if descriptor.is_ipc() {
            self.add_ipc_subscription(client_id, correlation_id, registration_id, stream_id, channel)
        } else {
            self.add_network_subscription(
                client_id,
                correlation_id,
                registration_id,
                stream_id,
                channel,
                &descriptor,
            )
        }
    }

    fn add_network_subscription(
        &mut self,
        client_id: ClientId,
        correlation_id: CorrelationId,
        registration_id: RegistrationId,
        stream_id: StreamId,
        channel: &str,
        descriptor: &ChannelDescriptor,
    ) -> Result<(), ConductorError> {
        let key = descriptor.canonical_key();

        if let Some(endpoint) = self.receive_endpoints.get(&key)
            && endpoint.reliable != descriptor.reliable
        {
            return Err(ConductorError::Generic(format!(
                "option conflicts with existing subscriptions: reliable={}",
                endpoint.reliable
            )));
        }

        if !self.receive_endpoints.contains_key(&key) {
            let status_counter_id = self.counters.allocate(format!("rcv-channel: {key}"))?;
            let endpoint_id = self.next_endpoint_id();
            let endpoint = ReceiveChannelEndpoint::new(
                endpoint_id,
                descriptor.clone(),
                channel.to_string(),
                status_counter_id,
                descriptor.reliable,
            );
            self.receive_endpoints.insert(key.clone(), endpoint);
            self.receiver_proxy
                .send(ReceiverCommand::RegisterReceiveChannelEndpoint {
                    endpoint_id,
                    channel: channel.to_string(),
                });
        }

        let (endpoint_id, first_for_stream) = {
            let endpoint = self
                .receive_endpoints
                .get_mut(&key)
                .ok_or_else(|| ConductorError::Generic("endpoint registry desync".into()))?;
            (endpoint.id, endpoint.increment_stream(stream_id) == 1)
        };
        if first_for_stream {
            self.receiver_proxy.send(ReceiverCommand::AddSubscription {
                endpoint_id,
                stream_id,
            });
        }

        self.subscriptions.insert(
            registration_id,
            SubscriptionLink {
                registration_id,
                client_id,
                stream_id,
                channel: channel.to_string(),
                reliable: descriptor.reliable,
                target: SubscriptionTarget::Network { endpoint_id },
            },
        );

        let status_counter_id = self
            .receive_endpoint(endpoint_id)
            .map(|endpoint| endpoint.status_counter_id)
            .unwrap_or(CounterId::new(-1));
        self.client_proxy
            .on_subscription_ready(correlation_id, status_counter_id);

        // Images already live on this endpoint+stream become visible to the
        // new subscriber, after its own ready event.
        let image_ids: Vec<CorrelationId> = self
            .images
            .values()
            .filter(|image| {
                image.endpoint_id == endpoint_id
                    && image.stream_id == stream_id
                    && image.is_accepting_subscribers()
            })
            .map(|image| image.correlation_id)
            .collect();
        for image_id in image_ids {
            if let Err(e) = self.attach_subscriber_to_image(image_id, registration_id) {
                self.record_error(None, &e);
            }
        }

        Ok(())
    }

    fn attach_subscriber_to_image(
        &mut self,
        image_id: CorrelationId,
        subscription_id: RegistrationId,
    ) -> Result<(), ConductorError> {
        let counter_id = self.counters.allocate(format!(
            "sub-pos: {subscription_id} image {image_id}"
        ))?;
        let Some(image) = self.images.get_mut(&image_id) else {
            self.counters.free(counter_id);
            return Ok(());
        };
        image.add_subscriber(SpyPosition {
            subscription_id,
            counter_id,
        });
        let event = (
            image.correlation_id,
            image.session_id,
            image.stream_id,
            image.raw_log().file_name(),
            image.source_identity.clone(),
        );
        self.client_proxy.on_available_image(
            event.0,
            event.1,
            event.2,
            vec![SubscriberPosition {
                counter_id,
                registration_id: subscription_id,
            }],
            event.3,
            event.4,
        );
        Ok(())
    }

    fn add_spy_subscription(
        &mut self,
        client_id: ClientId,
        correlation_id: CorrelationId,
        registration_id: RegistrationId,
        stream_id: StreamId,
        channel: &str,
        descriptor: &ChannelDescriptor,
    ) -> Result<(), ConductorError> {
        let channel_key = descriptor.canonical_key();

        self.subscriptions.insert(
            registration_id,
            SubscriptionLink {
                registration_id,
                client_id,
                stream_id,
                channel: channel.to_string(),
                // Spies read the local log directly and are always reliable.
                reliable: true,
                target: SubscriptionTarget::Spy {
                    channel_key: channel_key.clone(),
                },
            },
        );
        self.client_proxy.operation_succeeded(correlation_id);

        let publications: Vec<RegistrationId> = self
            .network_publications
            .values()
            .filter(|publication| {
                publication.stream_id == stream_id
                    && publication.state() == PublicationState::Active
            })
            .filter(|publication| {
                self.send_endpoint(publication.endpoint_id)
                    .map(|endpoint| endpoint.descriptor.canonical_key() == channel_key)
                    .unwrap_or(false)
            })
            .map(|publication| publication.registration_id)
            .collect();

        for publication_id in publications {
            if let Err(e) = self.attach_spy_to_publication(publication_id, registration_id) {
                self.record_error(None, &e);
            }
        }
        Ok(())
    }

    fn attach_spy_to_publication(
        &mut self,
        publication_id: RegistrationId,
        subscription_id: RegistrationId,
    ) -> Result<(), ConductorError> {
        let counter_id = self.counters.allocate(format!(
            "spy-pos: {subscription_id} {publication_id}"
        ))?;
        let Some(publication) = self.network_publications.get_mut(&publication_id) else {
            self.counters.free(counter_id);
            return Ok(());
        };
        publication.add_spy(SpyPosition {
            subscription_id,
            counter_id,
        });
        let session_id = publication.session_id;
        let stream_id = publication.stream_id;
        let endpoint_id = publication.endpoint_id;
        let log_file = publication.raw_log().file_name();
        let channel = self
            .send_endpoint(endpoint_id)
            .map(|endpoint| endpoint.channel.clone())
            .unwrap_or_default();
        self.client_proxy.on_available_image(
            CorrelationId::new(publication_id.get()),
            session_id,
            stream_id,
            vec![SubscriberPosition {
                counter_id,
                registration_id: subscription_id,
            }],
            log_file,
            channel,
        );
        Ok(())
    }

    fn add_ipc_subscription(
        &mut self,
        client_id: ClientId,
        correlation_id: CorrelationId,
        registration_id: RegistrationId,
        stream_id: StreamId,
        channel: &str,
    ) -> Result<(), ConductorError> {
        self.subscriptions.insert(
            registration_id,
            SubscriptionLink {
                registration_id,
                client_id,
                stream_id,
                channel: channel.to_string(),
                reliable: true,
                target: SubscriptionTarget::Ipc,
            },
        );
        self.client_proxy.operation_succeeded(correlation_id);

        let publications: Vec<RegistrationId> = self
            .ipc_publications
            .values()
            .filter(|publication| {
                publication.stream_id == stream_id
                    && publication.state() == IpcPublicationState::Active
            })
            .map(|publication| publication.registration_id)
            .collect();
        for publication_id in publications {
            if let Err(e) = self.attach_subscriber_to_ipc(publication_id, registration_id) {
                self.record_error(None, &e);
            }
        }
        Ok(())
    }

    fn attach_subscriber_to_ipc(
        &mut self,
        publication_id: RegistrationId,
        subscription_id: RegistrationId,
    ) -> Result<(), ConductorError> {
        let counter_id = self.counters.allocate(format!(
            "sub-pos: {subscription_id} {publication_id}"
        ))?;
        let Some(publication) = self.ipc_publications.get_mut(&publication_id) else {
            self.counters.free(counter_id);
            return Ok(());
        };
        publication.add_subscriber(SpyPosition {
            subscription_id,
            counter_id,
        });
        let session_id = publication.session_id;
        let stream_id = publication.stream_id;
        let log_file = publication.raw_log().file_name();
        self.client_proxy.on_available_image(
            CorrelationId::new(publication_id.get()),
            session_id,
            stream_id,
            vec![SubscriberPosition {
                counter_id,
                registration_id: subscription_id,
            }],
            log_file,
            IPC_CHANNEL.to_string(),
        );
        Ok(())
    }

    fn on_remove_subscription(
        &mut self,
        correlation_id: CorrelationId,
        registration_id: RegistrationId,
    ) -> Result<(), ConductorError> {
        let link = self
            .subscriptions
            .remove(&registration_id)
            .ok_or(ConductorError::UnknownSubscription { registration_id })?;

        self.unlink_subscription(link);
        self.client_proxy.operation_succeeded(correlation_id);
        Ok(())
    }

    fn unlink_subscription(&mut self, link: SubscriptionLink) {
        match link.target {
            SubscriptionTarget::Network { endpoint_id } => {
                // Detach from images first so their counters are released.
                let image_counters: Vec<CounterId> = self
                    .images
                    .values_mut()
                    .filter(|image| image.endpoint_id == endpoint_id)
                    .filter_map(|image| image.remove_subscriber(link.registration_id))
                    .collect();
                for counter_id in image_counters {
                    self.counters.free(counter_id);
                }

                let Some(key) = self
                    .receive_endpoints
                    .iter()
                    .find(|(_, endpoint)| endpoint.id == endpoint_id)
                    .map(|(key, _)| key.clone())
                else {
                    return;
                };
                let mut close_endpoint = false;
                if let Some(endpoint) = self.receive_endpoints.get_mut(&key) {
                    if endpoint.decrement_stream(link.stream_id) == 0 {
                        self.receiver_proxy.send(ReceiverCommand::RemoveSubscription {
                            endpoint_id,
                            stream_id: link.stream_id,
                        });
                    }
                    if endpoint.stream_count() == 0 && endpoint.close() {
                        close_endpoint = true;
                    }
                }
                if close_endpoint
                    && let Some(endpoint) = self.receive_endpoints.remove(&key)
                {
                    self.receiver_proxy
                        .send(ReceiverCommand::CloseReceiveChannelEndpoint { endpoint_id });
                    self.counters.free(endpoint.status_counter_id);
                }
            }
            SubscriptionTarget::Spy { .. } => {
                let freed: Vec<CounterId> = self
                    .network_publications
                    .values_mut()
                    .filter_map(|publication| publication.remove_spy(link.registration_id))
                    .collect();
                for counter_id in freed {
                    self.counters.free(counter_id);
                }
            }
            SubscriptionTarget::Ipc => {
                let freed: Vec<CounterId> = self
                    .ipc_publications
                    .values_mut()
                    .filter_map(|publication| publication.remove_subscriber(link.registration_id))
                    .collect();
                for counter_id in freed {
                    self.counters.free(counter_id);
                }
            }
        }
    }

    // =========================================================================
    // Destinations (manual MDC)
    // =========================================================================

    fn on_destination(
        &mut self,
        correlation_id: CorrelationId,
        registration_id: RegistrationId,
        channel: &str,
        add: bool,
    ) -> Result<(), ConductorError> {
        let link = self
            .publication_links
            .get(&registration_id)
            .ok_or(ConductorError::UnknownPublication { registration_id })?;
        let resource_id = match link.resource {
            PublicationRef::Network(resource_id) => resource_id,
            PublicationRef::Ipc(_) => {
                return Err(ConductorError::Generic(
                    "destinations apply to network publications only".to_string(),
                ));
            }
        };

        let descriptor = ChannelDescriptor::parse(channel)?;
        let endpoint = match (descriptor.is_udp(), descriptor.endpoint) {
            (true, Some(endpoint)) => endpoint,
            _ => {
                return Err(ConductorError::InvalidChannelParam {
                    reason: "destination must be a udp channel with an endpoint".to_string(),
                });
            }
        };

        let command = if add {
            SenderCommand::AddDestination {
                registration_id: resource_id,
                endpoint,
            }
        } else {
            SenderCommand::RemoveDestination {
                registration_id: resource_id,
                endpoint,
            }
        };
        self.sender_proxy.send(command);
        self.client_proxy.operation_succeeded(correlation_id);
        Ok(())
    }

    // =========================================================================
    // Internal commands (receiver -> conductor)
    // =========================================================================

    fn drain_conductor_commands(&mut self) -> usize {
        let mut work_count = 0;
        while let Ok(command) = self.conductor_rx.try_recv() {
            work_count += 1;
            match command {
                ConductorCommand::CreatePublicationImage {
                    endpoint_id,
                    session_id,
                    stream_id,
                    initial_term_id,
                    active_term_id,
                    term_offset,
                    term_length,
                    mtu,
                    source_identity,
                } => {
                    if let Err(e) = self.on_create_publication_image(
                        endpoint_id,
                        session_id,
                        stream_id,
                        initial_term_id,
                        active_term_id,
                        term_offset,
                        term_length,
                        mtu,
                        source_identity,
                    ) {
                        self.record_error(None, &e);
                    }
                }
            }
        }
        work_count
    }

    #[allow(clippy::too_many_arguments)]
    fn on_create_publication_image(
        &mut self,
        endpoint_id: EndpointId,
        session_id: SessionId,
        stream_id: StreamId,
        initial_term_id: i32,
        active_term_id: i32,
        term_offset: u32,
        term_length: u32,
        mtu: u32,
        source_identity: String,
    ) -> Result<(), ConductorError> {
        // No subscriber for the stream on this endpoint: the setup frame is
        // stale or racing a removal. Ignore without error.
        let Some(endpoint_channel) = self
            .receive_endpoints
            .values()
            .find(|endpoint| endpoint.id == endpoint_id && endpoint.has_stream(stream_id))
            .map(|endpoint| endpoint.channel.clone())
        else {
            return Ok(());
        };

        // A live image for this key already exists: duplicate setup frame.
        if self.images.values().any(|image| {
            image.endpoint_id == endpoint_id
                && image.session_id == session_id
                && image.stream_id == stream_id
                && image.state() != ImageState::Closing
        }) {
            return Ok(());
        }

        let correlation_id = self.next_driver_correlation_id();
        let raw_log = self.raw_log_factory.new_network_image(
            correlation_id,
            session_id,
            stream_id,
            term_length,
        )?;

        let now_ns = self.nano_clock.nano_time();
        let mut image = PublicationImage::new(
            correlation_id,
            endpoint_id,
            session_id,
            stream_id,
            initial_term_id,
            active_term_id,
            term_offset,
            term_length,
            mtu,
            endpoint_channel,
            source_identity,
            raw_log,
            now_ns,
        );

        let subscribers: Vec<RegistrationId> = self
            .subscriptions
            .values()
            .filter(|link| link.matches_network(endpoint_id, stream_id))
            .map(|link| link.registration_id)
            .collect();
        let mut positions = Vec::new();
        for subscription_id in subscribers {
            match self.counters.allocate(format!(
                "sub-pos: {subscription_id} image {correlation_id}"
            )) {
                Ok(counter_id) => {
                    image.add_subscriber(SpyPosition {
                        subscription_id,
                        counter_id,
                    });
                    positions.push(SubscriberPosition {
                        counter_id,
                        registration_id: subscription_id,
                    });
                }
                Err(e) => {
                    let error = ConductorError::from(e);
                    self.record_error(None, &error);
                }
            }
        }

        let log_file = image.raw_log().file_name();
        let source = image.source_identity.clone();
        self.receiver_proxy.send(ReceiverCommand::NewPublicationImage {
            endpoint_id,
            correlation_id,
            session_id,
            stream_id,
            term_length,
            log_file: log_file.clone(),
        });
        self.images.insert(correlation_id, image);

        self.client_proxy.on_available_image(
            correlation_id,
            session_id,
            stream_id,
            positions,
            log_file,
            source,
        );

        tracing::info!(%correlation_id, %session_id, %stream_id, "publication image created");
        Ok(())
    }

    // =========================================================================
    // Timer maintenance
    // =========================================================================

    fn timer_check(&mut self) -> usize {
        let now_ns = self.nano_clock.nano_time();
        if now_ns.saturating_sub(self.last_timer_check_ns) < self.config.timer_interval_ns {
            return 0;
        }
        self.last_timer_check_ns = now_ns;
        self.on_timer(now_ns);
        1
    }

    fn on_timer(&mut self, now_ns: u64) {
        self.check_clients(now_ns);
        self.check_network_publications(now_ns);
        self.check_ipc_publications(now_ns);
        self.check_images(now_ns);
    }

    fn check_clients(&mut self, now_ns: u64) {
        let timeout_ns = self.config.client_liveness_timeout_ns;
        let expired: Vec<ClientId> = self
            .clients
            .iter()
            .filter(|(_, client)| now_ns.saturating_sub(client.last_keepalive_ns) > timeout_ns)
            .map(|(client_id, _)| *client_id)
            .collect();

        for client_id in expired {
            tracing::info!(
                %client_id,
                epoch_ms = self.epoch_clock.time_ms(),
                "client timed out, releasing registrations"
            );
            self.clients.remove(&client_id);

            // Publications are released before subscriptions, in id order.
            let links: Vec<RegistrationId> = self
                .publication_links
                .iter()
                .filter(|(_, link)| link.client_id == client_id)
                .map(|(registration_id, _)| *registration_id)
                .collect();
            for registration_id in links {
                if let Some(link) = self.publication_links.remove(&registration_id) {
                    match link.resource {
                        PublicationRef::Network(resource_id) => {
                            if let Some(publication) =
                                self.network_publications.get_mut(&resource_id)
                            {
                                publication.decrement_ref();
                            }
                        }
                        PublicationRef::Ipc(resource_id) => {
                            if let Some(publication) = self.ipc_publications.get_mut(&resource_id) {
                                publication.decrement_ref();
                            }
                        }
                    }
                }
            }

            let subscriptions: Vec<RegistrationId> = self
                .subscriptions
                .iter()
                .filter(|(_, link)| link.client_id == client_id)
                .map(|(registration_id, _)| *registration_id)
                .collect();
            for registration_id in subscriptions {
                if let Some(link) = self.subscriptions.remove(&registration_id) {
                    self.unlink_subscription(link);
                }
            }
        }
    }

    fn check_network_publications(&mut self, now_ns: u64) {
        let linger_ns = self.config.publication_linger_ns;
        let connection_ns = self.config.publication_connection_timeout_ns;
        let closing: Vec<RegistrationId> = self
            .network_publications
            .values_mut()
            .filter_map(|publication| {
                publication
                    .on_time_event(now_ns, linger_ns, connection_ns)
                    .then_some(publication.registration_id)
            })
            .collect();
        for registration_id in closing {
            self.close_network_publication(registration_id);
        }
    }

    fn close_network_publication(&mut self, registration_id: RegistrationId) {
        let Some(mut publication) = self.network_publications.remove(&registration_id) else {
            return;
        };
        self.sender_proxy
            .send(SenderCommand::RemoveNetworkPublication { registration_id });

        let channel = self.release_send_endpoint(publication.endpoint_id);

        if publication.spies_were_notified() {
            self.client_proxy.on_unavailable_image(
                CorrelationId::new(registration_id.get()),
                publication.stream_id,
                channel,
            );
        }
        for spy in publication.drain_spies() {
            self.counters.free(spy.counter_id);
        }
        self.counters.free(publication.position_limit_counter_id);
        publication.raw_log().delete();
        tracing::info!(%registration_id, "network publication closed");
    }

    /// Drop one publication reference on a send endpoint; close it when the
    /// count reaches zero. Returns the endpoint's channel for event payloads.
    fn release_send_endpoint(&mut self, endpoint_id: EndpointId) -> String {
        let Some(key) = self
            .send_endpoints
            .iter()
            .find(|(_, endpoint)| endpoint.id == endpoint_id)
            .map(|(key, _)| key.clone())
        else {
            return String::new();
        };
        let mut close_endpoint = false;
        let mut channel = String::new();
        if let Some(endpoint) = self.send_endpoints.get_mut(&key) {
            channel = endpoint.channel.clone();
            if endpoint.decrement() == 0 && endpoint.close() {
                close_endpoint = true;
            }
        }
        if close_endpoint {
            self.send_endpoints.remove(&key);
            self.sender_proxy
                .send(SenderCommand::CloseSendChannelEndpoint { endpoint_id });
        }
        channel
    }

    fn check_ipc_publications(&mut self, now_ns: u64) {
        let linger_ns = self.config.publication_linger_ns;
        let closing: Vec<RegistrationId> = self
            .ipc_publications
            .values_mut()
            .filter_map(|publication| {
                publication
                    .on_time_event(now_ns, linger_ns)
                    .then_some(publication.registration_id)
            })
            .collect();
        for registration_id in closing {
            let Some(mut publication) = self.ipc_publications.remove(&registration_id) else {
                continue;
            };
            if publication.subscribers_were_notified() {
                self.client_proxy.on_unavailable_image(
                    CorrelationId::new(registration_id.get()),
                    publication.stream_id,
                    IPC_CHANNEL.to_string(),
                );
            }
            for subscriber in publication.drain_subscribers() {
                self.counters.free(subscriber.counter_id);
            }
            self.counters.free(publication.position_limit_counter_id);
            publication.raw_log().delete();
            tracing::info!(%registration_id, "ipc publication closed");
        }
    }

    fn check_images(&mut self, now_ns: u64) {
        let liveness_ns = self.config.image_liveness_timeout_ns;

        let unavailable: Vec<(CorrelationId, StreamId, String)> = self
            .images
            .values_mut()
            .filter(|image| image.state() != ImageState::Closing)
            .filter_map(|image| {
                image.take_unavailable_emission().then(|| {
                    (image.correlation_id, image.stream_id, image.channel.clone())
                })
            })
            .collect();
        for (correlation_id, stream_id, channel) in unavailable {
            self.client_proxy
                .on_unavailable_image(correlation_id, stream_id, channel);
        }

        let closing: Vec<CorrelationId> = self
            .images
            .values_mut()
            .filter_map(|image| {
                image
                    .on_time_event(now_ns, liveness_ns)
                    .then_some(image.correlation_id)
            })
            .collect();
        for correlation_id in closing {
            let Some(mut image) = self.images.remove(&correlation_id) else {
                continue;
            };
            self.receiver_proxy
                .send(ReceiverCommand::RemovePublicationImage {
                    endpoint_id: image.endpoint_id,
                    correlation_id,
                });
            for subscriber in image.drain_subscribers() {
                self.counters.free(subscriber.counter_id);
            }
            image.raw_log().delete();
            tracing::info!(%correlation_id, "publication image closed");
        }
    }

    // =========================================================================
    // Lookups and helpers
    // =========================================================================

    fn ensure_send_endpoint(
        &mut self,
        descriptor: &ChannelDescriptor,
        channel: &str,
    ) -> Result<(EndpointId, bool), ConductorError> {
        let key = descriptor.canonical_key();
        if let Some(endpoint) = self.send_endpoints.get(&key) {
            return Ok((endpoint.id, false));
        }
        let endpoint_id = self.next_endpoint_id();
        let endpoint = SendChannelEndpoint::new(endpoint_id, descriptor.clone(), channel.to_string());
        self.send_endpoints.insert(key, endpoint);
        self.sender_proxy
            .send(SenderCommand::RegisterSendChannelEndpoint {
                endpoint_id,
                channel: channel.to_string(),
            });
        Ok((endpoint_id, true))
    }

    /// Undo endpoint creation when the command that created it fails later.
    fn rollback_send_endpoint(&mut self, endpoint_id: EndpointId, created: bool) {
        if !created {
            return;
        }
        let Some(key) = self
            .send_endpoints
            .iter()
            .find(|(_, endpoint)| endpoint.id == endpoint_id)
            .map(|(key, _)| key.clone())
        else {
            return;
        };
        let unused = self
            .send_endpoints
            .get(&key)
            .is_some_and(|endpoint| endpoint.publication_count() == 0);
        if unused
            && let Some(mut endpoint) = self.send_endpoints.remove(&key)
            && endpoint.close()
        {
            self.sender_proxy
                .send(SenderCommand::CloseSendChannelEndpoint { endpoint_id });
        }
    }

    fn find_reusable_network_publication(
        &self,
        endpoint_id: EndpointId,
        stream_id: StreamId,
    ) -> Option<RegistrationId> {
        self.network_publications
            .values()
            .find(|publication| {
                publication.endpoint_id == endpoint_id
                    && publication.stream_id == stream_id
                    && publication.is_reusable()
            })
            .map(|publication| publication.registration_id)
    }

    fn find_reusable_ipc_publication(&self, stream_id: StreamId) -> Option<RegistrationId> {
        self.ipc_publications
            .values()
            .find(|publication| publication.stream_id == stream_id && publication.is_reusable())
            .map(|publication| publication.registration_id)
    }

    fn network_session_in_use(
        &self,
        endpoint_id: EndpointId,
        stream_id: StreamId,
        session_id: SessionId,
    ) -> bool {
        self.network_publications.values().any(|publication| {
            publication.endpoint_id == endpoint_id
                && publication.stream_id == stream_id
                && publication.session_id == session_id
        })
    }

    fn ipc_session_in_use(&self, stream_id: StreamId, session_id: SessionId) -> bool {
        self.ipc_publications.values().any(|publication| {
            publication.stream_id == stream_id && publication.session_id == session_id
        })
    }

    /// Random positive 31-bit session id, rejection-sampled against live
    /// publications on the same key.
    fn next_network_session_id(&mut self, endpoint_id: EndpointId, stream_id: StreamId) -> SessionId {
        loop {
            let candidate = SessionId::new((self.rng.random::<u32>() & 0x7FFF_FFFF) as i32);
            if !self.network_session_in_use(endpoint_id, stream_id, candidate) {
                return candidate;
            }
        }
    }

    fn next_ipc_session_id(&mut self, stream_id: StreamId) -> SessionId {
        loop {
            let candidate = SessionId::new((self.rng.random::<u32>() & 0x7FFF_FFFF) as i32);
            if !self.ipc_session_in_use(stream_id, candidate) {
                return candidate;
            }
        }
    }

    fn matching_spy_subscriptions(
        &self,
        endpoint_id: EndpointId,
        stream_id: StreamId,
    ) -> Vec<RegistrationId> {
        let Some(channel_key) = self
            .send_endpoint(endpoint_id)
            .map(|endpoint| endpoint.descriptor.canonical_key())
        else {
            return Vec::new();
        };
        self.subscriptions
            .values()
            .filter(|link| link.matches_spy(&channel_key, stream_id))
            .map(|link| link.registration_id)
            .collect()
    }

    fn next_endpoint_id(&mut self) -> EndpointId {
        let id = EndpointId::new(self.next_endpoint_id);
        self.next_endpoint_id += 1;
        id
    }

    fn next_driver_correlation_id(&mut self) -> CorrelationId {
        let id = CorrelationId::new(self.next_driver_correlation_id);
        self.next_driver_correlation_id += 1;
        id
    }

    fn send_endpoint(&self, endpoint_id: EndpointId) -> Option<&SendChannelEndpoint> {
        self.send_endpoints
            .values()
            .find(|endpoint| endpoint.id == endpoint_id)
    }

    fn send_endpoint_mut(&mut self, endpoint_id: EndpointId) -> Option<&mut SendChannelEndpoint> {
        self.send_endpoints
            .values_mut()
            .find(|endpoint| endpoint.id == endpoint_id)
    }

    fn receive_endpoint(&self, endpoint_id: EndpointId) -> Option<&ReceiveChannelEndpoint> {
        self.receive_endpoints
            .values()
            .find(|endpoint| endpoint.id == endpoint_id)
    }

    // =========================================================================
    // Read-side accessors (driver shell and tests)
    // =========================================================================

    pub fn sender_channel_endpoint(&self, descriptor: &ChannelDescriptor) -> Option<EndpointId> {
        self.send_endpoints
            .get(&descriptor.canonical_key())
            .map(|endpoint| endpoint.id)
    }

    pub fn receiver_channel_endpoint(&self, descriptor: &ChannelDescriptor) -> Option<EndpointId> {
        self.receive_endpoints
            .get(&descriptor.canonical_key())
            .map(|endpoint| endpoint.id)
    }

    pub fn receiver_endpoint_stream_count(
        &self,
        descriptor: &ChannelDescriptor,
    ) -> Option<usize> {
        self.receive_endpoints
            .get(&descriptor.canonical_key())
            .map(|endpoint| endpoint.stream_count())
    }

    pub fn network_publication(
        &self,
        registration_id: RegistrationId,
    ) -> Option<&NetworkPublication> {
        self.network_publications.get(&registration_id)
    }

    pub fn network_publication_mut(
        &mut self,
        registration_id: RegistrationId,
    ) -> Option<&mut NetworkPublication> {
        self.network_publications.get_mut(&registration_id)
    }

    pub fn ipc_publication(&self, registration_id: RegistrationId) -> Option<&IpcPublication> {
        self.ipc_publications.get(&registration_id)
    }

    /// The shared IPC publication for a stream, if one is live.
    pub fn shared_ipc_publication(&self, stream_id: StreamId) -> Option<&IpcPublication> {
        self.ipc_publications
            .values()
            .find(|publication| publication.stream_id == stream_id && !publication.is_exclusive)
    }

    pub fn publication_image(&self, correlation_id: CorrelationId) -> Option<&PublicationImage> {
        self.images.get(&correlation_id)
    }

    pub fn publication_image_mut(
        &mut self,
        correlation_id: CorrelationId,
    ) -> Option<&mut PublicationImage> {
        self.images.get_mut(&correlation_id)
    }

    pub fn subscription(&self, registration_id: RegistrationId) -> Option<&SubscriptionLink> {
        self.subscriptions.get(&registration_id)
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }
}

impl super::agent::Agent for DriverConductor {
    fn do_work(&mut self) -> usize {
        DriverConductor::do_work(self)
    }

    fn on_close(&mut self) {
        DriverConductor::on_close(self);
    }
}
