#![allow(dead_code)]

//! Test rig: a conductor wired to in-memory mailboxes, a manual clock, and a
//! temp-dir raw-log factory, plus a client-side proxy that speaks the
//! command ring wire format.

use std::cell::Cell;
use std::sync::{Arc, Mutex};

use crossbeam::channel::Receiver;
use tempfile::TempDir;

use aeronmd::driver::command::{
    ADD_EXCLUSIVE_PUBLICATION, ADD_PUBLICATION, ADD_SUBSCRIPTION, CLIENT_KEEPALIVE,
    NO_REGISTRATION_ID, REMOVE_PUBLICATION, REMOVE_SUBSCRIPTION, encode_add_publication,
    encode_add_subscription, encode_client_keepalive, encode_destination,
    encode_remove_publication, encode_remove_subscription,
};
use aeronmd::driver::command::{ADD_DESTINATION, REMOVE_DESTINATION};
use aeronmd::driver::counters::Counters;
use aeronmd::driver::events::ClientProxy;
use aeronmd::{
    ChannelDescriptor, ClientEvent, ClientId, CommandRingWriter, Config, ConductorCommand,
    ConductorContext, CorrelationId, Counter, DriverConductor, DriverConductorProxy,
    EventBroadcaster, EventSubscription, FileRawLogFactory, ManualClock, NanoClock, ReceiverCommand,
    ReceiverProxy, RegistrationId, SenderCommand, SenderProxy, SessionId, StreamId, command_ring,
};

pub const CHANNEL_4000: &str = "aeron:udp?endpoint=localhost:4000";
pub const CHANNEL_4001: &str = "aeron:udp?endpoint=localhost:4001";
pub const CHANNEL_4002: &str = "aeron:udp?endpoint=localhost:4002";
pub const CHANNEL_4003: &str = "aeron:udp?endpoint=localhost:4003";
pub const CHANNEL_4004: &str = "aeron:udp?endpoint=localhost:4004";
pub const CHANNEL_IPC: &str = "aeron:ipc";
pub const INVALID_URI: &str = "aeron:udp://";
pub const STREAM_ID_1: StreamId = StreamId::new(10);
pub const STREAM_ID_2: StreamId = StreamId::new(20);
pub const STREAM_ID_3: StreamId = StreamId::new(30);
pub const STREAM_ID_4: StreamId = StreamId::new(40);

pub const MS: u64 = 1_000_000;
pub const TICK_NS: u64 = 16 * MS;

pub fn spy_for_channel(channel: &str) -> String {
    format!("aeron-spy:{channel}")
}

pub fn descriptor(channel: &str) -> ChannelDescriptor {
    ChannelDescriptor::parse(channel).expect("valid channel")
}

/// Client-side encoder writing framed commands onto the ring.
pub struct DriverProxy {
    writer: CommandRingWriter,
    client_id: ClientId,
    next_correlation: Cell<i64>,
}

impl DriverProxy {
    pub fn new(writer: CommandRingWriter, client_id: ClientId, correlation_base: i64) -> Self {
        Self {
            writer,
            client_id,
            next_correlation: Cell::new(correlation_base),
        }
    }

    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    fn next_correlation(&self) -> CorrelationId {
        let id = self.next_correlation.get();
        self.next_correlation.set(id + 1);
        CorrelationId::new(id)
    }

    pub fn add_publication(&self, channel: &str, stream_id: StreamId) -> RegistrationId {
        let correlation_id = self.next_correlation();
        let payload = encode_add_publication(self.client_id, correlation_id, stream_id, channel);
        self.writer
            .write(ADD_PUBLICATION, &payload)
            .expect("command ring write");
        RegistrationId::from(correlation_id)
    }

    pub fn add_exclusive_publication(&self, channel: &str, stream_id: StreamId) -> RegistrationId {
        let correlation_id = self.next_correlation();
        let payload = encode_add_publication(self.client_id, correlation_id, stream_id, channel);
        self.writer
            .write(ADD_EXCLUSIVE_PUBLICATION, &payload)
            .expect("command ring write");
        RegistrationId::from(correlation_id)
    }

    pub fn remove_publication(&self, registration_id: RegistrationId) -> CorrelationId {
        let correlation_id = self.next_correlation();
        let payload = encode_remove_publication(self.client_id, correlation_id, registration_id);
        self.writer
            .write(REMOVE_PUBLICATION, &payload)
            .expect("command ring write");
        correlation_id
    }

    pub fn add_subscription(&self, channel: &str, stream_id: StreamId) -> RegistrationId {
        let correlation_id = self.next_correlation();
        let payload = encode_add_subscription(
            self.client_id,
            correlation_id,
            NO_REGISTRATION_ID,
            stream_id,
            channel,
        );
        self.writer
            .write(ADD_SUBSCRIPTION, &payload)
            .expect("command ring write");
        RegistrationId::from(correlation_id)
    }

    pub fn remove_subscription(&self, registration_id: RegistrationId) -> CorrelationId {
        let correlation_id = self.next_correlation();
        let payload = encode_remove_subscription(self.client_id, correlation_id, registration_id);
        self.writer
            .write(REMOVE_SUBSCRIPTION, &payload)
            .expect("command ring write");
        correlation_id
    }

    pub fn send_client_keepalive(&self) {
        let payload = encode_client_keepalive(self.client_id);
        self.writer
            .write(CLIENT_KEEPALIVE, &payload)
            .expect("command ring write");
    }

    pub fn add_destination(&self, registration_id: RegistrationId, channel: &str) -> CorrelationId {
        let correlation_id = self.next_correlation();
        let payload =
            encode_destination(self.client_id, correlation_id, registration_id, channel);
        self.writer
            .write(ADD_DESTINATION, &payload)
            .expect("command ring write");
        correlation_id
    }

    pub fn remove_destination(
        &self,
        registration_id: RegistrationId,
        channel: &str,
    ) -> CorrelationId {
        let correlation_id = self.next_correlation();
        let payload =
            encode_destination(self.client_id, correlation_id, registration_id, channel);
        self.writer
            .write(REMOVE_DESTINATION, &payload)
            .expect("command ring write");
        correlation_id
    }

    /// Raw frame write for malformed-command tests.
    pub fn write_raw(&self, msg_type_id: u32, payload: &[u8]) {
        self.writer
            .write(msg_type_id, payload)
            .expect("command ring write");
    }
}

pub struct DriverRig {
    pub conductor: DriverConductor,
    pub proxy: DriverProxy,
    pub clock: ManualClock,
    pub sender_rx: Receiver<SenderCommand>,
    pub receiver_rx: Receiver<ReceiverCommand>,
    pub conductor_proxy: DriverConductorProxy,
    pub events: EventSubscription,
    pub error_counter: Counter,
    pub handled_errors: Arc<Mutex<Vec<String>>>,
    pub config: Config,
    ring_writer: CommandRingWriter,
    _dir: TempDir,
}

impl DriverRig {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("tempdir");
        let config = Config {
            dir: dir.path().to_owned(),
            ..Config::default()
        };
        Self::with_config(dir, config)
    }

    pub fn with_config(dir: TempDir, config: Config) -> Self {
        let clock = ManualClock::new();
        let (ring_writer, command_rx) = command_ring(config.command_queue_capacity);
        let (sender_proxy, sender_rx) = SenderProxy::channel();
        let (receiver_proxy, receiver_rx) = ReceiverProxy::channel();
        let (conductor_proxy, conductor_rx) =
            DriverConductorProxy::channel(config.conductor_queue_capacity);

        let broadcaster = EventBroadcaster::new();
        let events = broadcaster.subscribe(config.client_event_queue_capacity);

        let mut counters = Counters::new(config.max_counters);
        let error_counter_id = counters.allocate("errors").expect("error counter");
        let error_counter = counters.counter(error_counter_id).expect("error counter");

        let handled_errors: Arc<Mutex<Vec<String>>> = Arc::default();
        let handler_log = Arc::clone(&handled_errors);

        let raw_log_factory = FileRawLogFactory::new(dir.path()).expect("log factory");

        let conductor = DriverConductor::new(ConductorContext {
            config: config.clone(),
            nano_clock: Arc::new(clock.clone()),
            epoch_clock: Arc::new(clock.clone()),
            raw_log_factory: Box::new(raw_log_factory),
            sender_proxy,
            receiver_proxy,
            client_proxy: ClientProxy::new(broadcaster, error_counter.clone()),
            command_rx,
            conductor_rx,
            counters,
            error_counter: error_counter.clone(),
            error_handler: Box::new(move |error| {
                handler_log
                    .lock()
                    .expect("handler log lock")
                    .push(error.to_string());
            }),
            session_id_seed: Some(0xAE50),
        });

        let proxy = DriverProxy::new(ring_writer.clone(), ClientId::new(7), 1_001);

        Self {
            conductor,
            proxy,
            clock,
            sender_rx,
            receiver_rx,
            conductor_proxy,
            events,
            error_counter,
            handled_errors,
            config,
            ring_writer,
            _dir: dir,
        }
    }

    /// Another attached client with its own correlation range.
    pub fn second_client(&self) -> DriverProxy {
        DriverProxy::new(self.ring_writer.clone(), ClientId::new(8), 50_001)
    }

    pub fn do_work(&mut self) {
        self.conductor.do_work();
    }

    /// Advance the clock in 16 ms steps, running a duty cycle per step, until
    /// `target_ns` is reached.
    pub fn run_until(&mut self, target_ns: u64) {
        while self.clock.nano_time() < target_ns {
            self.clock.advance(TICK_NS);
            self.conductor.do_work();
        }
    }

    pub fn drain_events(&self) -> Vec<ClientEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.events.try_next() {
            events.push(event.expect("decodable event"));
        }
        events
    }

    pub fn drain_sender(&self) -> Vec<SenderCommand> {
        let mut commands = Vec::new();
        while let Ok(command) = self.sender_rx.try_recv() {
            commands.push(command);
        }
        commands
    }

    pub fn drain_receiver(&self) -> Vec<ReceiverCommand> {
        let mut commands = Vec::new();
        while let Ok(command) = self.receiver_rx.try_recv() {
            commands.push(command);
        }
        commands
    }

    /// Ask the conductor to build an image, the way the receiver would after
    /// a setup frame.
    pub fn create_image(
        &mut self,
        channel: &str,
        session_id: i32,
        stream_id: StreamId,
        term_length: u32,
    ) -> Option<CorrelationId> {
        let endpoint_id = self
            .conductor
            .receiver_channel_endpoint(&descriptor(channel))?;
        self.conductor_proxy
            .send(ConductorCommand::CreatePublicationImage {
                endpoint_id,
                session_id: SessionId::new(session_id),
                stream_id,
                initial_term_id: 1,
                active_term_id: 2,
                term_offset: 100,
                term_length,
                mtu: 4096,
                source_identity: "127.0.0.1:4400".to_string(),
            });
        self.do_work();
        self.drain_receiver().iter().find_map(|command| match command {
            ReceiverCommand::NewPublicationImage { correlation_id, .. } => Some(*correlation_id),
            _ => None,
        })
    }
}
