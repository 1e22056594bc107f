//! Network publication lifecycle.
//!
//! A publication is shared by every client that added it; the conductor
//! tracks one reference per add and drives the state machine from timer
//! maintenance once the count reaches zero:
//!
//! ```text
//! ACTIVE -> DRAINING -> LINGER -> CLOSING
//!        \------------/
//! ```
//!
//! An unreferenced publication goes straight to LINGER when it is drained or
//! was never connected; DRAINING applies only while receivers may still be
//! consuming.

use super::buffer::RawLog;
use crate::core::{CounterId, EndpointId, RegistrationId, SessionId, StreamId};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PublicationState {
    Active,
    Draining,
    Linger,
    Closing,
}

/// Term geometry and starting position shared by publication kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PublicationGeometry {
    pub mtu: u32,
    pub term_length: u32,
    pub initial_term_id: i32,
    pub initial_position: i64,
}

/// Spy subscription attached to a local publication's log.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SpyPosition {
    pub subscription_id: RegistrationId,
    pub counter_id: CounterId,
}

#[derive(Debug)]
pub struct NetworkPublication {
    pub registration_id: RegistrationId,
    pub endpoint_id: EndpointId,
    pub stream_id: StreamId,
    pub session_id: SessionId,
    pub is_exclusive: bool,
    pub geometry: PublicationGeometry,
    pub position_limit_counter_id: CounterId,
    raw_log: RawLog,

    producer_position: i64,
    consumer_position: i64,

    ref_count: u32,
    state: PublicationState,
    time_of_last_state_change_ns: u64,

    has_receivers: bool,
    last_receiver_activity_ns: u64,

    spy_positions: Vec<SpyPosition>,
    spies_were_notified: bool,
}

impl NetworkPublication {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registration_id: RegistrationId,
        endpoint_id: EndpointId,
        stream_id: StreamId,
        session_id: SessionId,
        is_exclusive: bool,
        geometry: PublicationGeometry,
        raw_log: RawLog,
        position_limit_counter_id: CounterId,
        now_ns: u64,
    ) -> Self {
        Self {
            registration_id,
            endpoint_id,
            stream_id,
            session_id,
            is_exclusive,
            geometry,
            position_limit_counter_id,
            raw_log,
            producer_position: geometry.initial_position,
            consumer_position: geometry.initial_position,
            ref_count: 1,
            state: PublicationState::Active,
            time_of_last_state_change_ns: now_ns,
            has_receivers: false,
            last_receiver_activity_ns: now_ns,
            spy_positions: Vec::new(),
            spies_were_notified: false,
        }
    }

    pub fn state(&self) -> PublicationState {
        self.state
    }

    pub fn raw_log(&self) -> &RawLog {
        &self.raw_log
    }

    pub fn producer_position(&self) -> i64 {
        self.producer_position
    }

    pub fn consumer_position(&self) -> i64 {
        self.consumer_position
    }

    /// Data-plane position report. The sender updates the consumer side from
    /// status messages; appenders move the producer side.
    pub fn update_positions(&mut self, producer: i64, consumer: i64) {
        self.producer_position = producer;
        self.consumer_position = consumer;
    }

    pub fn is_drained(&self) -> bool {
        self.consumer_position >= self.producer_position
    }

    pub fn update_has_receivers(&mut self, has_receivers: bool, now_ns: u64) {
        self.has_receivers = has_receivers;
        if has_receivers {
            self.last_receiver_activity_ns = now_ns;
        }
    }

    pub fn increment_ref(&mut self) -> u32 {
        self.ref_count += 1;
        self.ref_count
    }

    pub fn decrement_ref(&mut self) -> u32 {
        debug_assert!(self.ref_count > 0, "publication ref underflow");
        self.ref_count = self.ref_count.saturating_sub(1);
        self.ref_count
    }

    pub fn ref_count(&self) -> u32 {
        self.ref_count
    }

    /// A fresh shared add may only reuse a publication that is still ACTIVE
    /// and referenced; one winding down (or unreferenced and waiting for the
    /// timer) keeps going and a new instance is created.
    pub fn is_reusable(&self) -> bool {
        !self.is_exclusive && self.ref_count > 0 && self.state == PublicationState::Active
    }

    pub fn has_spies(&self) -> bool {
        !self.spy_positions.is_empty()
    }

    pub fn spies_were_notified(&self) -> bool {
        self.spies_were_notified
    }

    pub fn add_spy(&mut self, position: SpyPosition) {
        self.spy_positions.push(position);
        self.spies_were_notified = true;
    }

    /// Detach a spy subscription, returning its position counter for release.
    pub fn remove_spy(&mut self, subscription_id: RegistrationId) -> Option<CounterId> {
        let index = self
            .spy_positions
            .iter()
            .position(|spy| spy.subscription_id == subscription_id)?;
        Some(self.spy_positions.swap_remove(index).counter_id)
    }

    pub fn spy_positions(&self) -> &[SpyPosition] {
        &self.spy_positions
    }

    pub fn drain_spies(&mut self) -> Vec<SpyPosition> {
        std::mem::take(&mut self.spy_positions)
    }

    /// Advance the state machine. Returns true when the publication entered
    /// CLOSING on this call and the conductor should tear it down.
    pub fn on_time_event(
        &mut self,
        now_ns: u64,
        linger_timeout_ns: u64,
        connection_timeout_ns: u64,
    ) -> bool {
        match self.state {
            PublicationState::Active => {
                if self.ref_count == 0 {
                    if self.is_drained() || !self.has_receivers {
                        self.transition(PublicationState::Linger, now_ns);
                    } else {
                        self.transition(PublicationState::Draining, now_ns);
                    }
                }
                false
            }
            PublicationState::Draining => {
                if self.is_drained() {
                    self.transition(PublicationState::Linger, now_ns);
                } else if !self.has_receivers
                    && now_ns.saturating_sub(self.last_receiver_activity_ns)
                        > connection_timeout_ns
                {
                    self.transition(PublicationState::Linger, now_ns);
                }
                false
            }
            PublicationState::Linger => {
                if now_ns.saturating_sub(self.time_of_last_state_change_ns) > linger_timeout_ns {
                    self.transition(PublicationState::Closing, now_ns);
                    return true;
                }
                false
            }
            PublicationState::Closing => false,
        }
    }

    fn transition(&mut self, state: PublicationState, now_ns: u64) {
        tracing::debug!(
            registration_id = %self.registration_id,
            from = ?self.state,
            to = ?state,
            "publication state change"
        );
        self.state = state;
        self.time_of_last_state_change_ns = now_ns;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::buffer::RawLog;

    const LINGER_NS: u64 = 5_000;
    const CONNECTION_NS: u64 = 2_000;

    fn publication() -> NetworkPublication {
        NetworkPublication::new(
            RegistrationId::new(1),
            EndpointId::new(1),
            StreamId::new(10),
            SessionId::new(100),
            false,
            PublicationGeometry {
                mtu: 4096,
                term_length: 64 * 1024,
                initial_term_id: 0,
                initial_position: 0,
            },
            RawLog::new("pub.logbuffer".into(), 64 * 1024),
            CounterId::new(0),
            0,
        )
    }

    #[test]
    fn referenced_publication_stays_active() {
        let mut publication = publication();
        assert!(!publication.on_time_event(100 * LINGER_NS, LINGER_NS, CONNECTION_NS));
        assert_eq!(publication.state(), PublicationState::Active);
    }

    #[test]
    fn unreferenced_drained_publication_lingers_then_closes() {
        let mut publication = publication();
        publication.decrement_ref();

        assert!(!publication.on_time_event(1_000, LINGER_NS, CONNECTION_NS));
        assert_eq!(publication.state(), PublicationState::Linger);

        // within linger window
        assert!(!publication.on_time_event(1_000 + LINGER_NS, LINGER_NS, CONNECTION_NS));
        assert_eq!(publication.state(), PublicationState::Linger);

        assert!(publication.on_time_event(1_001 + LINGER_NS, LINGER_NS, CONNECTION_NS));
        assert_eq!(publication.state(), PublicationState::Closing);
    }

    #[test]
    fn undrained_connected_publication_drains_first() {
        let mut publication = publication();
        publication.update_positions(1_024, 0);
        publication.update_has_receivers(true, 500);
        publication.decrement_ref();

        publication.on_time_event(1_000, LINGER_NS, CONNECTION_NS);
        assert_eq!(publication.state(), PublicationState::Draining);

        // consumer catches up
        publication.update_positions(1_024, 1_024);
        publication.on_time_event(2_000, LINGER_NS, CONNECTION_NS);
        assert_eq!(publication.state(), PublicationState::Linger);
    }

    #[test]
    fn draining_without_receivers_times_out_to_linger() {
        let mut publication = publication();
        publication.update_positions(1_024, 0);
        publication.update_has_receivers(true, 500);
        publication.decrement_ref();

        publication.on_time_event(1_000, LINGER_NS, CONNECTION_NS);
        assert_eq!(publication.state(), PublicationState::Draining);

        publication.update_has_receivers(false, 1_000);
        publication.on_time_event(1_000 + CONNECTION_NS + 1, LINGER_NS, CONNECTION_NS);
        assert_eq!(publication.state(), PublicationState::Linger);
    }

    #[test]
    fn winding_down_publication_is_not_reusable() {
        let mut publication = publication();
        assert!(publication.is_reusable());
        publication.decrement_ref();
        publication.on_time_event(1_000, LINGER_NS, CONNECTION_NS);
        assert!(!publication.is_reusable());
    }

    #[test]
    fn spy_attach_detach_tracks_notification() {
        let mut publication = publication();
        assert!(!publication.has_spies());

        publication.add_spy(SpyPosition {
            subscription_id: RegistrationId::new(7),
            counter_id: CounterId::new(3),
        });
        assert!(publication.has_spies());
        assert!(publication.spies_were_notified());

        let freed = publication.remove_spy(RegistrationId::new(7));
        assert_eq!(freed, Some(CounterId::new(3)));
        assert!(!publication.has_spies());
        assert!(publication.spies_were_notified());
    }
}
