//! Shared-memory (IPC) publication lifecycle.
//!
//! Same refcounting as network publications but without an endpoint or a
//! sender. Local subscribers read the log directly, so an unreferenced
//! publication with no subscribers closes immediately; with subscribers it
//! lingers so they can finish draining.

use super::buffer::RawLog;
use super::publication::{PublicationGeometry, SpyPosition};
use crate::core::{CounterId, RegistrationId, SessionId, StreamId};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IpcPublicationState {
    Active,
    Linger,
    Closing,
}

#[derive(Debug)]
pub struct IpcPublication {
    pub registration_id: RegistrationId,
    pub stream_id: StreamId,
    pub session_id: SessionId,
    pub is_exclusive: bool,
    pub geometry: PublicationGeometry,
    pub position_limit_counter_id: CounterId,
    raw_log: RawLog,

    producer_position: i64,
    consumer_position: i64,

    ref_count: u32,
    state: IpcPublicationState,
    time_of_last_state_change_ns: u64,

    subscriber_positions: Vec<SpyPosition>,
    subscribers_were_notified: bool,
}

impl IpcPublication {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registration_id: RegistrationId,
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
            stream_id,
            session_id,
            is_exclusive,
            geometry,
            position_limit_counter_id,
            raw_log,
            producer_position: geometry.initial_position,
            consumer_position: geometry.initial_position,
            ref_count: 1,
            state: IpcPublicationState::Active,
            time_of_last_state_change_ns: now_ns,
            subscriber_positions: Vec::new(),
            subscribers_were_notified: false,
        }
    }

    pub fn state(&self) -> IpcPublicationState {
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

    pub fn update_positions(&mut self, producer: i64, consumer: i64) {
        self.producer_position = producer;
        self.consumer_position = consumer;
    }

    pub fn increment_ref(&mut self) -> u32 {
        self.ref_count += 1;
        self.ref_count
    }

    pub fn decrement_ref(&mut self) -> u32 {
        debug_assert!(self.ref_count > 0, "ipc publication ref underflow");
        self.ref_count = self.ref_count.saturating_sub(1);
        self.ref_count
    }

    pub fn ref_count(&self) -> u32 {
        self.ref_count
    }

    pub fn is_reusable(&self) -> bool {
        !self.is_exclusive && self.ref_count > 0 && self.state == IpcPublicationState::Active
    }

    pub fn has_subscribers(&self) -> bool {
        !self.subscriber_positions.is_empty()
    }

    pub fn subscribers_were_notified(&self) -> bool {
        self.subscribers_were_notified
    }

    pub fn add_subscriber(&mut self, position: SpyPosition) {
        self.subscriber_positions.push(position);
        self.subscribers_were_notified = true;
    }

    pub fn remove_subscriber(&mut self, subscription_id: RegistrationId) -> Option<CounterId> {
        let index = self
            .subscriber_positions
            .iter()
            .position(|sub| sub.subscription_id == subscription_id)?;
        Some(self.subscriber_positions.swap_remove(index).counter_id)
    }

    pub fn subscriber_positions(&self) -> &[SpyPosition] {
        &self.subscriber_positions
    }

    pub fn drain_subscribers(&mut self) -> Vec<SpyPosition> {
        std::mem::take(&mut self.subscriber_positions)
    }

    /// Advance the state machine. Returns true when the publication entered
    /// CLOSING on this call.
    pub fn on_time_event(&mut self, now_ns: u64, linger_timeout_ns: u64) -> bool {
        match self.state {
            IpcPublicationState::Active => {
                if self.ref_count == 0 {
                    if self.subscriber_positions.is_empty() {
                        self.transition(IpcPublicationState::Closing, now_ns);
                        return true;
                    }
                    self.transition(IpcPublicationState::Linger, now_ns);
                }
                false
            }
            IpcPublicationState::Linger => {
                if now_ns.saturating_sub(self.time_of_last_state_change_ns) > linger_timeout_ns {
                    self.transition(IpcPublicationState::Closing, now_ns);
                    return true;
                }
                false
            }
            IpcPublicationState::Closing => false,
        }
    }

    fn transition(&mut self, state: IpcPublicationState, now_ns: u64) {
        tracing::debug!(
            registration_id = %self.registration_id,
            from = ?self.state,
            to = ?state,
            "ipc publication state change"
        );
        self.state = state;
        self.time_of_last_state_change_ns = now_ns;
    }
}
