//! Publication images.
//!
//! An image is a remote publication as observed by the local receiver. The
//! receiver drives activation from status traffic; the conductor owns the
//! record and runs the liveness machine:
//!
//! ```text
//! INIT -> ACTIVE -> INACTIVE -> LINGER -> CLOSING
//! ```
//!
//! One `unavailable-image` is emitted per image, after it goes inactive, to
//! the subscribers that were told it was available.

use super::buffer::RawLog;
use super::publication::SpyPosition;
use crate::core::{CorrelationId, CounterId, EndpointId, RegistrationId, SessionId, StreamId};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImageState {
    Init,
    Active,
    Inactive,
    Linger,
    Closing,
}

#[derive(Debug)]
pub struct PublicationImage {
    pub correlation_id: CorrelationId,
    pub endpoint_id: EndpointId,
    pub session_id: SessionId,
    pub stream_id: StreamId,
    pub initial_term_id: i32,
    pub active_term_id: i32,
    pub term_offset: u32,
    pub term_length: u32,
    pub mtu: u32,
    /// Channel of the subscriptions this image serves; echoed in
    /// `unavailable-image`.
    pub channel: String,
    pub source_identity: String,
    raw_log: RawLog,

    state: ImageState,
    time_of_last_state_change_ns: u64,

    subscriber_positions: Vec<SpyPosition>,
    subscribers_were_notified: bool,
    unavailable_sent: bool,
}

impl PublicationImage {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        correlation_id: CorrelationId,
        endpoint_id: EndpointId,
        session_id: SessionId,
        stream_id: StreamId,
        initial_term_id: i32,
        active_term_id: i32,
        term_offset: u32,
        term_length: u32,
        mtu: u32,
        channel: String,
        source_identity: String,
        raw_log: RawLog,
        now_ns: u64,
    ) -> Self {
        Self {
            correlation_id,
            endpoint_id,
            session_id,
            stream_id,
            initial_term_id,
            active_term_id,
            term_offset,
            term_length,
            mtu,
            channel,
            source_identity,
            raw_log,
            state: ImageState::Init,
            time_of_last_state_change_ns: now_ns,
            subscriber_positions: Vec::new(),
            subscribers_were_notified: false,
            unavailable_sent: false,
        }
    }

    pub fn state(&self) -> ImageState {
        self.state
    }

    pub fn raw_log(&self) -> &RawLog {
        &self.raw_log
    }

    /// First status message went out; the image is live.
    pub fn activate(&mut self, now_ns: u64) {
        if self.state == ImageState::Init {
            self.transition(ImageState::Active, now_ns);
        }
    }

    /// Receiver saw end-of-stream or lost the source.
    pub fn if_active_go_inactive(&mut self, now_ns: u64) {
        if self.state == ImageState::Active {
            self.transition(ImageState::Inactive, now_ns);
        }
    }

    /// A new subscriber may still be attached while the image is live.
    pub fn is_accepting_subscribers(&self) -> bool {
        matches!(self.state, ImageState::Init | ImageState::Active)
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

    /// True exactly once, when the conductor should emit `unavailable-image`:
    /// the image has gone inactive and someone was told it was available.
    pub fn take_unavailable_emission(&mut self) -> bool {
        let due = !self.unavailable_sent
            && self.subscribers_were_notified
            && matches!(
                self.state,
                ImageState::Inactive | ImageState::Linger | ImageState::Closing
            );
        if due {
            self.unavailable_sent = true;
        }
        due
    }

    /// Advance the liveness machine. Returns true when the image entered
    /// CLOSING on this call and should be torn down.
    pub fn on_time_event(&mut self, now_ns: u64, liveness_timeout_ns: u64) -> bool {
        match self.state {
            ImageState::Inactive => {
                if now_ns.saturating_sub(self.time_of_last_state_change_ns) > liveness_timeout_ns {
                    self.transition(ImageState::Linger, now_ns);
                }
                false
            }
            ImageState::Linger => {
                if now_ns.saturating_sub(self.time_of_last_state_change_ns) > liveness_timeout_ns {
                    self.transition(ImageState::Closing, now_ns);
                    return true;
                }
                false
            }
            ImageState::Init | ImageState::Active | ImageState::Closing => false,
        }
    }

    fn transition(&mut self, state: ImageState, now_ns: u64) {
        tracing::debug!(
            correlation_id = %self.correlation_id,
            from = ?self.state,
            to = ?state,
            "image state change"
        );
        self.state = state;
        self.time_of_last_state_change_ns = now_ns;
    }
}
