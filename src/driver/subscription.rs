//! Subscription links.
//!
//! A link ties a client registration to what it consumes: a stream on a
//! receive endpoint, a spied local publication, or a shared-memory stream.

use crate::core::{ClientId, EndpointId, RegistrationId, StreamId};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SubscriptionTarget {
    /// Streams arriving on a UDP receive endpoint.
    Network { endpoint_id: EndpointId },
    /// A co-located publication's log, matched by send-channel key.
    Spy { channel_key: String },
    /// Shared-memory publications on the stream.
    Ipc,
}

#[derive(Clone, Debug)]
pub struct SubscriptionLink {
    pub registration_id: RegistrationId,
    pub client_id: ClientId,
    pub stream_id: StreamId,
    pub channel: String,
    pub reliable: bool,
    pub target: SubscriptionTarget,
}

impl SubscriptionLink {
    pub fn is_network(&self) -> bool {
        matches!(self.target, SubscriptionTarget::Network { .. })
    }

    pub fn matches_network(&self, endpoint_id: EndpointId, stream_id: StreamId) -> bool {
        self.stream_id == stream_id
            && matches!(self.target, SubscriptionTarget::Network { endpoint_id: id } if id == endpoint_id)
    }

    pub fn matches_spy(&self, channel_key: &str, stream_id: StreamId) -> bool {
        self.stream_id == stream_id
            && matches!(&self.target, SubscriptionTarget::Spy { channel_key: key } if key == channel_key)
    }

    pub fn matches_ipc(&self, stream_id: StreamId) -> bool {
        self.stream_id == stream_id && matches!(self.target, SubscriptionTarget::Ipc)
    }
}
