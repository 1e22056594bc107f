//! UDP channel endpoints.
//!
//! One endpoint per canonical UDP channel, shared across streams and
//! reference-counted by the publications or subscriptions it backs. The
//! conductor owns these records; the actual sockets live in the data-plane
//! agents, which open them on registration.

use std::collections::BTreeMap;

use crate::channel::ChannelDescriptor;
use crate::core::{CounterId, EndpointId, StreamId};

/// Send-side endpoint, reference-counted by network publications.
#[derive(Debug)]
pub struct SendChannelEndpoint {
    pub id: EndpointId,
    pub descriptor: ChannelDescriptor,
    /// URI the endpoint was created from, echoed to the sender and in events.
    pub channel: String,
    publication_count: u32,
    closed: bool,
}

impl SendChannelEndpoint {
    pub fn new(id: EndpointId, descriptor: ChannelDescriptor, channel: String) -> Self {
        Self {
            id,
            descriptor,
            channel,
            publication_count: 0,
            closed: false,
        }
    }

    pub fn increment(&mut self) -> u32 {
        self.publication_count += 1;
        self.publication_count
    }

    pub fn decrement(&mut self) -> u32 {
        debug_assert!(self.publication_count > 0, "publication count underflow");
        self.publication_count = self.publication_count.saturating_sub(1);
        self.publication_count
    }

    pub fn publication_count(&self) -> u32 {
        self.publication_count
    }

    /// Mark closed. True only on the first call; close is instructed to the
    /// sender at most once per endpoint instance.
    pub fn close(&mut self) -> bool {
        !std::mem::replace(&mut self.closed, true)
    }
}

/// Receive-side endpoint, reference-counted per subscribed stream.
///
/// Reliability is an endpoint-level property fixed by the first subscription;
/// later subscriptions must match.
#[derive(Debug)]
pub struct ReceiveChannelEndpoint {
    pub id: EndpointId,
    pub descriptor: ChannelDescriptor,
    /// URI the endpoint was created from, echoed in image events.
    pub channel: String,
    pub status_counter_id: CounterId,
    pub reliable: bool,
    stream_refs: BTreeMap<StreamId, u32>,
    closed: bool,
}

impl ReceiveChannelEndpoint {
    pub fn new(
        id: EndpointId,
        descriptor: ChannelDescriptor,
        channel: String,
        status_counter_id: CounterId,
        reliable: bool,
    ) -> Self {
        Self {
            id,
            descriptor,
            channel,
            status_counter_id,
            reliable,
            stream_refs: BTreeMap::new(),
            closed: false,
        }
    }

    /// Count a subscription on `stream_id`. Returns the new reference count
    /// for that stream; 1 means the stream is newly subscribed.
    pub fn increment_stream(&mut self, stream_id: StreamId) -> u32 {
        let refs = self.stream_refs.entry(stream_id).or_insert(0);
        *refs += 1;
        *refs
    }

    /// Drop a subscription on `stream_id`. Returns the remaining reference
    /// count for that stream; 0 means the receiver should stop it.
    pub fn decrement_stream(&mut self, stream_id: StreamId) -> u32 {
        match self.stream_refs.get_mut(&stream_id) {
            Some(refs) if *refs > 1 => {
                *refs -= 1;
                *refs
            }
            Some(_) => {
                self.stream_refs.remove(&stream_id);
                0
            }
            None => {
                debug_assert!(false, "stream ref underflow for {stream_id}");
                0
            }
        }
    }

    pub fn has_stream(&self, stream_id: StreamId) -> bool {
        self.stream_refs.contains_key(&stream_id)
    }

    /// Number of distinct subscribed streams.
    pub fn stream_count(&self) -> usize {
        self.stream_refs.len()
    }

    pub fn close(&mut self) -> bool {
        !std::mem::replace(&mut self.closed, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::CounterId;

    fn descriptor() -> ChannelDescriptor {
        ChannelDescriptor::parse("aeron:udp?endpoint=localhost:4000").unwrap()
    }

    #[test]
    fn receive_endpoint_counts_streams_independently() {
        let mut endpoint = ReceiveChannelEndpoint::new(
            EndpointId::new(1),
            descriptor(),
            "aeron:udp?endpoint=localhost:4000".to_string(),
            CounterId::new(0),
            true,
        );

        assert_eq!(endpoint.increment_stream(StreamId::new(10)), 1);
        assert_eq!(endpoint.increment_stream(StreamId::new(10)), 2);
        assert_eq!(endpoint.increment_stream(StreamId::new(20)), 1);
        assert_eq!(endpoint.stream_count(), 2);

        assert_eq!(endpoint.decrement_stream(StreamId::new(10)), 1);
        assert_eq!(endpoint.decrement_stream(StreamId::new(10)), 0);
        assert_eq!(endpoint.stream_count(), 1);
        assert!(!endpoint.has_stream(StreamId::new(10)));
    }

    #[test]
    fn close_reports_first_call_only() {
        let mut endpoint = SendChannelEndpoint::new(
            EndpointId::new(1),
            descriptor(),
            "aeron:udp?endpoint=localhost:4000".to_string(),
        );
        assert!(endpoint.close());
        assert!(!endpoint.close());

        let mut endpoint = ReceiveChannelEndpoint::new(
            EndpointId::new(2),
            descriptor(),
            "aeron:udp?endpoint=localhost:4000".to_string(),
            CounterId::new(0),
            true,
        );
        assert!(endpoint.close());
        assert!(!endpoint.close());
    }

    #[test]
    fn send_endpoint_refcounts_publications() {
        let mut endpoint = SendChannelEndpoint::new(
            EndpointId::new(1),
            descriptor(),
            "aeron:udp?endpoint=localhost:4000".to_string(),
        );
        assert_eq!(endpoint.increment(), 1);
        assert_eq!(endpoint.increment(), 2);
        assert_eq!(endpoint.decrement(), 1);
        assert_eq!(endpoint.decrement(), 0);
    }
}
