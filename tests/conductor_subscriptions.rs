//! Conductor behavior for network subscriptions: endpoint lifecycles,
//! reliability conflicts, and liveness timeouts.

mod fixtures;

use aeronmd::{ClientEvent, ErrorCode, ReceiverCommand, RegistrationId};
use fixtures::rig::{CHANNEL_4000, DriverRig, INVALID_URI, STREAM_ID_1, STREAM_ID_2, STREAM_ID_3, descriptor};

const SECOND: u64 = 1_000_000_000;

#[test]
fn adds_single_subscription() {
    let mut rig = DriverRig::new();

    let id = rig.proxy.add_subscription(CHANNEL_4000, STREAM_ID_1);
    rig.do_work();

    let receiver = rig.drain_receiver();
    assert!(matches!(
        receiver[0],
        ReceiverCommand::RegisterReceiveChannelEndpoint { .. }
    ));
    assert!(matches!(
        receiver[1],
        ReceiverCommand::AddSubscription { stream_id, .. } if stream_id == STREAM_ID_1
    ));

    let events = rig.drain_events();
    assert!(matches!(
        &events[0],
        ClientEvent::SubscriptionReady { correlation_id, .. }
            if correlation_id.get() == id.get()
    ));

    assert!(
        rig.conductor
            .receiver_channel_endpoint(&descriptor(CHANNEL_4000))
            .is_some()
    );
}

#[test]
fn adds_and_removes_single_subscription() {
    let mut rig = DriverRig::new();

    let id = rig.proxy.add_subscription(CHANNEL_4000, STREAM_ID_1);
    rig.proxy.remove_subscription(id);
    rig.do_work();

    assert!(
        rig.conductor
            .receiver_channel_endpoint(&descriptor(CHANNEL_4000))
            .is_none()
    );

    let receiver = rig.drain_receiver();
    let removes = receiver
        .iter()
        .filter(|command| matches!(command, ReceiverCommand::RemoveSubscription { .. }))
        .count();
    let closes = receiver
        .iter()
        .filter(|command| {
            matches!(command, ReceiverCommand::CloseReceiveChannelEndpoint { .. })
        })
        .count();
    assert_eq!(removes, 1);
    assert_eq!(closes, 1);
}

#[test]
fn keeps_endpoint_while_a_subscriber_remains() {
    let mut rig = DriverRig::new();

    let id1 = rig.proxy.add_subscription(CHANNEL_4000, STREAM_ID_1);
    let id2 = rig.proxy.add_subscription(CHANNEL_4000, STREAM_ID_2);
    rig.proxy.add_subscription(CHANNEL_4000, STREAM_ID_3);
    rig.do_work();

    assert_eq!(
        rig.conductor
            .receiver_endpoint_stream_count(&descriptor(CHANNEL_4000)),
        Some(3)
    );

    rig.proxy.remove_subscription(id1);
    rig.proxy.remove_subscription(id2);
    rig.do_work();

    assert_eq!(
        rig.conductor
            .receiver_endpoint_stream_count(&descriptor(CHANNEL_4000)),
        Some(1)
    );
}

#[test]
fn closes_endpoint_only_when_all_subscribers_gone() {
    let mut rig = DriverRig::new();

    let id1 = rig.proxy.add_subscription(CHANNEL_4000, STREAM_ID_1);
    let id2 = rig.proxy.add_subscription(CHANNEL_4000, STREAM_ID_2);
    let id3 = rig.proxy.add_subscription(CHANNEL_4000, STREAM_ID_3);
    rig.do_work();

    rig.proxy.remove_subscription(id2);
    rig.proxy.remove_subscription(id3);
    rig.do_work();

    assert!(
        rig.conductor
            .receiver_channel_endpoint(&descriptor(CHANNEL_4000))
            .is_some()
    );

    rig.proxy.remove_subscription(id1);
    rig.do_work();

    assert!(
        rig.conductor
            .receiver_channel_endpoint(&descriptor(CHANNEL_4000))
            .is_none()
    );

    let closes = rig
        .drain_receiver()
        .iter()
        .filter(|command| {
            matches!(command, ReceiverCommand::CloseReceiveChannelEndpoint { .. })
        })
        .count();
    assert_eq!(closes, 1);
}

#[test]
fn errors_on_remove_subscription_with_unknown_registration_id() {
    let mut rig = DriverRig::new();

    let id = rig.proxy.add_subscription(CHANNEL_4000, STREAM_ID_1);
    rig.proxy
        .remove_subscription(RegistrationId::new(id.get() + 100));
    rig.do_work();

    let events = rig.drain_events();
    assert_eq!(events.len(), 2);
    assert!(matches!(
        &events[0],
        ClientEvent::SubscriptionReady { correlation_id, .. }
            if correlation_id.get() == id.get()
    ));
    assert!(matches!(
        &events[1],
        ClientEvent::Error {
            code: ErrorCode::UnknownSubscription,
            ..
        }
    ));
    assert_eq!(rig.handled_errors.lock().unwrap().len(), 1);
}

#[test]
fn errors_on_add_subscription_with_invalid_channel() {
    let mut rig = DriverRig::new();

    rig.proxy.add_subscription(INVALID_URI, STREAM_ID_1);
    rig.do_work();
    rig.do_work();

    assert!(rig.drain_receiver().is_empty());

    let events = rig.drain_events();
    assert_eq!(events.len(), 1);
    assert!(matches!(
        &events[0],
        ClientEvent::Error {
            code: ErrorCode::InvalidChannel,
            ..
        }
    ));
    assert_eq!(rig.error_counter.get(), 1);
    assert_eq!(rig.handled_errors.lock().unwrap().len(), 1);
}

#[test]
fn times_out_subscription_without_keepalive() {
    let mut rig = DriverRig::new();
    let liveness = rig.config.client_liveness_timeout_ns;

    rig.proxy.add_subscription(CHANNEL_4000, STREAM_ID_1);
    rig.do_work();

    assert!(
        rig.conductor
            .receiver_channel_endpoint(&descriptor(CHANNEL_4000))
            .is_some()
    );

    rig.run_until(liveness * 2);

    let receiver = rig.drain_receiver();
    assert!(receiver.iter().any(|command| matches!(
        command,
        ReceiverCommand::RemoveSubscription { stream_id, .. } if *stream_id == STREAM_ID_1
    )));
    assert!(
        rig.conductor
            .receiver_channel_endpoint(&descriptor(CHANNEL_4000))
            .is_none()
    );
}

#[test]
fn does_not_time_out_subscription_on_keepalive() {
    let mut rig = DriverRig::new();
    let liveness = rig.config.client_liveness_timeout_ns;

    rig.proxy.add_subscription(CHANNEL_4000, STREAM_ID_1);
    rig.do_work();

    rig.run_until(liveness / 2);
    rig.proxy.send_client_keepalive();
    rig.run_until(liveness + SECOND);
    rig.proxy.send_client_keepalive();
    rig.run_until(liveness * 2);

    assert!(!rig.drain_receiver().iter().any(|command| matches!(
        command,
        ReceiverCommand::RemoveSubscription { .. }
    )));
    assert!(
        rig.conductor
            .receiver_channel_endpoint(&descriptor(CHANNEL_4000))
            .is_some()
    );
}

#[test]
fn errors_when_conflicting_unreliable_subscription_added() {
    let mut rig = DriverRig::new();

    rig.proxy.add_subscription(CHANNEL_4000, STREAM_ID_1);
    rig.do_work();
    rig.drain_events();

    let id2 = rig
        .proxy
        .add_subscription(&format!("{CHANNEL_4000}|reliable=false"), STREAM_ID_1);
    rig.do_work();

    let events = rig.drain_events();
    assert!(matches!(
        &events[0],
        ClientEvent::Error {
            correlation_id,
            code: ErrorCode::GenericError,
            ..
        } if correlation_id.get() == id2.get()
    ));

    // existing subscription is untouched
    assert_eq!(
        rig.conductor
            .receiver_endpoint_stream_count(&descriptor(CHANNEL_4000)),
        Some(1)
    );
}

#[test]
fn errors_when_conflicting_default_reliable_subscription_added() {
    let mut rig = DriverRig::new();

    rig.proxy
        .add_subscription(&format!("{CHANNEL_4000}|reliable=false"), STREAM_ID_1);
    rig.do_work();
    rig.drain_events();

    let id2 = rig.proxy.add_subscription(CHANNEL_4000, STREAM_ID_1);
    rig.do_work();

    let events = rig.drain_events();
    assert!(matches!(
        &events[0],
        ClientEvent::Error {
            correlation_id,
            code: ErrorCode::GenericError,
            ..
        } if correlation_id.get() == id2.get()
    ));
}

#[test]
fn errors_when_conflicting_explicit_reliable_subscription_added() {
    let mut rig = DriverRig::new();

    rig.proxy
        .add_subscription(&format!("{CHANNEL_4000}|reliable=false"), STREAM_ID_1);
    rig.do_work();
    rig.drain_events();

    let id2 = rig
        .proxy
        .add_subscription(&format!("{CHANNEL_4000}|reliable=true"), STREAM_ID_1);
    rig.do_work();

    let events = rig.drain_events();
    assert!(matches!(
        &events[0],
        ClientEvent::Error {
            correlation_id,
            code: ErrorCode::GenericError,
            ..
        } if correlation_id.get() == id2.get()
    ));
}

#[test]
fn same_reliability_subscriptions_share_the_endpoint() {
    let mut rig = DriverRig::new();

    rig.proxy
        .add_subscription(&format!("{CHANNEL_4000}|reliable=false"), STREAM_ID_1);
    rig.proxy
        .add_subscription(&format!("{CHANNEL_4000}|reliable=false"), STREAM_ID_2);
    rig.do_work();

    let registrations = rig
        .drain_receiver()
        .iter()
        .filter(|command| {
            matches!(command, ReceiverCommand::RegisterReceiveChannelEndpoint { .. })
        })
        .count();
    assert_eq!(registrations, 1);
    assert_eq!(
        rig.conductor
            .receiver_endpoint_stream_count(&descriptor(CHANNEL_4000)),
        Some(2)
    );
    assert_eq!(rig.error_counter.get(), 0);
}

#[test]
fn client_timeout_releases_subscriptions_after_publications() {
    let mut rig = DriverRig::new();
    let liveness = rig.config.client_liveness_timeout_ns;
    let linger = rig.config.publication_linger_ns;

    rig.proxy.add_publication(CHANNEL_4000, STREAM_ID_1);
    rig.proxy.add_subscription(CHANNEL_4000, STREAM_ID_1);
    rig.do_work();
    assert_eq!(rig.conductor.client_count(), 1);

    rig.run_until(liveness * 2 + linger * 2);

    assert_eq!(rig.conductor.client_count(), 0);
    assert!(
        rig.conductor
            .sender_channel_endpoint(&descriptor(CHANNEL_4000))
            .is_none()
    );
    assert!(
        rig.conductor
            .receiver_channel_endpoint(&descriptor(CHANNEL_4000))
            .is_none()
    );
}
