//! ConnectionSupervisor against the in-memory broker.

use std::cell::RefCell;
use std::rc::Rc;

use statusdeck::config::SystemConfig;
use statusdeck::error::{Error, ListenerError, MqttError, ProtocolError, TransportError};
use statusdeck::mqtt::codec::Packet;
use statusdeck::mqtt::supervisor::{STATUS_OFFLINE, STATUS_ONLINE};
use statusdeck::mqtt::{ConnectionState, ConnectionSupervisor};
use statusdeck::telemetry::{Normalizer, StoreListener, TelemetryStore};

use crate::mock_broker::{BrokerSim, MockConnector, SharedBroker};
use crate::mock_ports::CountingGuard;

fn config() -> SystemConfig {
    let mut cfg = SystemConfig::default();
    cfg.reconnect_backoff_min_ticks = 3;
    cfg.reconnect_backoff_max_ticks = 12;
    cfg
}

fn supervisor(broker: &SharedBroker) -> ConnectionSupervisor<MockConnector> {
    ConnectionSupervisor::new(MockConnector::new(broker), &config(), "desk")
}

fn expected_filters() -> Vec<String> {
    vec!["Sensors/#".into(), "sensors/#".into(), "vps/monitor".into()]
}

// ── Handshake ─────────────────────────────────────────────────

#[test]
fn handshake_sends_will_then_online_then_each_subscription() {
    let broker = BrokerSim::shared();
    let mut sup = supervisor(&broker);
    let mut guard = CountingGuard::default();

    sup.connect(&mut guard).unwrap();
    assert_eq!(sup.state(), ConnectionState::Connected);
    assert!(guard.feeds.get() >= 3, "guard fed between handshake steps");

    let b = broker.borrow();
    let Packet::Connect(connect) = &b.received[0] else {
        panic!("first packet must be CONNECT, got {:?}", b.received[0]);
    };
    assert_eq!(connect.client_id, "desk");
    let will = connect.will.as_ref().expect("last will registered");
    assert_eq!(will.topic, "status/desk");
    assert_eq!(will.message, STATUS_OFFLINE);
    assert!(will.retain);

    let Packet::Publish(online) = &b.received[1] else {
        panic!("online status must precede subscriptions");
    };
    assert_eq!(online.topic, "status/desk");
    assert_eq!(online.payload, STATUS_ONLINE);
    assert!(online.retain);

    assert_eq!(b.subscriptions(), expected_filters());
}

#[test]
fn refused_connack_faults() {
    let broker = BrokerSim::shared();
    broker.borrow_mut().connack_code = 5;
    let mut sup = supervisor(&broker);

    let err = sup.connect(&mut CountingGuard::default()).unwrap_err();
    assert_eq!(err, Error::Protocol(ProtocolError::ConnectionRefused(5)));
    assert_eq!(
        sup.state(),
        ConnectionState::Faulted(MqttError::Protocol(ProtocolError::ConnectionRefused(5)))
    );
    assert!(broker.borrow().subscriptions().is_empty());
}

#[test]
fn rejected_subscription_faults() {
    let broker = BrokerSim::shared();
    broker.borrow_mut().reject_subscriptions = true;
    let mut sup = supervisor(&broker);

    let err = sup.connect(&mut CountingGuard::default()).unwrap_err();
    assert_eq!(err, Error::Protocol(ProtocolError::SubscriptionRejected));
    assert!(!sup.is_connected());
}

#[test]
fn unreachable_broker_faults_with_transport_error() {
    let broker = BrokerSim::shared();
    broker.borrow_mut().unreachable = true;
    let mut sup = supervisor(&broker);

    assert_eq!(sup.connect(&mut CountingGuard::default()), Err(Error::Transport(TransportError::Io)));
    assert_eq!(sup.stats().connect_attempts, 1);
    assert_eq!(sup.stats().connects, 0);
}

// ── Fault + reconnect ─────────────────────────────────────────

#[test]
fn fault_during_check_then_reconnect_resubscribes_exactly_once() {
    let broker = BrokerSim::shared();
    let mut sup = supervisor(&broker);
    let mut guard = CountingGuard::default();
    sup.connect(&mut guard).unwrap();
    let first_session_packets = broker.borrow().received.len();

    broker.borrow_mut().kill_link();
    let err = sup.check_messages().unwrap_err();
    assert_eq!(err, Error::Transport(TransportError::Closed));
    assert_eq!(sup.state(), ConnectionState::Faulted(MqttError::Transport(TransportError::Closed)));

    // Backoff: min 3 ticks before the next attempt.
    assert_eq!(sup.poll_reconnect(&mut guard), Ok(false));
    assert_eq!(sup.poll_reconnect(&mut guard), Ok(false));
    assert_eq!(sup.poll_reconnect(&mut guard), Ok(true));
    assert!(sup.is_connected());

    let b = broker.borrow();
    assert_eq!(b.connections, 2);
    let second: Vec<String> = b.received[first_session_packets..]
        .iter()
        .filter_map(|p| match p {
            Packet::Subscribe { filters, .. } => Some(filters[0].0.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(second, expected_filters());
    assert_eq!(sup.stats().connects, 2);
}

#[test]
fn repeated_failures_back_off_exponentially() {
    let broker = BrokerSim::shared();
    broker.borrow_mut().unreachable = true;
    let mut sup = supervisor(&broker);
    let mut guard = CountingGuard::default();

    let mut attempt_ticks = Vec::new();
    for tick in 0..40u32 {
        let before = sup.stats().connect_attempts;
        let _ = sup.poll_reconnect(&mut guard);
        if sup.stats().connect_attempts > before {
            attempt_ticks.push(tick);
        }
    }
    // Immediate first try, then waits of 3, 6, 12, 12 ... ticks.
    assert_eq!(attempt_ticks, vec![0, 3, 9, 21, 33]);
}

#[test]
fn unanswered_ping_faults_the_link() {
    let broker = BrokerSim::shared();
    broker.borrow_mut().answer_pings = false;
    let mut sup = supervisor(&broker);
    sup.connect(&mut CountingGuard::default()).unwrap();

    sup.ping().unwrap();
    assert_eq!(sup.check_messages(), Ok(0));
    assert_eq!(sup.ping(), Err(Error::Transport(TransportError::Timeout)));
    assert!(matches!(sup.state(), ConnectionState::Faulted(_)));
    assert_eq!(broker.borrow().pings(), 1);
}

#[test]
fn answered_ping_keeps_link_up() {
    let broker = BrokerSim::shared();
    let mut sup = supervisor(&broker);
    sup.connect(&mut CountingGuard::default()).unwrap();

    for _ in 0..3 {
        sup.ping().unwrap();
        sup.check_messages().unwrap();
    }
    assert!(sup.is_connected());
    assert_eq!(broker.borrow().pings(), 3);
}

#[test]
fn wire_garbage_faults_with_protocol_error() {
    let broker = BrokerSim::shared();
    let mut sup = supervisor(&broker);
    sup.connect(&mut CountingGuard::default()).unwrap();

    // Reserved packet type 15.
    broker.borrow_mut().deliver_raw(&[0xF0, 0x00]);
    assert!(matches!(sup.check_messages(), Err(Error::Protocol(_))));
    assert!(!sup.is_connected());
}

// ── Dispatch ──────────────────────────────────────────────────

#[test]
fn messages_reach_every_listener_in_order() {
    let broker = BrokerSim::shared();
    let mut sup = supervisor(&broker);
    let log: Rc<RefCell<Vec<String>>> = Rc::default();

    for name in ["first", "second"] {
        let log = log.clone();
        sup.add_listener(move |topic: &str, _: &[u8]| -> Result<(), ListenerError> {
            log.borrow_mut().push(format!("{name}:{topic}"));
            Ok(())
        });
    }
    sup.connect(&mut CountingGuard::default()).unwrap();

    broker.borrow_mut().deliver("sensors/a", b"{}");
    broker.borrow_mut().deliver("vps/monitor", b"{}");
    assert_eq!(sup.check_messages(), Ok(2));

    assert_eq!(
        *log.borrow(),
        vec!["first:sensors/a", "second:sensors/a", "first:vps/monitor", "second:vps/monitor"]
    );
    assert_eq!(sup.stats().messages_dispatched, 2);
}

#[test]
fn check_drains_at_most_the_per_tick_limit() {
    let broker = BrokerSim::shared();
    let mut cfg = config();
    cfg.max_messages_per_tick = 2;
    let mut sup = ConnectionSupervisor::new(MockConnector::new(&broker), &cfg, "desk");
    sup.connect(&mut CountingGuard::default()).unwrap();

    for i in 0..5 {
        broker.borrow_mut().deliver("sensors/a", format!("{{\"n\":{i}}}").as_bytes());
    }
    assert_eq!(sup.check_messages(), Ok(2));
    assert_eq!(sup.check_messages(), Ok(2));
    assert_eq!(sup.check_messages(), Ok(1));
    assert_eq!(sup.check_messages(), Ok(0));
}

#[test]
fn malformed_payload_leaves_store_and_state_untouched() {
    let broker = BrokerSim::shared();
    let store = TelemetryStore::shared();
    let mut sup = supervisor(&broker);
    sup.add_listener(StoreListener::new(Normalizer::from_config(&config()), store.clone()));
    sup.connect(&mut CountingGuard::default()).unwrap();

    broker.borrow_mut().deliver("sensors/lab", b"\x00not json at all");
    broker.borrow_mut().deliver("vps/monitor", b"[1,2,3]");
    assert_eq!(sup.check_messages(), Ok(2));

    assert_eq!(store.borrow().revision(), 0);
    assert!(store.borrow().snapshot().sensors.is_empty());
    assert_eq!(sup.state(), ConnectionState::Connected);
    assert_eq!(sup.stats().listener_errors, 2);
}

#[test]
fn sensor_payloads_land_in_the_store() {
    let broker = BrokerSim::shared();
    let store = TelemetryStore::shared();
    let mut sup = supervisor(&broker);
    sup.add_listener(StoreListener::new(Normalizer::from_config(&config()), store.clone()));
    sup.connect(&mut CountingGuard::default()).unwrap();

    broker
        .borrow_mut()
        .deliver("Sensors/lab", br#"{"id":"Sensor_DS18B20_28a09eb3913cd838","Temp":21.5}"#);
    broker
        .borrow_mut()
        .deliver("sensors/hall", br#"{"data":{"id":"DHT11_Indoor","Humidity":55}}"#);
    broker.borrow_mut().deliver("vps/monitor", br#"{"cpu":12.5,"uptime":"3 days"}"#);
    sup.check_messages().unwrap();

    let store = store.borrow();
    let view = store.snapshot();
    assert!(view.sensors.contains_key("Sensor_DS18B20_C"));
    assert!(view.sensors.contains_key("DHT11_Indoor_%"));
    assert_eq!(view.metrics.len(), 2);
}

#[test]
fn oversize_publish_is_dropped_and_the_next_one_delivered() {
    let broker = BrokerSim::shared();
    let store = TelemetryStore::shared();
    let mut sup = supervisor(&broker);
    sup.add_listener(StoreListener::new(Normalizer::from_config(&config()), store.clone()));
    sup.connect(&mut CountingGuard::default()).unwrap();

    broker.borrow_mut().deliver("sensors/big", &[b'x'; 5000]);
    broker
        .borrow_mut()
        .deliver("sensors/lab", br#"{"id":"Sensor_Lab","Temp":1}"#);
    assert_eq!(sup.check_messages(), Ok(1));

    assert_eq!(sup.state(), ConnectionState::Connected);
    assert_eq!(sup.stats().messages_dispatched, 1);
    assert!(store.borrow().snapshot().sensors.contains_key("Sensor_Lab_C"));
}

#[test]
fn oversize_retained_publish_does_not_block_the_handshake() {
    let broker = BrokerSim::shared();
    broker.borrow_mut().retained = Some(("Sensors/huge".into(), vec![b'x'; 6000]));
    let mut sup = supervisor(&broker);

    sup.connect(&mut CountingGuard::default()).unwrap();
    assert_eq!(sup.state(), ConnectionState::Connected);
    assert_eq!(broker.borrow().subscriptions(), expected_filters());

    broker.borrow_mut().deliver("vps/monitor", br#"{"cpu":3}"#);
    assert_eq!(sup.check_messages(), Ok(1));
}

// ── Publish / disconnect ──────────────────────────────────────

#[test]
fn publish_json_uses_default_topic() {
    #[derive(serde::Serialize)]
    struct Reading {
        id: &'static str,
        value: f32,
    }

    let broker = BrokerSim::shared();
    let mut sup = supervisor(&broker);
    sup.connect(&mut CountingGuard::default()).unwrap();
    sup.publish_json(None, &Reading { id: "desk", value: 1.5 }, false).unwrap();

    let b = broker.borrow();
    let last = b.publishes().last().copied().cloned().unwrap();
    assert_eq!(last.topic, "Sensors");
    assert_eq!(last.payload, br#"{"id":"desk","value":1.5}"#);
    assert!(!last.retain);
}

#[test]
fn publish_while_disconnected_is_rejected_without_state_change() {
    let broker = BrokerSim::shared();
    let mut sup = supervisor(&broker);
    assert_eq!(sup.publish("x", b"y", false), Err(Error::NotConnected));
    assert_eq!(sup.state(), ConnectionState::Disconnected);
    assert_eq!(broker.borrow().connections, 0);
}

#[test]
fn clean_disconnect_sends_offline_then_disconnect() {
    let broker = BrokerSim::shared();
    let mut sup = supervisor(&broker);
    sup.connect(&mut CountingGuard::default()).unwrap();
    sup.disconnect();

    assert_eq!(sup.state(), ConnectionState::Disconnected);
    let b = broker.borrow();
    let n = b.received.len();
    assert_eq!(b.received[n - 1], Packet::Disconnect);
    let Packet::Publish(offline) = &b.received[n - 2] else {
        panic!("offline status must precede DISCONNECT");
    };
    assert_eq!(offline.payload, STATUS_OFFLINE);
    assert!(offline.retain);
}
