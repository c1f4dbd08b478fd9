//! PresentationScheduler end to end: broker → store → screens → display.

use statusdeck::config::SystemConfig;
use statusdeck::error::{DisplayError, Error};
use statusdeck::mqtt::ConnectionSupervisor;
use statusdeck::scheduler::PresentationScheduler;
use statusdeck::screens::ScreenId;
use statusdeck::telemetry::{Normalizer, StoreListener, TelemetryStore};

use crate::mock_broker::{BrokerSim, MockConnector, SharedBroker};
use crate::mock_ports::{CountingGuard, NoDelay, RecordingDisplay};

type TestScheduler = PresentationScheduler<MockConnector, CountingGuard, RecordingDisplay, NoDelay>;

fn config() -> SystemConfig {
    let mut cfg = SystemConfig::default();
    cfg.ticks_per_screen = 10;
    cfg.ping_interval_ticks = 4;
    cfg.reconnect_backoff_min_ticks = 2;
    cfg.reconnect_backoff_max_ticks = 8;
    cfg
}

fn build(broker: &SharedBroker, cfg: &SystemConfig, display: RecordingDisplay) -> (TestScheduler, CountingGuard) {
    let store = TelemetryStore::shared();
    let mut sup = ConnectionSupervisor::new(MockConnector::new(broker), cfg, "desk");
    sup.add_listener(StoreListener::new(Normalizer::from_config(cfg), store.clone()));
    let guard = CountingGuard::default();
    let sched = PresentationScheduler::new(sup, store, guard.clone(), display, NoDelay::default(), cfg);
    (sched, guard)
}

#[test]
fn guard_fed_every_iteration_with_always_failing_transport() {
    let broker = BrokerSim::shared();
    broker.borrow_mut().unreachable = true;
    let (mut sched, guard) = build(&broker, &config(), RecordingDisplay::default());

    for i in 1..=50u64 {
        sched.run_iteration().unwrap();
        assert!(guard.feeds.get() >= i, "iteration {i} was not fed");
    }
    assert!(!sched.supervisor().is_connected());
}

#[test]
fn guard_fed_every_iteration_when_link_keeps_dying() {
    let broker = BrokerSim::shared();
    let (mut sched, guard) = build(&broker, &config(), RecordingDisplay::default());
    sched.connect_initial().unwrap();

    for i in 0..40u64 {
        broker.borrow_mut().kill_link();
        let before = guard.feeds.get();
        sched.run_iteration().unwrap();
        assert!(guard.feeds.get() > before, "iteration {i} was not fed");
    }
    assert!(broker.borrow().connections > 1);
}

#[test]
fn startup_gate_reports_failed_first_connect() {
    let broker = BrokerSim::shared();
    broker.borrow_mut().connack_code = 4;
    let (mut sched, _) = build(&broker, &config(), RecordingDisplay::default());
    assert!(sched.connect_initial().is_err());
}

#[test]
fn pings_on_interval_while_connected() {
    let broker = BrokerSim::shared();
    let (mut sched, _) = build(&broker, &config(), RecordingDisplay::default());
    sched.connect_initial().unwrap();

    for _ in 0..12 {
        sched.run_iteration().unwrap();
    }
    assert_eq!(broker.borrow().pings(), 3);
    assert!(sched.supervisor().is_connected());
}

#[test]
fn incoming_telemetry_redraws_active_screen() {
    let broker = BrokerSim::shared();
    let (mut sched, _) = build(&broker, &config(), RecordingDisplay::default());
    sched.connect_initial().unwrap();

    sched.run_iteration().unwrap();
    let frames_before = sched.display().frames().len();
    assert_eq!(frames_before, 1);

    broker
        .borrow_mut()
        .deliver("sensors/lab", br#"{"id":"Sensor_DS18B20_28a09eb3913cd838","Temp":21.5,"value":99,"unit":"F"}"#);
    sched.run_iteration().unwrap();

    let frame = sched.display().last_frame().cloned().unwrap();
    assert_eq!(sched.display().frames().len(), frames_before + 1);
    assert_eq!(frame.screen, ScreenId::Sensors);
    assert!(frame.link_up);
    assert_eq!(frame.rows.len(), 1);
    assert_eq!(frame.rows[0].label, "DS18B20");
    assert_eq!(frame.rows[0].value, "21.5 °C");

    // Same identifier family, different serial: still one row.
    broker
        .borrow_mut()
        .deliver("sensors/lab", br#"{"id":"Sensor_DS18B20_28ff0000aabbccdd","Temp":22}"#);
    sched.run_iteration().unwrap();
    let frame = sched.display().last_frame().cloned().unwrap();
    assert_eq!(frame.rows.len(), 1);
    assert_eq!(frame.rows[0].value, "22 °C");
}

#[test]
fn link_loss_repaints_indicator() {
    let broker = BrokerSim::shared();
    let (mut sched, _) = build(&broker, &config(), RecordingDisplay::default());
    sched.connect_initial().unwrap();
    sched.run_iteration().unwrap();
    assert!(sched.display().last_frame().unwrap().link_up);

    broker.borrow_mut().kill_link();
    sched.run_iteration().unwrap();
    assert!(!sched.display().last_frame().unwrap().link_up);
}

#[test]
fn rotation_wraps_and_shows_each_screen() {
    let broker = BrokerSim::shared();
    let (mut sched, _) = build(&broker, &config(), RecordingDisplay::default());
    sched.connect_initial().unwrap();

    for _ in 0..3 {
        sched.run_cycle().unwrap();
    }
    assert_eq!(sched.display().shown(), vec![ScreenId::Sensors, ScreenId::System, ScreenId::Sensors]);
    assert_eq!(sched.active_screen(), ScreenId::System);
    assert_eq!(sched.ticks(), 30);
}

#[test]
fn display_failure_ends_run_with_unrecoverable_error() {
    let broker = BrokerSim::shared();
    let display = RecordingDisplay { fail_after: Some(3), ..Default::default() };
    let (mut sched, _) = build(&broker, &config(), display);
    sched.connect_initial().unwrap();

    let err = sched.run();
    assert_eq!(err, Error::Display(DisplayError::Bus));
    assert!(!err.is_recoverable());
}
