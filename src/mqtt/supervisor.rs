//! Connection supervisor: owns the broker session and its lifecycle.
//!
//! ```text
//!                connect()              handshake ok
//!  Disconnected ──────────▶ Connecting ──────────────▶ Connected
//!       ▲                       │                          │
//!       │ disconnect()          │ handshake error          │ transport / protocol
//!       │                       ▼                          │ error
//!       └──────────────────  Faulted(reason) ◀─────────────┘
//!                               │
//!                               └─ poll_reconnect() once backoff elapsed
//! ```
//!
//! The supervisor never sleeps and never retries on its own: the caller
//! drives it tick by tick, feeding the watchdog in between.  Every fault
//! drops the session together with its transport handle, so the next
//! attempt always starts from a fresh socket.

use std::time::Duration;

use log::{debug, info, warn};
use serde::Serialize;

use super::client::MqttSession;
use super::codec::{Connect, LastWill};
use super::transport::{Connector, Endpoint};
use crate::app::ports::LivenessGuard;
use crate::config::SystemConfig;
use crate::error::{Error, ListenerError, MqttError};

/// Retained status payloads on `status/<client_id>`.
pub const STATUS_ONLINE: &[u8] = b"online";
pub const STATUS_OFFLINE: &[u8] = b"offline";

// ───────────────────────────────────────────────────────────────
// State
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Last session ended on this error; waiting for the next attempt.
    Faulted(MqttError),
}

/// Running counters for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SupervisorStats {
    pub connect_attempts: u32,
    pub connects: u32,
    pub messages_dispatched: u32,
    pub listener_errors: u32,
}

// ───────────────────────────────────────────────────────────────
// Listeners
// ───────────────────────────────────────────────────────────────

/// Receives every inbound publish, in registration order.
///
/// An error is logged and counted by the supervisor; it never stops the
/// remaining listeners and never faults the connection.
pub trait MessageListener {
    fn on_message(&mut self, topic: &str, payload: &[u8]) -> Result<(), ListenerError>;
}

impl<F> MessageListener for F
where
    F: FnMut(&str, &[u8]) -> Result<(), ListenerError>,
{
    fn on_message(&mut self, topic: &str, payload: &[u8]) -> Result<(), ListenerError> {
        self(topic, payload)
    }
}

// ───────────────────────────────────────────────────────────────
// Reconnect backoff
// ───────────────────────────────────────────────────────────────

/// Bounded exponential backoff counted in scheduler ticks.
#[derive(Debug, Clone, Copy)]
struct Backoff {
    min: u32,
    max: u32,
    next_delay: u32,
    remaining: u32,
}

impl Backoff {
    fn new(min: u32, max: u32) -> Self {
        Self { min, max, next_delay: min, remaining: 0 }
    }

    /// Arm the next wait and double the one after it.
    fn schedule(&mut self) {
        self.remaining = self.next_delay;
        self.next_delay = self.next_delay.saturating_mul(2).max(1).min(self.max);
    }

    /// Count one tick; true once the armed wait has elapsed.
    fn tick(&mut self) -> bool {
        if self.remaining > 0 {
            self.remaining -= 1;
        }
        self.remaining == 0
    }

    fn reset(&mut self) {
        self.next_delay = self.min;
        self.remaining = 0;
    }
}

// ───────────────────────────────────────────────────────────────
// Supervisor
// ───────────────────────────────────────────────────────────────

pub struct ConnectionSupervisor<C: Connector> {
    connector: C,
    endpoint: Endpoint,
    connect_packet: Connect,
    status_topic: String,
    subscriptions: Vec<String>,
    publish_topic: String,
    handshake_timeout: Duration,
    max_messages_per_tick: u8,

    session: Option<MqttSession<C::Conn>>,
    state: ConnectionState,
    backoff: Backoff,
    listeners: Vec<Box<dyn MessageListener>>,
    stats: SupervisorStats,
}

impl<C: Connector> ConnectionSupervisor<C> {
    /// Build a supervisor in `Disconnected` state.  No I/O happens here.
    pub fn new(connector: C, cfg: &SystemConfig, client_id: &str) -> Self {
        let status_topic = cfg.status_topic(client_id);
        let connect_packet = Connect {
            client_id: client_id.to_owned(),
            keepalive_secs: cfg.keepalive_secs,
            clean_session: true,
            username: cfg.username.clone(),
            password: cfg.password.clone(),
            will: Some(LastWill {
                topic: status_topic.clone(),
                message: STATUS_OFFLINE.to_vec(),
                retain: true,
            }),
        };
        Self {
            connector,
            endpoint: Endpoint::from_config(cfg),
            connect_packet,
            status_topic,
            subscriptions: cfg.subscriptions(),
            publish_topic: cfg.publish_topic.clone(),
            handshake_timeout: Duration::from_millis(u64::from(cfg.socket_timeout_ms)),
            max_messages_per_tick: cfg.max_messages_per_tick,
            session: None,
            state: ConnectionState::Disconnected,
            backoff: Backoff::new(cfg.reconnect_backoff_min_ticks, cfg.reconnect_backoff_max_ticks),
            listeners: Vec::new(),
            stats: SupervisorStats::default(),
        }
    }

    /// Register a listener; listeners run in registration order.
    pub fn add_listener<L: MessageListener + 'static>(&mut self, listener: L) {
        self.listeners.push(Box::new(listener));
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn stats(&self) -> SupervisorStats {
        self.stats
    }

    pub fn status_topic(&self) -> &str {
        &self.status_topic
    }

    /// Tear down any previous session and run a full handshake:
    /// CONNECT (with retained `offline` will) → `online` (retained) →
    /// one SUBSCRIBE per filter.  The guard is fed between steps.
    pub fn connect(&mut self, guard: &mut dyn LivenessGuard) -> Result<(), Error> {
        self.session = None;
        self.state = ConnectionState::Connecting;
        self.stats.connect_attempts += 1;
        info!(
            "MQTT: connecting to {}:{} as '{}' (attempt {})",
            self.endpoint.host, self.endpoint.port, self.connect_packet.client_id, self.stats.connect_attempts
        );

        match self.handshake(guard) {
            Ok(session) => {
                self.session = Some(session);
                self.state = ConnectionState::Connected;
                self.backoff.reset();
                self.stats.connects += 1;
                info!("MQTT: connected, {} subscriptions active", self.subscriptions.len());
                Ok(())
            }
            Err(e) => {
                self.fault(e);
                Err(e.into())
            }
        }
    }

    /// Drive reconnection from the scheduler tick.
    ///
    /// Returns `Ok(true)` when connected after the call, `Ok(false)` while
    /// the backoff is still running.
    pub fn poll_reconnect(&mut self, guard: &mut dyn LivenessGuard) -> Result<bool, Error> {
        match self.state {
            ConnectionState::Connected => Ok(true),
            ConnectionState::Connecting => Ok(false),
            ConnectionState::Disconnected | ConnectionState::Faulted(_) => {
                if self.backoff.tick() {
                    self.connect(guard).map(|()| true)
                } else {
                    Ok(false)
                }
            }
        }
    }

    /// Non-blocking drain of up to `max_messages_per_tick` inbound publishes.
    ///
    /// Returns the number of messages dispatched.
    pub fn check_messages(&mut self) -> Result<usize, Error> {
        let Some(session) = self.session.as_mut() else {
            return Err(Error::NotConnected);
        };
        let mut dispatched = 0;
        while dispatched < usize::from(self.max_messages_per_tick) {
            match session.poll_message() {
                Ok(Some(msg)) => {
                    dispatch(&mut self.listeners, &mut self.stats, &msg.topic, &msg.payload);
                    dispatched += 1;
                }
                Ok(None) => break,
                Err(e) => {
                    self.fault(e);
                    return Err(e.into());
                }
            }
        }
        Ok(dispatched)
    }

    /// Send a keepalive PINGREQ.  An unanswered previous ping faults the link.
    pub fn ping(&mut self) -> Result<(), Error> {
        let Some(session) = self.session.as_mut() else {
            return Err(Error::NotConnected);
        };
        if let Err(e) = session.ping() {
            self.fault(e);
            return Err(e.into());
        }
        debug!("MQTT: ping");
        Ok(())
    }

    /// Serialise `data` as JSON and publish it to `topic` (default: the
    /// configured publish topic).
    pub fn publish_json<T: Serialize + ?Sized>(
        &mut self,
        topic: Option<&str>,
        data: &T,
        retain: bool,
    ) -> Result<(), Error> {
        let payload = serde_json::to_vec(data).map_err(|_| Error::Encode)?;
        let topic = topic.unwrap_or(&self.publish_topic).to_owned();
        self.publish(&topic, &payload, retain)
    }

    /// Raw QoS 0 publish.  Not connected → `Error::NotConnected`, no state change.
    pub fn publish(&mut self, topic: &str, payload: &[u8], retain: bool) -> Result<(), Error> {
        let Some(session) = self.session.as_mut() else {
            return Err(Error::NotConnected);
        };
        if let Err(e) = session.publish(topic, payload, retain) {
            self.fault(e);
            return Err(e.into());
        }
        Ok(())
    }

    /// Clean shutdown: retained `offline`, DISCONNECT, close the socket.
    pub fn disconnect(&mut self) {
        if let Some(mut session) = self.session.take() {
            if let Err(e) = session.publish(&self.status_topic, STATUS_OFFLINE, true) {
                warn!("MQTT: offline status not sent: {}", e);
            }
            if let Err(e) = session.disconnect() {
                warn!("MQTT: DISCONNECT not sent: {}", e);
            }
        }
        self.state = ConnectionState::Disconnected;
        self.backoff.reset();
        info!("MQTT: disconnected");
    }

    /// Release memory held by the session buffers.
    pub fn compact(&mut self) {
        if let Some(session) = self.session.as_mut() {
            session.compact();
        }
        self.listeners.shrink_to_fit();
    }

    // ── internals ────────────────────────────────────────────────

    fn handshake(&mut self, guard: &mut dyn LivenessGuard) -> Result<MqttSession<C::Conn>, MqttError> {
        guard.feed();
        let transport = self.connector.connect(&self.endpoint, guard)?;
        guard.feed();
        let mut session = MqttSession::open(transport, &self.connect_packet, self.handshake_timeout)?;
        guard.feed();
        session.publish(&self.status_topic, STATUS_ONLINE, true)?;
        for filter in &self.subscriptions {
            session.subscribe(filter, self.handshake_timeout)?;
            debug!("MQTT: subscribed to '{}'", filter);
            guard.feed();
        }
        session.enter_polling()?;
        Ok(session)
    }

    fn fault(&mut self, reason: MqttError) {
        self.session = None;
        self.state = ConnectionState::Faulted(reason);
        self.backoff.schedule();
        warn!(
            "MQTT: link faulted ({}), retry in {} ticks",
            reason, self.backoff.remaining
        );
    }
}

fn dispatch(listeners: &mut [Box<dyn MessageListener>], stats: &mut SupervisorStats, topic: &str, payload: &[u8]) {
    stats.messages_dispatched = stats.messages_dispatched.wrapping_add(1);
    for (idx, listener) in listeners.iter_mut().enumerate() {
        if let Err(e) = listener.on_message(topic, payload) {
            stats.listener_errors = stats.listener_errors.wrapping_add(1);
            warn!("MQTT: listener #{} failed on '{}': {}", idx, topic, e);
        }
    }
}
