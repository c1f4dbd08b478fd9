//! System configuration parameters
//!
//! All tunable parameters for the StatusDeck display.
//! Broker credentials are baked in at build time (see [`SystemConfig::from_build_env`]);
//! everything else can be overridden with a partial JSON document.

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::screens::ScreenId;

/// Time allowed for a blocking broker host lookup.  The resolver has no
/// caller-side timeout, so the watchdog window must cover its own retries.
pub const DNS_LOOKUP_BUDGET_MS: u64 = 10_000;

/// Core system configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    // --- Broker ---
    /// Broker host name or IP address
    pub broker_host: String,
    /// Broker TCP port (1883 plain, 8883 TLS)
    pub broker_port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    /// MQTT client identifier; empty means "derive from the factory MAC"
    pub client_id: String,
    /// Wrap the broker connection in TLS
    pub use_tls: bool,
    /// Keepalive announced in CONNECT (seconds)
    pub keepalive_secs: u16,
    /// Upper bound for any blocking socket wait during the handshake (milliseconds)
    pub socket_timeout_ms: u32,

    // --- Topics ---
    /// Sensor subscriptions (the namespace in both case variants)
    pub sensor_filters: Vec<String>,
    /// First topic level that marks a sensor reading (matched ignoring case)
    pub sensor_namespace: String,
    /// Fixed topic carrying host metrics
    pub metrics_topic: String,
    /// Status topic is `<prefix>/<client_id>`
    pub status_topic_prefix: String,
    /// Default topic for outbound JSON publishes
    pub publish_topic: String,

    // --- Presentation ---
    /// Screens in rotation order
    pub screen_rotation: Vec<ScreenId>,
    /// Inner iterations per screen (dwell = ticks × tick interval)
    pub ticks_per_screen: u32,
    /// Inner iteration period (milliseconds)
    pub tick_interval_ms: u32,
    /// Keepalive ping cadence in ticks
    pub ping_interval_ticks: u32,
    /// Upper bound on messages dispatched in one tick
    pub max_messages_per_tick: u8,

    // --- Reconnect ---
    /// First reconnect delay after a fault (ticks)
    pub reconnect_backoff_min_ticks: u32,
    /// Reconnect delay ceiling (ticks)
    pub reconnect_backoff_max_ticks: u32,

    // --- Watchdog / reset ---
    /// Hardware watchdog timeout (milliseconds)
    pub watchdog_timeout_ms: u32,
    /// Pause before restarting after an unclassified fault (milliseconds)
    pub fatal_reset_delay_ms: u32,
    /// Pause before restarting when the first broker connect fails (milliseconds)
    pub startup_reset_delay_ms: u32,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            // Broker
            broker_host: String::from("localhost"),
            broker_port: 1883,
            username: None,
            password: None,
            client_id: String::new(),
            use_tls: false,
            keepalive_secs: 60,
            socket_timeout_ms: 3_000,

            // Topics
            sensor_filters: vec![String::from("Sensors/#"), String::from("sensors/#")],
            sensor_namespace: String::from("sensors"),
            metrics_topic: String::from("vps/monitor"),
            status_topic_prefix: String::from("status"),
            publish_topic: String::from("Sensors"),

            // Presentation
            screen_rotation: vec![ScreenId::Sensors, ScreenId::System],
            ticks_per_screen: 100, // ~10 s dwell
            tick_interval_ms: 100,
            ping_interval_ticks: 50, // ~5 s
            max_messages_per_tick: 8,

            // Reconnect
            reconnect_backoff_min_ticks: 10,  // 1 s
            reconnect_backoff_max_ticks: 300, // 30 s

            // Watchdog / reset
            watchdog_timeout_ms: 15_000,
            fatal_reset_delay_ms: 2_000,
            startup_reset_delay_ms: 5_000,
        }
    }
}

/// Errors from loading or validating [`SystemConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Override document is not valid JSON for this schema.
    Corrupted,
    /// A field failed range validation.
    /// The `&'static str` describes which field and why.
    ValidationFailed(&'static str),
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Corrupted => write!(f, "config corrupted"),
            Self::ValidationFailed(msg) => write!(f, "validation failed: {}", msg),
        }
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        match e {
            ConfigError::Corrupted => Error::Config("config corrupted"),
            ConfigError::ValidationFailed(msg) => Error::Config(msg),
        }
    }
}

impl SystemConfig {
    /// Parse a (possibly partial) JSON override on top of the defaults and validate it.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let cfg: Self = serde_json::from_str(json).map_err(|_| ConfigError::Corrupted)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Defaults overlaid with the broker settings exported at build time.
    ///
    /// Recognised variables: `STATUSDECK_MQTT_BROKER`, `STATUSDECK_MQTT_PORT`,
    /// `STATUSDECK_MQTT_USER`, `STATUSDECK_MQTT_PASS`, `STATUSDECK_MQTT_CLIENT_ID`,
    /// `STATUSDECK_MQTT_TLS` (`1`/`true`).
    pub fn from_build_env() -> Result<Self, ConfigError> {
        let mut cfg = Self::default();
        if let Some(host) = option_env!("STATUSDECK_MQTT_BROKER") {
            cfg.broker_host = host.to_owned();
        }
        if let Some(port) = option_env!("STATUSDECK_MQTT_PORT") {
            cfg.broker_port = port
                .parse()
                .map_err(|_| ConfigError::ValidationFailed("STATUSDECK_MQTT_PORT is not a port number"))?;
        }
        cfg.username = option_env!("STATUSDECK_MQTT_USER").map(str::to_owned);
        cfg.password = option_env!("STATUSDECK_MQTT_PASS").map(str::to_owned);
        if let Some(id) = option_env!("STATUSDECK_MQTT_CLIENT_ID") {
            cfg.client_id = id.to_owned();
        }
        if let Some(tls) = option_env!("STATUSDECK_MQTT_TLS") {
            cfg.use_tls = matches!(tls, "1" | "true" | "yes");
        }
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject settings that would break the connection or starve the watchdog.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.broker_host.is_empty() {
            return Err(ConfigError::ValidationFailed("broker_host is empty"));
        }
        if self.broker_port == 0 {
            return Err(ConfigError::ValidationFailed("broker_port must be non-zero"));
        }
        if self.client_id.len() > 23 {
            // MQTT 3.1.1 §3.1.3.1: servers only have to accept 23 bytes.
            return Err(ConfigError::ValidationFailed("client_id longer than 23 bytes"));
        }
        if self.password.is_some() && self.username.is_none() {
            return Err(ConfigError::ValidationFailed("password set without username"));
        }
        if self.metrics_topic.is_empty() || self.sensor_namespace.is_empty() {
            return Err(ConfigError::ValidationFailed("metrics_topic and sensor_namespace are required"));
        }
        if self.screen_rotation.is_empty() {
            return Err(ConfigError::ValidationFailed("screen_rotation is empty"));
        }
        if self.ticks_per_screen == 0 || self.tick_interval_ms == 0 {
            return Err(ConfigError::ValidationFailed("tick timing must be non-zero"));
        }
        if self.ping_interval_ticks == 0 {
            return Err(ConfigError::ValidationFailed("ping_interval_ticks must be non-zero"));
        }
        if self.max_messages_per_tick == 0 {
            return Err(ConfigError::ValidationFailed("max_messages_per_tick must be non-zero"));
        }
        if self.reconnect_backoff_min_ticks > self.reconnect_backoff_max_ticks {
            return Err(ConfigError::ValidationFailed("reconnect backoff min exceeds max"));
        }
        let ping_period_ms = u64::from(self.ping_interval_ticks) * u64::from(self.tick_interval_ms);
        if self.keepalive_secs > 0 && ping_period_ms >= u64::from(self.keepalive_secs) * 1000 {
            return Err(ConfigError::ValidationFailed("ping cadence slower than broker keepalive"));
        }
        // Worst case between two feeds: one tick plus the longest single
        // blocking step (a handshake wait on either side of a feed, or a
        // host lookup).
        let step_ms = (2 * u64::from(self.socket_timeout_ms)).max(DNS_LOOKUP_BUDGET_MS);
        let worst_gap_ms = step_ms + u64::from(self.tick_interval_ms);
        if worst_gap_ms >= u64::from(self.watchdog_timeout_ms) {
            return Err(ConfigError::ValidationFailed("socket timeout leaves no watchdog margin"));
        }
        Ok(())
    }

    /// Retained online/offline topic for this device.
    pub fn status_topic(&self, client_id: &str) -> String {
        format!("{}/{}", self.status_topic_prefix, client_id)
    }

    /// Every filter the session subscribes to after connecting.
    pub fn subscriptions(&self) -> Vec<String> {
        let mut filters = self.sensor_filters.clone();
        if !filters.iter().any(|f| f == &self.metrics_topic) {
            filters.push(self.metrics_topic.clone());
        }
        filters
    }
}
