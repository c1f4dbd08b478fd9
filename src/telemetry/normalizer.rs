//! Payload normalizer: `(topic, raw bytes)` → display-ready updates.
//!
//! Pure: no I/O, no shared state.  The caller applies the result to the
//! [`TelemetryStore`](super::store::TelemetryStore).
//!
//! Accepted payload shapes:
//!
//! ```text
//! vps/monitor   {"cpu": 12.5, "ram": 40, "disk": 71, "uptime": 93784}
//! sensors/...   {"id": "DHT11_Indoor", "Temp": 21.5, "Humidity": 55}
//!               {"data": {"id": "Sensor_DS18B20_28a09eb3913cd838", "Temp": 19.8}}
//!               {"id": "Lux_Balcony", "value": 320, "unit": "lx"}
//! ```

use core::fmt;

use log::warn;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::config::SystemConfig;
use crate::error::ParseError;

/// Display value of a sensor that reported no usable reading.
pub const NO_DATA: &str = "--";

const TEMP_UNIT: &str = "°C";
const HUMIDITY_UNIT: &str = "%";
const TEMP_FIELDS: [&str; 2] = ["Temp", "Temperature"];
const HUMIDITY_FIELDS: [&str; 2] = ["Humidity", "Hum"];

/// Shortest trailing segment treated as a hardware serial.
const MIN_SERIAL_LEN: usize = 12;

// ───────────────────────────────────────────────────────────────
// Output types
// ───────────────────────────────────────────────────────────────

/// One display row for a sensor measurement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NormalizedRecord {
    /// `identifier_unit` (degree glyph stripped), or the identifier alone.
    pub key: String,
    pub display_label: String,
    pub display_value: String,
}

/// Host metric vocabulary; canonical spelling is upper case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum MetricName {
    Cpu,
    Ram,
    Disk,
    Uptime,
}

impl MetricName {
    pub const ALL: [Self; 4] = [Self::Cpu, Self::Ram, Self::Disk, Self::Uptime];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cpu => "CPU",
            Self::Ram => "RAM",
            Self::Disk => "DISK",
            Self::Uptime => "UPTIME",
        }
    }

    /// Match a payload key ignoring ASCII case.
    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.as_str().eq_ignore_ascii_case(key))
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metric values keep the payload's type.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum MetricValue {
    Number(f64),
    Text(String),
}

impl MetricValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Text(t) => t.trim().parse().ok(),
        }
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{}", n),
            Self::Text(t) => f.write_str(t),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Update {
    Sensor(NormalizedRecord),
    Metric(MetricName, MetricValue),
}

/// What a topic carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageCategory {
    SystemMetrics,
    SensorReading,
    Unrecognized,
}

// ───────────────────────────────────────────────────────────────
// Normalizer
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Normalizer {
    metrics_topic: String,
    sensor_namespace: String,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::from_config(&SystemConfig::default())
    }
}

impl Normalizer {
    pub fn new(metrics_topic: &str, sensor_namespace: &str) -> Self {
        Self {
            metrics_topic: metrics_topic.to_owned(),
            sensor_namespace: sensor_namespace.to_owned(),
        }
    }

    pub fn from_config(cfg: &SystemConfig) -> Self {
        Self::new(&cfg.metrics_topic, &cfg.sensor_namespace)
    }

    pub fn classify(&self, topic: &str) -> MessageCategory {
        if topic == self.metrics_topic {
            MessageCategory::SystemMetrics
        } else if topic
            .split('/')
            .next()
            .is_some_and(|first| first.eq_ignore_ascii_case(&self.sensor_namespace))
        {
            MessageCategory::SensorReading
        } else {
            MessageCategory::Unrecognized
        }
    }

    /// Total variant: malformed input yields no updates (and a warning).
    pub fn normalize(&self, topic: &str, raw: &[u8]) -> Vec<Update> {
        self.try_normalize(topic, raw).unwrap_or_else(|e| {
            warn!("Normalizer: {} on '{}'", e, topic);
            Vec::new()
        })
    }

    /// Fallible variant so the caller can log the raw payload.
    ///
    /// An empty (or whitespace-only) payload is not an error: it yields
    /// nothing, the same as an unrecognised topic.
    pub fn try_normalize(&self, topic: &str, raw: &[u8]) -> Result<Vec<Update>, ParseError> {
        let category = self.classify(topic);
        if category == MessageCategory::Unrecognized || raw.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }
        let obj = parse_object(raw)?;
        match category {
            MessageCategory::SystemMetrics => Ok(extract_metrics(&obj)),
            MessageCategory::SensorReading => extract_sensor(&obj),
            MessageCategory::Unrecognized => Ok(Vec::new()),
        }
    }
}

fn parse_object(raw: &[u8]) -> Result<Map<String, Value>, ParseError> {
    match serde_json::from_slice::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(ParseError::NotAnObject),
        Err(_) => Err(ParseError::NotJson),
    }
}

fn extract_metrics(obj: &Map<String, Value>) -> Vec<Update> {
    let mut out: Vec<Update> = Vec::new();
    for (key, value) in obj {
        let Some(name) = MetricName::from_key(key) else {
            continue;
        };
        let value = match value {
            Value::Number(n) => match n.as_f64() {
                Some(f) => MetricValue::Number(f),
                None => continue,
            },
            Value::String(s) => MetricValue::Text(s.clone()),
            _ => continue,
        };
        // `Map` iterates in byte order, so of "CPU" and "cpu" the lowercase key wins.
        out.retain(|u| !matches!(u, Update::Metric(n, _) if *n == name));
        out.push(Update::Metric(name, value));
    }
    out
}

fn extract_sensor(obj: &Map<String, Value>) -> Result<Vec<Update>, ParseError> {
    let fields = match obj.get("data") {
        Some(Value::Object(inner)) => inner,
        _ => obj,
    };
    // The id may sit beside `data` rather than inside it.
    let id = [fields, obj]
        .iter()
        .find_map(|m| match m.get("id") {
            Some(Value::String(s)) if !s.trim().is_empty() => Some(clean_identifier(s.trim())),
            _ => None,
        })
        .ok_or(ParseError::MissingId)?;

    let temp = find_field(fields, &TEMP_FIELDS);
    let humidity = find_field(fields, &HUMIDITY_FIELDS);

    let mut records = Vec::new();
    if let Some(v) = temp {
        records.push(make_record(&id, value_text(v), TEMP_UNIT));
    }
    if let Some(v) = humidity {
        records.push(make_record(&id, value_text(v), HUMIDITY_UNIT));
    }
    if records.is_empty() {
        let unit = match fields.get("unit") {
            Some(Value::String(u)) => u.trim(),
            _ => "",
        };
        let value = fields.get("value").and_then(value_text);
        records.push(make_record(&id, value, unit));
    }
    Ok(records.into_iter().map(Update::Sensor).collect())
}

/// First field whose name matches one of `names`, ignoring ASCII case.
fn find_field<'a>(fields: &'a Map<String, Value>, names: &[&str]) -> Option<&'a Value> {
    names.iter().find_map(|name| {
        fields
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    })
}

/// Scalar JSON → display text.  `null`, arrays and objects are unusable.
fn value_text(v: &Value) -> Option<String> {
    match v {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_owned()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn make_record(id: &str, value: Option<String>, unit: &str) -> NormalizedRecord {
    NormalizedRecord {
        key: sensor_key(id, unit),
        display_label: display_label(id),
        display_value: match value {
            Some(v) if unit.is_empty() => v,
            Some(v) => format!("{} {}", v, unit),
            None => NO_DATA.to_owned(),
        },
    }
}

/// Strip a trailing hardware serial (one-wire ROM code and similar).
///
/// `Sensor_DS18B20_28a09eb3913cd838` → `Sensor_DS18B20`.  Identifiers
/// without such a suffix pass through untouched.
pub fn clean_identifier(raw: &str) -> String {
    let segments: Vec<&str> = raw.split('_').collect();
    match segments.split_last() {
        Some((last, rest)) if !rest.is_empty() && is_hardware_serial(last) => {
            let base = rest.iter().take(2).copied().collect::<Vec<_>>().join("_");
            // `_28a09eb3913cd838` alone: keep the serial rather than an empty id.
            if base.is_empty() { raw.to_owned() } else { base }
        }
        _ => raw.to_owned(),
    }
}

fn is_hardware_serial(segment: &str) -> bool {
    segment.len() >= MIN_SERIAL_LEN && segment.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Stable key: identifier plus unit, so temperature and humidity from one
/// device never collide.
pub fn sensor_key(id: &str, unit: &str) -> String {
    let unit: String = unit.chars().filter(|&c| c != '°').collect();
    if unit.is_empty() { id.to_owned() } else { format!("{}_{}", id, unit) }
}

/// `Sensor_DS18B20` → `DS18B20`, `DHT11_Indoor` → `DHT11 Indoor`.
pub fn display_label(id: &str) -> String {
    id.strip_prefix("Sensor_").unwrap_or(id).replace('_', " ")
}
