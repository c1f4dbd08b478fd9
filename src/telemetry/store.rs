//! In-memory telemetry store and the listener that feeds it.
//!
//! Single writer (the [`StoreListener`] registered with the connection
//! supervisor), single reader at a time (the presentation scheduler).
//! Shared as `Rc<RefCell<_>>`; never borrowed across a dispatch.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use log::warn;

use super::normalizer::{MetricName, MetricValue, NormalizedRecord, Normalizer, Update};
use crate::error::ListenerError;
use crate::mqtt::supervisor::MessageListener;

/// Longest payload excerpt written to the log on a parse failure.
const LOG_PAYLOAD_MAX: usize = 96;

#[derive(Debug, Default)]
pub struct TelemetryStore {
    sensors: BTreeMap<String, NormalizedRecord>,
    metrics: BTreeMap<MetricName, MetricValue>,
    revision: u32,
}

/// Read-only view handed to the presentation layer.
#[derive(Debug, Clone, Copy)]
pub struct TelemetryView<'a> {
    pub sensors: &'a BTreeMap<String, NormalizedRecord>,
    pub metrics: &'a BTreeMap<MetricName, MetricValue>,
    /// Bumped on every mutation.
    pub revision: u32,
}

impl TelemetryView<'_> {
    pub fn metric(&self, name: MetricName) -> Option<&MetricValue> {
        self.metrics.get(&name)
    }
}

impl TelemetryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convenience constructor for the shared handle.
    pub fn shared() -> SharedStore {
        Rc::new(RefCell::new(Self::new()))
    }

    /// Upsert sensor records by key, last write wins.
    pub fn apply<I: IntoIterator<Item = NormalizedRecord>>(&mut self, records: I) {
        for record in records {
            self.sensors.insert(record.key.clone(), record);
            self.bump();
        }
    }

    pub fn apply_metric(&mut self, name: MetricName, value: MetricValue) {
        self.metrics.insert(name, value);
        self.bump();
    }

    /// Route one normalizer batch.
    pub fn apply_updates(&mut self, updates: Vec<Update>) {
        for update in updates {
            match update {
                Update::Sensor(record) => self.apply([record]),
                Update::Metric(name, value) => self.apply_metric(name, value),
            }
        }
    }

    pub fn snapshot(&self) -> TelemetryView<'_> {
        TelemetryView {
            sensors: &self.sensors,
            metrics: &self.metrics,
            revision: self.revision,
        }
    }

    pub fn revision(&self) -> u32 {
        self.revision
    }

    fn bump(&mut self) {
        self.revision = self.revision.wrapping_add(1);
    }
}

pub type SharedStore = Rc<RefCell<TelemetryStore>>;

// ───────────────────────────────────────────────────────────────
// Normalizing listener
// ───────────────────────────────────────────────────────────────

/// Normalizes every inbound message into the shared store.
pub struct StoreListener {
    normalizer: Normalizer,
    store: SharedStore,
}

impl StoreListener {
    pub fn new(normalizer: Normalizer, store: SharedStore) -> Self {
        Self { normalizer, store }
    }
}

impl MessageListener for StoreListener {
    fn on_message(&mut self, topic: &str, payload: &[u8]) -> Result<(), ListenerError> {
        let updates = match self.normalizer.try_normalize(topic, payload) {
            Ok(u) => u,
            Err(e) => {
                let excerpt = String::from_utf8_lossy(&payload[..payload.len().min(LOG_PAYLOAD_MAX)]);
                warn!("Telemetry: {} on '{}' | content: {}", e, topic, excerpt);
                return Err(e.into());
            }
        };
        if updates.is_empty() {
            return Ok(());
        }
        let mut store = self.store.try_borrow_mut().map_err(|_| ListenerError::StoreBusy)?;
        store.apply_updates(updates);
        Ok(())
    }
}
