//! Telemetry pipeline: payload normalization and the display-ready store.

pub mod normalizer;
pub mod store;

pub use normalizer::{MetricName, MetricValue, NormalizedRecord, Normalizer, Update};
pub use store::{SharedStore, StoreListener, TelemetryStore, TelemetryView};
