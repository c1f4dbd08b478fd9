//! StatusDeck firmware library.
//!
//! Exposes the connectivity, normalization and presentation modules for
//! integration testing and the device binary.  All ESP-IDF-specific code
//! is guarded by `#[cfg(target_os = "espidf")]` within each module.

#![deny(unused_must_use)]

pub mod adapters;
pub mod app;
pub mod config;
pub mod diagnostics;
pub mod drivers;
pub mod error;
pub mod mqtt;
pub mod scheduler;
pub mod screens;
pub mod telemetry;
