//! Application boundary.
//!
//! The core (supervisor, normalizer, scheduler) talks to hardware only
//! through the **port traits** defined in [`ports`], keeping it fully
//! testable without real peripherals.

pub mod ports;
