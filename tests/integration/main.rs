//! Integration test driver for `tests/integration/` submodules.
//!
//! Each `mod` below maps to a file that exercises a specific subsystem
//! against mock adapters.  All tests run on the host (x86_64) with no
//! real hardware or broker required.

#![cfg(not(target_os = "espidf"))]

mod mock_broker;
mod mock_ports;
mod scheduler_tests;
mod supervisor_tests;
