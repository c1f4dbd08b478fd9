//! Hardware drivers: watchdog and chip reset.

pub mod reset;
pub mod watchdog;
