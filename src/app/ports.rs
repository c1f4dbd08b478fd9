//! Port traits: the hexagonal boundary between the core loop and the outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ PresentationScheduler / ConnectionSupervisor
//! ```
//!
//! Driven adapters (watchdog, display backend) implement these traits.
//! The scheduler consumes them via generics, so the core never touches
//! hardware directly and the integration tests can count every call.
//!
//! The transport ports live next to the protocol code in
//! [`crate::mqtt::transport`].

use crate::error::DisplayError;
use crate::screens::{Frame, ScreenId};

// ───────────────────────────────────────────────────────────────
// Liveness guard (driven adapter: core → hardware watchdog)
// ───────────────────────────────────────────────────────────────

/// A countdown timer that hard-resets the device unless fed in time.
///
/// Configuration happens once at construction (see
/// [`Watchdog::configure`](crate::drivers::watchdog::Watchdog::configure));
/// afterwards the core only feeds it.
pub trait LivenessGuard {
    /// Restart the countdown.
    fn feed(&mut self);
}

impl<G: LivenessGuard + ?Sized> LivenessGuard for &mut G {
    fn feed(&mut self) {
        (**self).feed();
    }
}

// ───────────────────────────────────────────────────────────────
// Display port (driven adapter: core → panel / widget layer)
// ───────────────────────────────────────────────────────────────

/// Rendering backend.  Widget construction and pixel pushing happen behind
/// this trait; the core hands over finished view models only.
pub trait DisplayPort {
    /// Bring `screen` to the foreground.
    fn show(&mut self, screen: ScreenId) -> Result<(), DisplayError>;

    /// Repaint the active screen from `frame`.
    fn draw(&mut self, frame: &Frame) -> Result<(), DisplayError>;
}
