//! Mock driven ports: watchdog, display and delay.
//!
//! Each one records its calls so tests can assert on the full history.

use std::cell::Cell;
use std::rc::Rc;

use embedded_hal::delay::DelayNs;
use statusdeck::app::ports::{DisplayPort, LivenessGuard};
use statusdeck::error::DisplayError;
use statusdeck::screens::{Frame, ScreenId};

// ── Guard ─────────────────────────────────────────────────────

/// Watchdog stand-in; the counter is shared so tests can read it while
/// the scheduler owns the guard.
#[derive(Clone, Default)]
pub struct CountingGuard {
    pub feeds: Rc<Cell<u64>>,
}

impl LivenessGuard for CountingGuard {
    fn feed(&mut self) {
        self.feeds.set(self.feeds.get() + 1);
    }
}

// ── Display ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum DisplayCall {
    Show(ScreenId),
    Draw(Frame),
}

#[derive(Default)]
pub struct RecordingDisplay {
    pub calls: Vec<DisplayCall>,
    /// Fail every draw from this call index on.
    pub fail_after: Option<usize>,
}

#[allow(dead_code)]
impl RecordingDisplay {
    pub fn frames(&self) -> Vec<&Frame> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                DisplayCall::Draw(f) => Some(f),
                DisplayCall::Show(_) => None,
            })
            .collect()
    }

    pub fn last_frame(&self) -> Option<&Frame> {
        self.frames().into_iter().last()
    }

    pub fn shown(&self) -> Vec<ScreenId> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                DisplayCall::Show(s) => Some(*s),
                DisplayCall::Draw(_) => None,
            })
            .collect()
    }
}

impl DisplayPort for RecordingDisplay {
    fn show(&mut self, screen: ScreenId) -> Result<(), DisplayError> {
        self.calls.push(DisplayCall::Show(screen));
        Ok(())
    }

    fn draw(&mut self, frame: &Frame) -> Result<(), DisplayError> {
        if self.fail_after.is_some_and(|n| self.calls.len() >= n) {
            return Err(DisplayError::Bus);
        }
        self.calls.push(DisplayCall::Draw(frame.clone()));
        Ok(())
    }
}

// ── Delay ─────────────────────────────────────────────────────

/// Returns immediately; counts requested time.
#[derive(Default)]
pub struct NoDelay {
    pub total_ns: u64,
}

impl DelayNs for NoDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.total_ns += u64::from(ns);
    }
}
