//! Presentation view models.
//!
//! Each screen turns a [`TelemetryView`] into a [`Frame`]: plain rows of
//! text (plus an optional 0–100 bar) that a [`DisplayPort`] backend can
//! lay out however it likes.  Screens report whether a refresh changed
//! anything so the scheduler only repaints when it has to.
//!
//! [`DisplayPort`]: crate::app::ports::DisplayPort

pub mod sensor_table;
pub mod system_monitor;

use serde::{Deserialize, Serialize};

pub use sensor_table::{MAX_SENSOR_ROWS, SensorTable};
pub use system_monitor::SystemMonitor;

use crate::telemetry::TelemetryView;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScreenId {
    Sensors,
    System,
}

impl ScreenId {
    pub fn title(self) -> &'static str {
        match self {
            Self::Sensors => "SENSORS",
            Self::System => "VPS STATUS",
        }
    }
}

/// One labelled line on a screen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FrameRow {
    pub label: String,
    pub value: String,
    /// Fill level 0–100 for bar widgets.
    pub bar: Option<u8>,
}

impl FrameRow {
    pub fn text(label: impl Into<String>, value: impl Into<String>) -> Self {
        Self { label: label.into(), value: value.into(), bar: None }
    }
}

/// Everything a backend needs to paint one screen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Frame {
    pub screen: ScreenId,
    pub title: &'static str,
    /// Broker link indicator.
    pub link_up: bool,
    pub rows: Vec<FrameRow>,
    pub footer: Option<String>,
}

/// Common behaviour of every screen.
pub trait Screen {
    /// Rebuild from `view`; true if the visible content changed.
    fn refresh(&mut self, view: &TelemetryView<'_>) -> bool;

    fn frame(&self, link_up: bool) -> Frame;
}

// ───────────────────────────────────────────────────────────────
// Screen deck (rotation + redraw bookkeeping)
// ───────────────────────────────────────────────────────────────

pub struct ScreenDeck {
    rotation: Vec<ScreenId>,
    position: usize,
    sensors: SensorTable,
    system: SystemMonitor,
    drawn_link: Option<bool>,
    dirty: bool,
}

impl ScreenDeck {
    /// `rotation` must not be empty (enforced by config validation); an
    /// empty list falls back to the sensor table alone.
    pub fn new(rotation: &[ScreenId]) -> Self {
        let rotation = if rotation.is_empty() { vec![ScreenId::Sensors] } else { rotation.to_vec() };
        Self {
            rotation,
            position: 0,
            sensors: SensorTable::new(),
            system: SystemMonitor::new(),
            drawn_link: None,
            dirty: true,
        }
    }

    pub fn active(&self) -> ScreenId {
        self.rotation[self.position]
    }

    /// Move to the next screen, wrapping at the end of the rotation.
    pub fn advance(&mut self) -> ScreenId {
        self.position = (self.position + 1) % self.rotation.len();
        self.dirty = true;
        self.active()
    }

    /// Refresh the active screen; returns a frame only when it must be repainted.
    pub fn refresh(&mut self, view: &TelemetryView<'_>, link_up: bool) -> Option<Frame> {
        let screen: &mut dyn Screen = match self.active() {
            ScreenId::Sensors => &mut self.sensors,
            ScreenId::System => &mut self.system,
        };
        let changed = screen.refresh(view);
        if !(changed || self.dirty || self.drawn_link != Some(link_up)) {
            return None;
        }
        let frame = screen.frame(link_up);
        self.dirty = false;
        self.drawn_link = Some(link_up);
        Some(frame)
    }

    /// Rows that did not fit on the sensor table.
    pub fn hidden_sensors(&self) -> usize {
        self.sensors.hidden()
    }
}
