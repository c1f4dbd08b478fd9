//! Sensor table: one row per normalized sensor key.
//!
//! Rows are assigned in first-seen order and never move afterwards, so a
//! sensor that stops reporting keeps its place (showing its last value).

use super::{Frame, FrameRow, Screen, ScreenId};
use crate::telemetry::TelemetryView;

/// Rows that fit on the panel.
pub const MAX_SENSOR_ROWS: usize = 12;

#[derive(Debug, Default)]
pub struct SensorTable {
    /// Keys in row order.
    order: Vec<String>,
    rows: Vec<FrameRow>,
    hidden: usize,
}

impl SensorTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sensors known to the store that did not get a row.
    pub fn hidden(&self) -> usize {
        self.hidden
    }
}

impl Screen for SensorTable {
    fn refresh(&mut self, view: &TelemetryView<'_>) -> bool {
        for key in view.sensors.keys() {
            if self.order.len() >= MAX_SENSOR_ROWS {
                break;
            }
            if !self.order.contains(key) {
                self.order.push(key.clone());
            }
        }

        let rows: Vec<FrameRow> = self
            .order
            .iter()
            .filter_map(|key| view.sensors.get(key))
            .map(|r| FrameRow::text(r.display_label.clone(), r.display_value.clone()))
            .collect();
        let hidden = view.sensors.len().saturating_sub(self.order.len());

        let changed = rows != self.rows || hidden != self.hidden;
        self.rows = rows;
        self.hidden = hidden;
        changed
    }

    fn frame(&self, link_up: bool) -> Frame {
        let footer = if self.rows.is_empty() {
            Some(String::from("Waiting for sensors..."))
        } else if self.hidden > 0 {
            Some(format!("+{} more", self.hidden))
        } else {
            None
        };
        Frame {
            screen: ScreenId::Sensors,
            title: ScreenId::Sensors.title(),
            link_up,
            rows: self.rows.clone(),
            footer,
        }
    }
}
