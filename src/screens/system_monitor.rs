//! Host metrics screen: CPU / RAM / disk bars plus uptime.

use super::{Frame, FrameRow, Screen, ScreenId};
use crate::telemetry::{MetricName, MetricValue, TelemetryView};

const AWAITING: &str = "Awaiting data...";

const BARS: [(MetricName, &str); 3] = [
    (MetricName::Cpu, "CPU Usage"),
    (MetricName::Ram, "RAM Usage"),
    (MetricName::Disk, "Disk Usage"),
];

#[derive(Debug, Default)]
pub struct SystemMonitor {
    rows: Vec<FrameRow>,
    has_data: bool,
}

impl SystemMonitor {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Clamp a reported percentage to the bar range.
pub fn bar_percent(value: &MetricValue) -> u8 {
    match value.as_f64() {
        Some(v) if v.is_finite() => v.clamp(0.0, 100.0) as u8,
        _ => 0,
    }
}

/// Seconds → `"{d}d {h}h {m}m"` (or `"{h}h {m}m"` under a day).
/// Non-numeric values are echoed unchanged.
pub fn format_uptime(value: &MetricValue) -> String {
    let secs = match value {
        MetricValue::Number(n) if n.is_finite() && *n >= 0.0 => *n as u64,
        MetricValue::Text(t) => match t.trim().parse::<u64>() {
            Ok(s) => s,
            Err(_) => return t.clone(),
        },
        MetricValue::Number(n) => return n.to_string(),
    };
    let days = secs / 86_400;
    let hours = (secs % 86_400) / 3_600;
    let minutes = (secs % 3_600) / 60;
    if days > 0 {
        format!("{}d {}h {}m", days, hours, minutes)
    } else {
        format!("{}h {}m", hours, minutes)
    }
}

impl Screen for SystemMonitor {
    fn refresh(&mut self, view: &TelemetryView<'_>) -> bool {
        let mut rows = Vec::with_capacity(BARS.len() + 1);
        for (name, label) in BARS {
            let row = match view.metric(name) {
                Some(v) => {
                    let pct = bar_percent(v);
                    FrameRow { label: label.to_owned(), value: format!("{}%", pct), bar: Some(pct) }
                }
                None => FrameRow { label: label.to_owned(), value: String::from("--"), bar: Some(0) },
            };
            rows.push(row);
        }
        let uptime = view.metric(MetricName::Uptime).map_or_else(|| AWAITING.to_owned(), format_uptime);
        rows.push(FrameRow::text("System Uptime", uptime));

        let has_data = !view.metrics.is_empty();
        let changed = rows != self.rows || has_data != self.has_data;
        self.rows = rows;
        self.has_data = has_data;
        changed
    }

    fn frame(&self, link_up: bool) -> Frame {
        Frame {
            screen: ScreenId::System,
            title: ScreenId::System.title(),
            link_up,
            rows: self.rows.clone(),
            footer: (!self.has_data).then(|| AWAITING.to_owned()),
        }
    }
}
