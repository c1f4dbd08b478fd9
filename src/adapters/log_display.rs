//! Log-based display adapter.
//!
//! Implements [`DisplayPort`] by writing every frame to the serial console.
//! Used for headless builds and the host simulation; a panel driver would
//! implement the same trait.

use log::info;

use crate::app::ports::DisplayPort;
use crate::error::DisplayError;
use crate::screens::{Frame, ScreenId};

/// Width of the ASCII bar drawn for bar rows.
const BAR_WIDTH: usize = 20;

/// Adapter that logs every shown screen and painted frame.
#[derive(Debug, Default)]
pub struct LogDisplay {
    active: Option<ScreenId>,
    frames_drawn: u32,
}

impl LogDisplay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active(&self) -> Option<ScreenId> {
        self.active
    }

    pub fn frames_drawn(&self) -> u32 {
        self.frames_drawn
    }
}

fn bar(percent: u8) -> String {
    let filled = usize::from(percent.min(100)) * BAR_WIDTH / 100;
    let mut s = String::with_capacity(BAR_WIDTH + 2);
    s.push('[');
    (0..BAR_WIDTH).for_each(|i| s.push(if i < filled { '#' } else { '.' }));
    s.push(']');
    s
}

impl DisplayPort for LogDisplay {
    fn show(&mut self, screen: ScreenId) -> Result<(), DisplayError> {
        self.active = Some(screen);
        info!("SCREEN | {}", screen.title());
        Ok(())
    }

    fn draw(&mut self, frame: &Frame) -> Result<(), DisplayError> {
        if self.active != Some(frame.screen) {
            return Err(DisplayError::UnknownScreen);
        }
        self.frames_drawn = self.frames_drawn.wrapping_add(1);
        info!(
            "FRAME | {} | link={}",
            frame.title,
            if frame.link_up { "UP" } else { "DOWN" }
        );
        for row in &frame.rows {
            match row.bar {
                Some(p) => info!("  {:<16} {:>10} {}", row.label, row.value, bar(p)),
                None => info!("  {:<16} {:>10}", row.label, row.value),
            }
        }
        if let Some(footer) = &frame.footer {
            info!("  {}", footer);
        }
        Ok(())
    }
}
