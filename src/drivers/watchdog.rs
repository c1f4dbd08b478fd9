//! Task Watchdog Timer (TWDT) driver.
//!
//! Wraps the ESP-IDF TWDT API to reset the device if the presentation
//! loop stalls for longer than the configured timeout.
//!
//! The loop must call `feed()` on every tick; the connection supervisor
//! also feeds between handshake steps.

#[cfg(target_os = "espidf")]
use esp_idf_svc::sys::*;

use log::info;

use crate::app::ports::LivenessGuard;

pub struct Watchdog {
    #[cfg(target_os = "espidf")]
    subscribed: bool,
    #[cfg(not(target_os = "espidf"))]
    feeds: u64,
}

impl Watchdog {
    /// Reconfigure the TWDT to `timeout_ms` and subscribe the current task.
    pub fn configure(timeout_ms: u32) -> Self {
        #[cfg(target_os = "espidf")]
        {
            let subscribed = subscribe_current_task(timeout_ms);
            Self { subscribed }
        }

        #[cfg(not(target_os = "espidf"))]
        {
            info!("Watchdog(sim): {} ms timeout, no-op", timeout_ms);
            Self { feeds: 0 }
        }
    }

    /// Number of feeds so far (simulation only).
    #[cfg(not(target_os = "espidf"))]
    pub fn feeds(&self) -> u64 {
        self.feeds
    }
}

/// Apply `timeout_ms` (panic on expiry) and add the calling task.
#[cfg(target_os = "espidf")]
fn subscribe_current_task(timeout_ms: u32) -> bool {
    let cfg = esp_task_wdt_config_t { timeout_ms, idle_core_mask: 0, trigger_panic: true };
    // SAFETY: `cfg` outlives the call; the IDF copies it.
    let ret = unsafe { esp_task_wdt_reconfigure(&cfg) };
    if ret != ESP_OK {
        log::warn!("Watchdog: reconfigure returned {} (TWDT may not be initialised yet)", ret);
    }
    // SAFETY: a null handle means the calling task.
    let ret = unsafe { esp_task_wdt_add(core::ptr::null_mut()) };
    if ret == ESP_OK {
        info!("Watchdog: subscribed ({} ms timeout, panic on trigger)", timeout_ms);
        true
    } else {
        log::warn!("Watchdog: failed to subscribe ({})", ret);
        false
    }
}

impl LivenessGuard for Watchdog {
    fn feed(&mut self) {
        #[cfg(target_os = "espidf")]
        {
            if self.subscribed {
                unsafe {
                    esp_task_wdt_reset();
                }
            }
        }

        #[cfg(not(target_os = "espidf"))]
        {
            self.feeds += 1;
        }
    }
}
