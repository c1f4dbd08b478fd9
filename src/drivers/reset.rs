//! Delayed software reset, the last line of defence after an
//! unclassified fault.
//!
//! The pause gives the UART time to drain the final log lines.  Nothing is
//! fed during the wait; if the watchdog fires first the outcome is the same.

use log::error;

/// Wait `delay_ms`, then restart the chip.
pub fn restart_after(delay_ms: u32, reason: &str) -> ! {
    error!("Reset: {}, restarting in {} ms", reason, delay_ms);

    #[cfg(target_os = "espidf")]
    {
        esp_idf_hal::delay::FreeRtos::delay_ms(delay_ms);
        esp_idf_hal::reset::restart();
    }

    #[cfg(not(target_os = "espidf"))]
    {
        std::thread::sleep(std::time::Duration::from_millis(u64::from(delay_ms)));
        // No hardware to reset; let the supervisor of the host process restart us.
        std::process::exit(1);
    }
}
