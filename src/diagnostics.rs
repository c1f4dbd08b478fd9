//! Runtime diagnostics: panic logging and heap statistics.
//!
//! The device has no remote debugging, so the only post-mortem trail is the
//! serial log.  The panic hook makes sure the reason and location land there
//! before the TWDT or the panic handler resets the chip.

/// Heap usage snapshot, logged after every screen rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapStats {
    pub free: u32,
    pub min_free: u32,
}

impl HeapStats {
    #[cfg(target_os = "espidf")]
    pub fn collect() -> Self {
        use esp_idf_svc::sys::*;
        // SAFETY: plain counter reads, no allocation.
        let free = unsafe { esp_get_free_heap_size() };
        let min_free = unsafe { esp_get_minimum_free_heap_size() };
        Self { free, min_free }
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn collect() -> Self {
        // Synthetic values so the logging path runs on the host too.
        Self { free: 307_200, min_free: 261_120 }
    }
}

// ───────────────────────────────────────────────────────────────
// Custom panic handler
// ───────────────────────────────────────────────────────────────

/// Install a panic hook that logs the reason and source location.
///
/// Must be called once during init, after the logger is up.
pub fn install_panic_handler() {
    std::panic::set_hook(Box::new(|info| {
        let reason = panic_reason(info.payload());
        match info.location() {
            Some(loc) => log::error!("PANIC: {} at {}:{}", reason, loc.file(), loc.line()),
            None => log::error!("PANIC: {}", reason),
        }

        #[cfg(target_os = "espidf")]
        {
            // SAFETY: esp_timer_get_time is a simple RTC counter read with no
            // dynamic allocation, safe from panic context.
            let uptime = (unsafe { esp_idf_svc::sys::esp_timer_get_time() }) as u64 / 1_000_000;
            let heap = HeapStats::collect();
            log::error!("PANIC: uptime {} s, heap free {} (min {})", uptime, heap.free, heap.min_free);
        }
    }));
}

fn panic_reason(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "unknown panic"
    }
}
