//! Device identity derived from the ESP32 factory MAC address.
//!
//! Used as the MQTT client id when none is configured.  The id has the
//! form `statusdeck-xxyyzz` (last 3 MAC bytes, lowercase hex), which is
//! stable across reboots and well inside the 23-byte limit that MQTT 3.1.1
//! brokers are required to accept.

use core::fmt::Write;

/// Longest client id every 3.1.1 broker must accept.
pub const MAX_CLIENT_ID_LEN: usize = 23;

/// Fixed-capacity client id string.
pub type ClientIdString = heapless::String<MAX_CLIENT_ID_LEN>;

/// Full 6-byte MAC address.
pub type MacAddress = [u8; 6];

const CLIENT_ID_PREFIX: &str = "statusdeck-";

/// Read the factory MAC address from eFuse.
#[cfg(target_os = "espidf")]
pub fn read_mac() -> MacAddress {
    let mut mac: MacAddress = [0u8; 6];
    // SAFETY: the buffer is exactly the 6 bytes the call writes.
    unsafe {
        esp_idf_svc::sys::esp_efuse_mac_get_default(mac.as_mut_ptr());
    }
    mac
}

/// Simulation: returns a deterministic fake MAC.
#[cfg(not(target_os = "espidf"))]
pub fn read_mac() -> MacAddress {
    [0xDE, 0xAD, 0xBE, 0xEF, 0xCA, 0xFE]
}

/// Derive the client id from the last 3 MAC bytes.
/// Format: `statusdeck-xxyyzz` (e.g., `statusdeck-efcafe`).
pub fn client_id(mac: &MacAddress) -> ClientIdString {
    let mut id = ClientIdString::new();
    // 17 bytes always fit.
    let _ = write!(id, "{}{:02x}{:02x}{:02x}", CLIENT_ID_PREFIX, mac[3], mac[4], mac[5]);
    id
}

/// Pick the configured client id, or fall back to the MAC-derived one.
///
/// A configured id that is blank or longer than [`MAX_CLIENT_ID_LEN`] is
/// ignored with a warning.
pub fn resolve_client_id(configured: Option<&str>, mac: &MacAddress) -> String {
    match configured.map(str::trim) {
        Some(id) if !id.is_empty() && id.len() <= MAX_CLIENT_ID_LEN => String::from(id),
        Some(id) if !id.is_empty() => {
            log::warn!(
                "DeviceId: configured client id '{}' exceeds {} bytes, using MAC-derived id",
                id,
                MAX_CLIENT_ID_LEN
            );
            String::from(client_id(mac).as_str())
        }
        _ => String::from(client_id(mac).as_str()),
    }
}
