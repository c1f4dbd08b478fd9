//! WiFi station join, run once at boot before the broker connect.
//!
//! ## cfg gating
//!
//! - **`target_os = "espidf"`**: `esp_idf_svc::wifi::BlockingWifi` over the
//!   modem peripheral.
//! - **all other targets**: the host network is assumed up; only the
//!   credential checks run.
//!
//! Credentials are injected at build time (`STATUSDECK_WIFI_SSID`,
//! `STATUSDECK_WIFI_PASSWORD`); there is no provisioning flow.

use core::fmt;

use log::info;
#[cfg(target_os = "espidf")]
use log::warn;

use crate::app::ports::LivenessGuard;

/// Join attempts before giving up and letting the caller reset.
pub const JOIN_ATTEMPTS: u32 = 5;

// ───────────────────────────────────────────────────────────────
// Errors
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WifiError {
    NoCredentials,
    InvalidSsid,
    InvalidPassword,
    ConnectionFailed,
}

impl fmt::Display for WifiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoCredentials => write!(f, "no WiFi credentials configured"),
            Self::InvalidSsid => write!(f, "SSID invalid (must be 1-32 printable ASCII bytes)"),
            Self::InvalidPassword => write!(f, "password invalid (must be 8-64 bytes for WPA2, or empty for open)"),
            Self::ConnectionFailed => write!(f, "WiFi connection failed"),
        }
    }
}

impl std::error::Error for WifiError {}

// ───────────────────────────────────────────────────────────────
// Credentials
// ───────────────────────────────────────────────────────────────

fn is_printable_ascii(s: &str) -> bool {
    s.bytes().all(|b| (0x20..=0x7E).contains(&b))
}

fn validate_ssid(ssid: &str) -> Result<(), WifiError> {
    if ssid.is_empty() || ssid.len() > 32 || !is_printable_ascii(ssid) {
        return Err(WifiError::InvalidSsid);
    }
    Ok(())
}

fn validate_password(password: &str) -> Result<(), WifiError> {
    if password.is_empty() {
        return Ok(());
    }
    if password.len() < 8 || password.len() > 64 {
        return Err(WifiError::InvalidPassword);
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WifiCredentials {
    pub ssid: heapless::String<32>,
    pub password: heapless::String<64>,
}

impl WifiCredentials {
    pub fn new(ssid: &str, password: &str) -> Result<Self, WifiError> {
        validate_ssid(ssid)?;
        validate_password(password)?;
        let mut creds = Self { ssid: heapless::String::new(), password: heapless::String::new() };
        creds.ssid.push_str(ssid).map_err(|()| WifiError::InvalidSsid)?;
        creds.password.push_str(password).map_err(|()| WifiError::InvalidPassword)?;
        Ok(creds)
    }

    /// Credentials baked in at build time.
    pub fn from_build_env() -> Result<Self, WifiError> {
        let ssid = option_env!("STATUSDECK_WIFI_SSID").ok_or(WifiError::NoCredentials)?;
        Self::new(ssid, option_env!("STATUSDECK_WIFI_PASSWORD").unwrap_or(""))
    }

    pub fn is_open(&self) -> bool {
        self.password.is_empty()
    }
}

// ───────────────────────────────────────────────────────────────
// Join
// ───────────────────────────────────────────────────────────────

#[cfg(target_os = "espidf")]
pub type WifiHandle = esp_idf_svc::wifi::BlockingWifi<esp_idf_svc::wifi::EspWifi<'static>>;

/// Start the station and block until the interface has an address.
///
/// The guard is fed before every step; each step is bounded by the IDF
/// driver's own timeouts.
#[cfg(target_os = "espidf")]
pub fn join<G: LivenessGuard>(
    modem: esp_idf_hal::modem::Modem,
    sysloop: esp_idf_svc::eventloop::EspSystemEventLoop,
    nvs: Option<esp_idf_svc::nvs::EspDefaultNvsPartition>,
    creds: &WifiCredentials,
    guard: &mut G,
) -> Result<WifiHandle, WifiError> {
    use esp_idf_svc::wifi::{AuthMethod, BlockingWifi, ClientConfiguration, Configuration, EspWifi};

    guard.feed();
    let esp_wifi = EspWifi::new(modem, sysloop.clone(), nvs).map_err(|e| {
        warn!("WiFi: driver init failed: {}", e);
        WifiError::ConnectionFailed
    })?;
    let mut wifi = BlockingWifi::wrap(esp_wifi, sysloop).map_err(|_| WifiError::ConnectionFailed)?;

    let auth_method = if creds.is_open() { AuthMethod::None } else { AuthMethod::WPA2Personal };
    wifi.set_configuration(&Configuration::Client(ClientConfiguration {
        ssid: creds.ssid.clone(),
        password: creds.password.clone(),
        auth_method,
        ..Default::default()
    }))
    .map_err(|_| WifiError::ConnectionFailed)?;
    wifi.start().map_err(|_| WifiError::ConnectionFailed)?;

    for attempt in 1..=JOIN_ATTEMPTS {
        guard.feed();
        info!("WiFi: connecting to '{}' (attempt {}/{})", creds.ssid, attempt, JOIN_ATTEMPTS);
        match wifi.connect() {
            Ok(()) => {
                guard.feed();
                wifi.wait_netif_up().map_err(|_| WifiError::ConnectionFailed)?;
                info!("WiFi: connected");
                return Ok(wifi);
            }
            Err(e) => warn!("WiFi: attempt {} failed: {}", attempt, e),
        }
    }
    Err(WifiError::ConnectionFailed)
}

/// Simulation: the host network is already up.
#[cfg(not(target_os = "espidf"))]
pub fn join<G: LivenessGuard>(creds: &WifiCredentials, guard: &mut G) -> Result<(), WifiError> {
    guard.feed();
    info!("WiFi(sim): assuming host network for '{}'", creds.ssid);
    Ok(())
}
