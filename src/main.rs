//! StatusDeck firmware: main entry point.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                      Adapters (outer ring)                     │
//! │                                                                │
//! │  TcpConnector      LogDisplay      Watchdog       FreeRtos     │
//! │  (Connector)       (DisplayPort)   (Liveness)     (DelayNs)    │
//! │                                                                │
//! │  ──────────────── Port Trait Boundary ───────────────────      │
//! │                                                                │
//! │  ┌────────────────────────────────────────────────────────┐    │
//! │  │ ConnectionSupervisor ─▶ StoreListener ─▶ TelemetryStore│    │
//! │  └────────────────────────────────────────────────────────┘    │
//! │                                                                │
//! │  PresentationScheduler (single loop) · ScreenDeck              │
//! └────────────────────────────────────────────────────────────────┘
//! ```
#![deny(unused_must_use)]

use anyhow::{Context, Result};
use log::{error, info};

use esp_idf_hal::delay::FreeRtos;
use esp_idf_hal::peripherals::Peripherals;
use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::nvs::EspDefaultNvsPartition;

use statusdeck::adapters::broker_link::TcpConnector;
use statusdeck::adapters::device_id;
use statusdeck::adapters::log_display::LogDisplay;
use statusdeck::adapters::wifi::{self, WifiCredentials};
use statusdeck::config::SystemConfig;
use statusdeck::diagnostics;
use statusdeck::drivers::reset::restart_after;
use statusdeck::drivers::watchdog::Watchdog;
use statusdeck::error::Error;
use statusdeck::mqtt::ConnectionSupervisor;
use statusdeck::scheduler::PresentationScheduler;
use statusdeck::telemetry::{Normalizer, StoreListener, TelemetryStore};

/// Used when the configuration itself is unusable.
const BOOT_FAILURE_RESET_DELAY_MS: u32 = 5_000;

fn main() -> Result<()> {
    // ── 1. ESP-IDF bootstrap ──────────────────────────────────
    esp_idf_svc::sys::link_patches();
    esp_idf_logger::init()?;
    diagnostics::install_panic_handler();

    info!("╔══════════════════════════════════════╗");
    info!("║  StatusDeck v{}                      ║", env!("CARGO_PKG_VERSION"));
    info!("╚══════════════════════════════════════╝");

    // ── 2. Configuration ──────────────────────────────────────
    let config = match SystemConfig::from_build_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Config rejected: {}", Error::from(e));
            restart_after(BOOT_FAILURE_RESET_DELAY_MS, "invalid configuration");
        }
    };

    // ── 3. Watchdog ───────────────────────────────────────────
    let mut watchdog = Watchdog::configure(config.watchdog_timeout_ms);

    // ── 4. WiFi ───────────────────────────────────────────────
    let peripherals = Peripherals::take().context("peripherals already taken")?;
    let sysloop = EspSystemEventLoop::take().context("system event loop unavailable")?;
    let nvs = EspDefaultNvsPartition::take().ok();
    let creds = WifiCredentials::from_build_env().context("WiFi credentials")?;
    // Keep the driver alive for the lifetime of the program.
    let _wifi = match wifi::join(peripherals.modem, sysloop, nvs, &creds, &mut watchdog) {
        Ok(w) => w,
        Err(e) => restart_after(config.startup_reset_delay_ms, &format!("WiFi join failed: {}", e)),
    };

    // ── 5. Identity + pipeline ────────────────────────────────
    let configured = (!config.client_id.is_empty()).then_some(config.client_id.as_str());
    let client_id = device_id::resolve_client_id(configured, &device_id::read_mac());
    info!("Client ID: {} (status topic {})", client_id, config.status_topic(&client_id));

    let store = TelemetryStore::shared();
    let mut supervisor = ConnectionSupervisor::new(TcpConnector::new(), &config, &client_id);
    supervisor.add_listener(StoreListener::new(Normalizer::from_config(&config), store.clone()));

    let mut scheduler = PresentationScheduler::new(
        supervisor,
        store,
        watchdog,
        LogDisplay::new(),
        FreeRtos,
        &config,
    );

    // ── 6. Startup gate ───────────────────────────────────────
    if let Err(e) = scheduler.connect_initial() {
        restart_after(config.startup_reset_delay_ms, &format!("initial broker connect failed: {}", e));
    }

    info!("System ready. Entering presentation loop.");

    // ── 7. Presentation loop ──────────────────────────────────
    let fatal = scheduler.run();
    restart_after(config.fatal_reset_delay_ms, &format!("unrecoverable error: {}", fatal));
}
