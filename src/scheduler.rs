//! Presentation scheduler: the single top-level loop.
//!
//! ```text
//! ┌──────────────────────────────── cycle ─────────────────────────────────┐
//! │ show(screen)                                                           │
//! │   ┌──────────────────────── iteration × ticks_per_screen ────────────┐ │
//! │   │ 1. feed watchdog                                                 │ │
//! │   │ 2. connected ? check_messages() : poll_reconnect()               │ │
//! │   │ 3. every ping_interval_ticks: ping()                             │ │
//! │   │ 4. refresh active screen from store snapshot, draw if changed    │ │
//! │   │ 5. delay tick_interval_ms                                        │ │
//! │   └──────────────────────────────────────────────────────────────────┘ │
//! │ advance rotation · compact buffers · log heap                          │
//! └────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Network faults are absorbed here: the supervisor has already moved to
//! `Faulted` and will be retried on a later tick.  Anything else (display
//! failure, configuration) leaves [`PresentationScheduler::run`] so that
//! `main` can reset the chip.

use embedded_hal::delay::DelayNs;
use log::{debug, error, info, warn};

use crate::app::ports::{DisplayPort, LivenessGuard};
use crate::config::SystemConfig;
use crate::diagnostics::HeapStats;
use crate::error::{Error, Result};
use crate::mqtt::{ConnectionSupervisor, Connector};
use crate::screens::{ScreenDeck, ScreenId};
use crate::telemetry::SharedStore;

// ═══════════════════════════════════════════════════════════════
//  Scheduler
// ═══════════════════════════════════════════════════════════════

pub struct PresentationScheduler<C, G, D, Dl>
where
    C: Connector,
    G: LivenessGuard,
    D: DisplayPort,
    Dl: DelayNs,
{
    supervisor: ConnectionSupervisor<C>,
    store: SharedStore,
    deck: ScreenDeck,
    guard: G,
    display: D,
    delay: Dl,

    ticks_per_screen: u32,
    tick_interval_ms: u32,
    ping_interval_ticks: u32,

    /// Iterations since boot.
    tick: u64,
    /// Completed screen cycles since boot.
    cycles: u32,
}

impl<C, G, D, Dl> PresentationScheduler<C, G, D, Dl>
where
    C: Connector,
    G: LivenessGuard,
    D: DisplayPort,
    Dl: DelayNs,
{
    pub fn new(
        supervisor: ConnectionSupervisor<C>,
        store: SharedStore,
        guard: G,
        display: D,
        delay: Dl,
        cfg: &SystemConfig,
    ) -> Self {
        Self {
            supervisor,
            store,
            deck: ScreenDeck::new(&cfg.screen_rotation),
            guard,
            display,
            delay,
            ticks_per_screen: cfg.ticks_per_screen.max(1),
            tick_interval_ms: cfg.tick_interval_ms,
            ping_interval_ticks: cfg.ping_interval_ticks.max(1),
            tick: 0,
            cycles: 0,
        }
    }

    pub fn supervisor(&self) -> &ConnectionSupervisor<C> {
        &self.supervisor
    }

    pub fn guard(&self) -> &G {
        &self.guard
    }

    pub fn display(&self) -> &D {
        &self.display
    }

    pub fn active_screen(&self) -> ScreenId {
        self.deck.active()
    }

    pub fn ticks(&self) -> u64 {
        self.tick
    }

    pub fn cycles(&self) -> u32 {
        self.cycles
    }

    /// First broker connect at boot.  The caller resets the chip on failure.
    pub fn connect_initial(&mut self) -> Result<()> {
        self.guard.feed();
        self.supervisor.connect(&mut self.guard)
    }

    // ── Loop ─────────────────────────────────────────────────────

    /// Run cycles until a non-recoverable error occurs, then return it.
    pub fn run(&mut self) -> Error {
        info!(
            "Scheduler: running ({} ticks x {} ms per screen, ping every {} ticks)",
            self.ticks_per_screen, self.tick_interval_ms, self.ping_interval_ticks
        );
        loop {
            match self.run_cycle() {
                Ok(()) => {}
                Err(e) if e.is_recoverable() => warn!("Scheduler: cycle error: {}", e),
                Err(e) => {
                    error!("Scheduler: fatal: {}", e);
                    return e;
                }
            }
        }
    }

    /// One full screen: show, iterate, rotate, compact.
    pub fn run_cycle(&mut self) -> Result<()> {
        let screen = self.deck.active();
        self.display.show(screen)?;
        debug!("Scheduler: showing {}", screen.title());

        for _ in 0..self.ticks_per_screen {
            self.run_iteration()?;
        }

        let next = self.deck.advance();
        self.supervisor.compact();
        self.cycles = self.cycles.wrapping_add(1);

        let heap = HeapStats::collect();
        let stats = self.supervisor.stats();
        info!(
            "Scheduler: cycle {} done, next {} | heap free {} (min {}) | msgs={} listener_errs={} connects={}/{} hidden_sensors={}",
            self.cycles,
            next.title(),
            heap.free,
            heap.min_free,
            stats.messages_dispatched,
            stats.listener_errors,
            stats.connects,
            stats.connect_attempts,
            self.deck.hidden_sensors(),
        );
        Ok(())
    }

    /// One tick.  Only non-recoverable errors are returned.
    pub fn run_iteration(&mut self) -> Result<()> {
        self.guard.feed();
        self.tick = self.tick.wrapping_add(1);

        let network = if self.supervisor.is_connected() {
            self.supervisor.check_messages().map(|n| {
                if n > 0 {
                    debug!("Scheduler: {} message(s) dispatched", n);
                }
            })
        } else {
            self.supervisor.poll_reconnect(&mut self.guard).map(|_| ())
        };
        absorb(network)?;

        if self.tick % u64::from(self.ping_interval_ticks) == 0 && self.supervisor.is_connected() {
            absorb(self.supervisor.ping())?;
        }

        self.refresh()?;
        self.delay.delay_ms(self.tick_interval_ms);
        Ok(())
    }

    fn refresh(&mut self) -> Result<()> {
        let link_up = self.supervisor.is_connected();
        let frame = match self.store.try_borrow() {
            Ok(store) => self.deck.refresh(&store.snapshot(), link_up),
            Err(_) => {
                debug!("Scheduler: store busy, skipping refresh");
                None
            }
        };
        if let Some(frame) = frame {
            self.display.draw(&frame)?;
        }
        Ok(())
    }
}

/// Log and swallow recoverable errors.
fn absorb(result: Result<()>) -> Result<()> {
    match result {
        Err(e) if e.is_recoverable() => {
            warn!("Scheduler: {}", e);
            Ok(())
        }
        other => other,
    }
}

// ═══════════════════════════════════════════════════════════════
//  Tests
// ═══════════════════════════════════════════════════════════════
