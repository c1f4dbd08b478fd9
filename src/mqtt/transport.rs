//! Transport abstraction: the byte stream under an MQTT session.
//!
//! Concrete implementations:
//! - TCP socket (std `TcpStream`, every target)
//! - TLS over TCP (ESP-TLS, device only)
//! - scripted in-memory broker (integration tests)
//!
//! The session is generic over `Transport` and the supervisor over
//! `Connector`, so neither knows which socket stack sits underneath.

use core::time::Duration;

use crate::app::ports::LivenessGuard;
use crate::config::SystemConfig;
use crate::error::TransportError;

/// How `Transport::read` behaves when no bytes are waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    /// Return `Ok(0)` immediately.
    NonBlocking,
    /// Block up to the given duration, then fail with `TransportError::Timeout`.
    Timeout(Duration),
}

/// Byte-oriented, connection-oriented channel.
///
/// Dropping the value closes the underlying socket.
pub trait Transport {
    /// Read up to `buf.len()` bytes into `buf`.
    /// Returns 0 if no data is available (non-blocking mode).
    /// A peer close is reported as `TransportError::Closed`, never as `Ok(0)`.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;

    /// Write all of `data` and flush it.
    fn write_all(&mut self, data: &[u8]) -> Result<(), TransportError>;

    /// Switch between bounded-blocking and non-blocking reads.
    fn set_read_mode(&mut self, mode: ReadMode) -> Result<(), TransportError>;
}

/// Where and how to reach the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
    /// Bound on connect and handshake waits.
    pub timeout: Duration,
}

impl Endpoint {
    pub fn from_config(cfg: &SystemConfig) -> Self {
        Self {
            host: cfg.broker_host.clone(),
            port: cfg.broker_port,
            use_tls: cfg.use_tls,
            timeout: Duration::from_millis(u64::from(cfg.socket_timeout_ms)),
        }
    }
}

/// Factory for fresh transports.
///
/// Every connect attempt gets a brand-new handle; nothing from a failed
/// session is ever reused.  Implementations feed `guard` between blocking
/// steps (lookup, TCP connect, TLS handshake).
pub trait Connector {
    type Conn: Transport;

    fn connect(&mut self, endpoint: &Endpoint, guard: &mut dyn LivenessGuard) -> Result<Self::Conn, TransportError>;
}
