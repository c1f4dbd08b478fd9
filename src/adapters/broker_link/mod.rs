//! Broker link adapter: TCP (and on the device, TLS) transport to the
//! MQTT broker.
//!
//! Implements [`Connector`] and [`Transport`](crate::mqtt::Transport).
//!
//! ## cfg gating
//!
//! - **`target_os = "espidf"`**: std `TcpStream` over lwIP, optionally
//!   wrapped in an mbedTLS client session verified against the ESP-IDF
//!   certificate bundle.
//! - **all other targets**: std `TcpStream` in plaintext.  A TLS request is
//!   logged and served in plaintext for host-side testing.
//!
//! ## Connection model
//!
//! 1. `connect()` resolves the host, opens a socket bounded by the endpoint
//!    timeout and (if requested) completes the TLS handshake.
//! 2. Reads honour [`ReadMode`]: bounded-blocking during the MQTT handshake,
//!    non-blocking afterwards (`Ok(0)` when idle).
//! 3. Dropping the link closes the TLS session and the socket.

use std::io::{ErrorKind, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use log::{info, warn};

use crate::app::ports::LivenessGuard;
use crate::error::TransportError;
use crate::mqtt::transport::{Connector, Endpoint, ReadMode, Transport};

// ───────────────────────────────────────────────────────────────
// ESP-IDF platform helpers (mbedTLS client)
// ───────────────────────────────────────────────────────────────
#[cfg(target_os = "espidf")]
mod esp_tls;

/// Sleep between retries of a write that hit a full socket buffer.
const WRITE_RETRY_PAUSE: Duration = Duration::from_millis(1);

// ───────────────────────────────────────────────────────────────
// Plain TCP link
// ───────────────────────────────────────────────────────────────

pub struct TcpLink {
    stream: TcpStream,
    mode: ReadMode,
    write_timeout: Duration,
}

impl TcpLink {
    pub fn new(stream: TcpStream, write_timeout: Duration) -> Self {
        Self {
            stream,
            mode: ReadMode::NonBlocking,
            write_timeout,
        }
    }
}

impl Transport for TcpLink {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        match self.stream.read(buf) {
            Ok(0) => {
                info!("Broker(tcp): peer closed the connection");
                Err(TransportError::Closed)
            }
            Ok(n) => Ok(n),
            Err(e) if e.kind() == ErrorKind::Interrupted => Ok(0),
            Err(e) if e.kind() == ErrorKind::WouldBlock && self.mode == ReadMode::NonBlocking => Ok(0),
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                Err(TransportError::Timeout)
            }
            Err(e) => {
                warn!("Broker(tcp): read error: {}", e);
                Err(TransportError::Io)
            }
        }
    }

    fn write_all(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let deadline = Instant::now() + self.write_timeout;
        let mut sent = 0;
        while sent < data.len() {
            match self.stream.write(&data[sent..]) {
                Ok(0) => return Err(TransportError::Closed),
                Ok(n) => sent += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    if Instant::now() >= deadline {
                        return Err(TransportError::Timeout);
                    }
                    std::thread::sleep(WRITE_RETRY_PAUSE);
                }
                Err(e) => {
                    warn!("Broker(tcp): write error: {}", e);
                    return Err(TransportError::Io);
                }
            }
        }
        self.stream.flush().map_err(|_| TransportError::Io)
    }

    fn set_read_mode(&mut self, mode: ReadMode) -> Result<(), TransportError> {
        let applied = match mode {
            ReadMode::NonBlocking => self.stream.set_nonblocking(true),
            // A zero read timeout means "block forever" to std.
            ReadMode::Timeout(d) => self
                .stream
                .set_nonblocking(false)
                .and_then(|()| self.stream.set_read_timeout(Some(d.max(Duration::from_millis(1))))),
        };
        applied.map_err(|_| TransportError::Io)?;
        self.mode = mode;
        Ok(())
    }
}

// ───────────────────────────────────────────────────────────────
// BrokerLink (plain or TLS)
// ───────────────────────────────────────────────────────────────

pub enum BrokerLink {
    Plain(TcpLink),
    #[cfg(target_os = "espidf")]
    Tls(esp_tls::TlsLink),
}

impl Transport for BrokerLink {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        match self {
            Self::Plain(l) => l.read(buf),
            #[cfg(target_os = "espidf")]
            Self::Tls(l) => l.read(buf),
        }
    }

    fn write_all(&mut self, data: &[u8]) -> Result<(), TransportError> {
        match self {
            Self::Plain(l) => l.write_all(data),
            #[cfg(target_os = "espidf")]
            Self::Tls(l) => l.write_all(data),
        }
    }

    fn set_read_mode(&mut self, mode: ReadMode) -> Result<(), TransportError> {
        match self {
            Self::Plain(l) => l.set_read_mode(mode),
            #[cfg(target_os = "espidf")]
            Self::Tls(l) => l.set_read_mode(mode),
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Connector
// ───────────────────────────────────────────────────────────────

/// Opens a fresh [`BrokerLink`] per connect attempt.
#[derive(Debug, Default)]
pub struct TcpConnector;

impl TcpConnector {
    pub fn new() -> Self {
        Self
    }
}

impl Connector for TcpConnector {
    type Conn = BrokerLink;

    fn connect(&mut self, endpoint: &Endpoint, guard: &mut dyn LivenessGuard) -> Result<BrokerLink, TransportError> {
        guard.feed();
        // Blocking lookup with the resolver's own timeout; see [`crate::config::DNS_LOOKUP_BUDGET_MS`].
        let addr = (endpoint.host.as_str(), endpoint.port)
            .to_socket_addrs()
            .map_err(|e| {
                warn!("Broker: cannot resolve '{}': {}", endpoint.host, e);
                TransportError::Resolve
            })?
            .next()
            .ok_or(TransportError::Resolve)?;
        guard.feed();

        let stream = TcpStream::connect_timeout(&addr, endpoint.timeout).map_err(|e| {
            warn!("Broker: connect to {} failed: {}", addr, e);
            match e.kind() {
                ErrorKind::TimedOut | ErrorKind::WouldBlock => TransportError::Timeout,
                _ => TransportError::Io,
            }
        })?;
        if let Err(e) = stream.set_nodelay(true) {
            warn!("Broker: TCP_NODELAY not set: {}", e);
        }

        if endpoint.use_tls {
            guard.feed();
            #[cfg(target_os = "espidf")]
            {
                let link = esp_tls::TlsLink::handshake(stream, &endpoint.host, endpoint.timeout)?;
                info!("Broker(tls): session established with {}", addr);
                return Ok(BrokerLink::Tls(link));
            }
            #[cfg(not(target_os = "espidf"))]
            {
                warn!("Broker(sim): TLS requested, using plaintext");
            }
        }

        info!("Broker(tcp): connected to {}", addr);
        Ok(BrokerLink::Plain(TcpLink::new(stream, endpoint.timeout)))
    }
}

// ───────────────────────────────────────────────────────────────
// Tests (host / simulation path only)
// ───────────────────────────────────────────────────────────────
