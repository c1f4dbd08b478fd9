//! Unified error types for the StatusDeck firmware.
//!
//! Every subsystem returns a small `Copy` error enum and converts into the
//! top-level [`Error`].  The presentation loop only ever asks one question
//! of an error: [`Error::is_recoverable`].  Recoverable errors (transport,
//! wire protocol, payload parsing, listener failures) are handled where they
//! occur and the loop carries on; anything else ends the loop and the device
//! restarts.

use core::fmt;

// ---------------------------------------------------------------------------
// Top-level firmware error
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Socket / TLS level failure.
    Transport(TransportError),
    /// The broker sent something we cannot interpret, or refused us.
    Protocol(ProtocolError),
    /// An inbound payload could not be normalized.
    Parse(ParseError),
    /// A registered message listener failed.
    Listener(ListenerError),
    /// Operation needs a live broker session.
    NotConnected,
    /// Outbound payload could not be serialised.
    Encode,
    /// The display backend failed.
    Display(DisplayError),
    /// Configuration is invalid.
    Config(&'static str),
}

impl Error {
    /// Whether the presentation loop may keep running after this error.
    ///
    /// Transport and protocol errors have already faulted the connection
    /// supervisor by the time they surface; parse and listener errors only
    /// cost a single message.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Transport(_)
                | Self::Protocol(_)
                | Self::Parse(_)
                | Self::Listener(_)
                | Self::NotConnected
                | Self::Encode
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "transport: {e}"),
            Self::Protocol(e) => write!(f, "protocol: {e}"),
            Self::Parse(e) => write!(f, "parse: {e}"),
            Self::Listener(e) => write!(f, "listener: {e}"),
            Self::NotConnected => write!(f, "not connected to broker"),
            Self::Encode => write!(f, "payload encoding failed"),
            Self::Display(e) => write!(f, "display: {e}"),
            Self::Config(msg) => write!(f, "config: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

// ---------------------------------------------------------------------------
// Transport errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    /// TCP or socket I/O failure.
    Io,
    /// TLS handshake or session error.
    Tls,
    /// A bounded wait expired (handshake reply, unanswered ping).
    Timeout,
    /// Peer closed the connection.
    Closed,
    /// Broker host name could not be resolved.
    Resolve,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io => write!(f, "TCP/socket I/O error"),
            Self::Tls => write!(f, "TLS handshake or session error"),
            Self::Timeout => write!(f, "timed out"),
            Self::Closed => write!(f, "connection closed by peer"),
            Self::Resolve => write!(f, "host name resolution failed"),
        }
    }
}

impl From<TransportError> for Error {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

// ---------------------------------------------------------------------------
// MQTT wire protocol errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    /// Packet bytes violate the MQTT 3.1.1 encoding rules.
    Malformed,
    /// Remaining length exceeds the decoder buffer.
    PacketTooLarge,
    /// A packet type that is not valid in this direction / state.
    UnexpectedPacket(u8),
    /// CONNACK carried a non-zero return code.
    ConnectionRefused(u8),
    /// SUBACK reported failure (0x80) for a filter.
    SubscriptionRejected,
    /// Topic or payload too long to encode.
    EncodeOverflow,
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed => write!(f, "malformed packet"),
            Self::PacketTooLarge => write!(f, "packet too large"),
            Self::UnexpectedPacket(t) => write!(f, "unexpected packet type {t}"),
            Self::ConnectionRefused(code) => {
                write!(f, "connection refused ({})", connack_reason(*code))
            }
            Self::SubscriptionRejected => write!(f, "subscription rejected"),
            Self::EncodeOverflow => write!(f, "field too long to encode"),
        }
    }
}

/// Human-readable CONNACK return code (MQTT 3.1.1 §3.2.2.3).
fn connack_reason(code: u8) -> &'static str {
    match code {
        1 => "unacceptable protocol version",
        2 => "identifier rejected",
        3 => "server unavailable",
        4 => "bad user name or password",
        5 => "not authorized",
        _ => "unknown return code",
    }
}

impl From<ProtocolError> for Error {
    fn from(e: ProtocolError) -> Self {
        Self::Protocol(e)
    }
}

/// Anything that breaks a live broker session.
///
/// Both variants fault the connection; they are kept apart only so the
/// log says which layer gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MqttError {
    Transport(TransportError),
    Protocol(ProtocolError),
}

impl fmt::Display for MqttError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "transport: {e}"),
            Self::Protocol(e) => write!(f, "protocol: {e}"),
        }
    }
}

impl From<TransportError> for MqttError {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

impl From<ProtocolError> for MqttError {
    fn from(e: ProtocolError) -> Self {
        Self::Protocol(e)
    }
}

impl From<MqttError> for Error {
    fn from(e: MqttError) -> Self {
        match e {
            MqttError::Transport(t) => Self::Transport(t),
            MqttError::Protocol(p) => Self::Protocol(p),
        }
    }
}

// ---------------------------------------------------------------------------
// Payload parse errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    /// Payload is not valid UTF-8 JSON.
    NotJson,
    /// Payload is JSON but not an object.
    NotAnObject,
    /// Sensor payload without a usable `id`.
    MissingId,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotJson => write!(f, "payload is not JSON"),
            Self::NotAnObject => write!(f, "payload is not a JSON object"),
            Self::MissingId => write!(f, "sensor payload has no id"),
        }
    }
}

impl From<ParseError> for Error {
    fn from(e: ParseError) -> Self {
        Self::Parse(e)
    }
}

// ---------------------------------------------------------------------------
// Listener errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerError {
    /// The payload failed normalization.
    Parse(ParseError),
    /// The telemetry store was already borrowed.
    StoreBusy,
    /// Listener-specific refusal.
    Rejected(&'static str),
}

impl fmt::Display for ListenerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parse(e) => write!(f, "{e}"),
            Self::StoreBusy => write!(f, "telemetry store busy"),
            Self::Rejected(msg) => write!(f, "rejected: {msg}"),
        }
    }
}

impl From<ParseError> for ListenerError {
    fn from(e: ParseError) -> Self {
        Self::Parse(e)
    }
}

impl From<ListenerError> for Error {
    fn from(e: ListenerError) -> Self {
        Self::Listener(e)
    }
}

// ---------------------------------------------------------------------------
// Display errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayError {
    /// The panel bus (SPI / parallel) reported a failure.
    Bus,
    /// The requested screen has not been registered with the backend.
    UnknownScreen,
}

impl fmt::Display for DisplayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bus => write!(f, "panel bus error"),
            Self::UnknownScreen => write!(f, "unknown screen"),
        }
    }
}

impl From<DisplayError> for Error {
    fn from(e: DisplayError) -> Self {
        Self::Display(e)
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Firmware-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
