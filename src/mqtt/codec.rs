//! MQTT 3.1.1 packet codec.
//!
//! Wire format of every control packet:
//! ```text
//! ┌──────────────────┬──────────────────────┬─────────────────────────┐
//! │ type(4) flags(4) │ remaining length     │ variable header+payload │
//! │ 1 byte           │ 1–4 bytes, base-128  │ N bytes                 │
//! └──────────────────┴──────────────────────┴─────────────────────────┘
//! ```
//!
//! [`PacketDecoder`] accumulates incoming bytes and yields complete
//! packets.  This handles partial reads gracefully: a single
//! `Transport::read` call may return part of the fixed header, part of
//! the payload, or several packets back to back.
//!
//! Both directions are implemented so the same codec can drive the
//! host-side broker simulation used by the integration tests.

use log::warn;

use crate::error::ProtocolError;

/// Largest packet the decoder buffers (protects against memory exhaustion).
pub const MAX_PACKET_SIZE: usize = 4096;

/// Largest value representable by the 4-byte remaining-length field.
const MAX_REMAINING_LENGTH: usize = 268_435_455;

const PROTOCOL_NAME: &[u8] = b"MQTT";
const PROTOCOL_LEVEL: u8 = 4;

// Packet type nibbles (§2.2.1).
const CONNECT: u8 = 1;
const CONNACK: u8 = 2;
const PUBLISH: u8 = 3;
const PUBACK: u8 = 4;
const SUBSCRIBE: u8 = 8;
const SUBACK: u8 = 9;
const PINGREQ: u8 = 12;
const PINGRESP: u8 = 13;
const DISCONNECT: u8 = 14;

// CONNECT flag bits (§3.1.2.3).
const FLAG_USERNAME: u8 = 0x80;
const FLAG_PASSWORD: u8 = 0x40;
const FLAG_WILL_RETAIN: u8 = 0x20;
const FLAG_WILL: u8 = 0x04;
const FLAG_CLEAN_SESSION: u8 = 0x02;

/// SUBACK return code for a refused filter.
pub const SUBACK_FAILURE: u8 = 0x80;

// ───────────────────────────────────────────────────────────────
// Packet model
// ───────────────────────────────────────────────────────────────

/// Message the broker publishes on our behalf after an unclean disconnect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastWill {
    pub topic: String,
    pub message: Vec<u8>,
    pub retain: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connect {
    pub client_id: String,
    pub keepalive_secs: u16,
    pub clean_session: bool,
    pub username: Option<String>,
    pub password: Option<String>,
    pub will: Option<LastWill>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publish {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: u8,
    pub retain: bool,
    /// Present only for QoS 1/2.
    pub packet_id: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Connect(Connect),
    ConnAck { session_present: bool, return_code: u8 },
    Publish(Publish),
    PubAck { packet_id: u16 },
    Subscribe { packet_id: u16, filters: Vec<(String, u8)> },
    SubAck { packet_id: u16, return_codes: Vec<u8> },
    PingReq,
    PingResp,
    Disconnect,
}

impl Packet {
    /// Control packet type nibble.
    pub fn type_code(&self) -> u8 {
        match self {
            Self::Connect(_) => CONNECT,
            Self::ConnAck { .. } => CONNACK,
            Self::Publish(_) => PUBLISH,
            Self::PubAck { .. } => PUBACK,
            Self::Subscribe { .. } => SUBSCRIBE,
            Self::SubAck { .. } => SUBACK,
            Self::PingReq => PINGREQ,
            Self::PingResp => PINGRESP,
            Self::Disconnect => DISCONNECT,
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Encoding
// ───────────────────────────────────────────────────────────────

/// Append the wire encoding of `packet` to `out`.
pub fn encode(packet: &Packet, out: &mut Vec<u8>) -> Result<(), ProtocolError> {
    let mut body = Vec::new();
    let first_byte = match packet {
        Packet::Connect(c) => {
            put_binary(&mut body, PROTOCOL_NAME)?;
            body.push(PROTOCOL_LEVEL);
            let mut flags = 0u8;
            if c.clean_session {
                flags |= FLAG_CLEAN_SESSION;
            }
            if let Some(will) = &c.will {
                flags |= FLAG_WILL;
                if will.retain {
                    flags |= FLAG_WILL_RETAIN;
                }
            }
            if c.username.is_some() {
                flags |= FLAG_USERNAME;
            }
            if c.password.is_some() {
                flags |= FLAG_PASSWORD;
            }
            body.push(flags);
            body.extend_from_slice(&c.keepalive_secs.to_be_bytes());
            put_binary(&mut body, c.client_id.as_bytes())?;
            if let Some(will) = &c.will {
                put_binary(&mut body, will.topic.as_bytes())?;
                put_binary(&mut body, &will.message)?;
            }
            if let Some(user) = &c.username {
                put_binary(&mut body, user.as_bytes())?;
            }
            if let Some(pass) = &c.password {
                put_binary(&mut body, pass.as_bytes())?;
            }
            CONNECT << 4
        }
        Packet::ConnAck { session_present, return_code } => {
            body.push(u8::from(*session_present));
            body.push(*return_code);
            CONNACK << 4
        }
        Packet::Publish(p) => {
            if p.qos > 2 || (p.qos > 0) != p.packet_id.is_some() {
                return Err(ProtocolError::Malformed);
            }
            put_binary(&mut body, p.topic.as_bytes())?;
            if let Some(id) = p.packet_id {
                body.extend_from_slice(&id.to_be_bytes());
            }
            body.extend_from_slice(&p.payload);
            (PUBLISH << 4) | (p.qos << 1) | u8::from(p.retain)
        }
        Packet::PubAck { packet_id } => {
            body.extend_from_slice(&packet_id.to_be_bytes());
            PUBACK << 4
        }
        Packet::Subscribe { packet_id, filters } => {
            body.extend_from_slice(&packet_id.to_be_bytes());
            for (filter, qos) in filters {
                put_binary(&mut body, filter.as_bytes())?;
                body.push(*qos);
            }
            (SUBSCRIBE << 4) | 0b0010
        }
        Packet::SubAck { packet_id, return_codes } => {
            body.extend_from_slice(&packet_id.to_be_bytes());
            body.extend_from_slice(return_codes);
            SUBACK << 4
        }
        Packet::PingReq => PINGREQ << 4,
        Packet::PingResp => PINGRESP << 4,
        Packet::Disconnect => DISCONNECT << 4,
    };

    out.push(first_byte);
    encode_remaining_length(body.len(), out)?;
    out.extend_from_slice(&body);
    Ok(())
}

/// Convenience wrapper returning a fresh buffer.
pub fn to_bytes(packet: &Packet) -> Result<Vec<u8>, ProtocolError> {
    let mut out = Vec::new();
    encode(packet, &mut out)?;
    Ok(out)
}

/// Base-128 variable length encoding (§2.2.3).
pub fn encode_remaining_length(mut len: usize, out: &mut Vec<u8>) -> Result<(), ProtocolError> {
    if len > MAX_REMAINING_LENGTH {
        return Err(ProtocolError::EncodeOverflow);
    }
    loop {
        let mut byte = (len % 128) as u8;
        len /= 128;
        if len > 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if len == 0 {
            return Ok(());
        }
    }
}

fn put_binary(out: &mut Vec<u8>, data: &[u8]) -> Result<(), ProtocolError> {
    let len = u16::try_from(data.len()).map_err(|_| ProtocolError::EncodeOverflow)?;
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(data);
    Ok(())
}

// ───────────────────────────────────────────────────────────────
// Decoding
// ───────────────────────────────────────────────────────────────

/// Result of scanning the remaining-length field.
enum LengthScan {
    /// More bytes needed.
    Incomplete,
    /// `(remaining_length, bytes_used_by_field)`.
    Complete(usize, usize),
}

fn scan_remaining_length(bytes: &[u8]) -> Result<LengthScan, ProtocolError> {
    let mut value = 0usize;
    let mut multiplier = 1usize;
    for (i, byte) in bytes.iter().enumerate() {
        if i == 4 {
            return Err(ProtocolError::Malformed);
        }
        value += (byte & 0x7F) as usize * multiplier;
        if byte & 0x80 == 0 {
            return Ok(LengthScan::Complete(value, i + 1));
        }
        multiplier *= 128;
    }
    if bytes.len() >= 4 {
        return Err(ProtocolError::Malformed);
    }
    Ok(LengthScan::Incomplete)
}

/// Streaming packet decoder.
///
/// A PUBLISH larger than the limit is discarded byte by byte as it
/// arrives; the stream stays aligned and the next packet decodes normally.
pub struct PacketDecoder {
    buf: Vec<u8>,
    max_packet: usize,
    /// Bytes of an oversize publish still to be thrown away.
    skip: usize,
    dropped: u32,
}

impl Default for PacketDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketDecoder {
    pub fn new() -> Self {
        Self::with_limit(MAX_PACKET_SIZE)
    }

    /// Decoder that refuses packets whose remaining length exceeds `max_packet`.
    pub fn with_limit(max_packet: usize) -> Self {
        Self { buf: Vec::new(), max_packet, skip: 0, dropped: 0 }
    }

    /// Append raw bytes from the transport.
    pub fn feed(&mut self, data: &[u8]) {
        let discard = self.skip.min(data.len());
        self.skip -= discard;
        self.buf.extend_from_slice(&data[discard..]);
    }

    /// Pop the next complete packet, if one is buffered.
    ///
    /// On error the buffer is discarded: the stream position is lost and
    /// the session has to be re-established anyway.
    pub fn next_packet(&mut self) -> Result<Option<Packet>, ProtocolError> {
        loop {
            if self.skip > 0 {
                let discard = self.skip.min(self.buf.len());
                self.buf.drain(..discard);
                self.skip -= discard;
                if self.skip > 0 {
                    return Ok(None);
                }
            }
            if self.buf.len() < 2 {
                return Ok(None);
            }
            let (remaining, field_len) = match scan_remaining_length(&self.buf[1..]) {
                Ok(LengthScan::Incomplete) => return Ok(None),
                Ok(LengthScan::Complete(r, n)) => (r, n),
                Err(e) => {
                    self.reset();
                    return Err(e);
                }
            };
            let header_len = 1 + field_len;
            if remaining > self.max_packet {
                if self.buf[0] >> 4 != PUBLISH {
                    self.reset();
                    return Err(ProtocolError::PacketTooLarge);
                }
                warn!(
                    "MQTT: dropping {} byte publish (limit {})",
                    remaining, self.max_packet
                );
                self.skip = header_len + remaining;
                self.dropped = self.dropped.wrapping_add(1);
                continue;
            }
            let total = header_len + remaining;
            if self.buf.len() < total {
                return Ok(None);
            }

            let first_byte = self.buf[0];
            let result = decode_body(first_byte, &self.buf[header_len..total]);
            self.buf.drain(..total);
            if result.is_err() {
                self.reset();
            }
            return result.map(Some);
        }
    }

    /// Bytes waiting for the rest of their packet.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// True while the tail of an oversize publish is still on the wire.
    pub fn is_discarding(&self) -> bool {
        self.skip > 0
    }

    /// Oversize publishes thrown away so far.
    pub fn dropped(&self) -> u32 {
        self.dropped
    }

    /// Drop any partial packet (e.g. after a reconnect).
    pub fn reset(&mut self) {
        self.buf.clear();
        self.skip = 0;
    }

    /// Give back heap held by the buffer after a burst of large packets.
    pub fn shrink(&mut self) {
        self.buf.shrink_to_fit();
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn u8(&mut self) -> Result<u8, ProtocolError> {
        let b = *self.buf.get(self.pos).ok_or(ProtocolError::Malformed)?;
        self.pos += 1;
        Ok(b)
    }

    fn u16(&mut self) -> Result<u16, ProtocolError> {
        let hi = self.u8()?;
        let lo = self.u8()?;
        Ok(u16::from_be_bytes([hi, lo]))
    }

    fn binary(&mut self) -> Result<&'a [u8], ProtocolError> {
        let len = self.u16()? as usize;
        let end = self.pos.checked_add(len).ok_or(ProtocolError::Malformed)?;
        let data = self.buf.get(self.pos..end).ok_or(ProtocolError::Malformed)?;
        self.pos = end;
        Ok(data)
    }

    fn string(&mut self) -> Result<String, ProtocolError> {
        let raw = self.binary()?;
        core::str::from_utf8(raw)
            .map(str::to_owned)
            .map_err(|_| ProtocolError::Malformed)
    }

    fn rest(&mut self) -> &'a [u8] {
        let data = &self.buf[self.pos..];
        self.pos = self.buf.len();
        data
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    /// Fail unless every byte was consumed.
    fn finish(&self) -> Result<(), ProtocolError> {
        if self.is_empty() { Ok(()) } else { Err(ProtocolError::Malformed) }
    }
}

fn decode_body(first_byte: u8, body: &[u8]) -> Result<Packet, ProtocolError> {
    let kind = first_byte >> 4;
    let flags = first_byte & 0x0F;
    let mut r = Reader::new(body);

    let expect_flags = |want: u8| {
        if flags == want { Ok(()) } else { Err(ProtocolError::Malformed) }
    };

    let packet = match kind {
        CONNECT => {
            expect_flags(0)?;
            if r.binary()? != PROTOCOL_NAME || r.u8()? != PROTOCOL_LEVEL {
                return Err(ProtocolError::Malformed);
            }
            let connect_flags = r.u8()?;
            let keepalive_secs = r.u16()?;
            let client_id = r.string()?;
            let will = if connect_flags & FLAG_WILL != 0 {
                let topic = r.string()?;
                let message = r.binary()?.to_vec();
                Some(LastWill {
                    topic,
                    message,
                    retain: connect_flags & FLAG_WILL_RETAIN != 0,
                })
            } else {
                None
            };
            let username = if connect_flags & FLAG_USERNAME != 0 { Some(r.string()?) } else { None };
            let password = if connect_flags & FLAG_PASSWORD != 0 { Some(r.string()?) } else { None };
            r.finish()?;
            Packet::Connect(Connect {
                client_id,
                keepalive_secs,
                clean_session: connect_flags & FLAG_CLEAN_SESSION != 0,
                username,
                password,
                will,
            })
        }
        CONNACK => {
            expect_flags(0)?;
            let ack_flags = r.u8()?;
            let return_code = r.u8()?;
            r.finish()?;
            Packet::ConnAck {
                session_present: ack_flags & 0x01 != 0,
                return_code,
            }
        }
        PUBLISH => {
            let qos = (flags >> 1) & 0x03;
            if qos == 3 {
                return Err(ProtocolError::Malformed);
            }
            let topic = r.string()?;
            let packet_id = if qos > 0 { Some(r.u16()?) } else { None };
            Packet::Publish(Publish {
                topic,
                payload: r.rest().to_vec(),
                qos,
                retain: flags & 0x01 != 0,
                packet_id,
            })
        }
        PUBACK => {
            expect_flags(0)?;
            let packet_id = r.u16()?;
            r.finish()?;
            Packet::PubAck { packet_id }
        }
        SUBSCRIBE => {
            expect_flags(0b0010)?;
            let packet_id = r.u16()?;
            let mut filters = Vec::new();
            while !r.is_empty() {
                let filter = r.string()?;
                let qos = r.u8()?;
                filters.push((filter, qos));
            }
            if filters.is_empty() {
                return Err(ProtocolError::Malformed);
            }
            Packet::Subscribe { packet_id, filters }
        }
        SUBACK => {
            expect_flags(0)?;
            let packet_id = r.u16()?;
            let return_codes = r.rest().to_vec();
            if return_codes.is_empty() {
                return Err(ProtocolError::Malformed);
            }
            Packet::SubAck { packet_id, return_codes }
        }
        PINGREQ | PINGRESP | DISCONNECT => {
            expect_flags(0)?;
            r.finish()?;
            match kind {
                PINGREQ => Packet::PingReq,
                PINGRESP => Packet::PingResp,
                _ => Packet::Disconnect,
            }
        }
        other => return Err(ProtocolError::UnexpectedPacket(other)),
    };
    Ok(packet)
}
