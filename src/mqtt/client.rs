//! One live MQTT 3.1.1 session over a [`Transport`].
//!
//! The session only speaks the protocol: it knows nothing about
//! reconnects, backoff or listeners (see [`super::supervisor`]).
//! Handshake steps block up to a caller-supplied bound; message checks
//! never block.
//!
//! QoS 0 only.  A QoS 1 delivery is acknowledged so the broker does not
//! redeliver it forever; QoS 2 is never requested.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use log::debug;

use super::codec::{self, Connect, Packet, PacketDecoder, Publish, SUBACK_FAILURE};
use super::transport::{ReadMode, Transport};
use crate::error::{MqttError, ProtocolError, TransportError};

/// Scratch size for a single transport read.
const READ_CHUNK: usize = 256;

pub struct MqttSession<T: Transport> {
    transport: T,
    decoder: PacketDecoder,
    /// Publishes that arrived while waiting for a handshake reply.
    pending: VecDeque<Publish>,
    next_packet_id: u16,
    awaiting_pingresp: bool,
}

impl<T: Transport> MqttSession<T> {
    /// Send CONNECT and wait up to `timeout` for a successful CONNACK.
    pub fn open(mut transport: T, connect: &Connect, timeout: Duration) -> Result<Self, MqttError> {
        transport.set_read_mode(ReadMode::Timeout(timeout))?;
        let mut session = Self {
            transport,
            decoder: PacketDecoder::new(),
            pending: VecDeque::new(),
            next_packet_id: 0,
            awaiting_pingresp: false,
        };
        session.send(&Packet::Connect(connect.clone()))?;

        let deadline = Instant::now() + timeout;
        match session.read_packet(deadline)? {
            Packet::ConnAck { return_code: 0, .. } => Ok(session),
            Packet::ConnAck { return_code, .. } => Err(ProtocolError::ConnectionRefused(return_code).into()),
            other => Err(ProtocolError::UnexpectedPacket(other.type_code()).into()),
        }
    }

    /// Subscribe to one filter at QoS 0 and wait up to `timeout` for its SUBACK.
    pub fn subscribe(&mut self, filter: &str, timeout: Duration) -> Result<(), MqttError> {
        let packet_id = self.allocate_packet_id();
        self.send(&Packet::Subscribe {
            packet_id,
            filters: vec![(filter.to_owned(), 0)],
        })?;

        let deadline = Instant::now() + timeout;
        loop {
            match self.read_packet(deadline)? {
                Packet::SubAck { packet_id: id, return_codes } if id == packet_id => {
                    if return_codes.contains(&SUBACK_FAILURE) {
                        return Err(ProtocolError::SubscriptionRejected.into());
                    }
                    return Ok(());
                }
                Packet::Publish(p) => self.accept_publish(p)?,
                Packet::PingResp => self.awaiting_pingresp = false,
                other => return Err(ProtocolError::UnexpectedPacket(other.type_code()).into()),
            }
        }
    }

    /// Fire-and-forget QoS 0 publish.
    pub fn publish(&mut self, topic: &str, payload: &[u8], retain: bool) -> Result<(), MqttError> {
        self.send(&Packet::Publish(Publish {
            topic: topic.to_owned(),
            payload: payload.to_vec(),
            qos: 0,
            retain,
            packet_id: None,
        }))
    }

    /// Send PINGREQ.
    ///
    /// Fails with `TransportError::Timeout` if the previous PINGREQ was never
    /// answered; the link is then presumed half-open.
    pub fn ping(&mut self) -> Result<(), MqttError> {
        if self.awaiting_pingresp {
            return Err(TransportError::Timeout.into());
        }
        self.send(&Packet::PingReq)?;
        self.awaiting_pingresp = true;
        Ok(())
    }

    /// Switch the socket to non-blocking reads once the handshake is over.
    pub fn enter_polling(&mut self) -> Result<(), MqttError> {
        self.transport.set_read_mode(ReadMode::NonBlocking)?;
        Ok(())
    }

    /// Next inbound publish, if one is available without blocking.
    ///
    /// Performs one transport read per call, more while the tail of an
    /// oversize publish is being discarded.
    pub fn poll_message(&mut self) -> Result<Option<Publish>, MqttError> {
        if let Some(p) = self.pending.pop_front() {
            return Ok(Some(p));
        }
        let mut read_once = false;
        loop {
            while let Some(packet) = self.decoder.next_packet()? {
                match packet {
                    Packet::Publish(p) => {
                        self.ack_if_needed(&p)?;
                        return Ok(Some(p));
                    }
                    Packet::PingResp => self.awaiting_pingresp = false,
                    Packet::PubAck { .. } | Packet::SubAck { .. } => {
                        debug!("MQTT: ignoring late ack");
                    }
                    other => return Err(ProtocolError::UnexpectedPacket(other.type_code()).into()),
                }
            }
            // Keep reading while the tail of an oversize publish is arriving.
            if read_once && !self.decoder.is_discarding() {
                return Ok(None);
            }
            read_once = true;
            let mut chunk = [0u8; READ_CHUNK];
            let n = self.transport.read(&mut chunk)?;
            if n == 0 {
                return Ok(None);
            }
            self.decoder.feed(&chunk[..n]);
        }
    }

    /// Whether a PINGREQ is still waiting for its PINGRESP.
    pub fn awaiting_pingresp(&self) -> bool {
        self.awaiting_pingresp
    }

    /// Send DISCONNECT and close the transport.
    pub fn disconnect(mut self) -> Result<(), MqttError> {
        self.send(&Packet::Disconnect)
    }

    /// Release buffer capacity accumulated by large packets.
    pub fn compact(&mut self) {
        self.decoder.shrink();
        self.pending.shrink_to_fit();
    }

    // ── internals ────────────────────────────────────────────────

    fn send(&mut self, packet: &Packet) -> Result<(), MqttError> {
        let bytes = codec::to_bytes(packet)?;
        self.transport.write_all(&bytes)?;
        Ok(())
    }

    fn allocate_packet_id(&mut self) -> u16 {
        // Packet identifiers must be non-zero (§2.3.1).
        self.next_packet_id = self.next_packet_id.wrapping_add(1).max(1);
        self.next_packet_id
    }

    fn accept_publish(&mut self, p: Publish) -> Result<(), MqttError> {
        self.ack_if_needed(&p)?;
        self.pending.push_back(p);
        Ok(())
    }

    fn ack_if_needed(&mut self, p: &Publish) -> Result<(), MqttError> {
        match (p.qos, p.packet_id) {
            (1, Some(packet_id)) => self.send(&Packet::PubAck { packet_id }),
            _ => Ok(()),
        }
    }

    /// Block until one complete packet is decoded or `deadline` passes.
    fn read_packet(&mut self, deadline: Instant) -> Result<Packet, MqttError> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            if let Some(packet) = self.decoder.next_packet()? {
                return Ok(packet);
            }
            if Instant::now() >= deadline {
                return Err(TransportError::Timeout.into());
            }
            let n = self.transport.read(&mut chunk)?;
            self.decoder.feed(&chunk[..n]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mqtt::codec::LastWill;

    /// Transport fed from a script of inbound chunks.
    #[derive(Default)]
    struct Scripted {
        inbound: VecDeque<Vec<u8>>,
        written: Vec<u8>,
        mode: Option<ReadMode>,
    }

    impl Scripted {
        fn with(packets: &[Packet]) -> Self {
            let mut s = Self::default();
            for p in packets {
                s.inbound.push_back(codec::to_bytes(p).unwrap());
            }
            s
        }

        fn sent(&self) -> Vec<Packet> {
            let mut dec = PacketDecoder::new();
            dec.feed(&self.written);
            let mut out = Vec::new();
            while let Some(p) = dec.next_packet().unwrap() {
                out.push(p);
            }
            out
        }
    }

    impl Transport for Scripted {
        fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
            match self.inbound.pop_front() {
                Some(chunk) => {
                    buf[..chunk.len()].copy_from_slice(&chunk);
                    Ok(chunk.len())
                }
                None => Ok(0),
            }
        }

        fn write_all(&mut self, data: &[u8]) -> Result<(), TransportError> {
            self.written.extend_from_slice(data);
            Ok(())
        }

        fn set_read_mode(&mut self, mode: ReadMode) -> Result<(), TransportError> {
            self.mode = Some(mode);
            Ok(())
        }
    }

    fn connect_packet() -> Connect {
        Connect {
            client_id: String::from("deck"),
            keepalive_secs: 60,
            clean_session: true,
            username: None,
            password: None,
            will: Some(LastWill {
                topic: String::from("status/deck"),
                message: b"offline".to_vec(),
                retain: true,
            }),
        }
    }

    fn connack(code: u8) -> Packet {
        Packet::ConnAck { session_present: false, return_code: code }
    }

    fn publish(topic: &str, payload: &str) -> Packet {
        Packet::Publish(Publish {
            topic: topic.to_owned(),
            payload: payload.as_bytes().to_vec(),
            qos: 0,
            retain: false,
            packet_id: None,
        })
    }

    const WAIT: Duration = Duration::from_millis(50);

    #[test]
    fn open_succeeds_on_accepted_connack() {
        let session = MqttSession::open(Scripted::with(&[connack(0)]), &connect_packet(), WAIT).unwrap();
        assert_eq!(session.transport.mode, Some(ReadMode::Timeout(WAIT)));
        assert_eq!(session.transport.sent(), vec![Packet::Connect(connect_packet())]);
    }

    #[test]
    fn refused_connack_is_protocol_error() {
        let err = MqttSession::open(Scripted::with(&[connack(5)]), &connect_packet(), WAIT)
            .err()
            .unwrap();
        assert_eq!(err, MqttError::Protocol(ProtocolError::ConnectionRefused(5)));
    }

    #[test]
    fn silent_broker_times_out() {
        let err = MqttSession::open(Scripted::default(), &connect_packet(), Duration::from_millis(5))
            .err()
            .unwrap();
        assert_eq!(err, MqttError::Transport(TransportError::Timeout));
    }

    #[test]
    fn publish_before_suback_is_queued() {
        let transport = Scripted::with(&[
            connack(0),
            publish("sensors/a", "{}"),
            Packet::SubAck { packet_id: 1, return_codes: vec![0] },
        ]);
        let mut session = MqttSession::open(transport, &connect_packet(), WAIT).unwrap();
        session.subscribe("sensors/#", WAIT).unwrap();
        session.enter_polling().unwrap();
        let first = session.poll_message().unwrap().unwrap();
        assert_eq!(first.topic, "sensors/a");
        assert!(session.poll_message().unwrap().is_none());
    }

    #[test]
    fn rejected_subscription_fails() {
        let transport = Scripted::with(&[
            connack(0),
            Packet::SubAck { packet_id: 1, return_codes: vec![SUBACK_FAILURE] },
        ]);
        let mut session = MqttSession::open(transport, &connect_packet(), WAIT).unwrap();
        assert_eq!(
            session.subscribe("forbidden/#", WAIT),
            Err(MqttError::Protocol(ProtocolError::SubscriptionRejected))
        );
    }

    #[test]
    fn unanswered_ping_times_out() {
        let mut session = MqttSession::open(Scripted::with(&[connack(0)]), &connect_packet(), WAIT).unwrap();
        session.ping().unwrap();
        assert!(session.awaiting_pingresp());
        assert_eq!(session.ping(), Err(MqttError::Transport(TransportError::Timeout)));
    }

    #[test]
    fn pingresp_clears_pending_ping() {
        let mut session = MqttSession::open(Scripted::with(&[connack(0)]), &connect_packet(), WAIT).unwrap();
        session.ping().unwrap();
        session.transport.inbound.push_back(codec::to_bytes(&Packet::PingResp).unwrap());
        assert!(session.poll_message().unwrap().is_none());
        assert!(!session.awaiting_pingresp());
        session.ping().unwrap();
    }

    #[test]
    fn qos1_delivery_is_acknowledged() {
        let mut session = MqttSession::open(Scripted::with(&[connack(0)]), &connect_packet(), WAIT).unwrap();
        let delivery = Packet::Publish(Publish {
            topic: String::from("vps/monitor"),
            payload: b"{}".to_vec(),
            qos: 1,
            retain: false,
            packet_id: Some(42),
        });
        session.transport.inbound.push_back(codec::to_bytes(&delivery).unwrap());
        assert!(session.poll_message().unwrap().is_some());
        assert!(session.transport.sent().contains(&Packet::PubAck { packet_id: 42 }));
    }

    #[test]
    fn unexpected_packet_while_polling_is_error() {
        let mut session = MqttSession::open(Scripted::with(&[connack(0)]), &connect_packet(), WAIT).unwrap();
        session.transport.inbound.push_back(codec::to_bytes(&connack(0)).unwrap());
        assert_eq!(
            session.poll_message(),
            Err(MqttError::Protocol(ProtocolError::UnexpectedPacket(2)))
        );
    }

    #[test]
    fn retained_publish_sets_flag() {
        let mut session = MqttSession::open(Scripted::with(&[connack(0)]), &connect_packet(), WAIT).unwrap();
        session.publish("status/deck", b"online", true).unwrap();
        let sent = session.transport.sent();
        assert!(matches!(
            sent.last(),
            Some(Packet::Publish(Publish { retain: true, topic, .. })) if topic == "status/deck"
        ));
    }
}
