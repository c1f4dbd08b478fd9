//! In-memory MQTT broker for integration tests.
//!
//! A [`MockConnector`] hands out [`MockLink`] transports wired to one shared
//! [`BrokerSim`].  The sim decodes everything the client writes, records
//! it, and answers CONNECT / SUBSCRIBE / PINGREQ the way a broker would.
//! Faults are injected through the public switches on the sim.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use statusdeck::app::ports::LivenessGuard;
use statusdeck::error::TransportError;
use statusdeck::mqtt::codec::{self, Packet, PacketDecoder, Publish};
use statusdeck::mqtt::{Connector, Endpoint, ReadMode, Transport};

// ── Broker state ──────────────────────────────────────────────

pub struct BrokerSim {
    /// Every packet received, across all connections, in order.
    pub received: Vec<Packet>,
    /// CONNACK return code sent for the next CONNECT.
    pub connack_code: u8,
    pub reject_subscriptions: bool,
    pub answer_pings: bool,
    /// Refuse new TCP connections.
    pub unreachable: bool,
    /// Successful TCP connects.
    pub connections: u32,
    /// Retained publish replayed ahead of every SUBACK.
    pub retained: Option<(String, Vec<u8>)>,

    generation: u32,
    killed: bool,
    decoder: PacketDecoder,
    outbound: VecDeque<u8>,
}

pub type SharedBroker = Rc<RefCell<BrokerSim>>;

#[allow(dead_code)]
impl BrokerSim {
    pub fn shared() -> SharedBroker {
        Rc::new(RefCell::new(Self {
            received: Vec::new(),
            connack_code: 0,
            reject_subscriptions: false,
            answer_pings: true,
            unreachable: false,
            connections: 0,
            retained: None,
            generation: 0,
            killed: false,
            decoder: PacketDecoder::new(),
            outbound: VecDeque::new(),
        }))
    }

    /// Queue an inbound QoS 0 publish for the client.
    pub fn deliver(&mut self, topic: &str, payload: &[u8]) {
        self.push(&Packet::Publish(Publish {
            topic: topic.to_owned(),
            payload: payload.to_vec(),
            qos: 0,
            retain: false,
            packet_id: None,
        }));
    }

    /// Queue raw bytes, bypassing the encoder.
    pub fn deliver_raw(&mut self, bytes: &[u8]) {
        self.outbound.extend(bytes);
    }

    /// Drop the current connection: the next read or write fails.
    pub fn kill_link(&mut self) {
        self.killed = true;
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.received
            .iter()
            .filter_map(|p| match p {
                Packet::Subscribe { filters, .. } => Some(filters.iter().map(|(f, _)| f.clone())),
                _ => None,
            })
            .flatten()
            .collect()
    }

    pub fn publishes(&self) -> Vec<&Publish> {
        self.received
            .iter()
            .filter_map(|p| match p {
                Packet::Publish(p) => Some(p),
                _ => None,
            })
            .collect()
    }

    pub fn pings(&self) -> usize {
        self.received.iter().filter(|p| matches!(p, Packet::PingReq)).count()
    }

    fn push(&mut self, packet: &Packet) {
        let bytes = codec::to_bytes(packet).expect("encodable test packet");
        self.outbound.extend(bytes);
    }

    fn accept(&mut self) -> u32 {
        self.generation += 1;
        self.connections += 1;
        self.killed = false;
        self.decoder.reset();
        self.outbound.clear();
        self.generation
    }

    fn on_client_bytes(&mut self, data: &[u8]) {
        self.decoder.feed(data);
        while let Some(packet) = self.decoder.next_packet().expect("client sent valid MQTT") {
            match &packet {
                Packet::Connect(_) => self.push(&Packet::ConnAck {
                    session_present: false,
                    return_code: self.connack_code,
                }),
                Packet::Subscribe { packet_id, filters } => {
                    if let Some((topic, payload)) = self.retained.clone() {
                        self.push(&Packet::Publish(Publish {
                            topic,
                            payload,
                            qos: 0,
                            retain: true,
                            packet_id: None,
                        }));
                    }
                    let code = if self.reject_subscriptions { codec::SUBACK_FAILURE } else { 0 };
                    self.push(&Packet::SubAck {
                        packet_id: *packet_id,
                        return_codes: vec![code; filters.len()],
                    });
                }
                Packet::PingReq if self.answer_pings => self.push(&Packet::PingResp),
                _ => {}
            }
            self.received.push(packet);
        }
    }
}

// ── Transport ─────────────────────────────────────────────────

pub struct MockLink {
    broker: SharedBroker,
    generation: u32,
    mode: ReadMode,
}

impl MockLink {
    fn check_alive(&self, broker: &BrokerSim) -> Result<(), TransportError> {
        if broker.killed || broker.generation != self.generation {
            return Err(TransportError::Closed);
        }
        Ok(())
    }
}

impl Transport for MockLink {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let mut broker = self.broker.borrow_mut();
        self.check_alive(&broker)?;
        if broker.outbound.is_empty() {
            return match self.mode {
                ReadMode::NonBlocking => Ok(0),
                ReadMode::Timeout(_) => Err(TransportError::Timeout),
            };
        }
        let n = buf.len().min(broker.outbound.len());
        for (slot, byte) in buf.iter_mut().zip(broker.outbound.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn write_all(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let mut broker = self.broker.borrow_mut();
        self.check_alive(&broker)?;
        broker.on_client_bytes(data);
        Ok(())
    }

    fn set_read_mode(&mut self, mode: ReadMode) -> Result<(), TransportError> {
        self.mode = mode;
        Ok(())
    }
}

// ── Connector ─────────────────────────────────────────────────

pub struct MockConnector {
    broker: SharedBroker,
}

impl MockConnector {
    pub fn new(broker: &SharedBroker) -> Self {
        Self { broker: broker.clone() }
    }
}

impl Connector for MockConnector {
    type Conn = MockLink;

    fn connect(&mut self, _endpoint: &Endpoint, _guard: &mut dyn LivenessGuard) -> Result<MockLink, TransportError> {
        let mut broker = self.broker.borrow_mut();
        if broker.unreachable {
            return Err(TransportError::Io);
        }
        let generation = broker.accept();
        Ok(MockLink { broker: self.broker.clone(), generation, mode: ReadMode::NonBlocking })
    }
}
