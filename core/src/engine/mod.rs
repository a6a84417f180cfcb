//! Protocol engine — the per-packet state machine
//!
//! The engine is deliberately free of I/O: every entry point takes a frame
//! or packet and returns a [`Dispatch`] — the events to surface and the
//! packets to put on the air (or the bridge). The node runtime owns the
//! transports and performs the sends, so the dispatch logic is testable
//! without a radio and the half-duplex transport stays serialized in one
//! place.
//!
//! Dispatch order for every inbound packet: dedup first, then one handler
//! per packet kind. Per-packet failures become diagnostic events; nothing
//! here ever stops the receive loop.

pub mod events;

pub use events::NodeEvent;

use crate::codec::{self, Destination, Packet, PacketPayload};
use crate::config::NodeConfig;
use crate::crypto::Cipher;
use crate::discovery::{JitterWindow, NodeRegistry};
use crate::ledger::{AckStatus, Ledger};
use crate::role::RolePolicy;
use std::time::Duration;
use tracing::{debug, trace};

/// A packet the engine wants transmitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Broadcast on the radio now
    Radio(Packet),
    /// Broadcast on the radio after `delay` (collision-avoidance jitter);
    /// the wait must not stall the receive loop
    RadioDelayed { packet: Packet, delay: Duration },
    /// Publish to the bridge uplink, wire bytes unchanged
    Bridge(Packet),
}

/// The outcome of handling one inbound frame.
#[derive(Debug, Default)]
pub struct Dispatch {
    pub events: Vec<NodeEvent>,
    pub outbound: Vec<Outbound>,
}

impl Dispatch {
    fn event(event: NodeEvent) -> Self {
        Dispatch {
            events: vec![event],
            outbound: Vec::new(),
        }
    }
}

/// The protocol engine. One per node process, shared across tasks.
pub struct ProtocolEngine {
    node_id: String,
    cipher: Cipher,
    policy: RolePolicy,
    jitter: JitterWindow,
    ledger: Ledger,
    registry: NodeRegistry,
}

impl ProtocolEngine {
    pub fn new(config: &NodeConfig) -> Self {
        ProtocolEngine {
            node_id: config.node_id.clone(),
            cipher: Cipher::new(config.preshared_key()),
            policy: config.policy(),
            jitter: config.jitter_window(),
            ledger: Ledger::new(config.seen_capacity),
            registry: NodeRegistry::new(),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn policy(&self) -> RolePolicy {
        self.policy
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    pub fn ack_status(&self, id: codec::PacketId) -> AckStatus {
        self.ledger.status(id)
    }

    /// Handle one transport-text frame from the radio.
    pub fn handle_radio_text(&self, text: &str) -> Dispatch {
        match decode_text(text) {
            Ok(packet) => self.handle_packet(packet),
            Err(detail) => {
                debug!(%detail, "dropping malformed radio frame");
                Dispatch::event(NodeEvent::FramingError { detail })
            }
        }
    }

    /// Handle one transport-text frame arriving from the bridge (gateway
    /// downlink). Pure pass-through: the packet is re-broadcast on the radio
    /// without decryption or local processing.
    pub fn handle_bridge_text(&self, text: &str) -> Dispatch {
        match decode_text(text) {
            Ok(packet) => {
                trace!(id = %packet.id, kind = packet.kind_name(), "bridge downlink");
                Dispatch {
                    events: vec![NodeEvent::BridgeDownlink {
                        packet_id: packet.id.to_string(),
                    }],
                    outbound: vec![Outbound::Radio(packet)],
                }
            }
            Err(detail) => {
                debug!(%detail, "dropping malformed bridge frame");
                Dispatch::event(NodeEvent::FramingError { detail })
            }
        }
    }

    /// Handle one decoded packet.
    pub fn handle_packet(&self, packet: Packet) -> Dispatch {
        if self.ledger.is_duplicate(packet.id) {
            trace!(id = %packet.id, "duplicate packet dropped");
            return Dispatch::event(NodeEvent::Duplicate {
                packet_id: packet.id.to_string(),
            });
        }

        match &packet.payload {
            PacketPayload::Network(_) => self.on_network(&packet),
            PacketPayload::Ack(ack) => {
                let mut dispatch = Dispatch::default();
                if self.ledger.acknowledge(ack.message_id) {
                    debug!(id = %ack.message_id, by = %ack.node_id, "send acknowledged");
                    dispatch.events.push(NodeEvent::Acknowledged {
                        packet_id: ack.message_id.to_string(),
                    });
                }
                dispatch
            }
            PacketPayload::Discover(_) => self.on_discover(&packet),
            PacketPayload::Announce(ann) => {
                let mut dispatch = Dispatch::default();
                if ann.node_id != self.node_id && self.registry.insert(&ann.node_id) {
                    debug!(node = %ann.node_id, "discovered new node");
                    dispatch.events.push(NodeEvent::NodeDiscovered {
                        node_id: ann.node_id.clone(),
                    });
                }
                if self.policy.flood_announce {
                    dispatch.outbound.push(Outbound::Radio(packet.clone()));
                }
                dispatch
            }
            PacketPayload::Unknown { tag } => Dispatch::event(NodeEvent::UnknownPacket {
                packet_id: packet.id.to_string(),
                tag: *tag,
            }),
        }
    }

    fn on_network(&self, packet: &Packet) -> Dispatch {
        let PacketPayload::Network(msg) = &packet.payload else {
            unreachable!("on_network called with non-network payload");
        };
        let mut dispatch = Dispatch::default();
        let destination = Destination::parse(&msg.destination);

        let for_us = match &destination {
            Destination::Node(node) => node == &self.node_id,
            _ => true,
        };

        if !for_us {
            // Addressed to another node: flood if this role does that,
            // otherwise drop quietly.
            if self.policy.flood_unaddressed {
                dispatch.events.push(NodeEvent::Forwarded {
                    packet_id: packet.id.to_string(),
                });
                dispatch.outbound.push(Outbound::Radio(packet.clone()));
            } else {
                trace!(id = %packet.id, dest = %msg.destination, "not addressed here");
            }
            return dispatch;
        }

        let content = match self
            .cipher
            .decrypt(&msg.ciphertext)
            .map_err(|e| e.to_string())
            .and_then(|bytes| {
                String::from_utf8(bytes).map_err(|_| "plaintext is not UTF-8".to_string())
            }) {
            Ok(content) => content,
            Err(detail) => {
                debug!(id = %packet.id, %detail, "payload decryption failed");
                dispatch.events.push(NodeEvent::CipherFailure {
                    packet_id: packet.id.to_string(),
                    detail,
                });
                return dispatch;
            }
        };

        dispatch.events.push(NodeEvent::MessageReceived {
            packet_id: packet.id.to_string(),
            from: msg.sender.clone(),
            content,
        });
        dispatch
            .outbound
            .push(Outbound::Radio(Packet::ack(packet.id, &self.node_id)));

        if destination.is_external() && self.policy.bridge_external {
            // The bridge gets the original encrypted packet untouched — the
            // relay holds the same key and decrypts independently.
            dispatch.events.push(NodeEvent::BridgeForwarded {
                packet_id: packet.id.to_string(),
                destination: msg.destination.clone(),
            });
            dispatch.outbound.push(Outbound::Bridge(packet.clone()));
        }

        dispatch
    }

    fn on_discover(&self, packet: &Packet) -> Dispatch {
        let delay = self.jitter.sample();
        debug!(id = %packet.id, ?delay, "discover heard, scheduling announce");

        let mut dispatch = Dispatch {
            events: vec![NodeEvent::DiscoverHeard {
                packet_id: packet.id.to_string(),
            }],
            outbound: vec![Outbound::RadioDelayed {
                packet: Packet::announce(&self.node_id),
                delay,
            }],
        };
        if self.policy.flood_discover {
            dispatch.outbound.push(Outbound::Radio(packet.clone()));
        }
        dispatch
    }

    /// Build an outbound application message: encrypt, wrap, and register it
    /// as awaiting acknowledgment.
    pub fn compose_message(&self, destination: &str, text: &str) -> Packet {
        let ciphertext = self.cipher.encrypt(text.as_bytes());
        let packet = Packet::network(&self.node_id, destination, ciphertext);
        self.ledger.register_pending(packet.id);
        packet
    }

    /// Build a Discover probe.
    pub fn compose_discover(&self) -> Packet {
        Packet::discover()
    }

    /// Build an Announce for this node.
    pub fn compose_announce(&self) -> Packet {
        Packet::announce(&self.node_id)
    }
}

fn decode_text(text: &str) -> Result<Packet, String> {
    let bytes = codec::from_transport_text(text).map_err(|e| e.to_string())?;
    codec::decode(&bytes).map_err(|e| e.to_string())
}
