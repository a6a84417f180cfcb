// Packet types — the unit of transmission on the mesh

use super::CodecError;
use std::fmt;
use std::str::FromStr;

/// Length of a packet identifier in bytes.
pub const PACKET_ID_LEN: usize = 8;

/// Seconds since the Unix epoch, saturating to 0 on clock trouble.
pub fn now_unix() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// An 8-character packet identifier.
///
/// Generated per packet from a UUIDv4 (first 8 hex characters), so the
/// effective space is 32 bits. Collisions are possible and show up as false
/// duplicate suppression; the protocol accepts that risk rather than widening
/// the wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PacketId([u8; PACKET_ID_LEN]);

impl PacketId {
    /// Generate a fresh random identifier.
    pub fn generate() -> Self {
        let hex = uuid::Uuid::new_v4().simple().to_string();
        let mut bytes = [0u8; PACKET_ID_LEN];
        bytes.copy_from_slice(&hex.as_bytes()[..PACKET_ID_LEN]);
        PacketId(bytes)
    }

    /// Build an identifier from raw wire bytes.
    ///
    /// Every byte must be printable ASCII; anything else is a malformed
    /// frame, not a usable id.
    pub fn from_bytes(bytes: [u8; PACKET_ID_LEN]) -> Result<Self, CodecError> {
        if bytes.iter().all(|b| b.is_ascii_graphic()) {
            Ok(PacketId(bytes))
        } else {
            Err(CodecError::InvalidPacketId)
        }
    }

    pub fn as_bytes(&self) -> &[u8; PACKET_ID_LEN] {
        &self.0
    }

    pub fn as_str(&self) -> &str {
        // Validated ASCII at construction
        std::str::from_utf8(&self.0).unwrap_or("????????")
    }
}

impl fmt::Display for PacketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PacketId {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes: [u8; PACKET_ID_LEN] = s
            .as_bytes()
            .try_into()
            .map_err(|_| CodecError::InvalidPacketId)?;
        PacketId::from_bytes(bytes)
    }
}

/// An application message in flight.
///
/// `ciphertext` is the IV-prefixed AES-CBC blob from the crypto module;
/// the codec never sees plaintext.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkMessage {
    /// Node id of the originator
    pub sender: String,
    /// Unix timestamp (seconds) at creation
    pub timestamp: u64,
    /// IV || AES-128-CBC ciphertext of the application payload
    pub ciphertext: Vec<u8>,
    /// Raw destination string — a node id, or an external-delivery address
    /// with a leading `+` sigil (see [`Destination`])
    pub destination: String,
}

/// Acknowledgment of a previously received packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckMessage {
    /// The id of the packet being acknowledged
    pub message_id: PacketId,
    /// Node id of the acknowledger
    pub node_id: String,
    pub timestamp: u64,
}

/// Broadcast liveness probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoverMessage {
    pub timestamp: u64,
}

/// Broadcast presence advertisement, also the reply to Discover.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnounceMessage {
    pub node_id: String,
    pub timestamp: u64,
}

/// The four protocol payloads, plus a forward-compatibility catch-all.
///
/// `Unknown` is produced by the decoder for kind tags this build does not
/// recognize; the packet id is still parsed so deduplication applies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacketPayload {
    Network(NetworkMessage),
    Ack(AckMessage),
    Discover(DiscoverMessage),
    Announce(AnnounceMessage),
    Unknown { tag: u8 },
}

/// The unit of transmission.
///
/// `id` is assigned once at creation and never mutated; it is the sole
/// deduplication and correlation key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub id: PacketId,
    pub payload: PacketPayload,
}

impl Packet {
    /// Create a NetworkMessage packet with a fresh id and timestamp.
    pub fn network(sender: &str, destination: &str, ciphertext: Vec<u8>) -> Self {
        Packet {
            id: PacketId::generate(),
            payload: PacketPayload::Network(NetworkMessage {
                sender: sender.to_string(),
                timestamp: now_unix(),
                ciphertext,
                destination: destination.to_string(),
            }),
        }
    }

    /// Create an Ack packet acknowledging `message_id`.
    pub fn ack(message_id: PacketId, node_id: &str) -> Self {
        Packet {
            id: PacketId::generate(),
            payload: PacketPayload::Ack(AckMessage {
                message_id,
                node_id: node_id.to_string(),
                timestamp: now_unix(),
            }),
        }
    }

    /// Create a Discover probe packet.
    pub fn discover() -> Self {
        Packet {
            id: PacketId::generate(),
            payload: PacketPayload::Discover(DiscoverMessage {
                timestamp: now_unix(),
            }),
        }
    }

    /// Create an Announce packet advertising `node_id`.
    pub fn announce(node_id: &str) -> Self {
        Packet {
            id: PacketId::generate(),
            payload: PacketPayload::Announce(AnnounceMessage {
                node_id: node_id.to_string(),
                timestamp: now_unix(),
            }),
        }
    }

    /// Short name for logs.
    pub fn kind_name(&self) -> &'static str {
        match &self.payload {
            PacketPayload::Network(_) => "network",
            PacketPayload::Ack(_) => "ack",
            PacketPayload::Discover(_) => "discover",
            PacketPayload::Announce(_) => "announce",
            PacketPayload::Unknown { .. } => "unknown",
        }
    }
}

/// A parsed destination.
///
/// The wire carries destinations as one string field multiplexed by a
/// leading sigil; parse exactly once after decode so downstream logic never
/// re-inspects the raw string. `+Q` wins over the bare `+`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    /// Another node on the mesh
    Node(String),
    /// Telephony address, delivered upstream by the relay (`+` prefix)
    Phone(String),
    /// Assistant query marker (`+Q` prefix)
    AssistantQuery,
}

impl Destination {
    pub fn parse(raw: &str) -> Self {
        if raw.starts_with("+Q") {
            Destination::AssistantQuery
        } else if raw.starts_with('+') {
            Destination::Phone(raw.to_string())
        } else {
            Destination::Node(raw.to_string())
        }
    }

    /// True for destinations handled upstream of the mesh (telephony or
    /// assistant), i.e. the ones a gateway bridges.
    pub fn is_external(&self) -> bool {
        matches!(self, Destination::Phone(_) | Destination::AssistantQuery)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_id_shape() {
        let id = PacketId::generate();
        assert_eq!(id.as_str().len(), PACKET_ID_LEN);
        assert!(id.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_generated_ids_differ() {
        assert_ne!(PacketId::generate(), PacketId::generate());
    }

    #[test]
    fn test_id_rejects_unprintable_bytes() {
        let result = PacketId::from_bytes([0u8; PACKET_ID_LEN]);
        assert_eq!(result, Err(CodecError::InvalidPacketId));
    }

    #[test]
    fn test_id_from_str() {
        let id: PacketId = "ab12cd34".parse().unwrap();
        assert_eq!(id.to_string(), "ab12cd34");

        assert!("short".parse::<PacketId>().is_err());
        assert!("way-too-long".parse::<PacketId>().is_err());
    }

    #[test]
    fn test_network_packet_constructor() {
        let pkt = Packet::network("FIELD01", "FIELD02", vec![1, 2, 3]);
        match &pkt.payload {
            PacketPayload::Network(msg) => {
                assert_eq!(msg.sender, "FIELD01");
                assert_eq!(msg.destination, "FIELD02");
                assert_eq!(msg.ciphertext, vec![1, 2, 3]);
                assert!(msg.timestamp > 0);
            }
            other => panic!("Expected Network payload, got {:?}", other),
        }
    }

    #[test]
    fn test_ack_carries_original_id() {
        let original: PacketId = "deadbeef".parse().unwrap();
        let pkt = Packet::ack(original, "FIELD02");
        match &pkt.payload {
            PacketPayload::Ack(ack) => {
                assert_eq!(ack.message_id, original);
                assert_eq!(ack.node_id, "FIELD02");
            }
            other => panic!("Expected Ack payload, got {:?}", other),
        }
        // The ack packet has its own fresh id
        assert_ne!(pkt.id, original);
    }

    #[test]
    fn test_destination_parse() {
        assert_eq!(
            Destination::parse("FIELD02"),
            Destination::Node("FIELD02".to_string())
        );
        assert_eq!(
            Destination::parse("+15551234567"),
            Destination::Phone("+15551234567".to_string())
        );
        assert_eq!(Destination::parse("+Q"), Destination::AssistantQuery);
        assert_eq!(Destination::parse("+Query"), Destination::AssistantQuery);
    }

    #[test]
    fn test_destination_external() {
        assert!(!Destination::parse("FIELD02").is_external());
        assert!(Destination::parse("+15551234567").is_external());
        assert!(Destination::parse("+Q").is_external());
    }
}
