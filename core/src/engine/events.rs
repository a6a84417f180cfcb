// Node events — everything a presentation layer can observe
//
// Serializable so a web front end or log shipper can consume the stream
// directly; the engine itself never blocks on consumers.

use serde::Serialize;

/// An application-visible or diagnostic event produced by the engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeEvent {
    /// A message addressed to this node (or an external destination) was
    /// decrypted and delivered.
    MessageReceived {
        packet_id: String,
        from: String,
        content: String,
    },
    /// A locally originated message left this node.
    MessageSent {
        packet_id: String,
        destination: String,
    },
    /// One of our pending sends was acknowledged.
    Acknowledged { packet_id: String },
    /// A node we had not seen before announced itself.
    NodeDiscovered { node_id: String },
    /// A Discover probe was heard; our announce reply is scheduled.
    DiscoverHeard { packet_id: String },
    /// A packet id we already processed arrived again.
    Duplicate { packet_id: String },
    /// A packet addressed to somebody else was re-broadcast.
    Forwarded { packet_id: String },
    /// An external-destination packet was copied to the bridge uplink.
    BridgeForwarded {
        packet_id: String,
        destination: String,
    },
    /// A packet arrived from the bridge and was re-broadcast on the radio.
    BridgeDownlink { packet_id: String },
    /// A frame failed base64 or envelope decoding.
    FramingError { detail: String },
    /// A payload failed decryption or was not valid text.
    CipherFailure { packet_id: String, detail: String },
    /// A packet with an unrecognized kind tag arrived.
    UnknownPacket { packet_id: String, tag: u8 },
}
