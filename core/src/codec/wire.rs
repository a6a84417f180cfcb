//! Binary wire encoding — fixed layout shared by all nodes and the relay
//!
//! Layout (little-endian, no implicit padding):
//! [1]  version (0x01)
//! [1]  kind tag
//! [8]  packet id (printable ASCII)
//! then one body per kind:
//!
//! network (0x01):  [1] sender_len, sender, [8] timestamp,
//!                  [1] dest_len, dest, [2] ciphertext_len, ciphertext
//! ack (0x02):      [8] message_id, [1] node_len, node, [8] timestamp
//! discover (0x03): [8] timestamp
//! announce (0x04): [1] node_len, node, [8] timestamp
//!
//! A tag outside 0x01–0x04 decodes to `PacketPayload::Unknown` with the id
//! intact; the body is ignored. Tags and field order are frozen — changing
//! either breaks every deployed node.

use super::packet::{
    AckMessage, AnnounceMessage, DiscoverMessage, NetworkMessage, Packet, PacketId, PacketPayload,
    PACKET_ID_LEN,
};
use super::CodecError;
use base64::engine::general_purpose::URL_SAFE;
use base64::Engine as _;

/// Current wire version
pub const WIRE_VERSION: u8 = 0x01;

/// Maximum encoded frame size.
///
/// Radio frames are far smaller (the module caps payloads around 240 bytes),
/// but bridge frames share this codec and get more headroom.
pub const MAX_FRAME: usize = 4096;

const TAG_NETWORK: u8 = 0x01;
const TAG_ACK: u8 = 0x02;
const TAG_DISCOVER: u8 = 0x03;
const TAG_ANNOUNCE: u8 = 0x04;

/// Serialize a packet to wire bytes.
pub fn encode(packet: &Packet) -> Result<Vec<u8>, CodecError> {
    let mut buf = Vec::with_capacity(64);
    buf.push(WIRE_VERSION);

    match &packet.payload {
        PacketPayload::Network(msg) => {
            buf.push(TAG_NETWORK);
            buf.extend_from_slice(packet.id.as_bytes());
            push_str(&mut buf, &msg.sender)?;
            buf.extend_from_slice(&msg.timestamp.to_le_bytes());
            push_str(&mut buf, &msg.destination)?;
            if msg.ciphertext.len() > u16::MAX as usize {
                return Err(CodecError::FieldTooLarge {
                    got: msg.ciphertext.len(),
                    max: u16::MAX as usize,
                });
            }
            buf.extend_from_slice(&(msg.ciphertext.len() as u16).to_le_bytes());
            buf.extend_from_slice(&msg.ciphertext);
        }
        PacketPayload::Ack(ack) => {
            buf.push(TAG_ACK);
            buf.extend_from_slice(packet.id.as_bytes());
            buf.extend_from_slice(ack.message_id.as_bytes());
            push_str(&mut buf, &ack.node_id)?;
            buf.extend_from_slice(&ack.timestamp.to_le_bytes());
        }
        PacketPayload::Discover(probe) => {
            buf.push(TAG_DISCOVER);
            buf.extend_from_slice(packet.id.as_bytes());
            buf.extend_from_slice(&probe.timestamp.to_le_bytes());
        }
        PacketPayload::Announce(ann) => {
            buf.push(TAG_ANNOUNCE);
            buf.extend_from_slice(packet.id.as_bytes());
            push_str(&mut buf, &ann.node_id)?;
            buf.extend_from_slice(&ann.timestamp.to_le_bytes());
        }
        PacketPayload::Unknown { tag } => return Err(CodecError::UnknownKind(*tag)),
    }

    if buf.len() > MAX_FRAME {
        return Err(CodecError::FrameTooLarge(buf.len()));
    }
    Ok(buf)
}

/// Deserialize a packet from wire bytes.
pub fn decode(data: &[u8]) -> Result<Packet, CodecError> {
    if data.len() > MAX_FRAME {
        return Err(CodecError::FrameTooLarge(data.len()));
    }

    let mut r = Reader::new(data);
    let version = r.take_u8()?;
    if version != WIRE_VERSION {
        return Err(CodecError::InvalidVersion(version));
    }

    let tag = r.take_u8()?;
    let id = r.take_packet_id()?;

    let payload = match tag {
        TAG_NETWORK => {
            let sender = r.take_str()?;
            let timestamp = r.take_u64()?;
            let destination = r.take_str()?;
            let ct_len = r.take_u16()? as usize;
            let ciphertext = r.take(ct_len)?.to_vec();
            PacketPayload::Network(NetworkMessage {
                sender,
                timestamp,
                ciphertext,
                destination,
            })
        }
        TAG_ACK => {
            let message_id = r.take_packet_id()?;
            let node_id = r.take_str()?;
            let timestamp = r.take_u64()?;
            PacketPayload::Ack(AckMessage {
                message_id,
                node_id,
                timestamp,
            })
        }
        TAG_DISCOVER => PacketPayload::Discover(DiscoverMessage {
            timestamp: r.take_u64()?,
        }),
        TAG_ANNOUNCE => {
            let node_id = r.take_str()?;
            let timestamp = r.take_u64()?;
            PacketPayload::Announce(AnnounceMessage { node_id, timestamp })
        }
        other => PacketPayload::Unknown { tag: other },
    };

    Ok(Packet { id, payload })
}

/// Encode wire bytes as transport text (URL-safe base64, padded).
pub fn to_transport_text(bytes: &[u8]) -> String {
    URL_SAFE.encode(bytes)
}

/// Decode transport text back to wire bytes.
///
/// Frames routinely arrive with their trailing `=` stripped by the radio
/// path, so any existing padding is removed and the input re-padded to a
/// multiple of 4 before decoding.
pub fn from_transport_text(text: &str) -> Result<Vec<u8>, CodecError> {
    let mut normalized = text.trim_end_matches('=').to_string();
    while normalized.len() % 4 != 0 {
        normalized.push('=');
    }
    URL_SAFE
        .decode(normalized.as_bytes())
        .map_err(|e| CodecError::Base64(e.to_string()))
}

fn push_str(buf: &mut Vec<u8>, s: &str) -> Result<(), CodecError> {
    if s.len() > u8::MAX as usize {
        return Err(CodecError::FieldTooLarge {
            got: s.len(),
            max: u8::MAX as usize,
        });
    }
    buf.push(s.len() as u8);
    buf.extend_from_slice(s.as_bytes());
    Ok(())
}

struct Reader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Reader { data, offset: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        let end = self.offset + n;
        if end > self.data.len() {
            return Err(CodecError::BufferTooShort {
                need: end,
                got: self.data.len(),
            });
        }
        let slice = &self.data[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    fn take_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    fn take_u16(&mut self) -> Result<u16, CodecError> {
        let bytes = self.take(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    fn take_u64(&mut self) -> Result<u64, CodecError> {
        let bytes = self.take(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(bytes);
        Ok(u64::from_le_bytes(arr))
    }

    fn take_str(&mut self) -> Result<String, CodecError> {
        let len = self.take_u8()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| CodecError::InvalidUtf8)
    }

    fn take_packet_id(&mut self) -> Result<PacketId, CodecError> {
        let bytes = self.take(PACKET_ID_LEN)?;
        let mut arr = [0u8; PACKET_ID_LEN];
        arr.copy_from_slice(bytes);
        PacketId::from_bytes(arr)
    }
}
