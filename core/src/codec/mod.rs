//! Packet codec — the wire envelope shared by every mesh participant
//!
//! This module provides:
//! - Packet: the tagged union of the four protocol payloads
//! - A fixed, hand-laid-out binary encoding (stable tags and field order,
//!   so heterogeneous nodes and the relay interoperate)
//! - Transport text framing: URL-safe base64 with padding-tolerant decode
//!   (frames observed over the radio arrive with their `=` stripped)
//!
//! Decode failures are values, never panics — the receive loop reports them
//! and keeps polling.

pub mod packet;
pub mod wire;

pub use packet::{
    AckMessage, AnnounceMessage, Destination, DiscoverMessage, NetworkMessage, Packet, PacketId,
    PacketPayload,
};
pub use wire::{decode, encode, from_transport_text, to_transport_text, MAX_FRAME, WIRE_VERSION};

use thiserror::Error;

/// Packet codec errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Buffer too short: need {need} bytes, got {got}")]
    BufferTooShort { need: usize, got: usize },

    #[error("Invalid wire version: {0}")]
    InvalidVersion(u8),

    #[error("Cannot encode unknown packet kind {0}")]
    UnknownKind(u8),

    #[error("Packet id must be 8 printable ASCII characters")]
    InvalidPacketId,

    #[error("Field is not valid UTF-8")]
    InvalidUtf8,

    #[error("Field too large: {got} bytes (max {max})")]
    FieldTooLarge { got: usize, max: usize },

    #[error("Frame too large: {0} bytes (max {MAX})", MAX = MAX_FRAME)]
    FrameTooLarge(usize),

    #[error("Malformed transport text: {0}")]
    Base64(String),
}
