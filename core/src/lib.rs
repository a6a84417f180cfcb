// FarLink Core — store-and-forward messaging for LoRa field nodes
//
// "Will this still deliver a message over a lossy, half-duplex,
//  broadcast-only link on a battery budget?"
//
// If the answer is no, it doesn't belong in core.

pub mod codec;
pub mod config;
pub mod crypto;
pub mod discovery;
pub mod engine;
pub mod ledger;
pub mod node;
pub mod relay;
pub mod role;
pub mod transport;

pub use codec::{CodecError, Destination, Packet, PacketId, PacketPayload};
pub use config::{ConfigError, NodeConfig};
pub use crypto::{Cipher, CipherError, PresharedKey};
pub use engine::{NodeEvent, ProtocolEngine};
pub use ledger::AckStatus;
pub use node::{Node, NodeError};
pub use role::{NodeRole, RolePolicy};
