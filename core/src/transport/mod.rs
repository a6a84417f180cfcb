//! Transport contracts — how the engine's frames reach the world
//!
//! Two narrow capabilities, both carrying transport text (base64 frames):
//! - [`RadioTransport`]: the broadcast radio link. No addressing, no
//!   reliability; `transmit` puts one frame on the air, `poll` waits a
//!   bounded time for one inbound frame.
//! - [`BridgeTransport`]: the gateway's upstream pub/sub link.
//!
//! Both are `&mut self` by design: the underlying devices are half-duplex
//! command/response channels, so exactly one task owns a transport and all
//! operations serialize through it.

pub mod mem;
pub mod rylr;
pub mod udp;

pub use mem::{mem_bridge, MemBridge, MemBridgeHandle, MemRadio, MemRadioHub};
pub use rylr::{Rylr998Config, Rylr998Radio};
pub use udp::UdpRadio;

use async_trait::async_trait;
use thiserror::Error;

/// Transport errors. Retried at the loop level, never packet-level.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TransportError {
    #[error("Transmit failed: {0}")]
    Send(String),

    #[error("Radio module rejected the command: +ERR={0}")]
    ModuleError(u32),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Operation timed out")]
    Timeout,

    #[error("Transport closed")]
    Closed,
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        TransportError::Io(err.to_string())
    }
}

/// One frame received off the air.
#[derive(Debug, Clone, PartialEq)]
pub struct RadioFrame {
    /// Transport-text payload (base64, possibly with stripped padding)
    pub text: String,
    /// Received signal strength, dBm (0 when the link does not measure it)
    pub rssi: i32,
    /// Signal-to-noise ratio, dB (0 when the link does not measure it)
    pub snr: f32,
}

impl RadioFrame {
    /// Frame from a link without signal measurements.
    pub fn unmeasured(text: String) -> Self {
        RadioFrame {
            text,
            rssi: 0,
            snr: 0.0,
        }
    }
}

/// The broadcast radio link.
#[async_trait]
pub trait RadioTransport: Send {
    /// Broadcast one transport-text frame.
    async fn transmit(&mut self, text: &str) -> Result<(), TransportError>;

    /// Wait up to the transport's poll timeout for one inbound frame.
    /// `Ok(None)` means nothing arrived — poll again.
    async fn poll(&mut self) -> Result<Option<RadioFrame>, TransportError>;
}

#[async_trait]
impl RadioTransport for Box<dyn RadioTransport> {
    async fn transmit(&mut self, text: &str) -> Result<(), TransportError> {
        (**self).transmit(text).await
    }

    async fn poll(&mut self) -> Result<Option<RadioFrame>, TransportError> {
        (**self).poll().await
    }
}

/// The gateway's upstream pub/sub link.
#[async_trait]
pub trait BridgeTransport: Send {
    /// Publish one transport-text frame upstream.
    async fn publish(&mut self, text: &str) -> Result<(), TransportError>;

    /// Wait up to the transport's poll timeout for one downlink frame.
    async fn poll(&mut self) -> Result<Option<String>, TransportError>;
}
