// In-memory transports — one broadcast domain per hub, used by tests and
// local demos
//
// MemRadioHub models the shared air: every endpoint hears every other
// endpoint's transmissions (but not its own — a radio cannot receive while
// transmitting).

use super::{BridgeTransport, RadioFrame, RadioTransport, TransportError};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;

const HUB_CAPACITY: usize = 256;

/// Simulated signal numbers reported by hub endpoints.
const MEM_RSSI: i32 = -42;
const MEM_SNR: f32 = 9.0;

/// A shared broadcast domain.
pub struct MemRadioHub {
    tx: broadcast::Sender<(usize, String)>,
    next_endpoint: AtomicUsize,
}

impl MemRadioHub {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(HUB_CAPACITY);
        MemRadioHub {
            tx,
            next_endpoint: AtomicUsize::new(0),
        }
    }

    /// Attach a new radio to this broadcast domain.
    pub fn endpoint(&self, poll_timeout: Duration) -> MemRadio {
        MemRadio {
            id: self.next_endpoint.fetch_add(1, Ordering::Relaxed),
            tx: self.tx.clone(),
            rx: self.tx.subscribe(),
            poll_timeout,
        }
    }
}

impl Default for MemRadioHub {
    fn default() -> Self {
        MemRadioHub::new()
    }
}

/// One radio on a [`MemRadioHub`].
pub struct MemRadio {
    id: usize,
    tx: broadcast::Sender<(usize, String)>,
    rx: broadcast::Receiver<(usize, String)>,
    poll_timeout: Duration,
}

#[async_trait]
impl RadioTransport for MemRadio {
    async fn transmit(&mut self, text: &str) -> Result<(), TransportError> {
        self.tx
            .send((self.id, text.to_string()))
            .map_err(|_| TransportError::Closed)?;
        Ok(())
    }

    async fn poll(&mut self) -> Result<Option<RadioFrame>, TransportError> {
        let deadline = tokio::time::Instant::now() + self.poll_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            match timeout(remaining, self.rx.recv()).await {
                Ok(Ok((source, text))) => {
                    if source == self.id {
                        continue; // our own transmission
                    }
                    return Ok(Some(RadioFrame {
                        text,
                        rssi: MEM_RSSI,
                        snr: MEM_SNR,
                    }));
                }
                Ok(Err(broadcast::error::RecvError::Lagged(skipped))) => {
                    // Frames lost to backpressure look like air loss
                    tracing::warn!(skipped, "mem radio lagged, frames dropped");
                    continue;
                }
                Ok(Err(broadcast::error::RecvError::Closed)) => {
                    return Err(TransportError::Closed);
                }
                Err(_) => return Ok(None),
            }
        }
    }
}

/// Gateway side of an in-memory bridge.
pub struct MemBridge {
    uplink: mpsc::UnboundedSender<String>,
    downlink: mpsc::UnboundedReceiver<String>,
    poll_timeout: Duration,
}

/// Test/broker side of an in-memory bridge: observes uplink publishes and
/// injects downlink frames.
pub struct MemBridgeHandle {
    uplink: mpsc::UnboundedReceiver<String>,
    downlink: mpsc::UnboundedSender<String>,
}

/// A connected bridge pair.
pub fn mem_bridge(poll_timeout: Duration) -> (MemBridge, MemBridgeHandle) {
    let (up_tx, up_rx) = mpsc::unbounded_channel();
    let (down_tx, down_rx) = mpsc::unbounded_channel();
    (
        MemBridge {
            uplink: up_tx,
            downlink: down_rx,
            poll_timeout,
        },
        MemBridgeHandle {
            uplink: up_rx,
            downlink: down_tx,
        },
    )
}

#[async_trait]
impl BridgeTransport for MemBridge {
    async fn publish(&mut self, text: &str) -> Result<(), TransportError> {
        self.uplink
            .send(text.to_string())
            .map_err(|_| TransportError::Closed)
    }

    async fn poll(&mut self) -> Result<Option<String>, TransportError> {
        match timeout(self.poll_timeout, self.downlink.recv()).await {
            Ok(Some(text)) => Ok(Some(text)),
            Ok(None) => Err(TransportError::Closed),
            Err(_) => Ok(None),
        }
    }
}

impl MemBridgeHandle {
    /// Wait for the next uplink publish.
    pub async fn recv_uplink(&mut self) -> Option<String> {
        self.uplink.recv().await
    }

    /// Inject a downlink frame toward the gateway.
    pub fn send_downlink(&self, text: &str) -> Result<(), TransportError> {
        self.downlink
            .send(text.to_string())
            .map_err(|_| TransportError::Closed)
    }
}
