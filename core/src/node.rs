// Node runtime — tasks, channels, and the transport discipline
//
// Task layout:
// - radio task: sole owner of the RadioTransport. Alternates draining the
//   outbound queue with a bounded-timeout poll, so transmit and receive can
//   never interleave on the half-duplex link. A send queued mid-poll waits
//   at most one poll timeout.
// - bridge task (gateway only): sole owner of the BridgeTransport, same
//   drain-then-poll shape; downlink frames are re-broadcast via the radio
//   task's queue.
// - jittered announces: a short-lived sleeper task per Discover heard, so
//   the wait never blocks either loop.
//
// All application events fan out on a broadcast channel; a slow subscriber
// loses oldest events rather than stalling the protocol.

use crate::codec::{self, CodecError, Packet, PacketId};
use crate::config::{ConfigError, NodeConfig};
use crate::engine::{Dispatch, NodeEvent, Outbound, ProtocolEngine};
use crate::ledger::AckStatus;
use crate::transport::{BridgeTransport, RadioTransport, TransportError};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("Node is shut down")]
    Closed,
}

/// Routes a [`Dispatch`] to the channels that execute it.
#[derive(Clone)]
struct Router {
    radio_tx: mpsc::UnboundedSender<String>,
    bridge_tx: Option<mpsc::UnboundedSender<String>>,
    events_tx: broadcast::Sender<NodeEvent>,
}

impl Router {
    fn apply(&self, dispatch: Dispatch) {
        for event in dispatch.events {
            // No subscribers is fine — events are observational
            let _ = self.events_tx.send(event);
        }
        for outbound in dispatch.outbound {
            match outbound {
                Outbound::Radio(packet) => self.enqueue_radio(&packet),
                Outbound::RadioDelayed { packet, delay } => {
                    let router = self.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        router.enqueue_radio(&packet);
                    });
                }
                Outbound::Bridge(packet) => match &self.bridge_tx {
                    Some(bridge_tx) => match encode_text(&packet) {
                        Ok(text) => {
                            let _ = bridge_tx.send(text);
                        }
                        Err(e) => warn!(error = %e, "dropping unencodable bridge packet"),
                    },
                    None => warn!(
                        id = %packet.id,
                        "bridge packet on a node without a bridge transport"
                    ),
                },
            }
        }
    }

    fn enqueue_radio(&self, packet: &Packet) {
        match encode_text(packet) {
            Ok(text) => {
                let _ = self.radio_tx.send(text);
            }
            Err(e) => warn!(error = %e, "dropping unencodable packet"),
        }
    }
}

fn encode_text(packet: &Packet) -> Result<String, CodecError> {
    Ok(codec::to_transport_text(&codec::encode(packet)?))
}

/// A running mesh node.
pub struct Node {
    engine: Arc<ProtocolEngine>,
    router: Router,
    tasks: Vec<JoinHandle<()>>,
}

impl Node {
    /// Start a leaf node on the given radio.
    pub fn spawn<R>(config: NodeConfig, radio: R) -> Result<Node, NodeError>
    where
        R: RadioTransport + 'static,
    {
        Node::start(config, radio, None::<crate::transport::MemBridge>)
    }

    /// Start a gateway node on the given radio and bridge.
    pub fn spawn_gateway<R, B>(config: NodeConfig, radio: R, bridge: B) -> Result<Node, NodeError>
    where
        R: RadioTransport + 'static,
        B: BridgeTransport + 'static,
    {
        Node::start(config, radio, Some(bridge))
    }

    fn start<R, B>(config: NodeConfig, radio: R, bridge: Option<B>) -> Result<Node, NodeError>
    where
        R: RadioTransport + 'static,
        B: BridgeTransport + 'static,
    {
        config.validate()?;

        let engine = Arc::new(ProtocolEngine::new(&config));
        let (radio_tx, radio_rx) = mpsc::unbounded_channel();
        let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);

        let (bridge_tx, bridge_rx) = if bridge.is_some() {
            let (tx, rx) = mpsc::unbounded_channel();
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };

        let router = Router {
            radio_tx,
            bridge_tx,
            events_tx,
        };

        info!(
            node_id = %config.node_id,
            role = %config.role,
            key = %config.preshared_key().fingerprint(),
            "node starting"
        );

        let mut tasks = Vec::new();
        tasks.push(tokio::spawn(radio_loop(
            Arc::clone(&engine),
            router.clone(),
            radio,
            radio_rx,
        )));

        if let (Some(bridge), Some(rx)) = (bridge, bridge_rx) {
            tasks.push(tokio::spawn(bridge_loop(
                Arc::clone(&engine),
                router.clone(),
                bridge,
                rx,
            )));
        }

        Ok(Node {
            engine,
            router,
            tasks,
        })
    }

    pub fn node_id(&self) -> &str {
        self.engine.node_id()
    }

    /// Subscribe to the node's event stream.
    pub fn events(&self) -> broadcast::Receiver<NodeEvent> {
        self.router.events_tx.subscribe()
    }

    /// Encrypt and broadcast a message; returns the packet id to watch for
    /// acknowledgment.
    pub fn send_message(&self, destination: &str, text: &str) -> Result<PacketId, NodeError> {
        let packet = self.engine.compose_message(destination, text);
        let id = packet.id;
        self.router.enqueue_radio(&packet);
        let _ = self.router.events_tx.send(NodeEvent::MessageSent {
            packet_id: id.to_string(),
            destination: destination.to_string(),
        });
        debug!(%id, %destination, "message queued");
        Ok(id)
    }

    /// Broadcast a Discover probe.
    pub fn send_discover(&self) -> Result<PacketId, NodeError> {
        let packet = self.engine.compose_discover();
        let id = packet.id;
        self.router.enqueue_radio(&packet);
        Ok(id)
    }

    /// Broadcast an Announce for this node.
    pub fn send_announce(&self) -> Result<PacketId, NodeError> {
        let packet = self.engine.compose_announce();
        let id = packet.id;
        self.router.enqueue_radio(&packet);
        Ok(id)
    }

    pub fn ack_status(&self, id: PacketId) -> AckStatus {
        self.engine.ack_status(id)
    }

    /// The `?ACK` table: every tracked send, oldest first.
    pub fn ack_report(&self) -> Vec<(PacketId, AckStatus)> {
        self.engine.ledger().ack_report()
    }

    /// Nodes learned via Announce.
    pub fn known_nodes(&self) -> Vec<String> {
        self.engine.registry().snapshot()
    }

    /// Stop all tasks. Idempotent; also runs on drop.
    pub fn shutdown(&self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn radio_loop<R>(
    engine: Arc<ProtocolEngine>,
    router: Router,
    mut radio: R,
    mut outbound: mpsc::UnboundedReceiver<String>,
) where
    R: RadioTransport,
{
    loop {
        // Drain queued sends first; the link is ours alone while we do.
        loop {
            match outbound.try_recv() {
                Ok(text) => {
                    if let Err(e) = radio.transmit(&text).await {
                        // No packet-level retry — the ledger records the
                        // silence and the operator sees PENDING.
                        warn!(error = %e, "radio transmit failed, frame dropped");
                    }
                }
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    debug!("outbound queue closed, radio loop exiting");
                    return;
                }
            }
        }

        match radio.poll().await {
            Ok(Some(frame)) => {
                debug!(rssi = frame.rssi, snr = frame.snr, "frame received");
                router.apply(engine.handle_radio_text(&frame.text));
            }
            Ok(None) => {}
            Err(TransportError::Closed) => {
                warn!("radio transport closed, radio loop exiting");
                return;
            }
            Err(e) => {
                // Transient I/O trouble: log and poll again next cycle
                warn!(error = %e, "radio poll failed");
            }
        }
    }
}

async fn bridge_loop<B>(
    engine: Arc<ProtocolEngine>,
    router: Router,
    mut bridge: B,
    mut uplink: mpsc::UnboundedReceiver<String>,
) where
    B: BridgeTransport,
{
    loop {
        loop {
            match uplink.try_recv() {
                Ok(text) => {
                    if let Err(e) = bridge.publish(&text).await {
                        warn!(error = %e, "bridge publish failed, frame dropped");
                    }
                }
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    debug!("uplink queue closed, bridge loop exiting");
                    return;
                }
            }
        }

        match bridge.poll().await {
            Ok(Some(text)) => router.apply(engine.handle_bridge_text(&text)),
            Ok(None) => {}
            Err(TransportError::Closed) => {
                warn!("bridge transport closed, bridge loop exiting");
                return;
            }
            Err(e) => {
                warn!(error = %e, "bridge poll failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::role::NodeRole;
    use crate::transport::MemRadioHub;
    use std::time::Duration;

    fn test_config(node_id: &str, role: NodeRole) -> NodeConfig {
        let mut config = NodeConfig::new(node_id, "password", role);
        config.jitter_min_ms = 1;
        config.jitter_max_ms = 5;
        config.poll_timeout_ms = 20;
        config
    }

    async fn wait_for<F>(rx: &mut broadcast::Receiver<NodeEvent>, mut pred: F) -> NodeEvent
    where
        F: FnMut(&NodeEvent) -> bool,
    {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let event = rx.recv().await.expect("event stream open");
                if pred(&event) {
                    return event;
                }
            }
        })
        .await
        .expect("expected event before timeout")
    }

    #[tokio::test]
    async fn test_message_and_ack_between_two_nodes() {
        let hub = MemRadioHub::new();
        let alpha = Node::spawn(
            test_config("ALPHA", NodeRole::Leaf),
            hub.endpoint(Duration::from_millis(20)),
        )
        .unwrap();
        let beta = Node::spawn(
            test_config("BETA", NodeRole::Leaf),
            hub.endpoint(Duration::from_millis(20)),
        )
        .unwrap();

        let mut alpha_events = alpha.events();
        let mut beta_events = beta.events();

        let id = alpha.send_message("BETA", "hi").unwrap();
        assert_eq!(alpha.ack_status(id), AckStatus::Pending);

        wait_for(&mut beta_events, |e| {
            matches!(e, NodeEvent::MessageReceived { content, .. } if content == "hi")
        })
        .await;

        wait_for(&mut alpha_events, |e| {
            matches!(e, NodeEvent::Acknowledged { packet_id } if *packet_id == id.to_string())
        })
        .await;
        assert_eq!(alpha.ack_status(id), AckStatus::Acked);
    }

    #[tokio::test]
    async fn test_message_to_absent_node_stays_pending() {
        let hub = MemRadioHub::new();
        let alpha = Node::spawn(
            test_config("ALPHA", NodeRole::Leaf),
            hub.endpoint(Duration::from_millis(20)),
        )
        .unwrap();
        let _beta = Node::spawn(
            test_config("BETA", NodeRole::Leaf),
            hub.endpoint(Duration::from_millis(20)),
        )
        .unwrap();

        let id = alpha.send_message("NOWHERE", "anyone there?").unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(alpha.ack_status(id), AckStatus::Pending);
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let hub = MemRadioHub::new();
        let result = Node::spawn(
            test_config("+BADID", NodeRole::Leaf),
            hub.endpoint(Duration::from_millis(20)),
        );
        assert!(matches!(result, Err(NodeError::Config(_))));
    }
}
