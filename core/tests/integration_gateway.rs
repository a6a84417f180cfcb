// Gateway integration — radio mesh to bridge uplink and back, plus the
// relay collaborator closing the loop

use async_trait::async_trait;
use farlink_core::codec::{self, PacketPayload};
use farlink_core::node::Node;
use farlink_core::relay::{AssistantClient, RelayError, RelayService, SmsGateway};
use farlink_core::transport::{mem_bridge, MemRadioHub};
use farlink_core::{Cipher, NodeConfig, NodeEvent, NodeRole, PresharedKey};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

fn leaf(node_id: &str) -> NodeConfig {
    let mut config = NodeConfig::new(node_id, "password", NodeRole::Leaf);
    config.jitter_min_ms = 1;
    config.jitter_max_ms = 10;
    config.poll_timeout_ms = 20;
    config
}

fn gateway(node_id: &str) -> NodeConfig {
    NodeConfig {
        role: NodeRole::Gateway,
        ..leaf(node_id)
    }
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
async fn external_destination_is_decrypted_locally_and_bridged_encrypted() {
    let hub = MemRadioHub::new();
    let (bridge, mut broker) = mem_bridge(Duration::from_millis(20));

    let field = Node::spawn(leaf("FIELD01"), hub.endpoint(Duration::from_millis(20))).unwrap();
    let gate = Node::spawn_gateway(
        gateway("GATE01"),
        hub.endpoint(Duration::from_millis(20)),
        bridge,
    )
    .unwrap();
    let mut gate_events = gate.events();

    let id = field
        .send_message("+15551234567", "send help to the north ridge")
        .unwrap();

    // The gateway delivers locally like any addressed node...
    wait_for(&mut gate_events, |e| {
        matches!(
            e,
            NodeEvent::MessageReceived { content, .. }
                if content == "send help to the north ridge"
        )
    })
    .await;

    // ...and forwards the original, still-encrypted packet upstream
    let uplink = tokio::time::timeout(Duration::from_secs(5), broker.recv_uplink())
        .await
        .expect("uplink frame before timeout")
        .expect("bridge open");

    let packet = codec::decode(&codec::from_transport_text(&uplink).unwrap()).unwrap();
    assert_eq!(packet.id, id);
    match &packet.payload {
        PacketPayload::Network(msg) => {
            assert_eq!(msg.sender, "FIELD01");
            assert_eq!(msg.destination, "+15551234567");
            // Still ciphertext on the wire; only the shared key opens it
            let cipher = Cipher::new(PresharedKey::derive("password"));
            assert_eq!(
                cipher.decrypt(&msg.ciphertext).unwrap(),
                b"send help to the north ridge"
            );
        }
        other => panic!("Expected network payload, got {:?}", other),
    }
}

#[tokio::test]
async fn downlink_frames_are_rebroadcast_unchanged() {
    let hub = MemRadioHub::new();
    let (bridge, broker) = mem_bridge(Duration::from_millis(20));

    let field = Node::spawn(leaf("FIELD01"), hub.endpoint(Duration::from_millis(20))).unwrap();
    let _gate = Node::spawn_gateway(
        gateway("GATE01"),
        hub.endpoint(Duration::from_millis(20)),
        bridge,
    )
    .unwrap();
    let mut field_events = field.events();

    // The broker pushes a reply packet down; the gateway must not decrypt
    // or rewrite it, just put it on the air
    let cipher = Cipher::new(PresharedKey::derive("password"));
    let reply = farlink_core::Packet::network("Server", "FIELD01", cipher.encrypt(b"42"));
    let text = codec::to_transport_text(&codec::encode(&reply).unwrap());
    broker.send_downlink(&text).unwrap();

    let received = wait_for(&mut field_events, |e| {
        matches!(e, NodeEvent::MessageReceived { .. })
    })
    .await;
    match received {
        NodeEvent::MessageReceived {
            packet_id,
            from,
            content,
        } => {
            assert_eq!(packet_id, reply.id.to_string());
            assert_eq!(from, "Server");
            assert_eq!(content, "42");
        }
        other => panic!("Unexpected event: {:?}", other),
    }
}

#[derive(Clone, Default)]
struct RecordingSms {
    sent: Arc<Mutex<Vec<(String, String)>>>,
}

#[async_trait]
impl SmsGateway for RecordingSms {
    async fn deliver(&self, number: &str, text: &str) -> Result<(), RelayError> {
        self.sent.lock().push((number.to_string(), text.to_string()));
        Ok(())
    }
}

struct CannedAssistant {
    answer: String,
}

#[async_trait]
impl AssistantClient for CannedAssistant {
    async fn query(&self, _prompt: &str) -> Result<String, RelayError> {
        Ok(self.answer.clone())
    }
}

#[tokio::test]
async fn assistant_query_round_trip_through_relay() {
    let hub = MemRadioHub::new();
    let (bridge, mut broker) = mem_bridge(Duration::from_millis(20));

    let field = Node::spawn(leaf("FIELD01"), hub.endpoint(Duration::from_millis(20))).unwrap();
    let _gate = Node::spawn_gateway(
        gateway("GATE01"),
        hub.endpoint(Duration::from_millis(20)),
        bridge,
    )
    .unwrap();
    let mut field_events = field.events();

    let answer = "clear skies tonight, sunset at nineteen forty, moonrise near midnight";
    let relay = RelayService::new(
        PresharedKey::derive("password"),
        RecordingSms::default(),
        CannedAssistant {
            answer: answer.to_string(),
        },
    );

    field.send_message("+Q", "weather tonight?").unwrap();

    // Broker side: hand the uplink frame to the relay, push its replies down
    let uplink = tokio::time::timeout(Duration::from_secs(5), broker.recv_uplink())
        .await
        .expect("uplink frame before timeout")
        .expect("bridge open");
    let replies = relay.handle_upstream(&uplink).await.unwrap();
    assert_eq!(replies.len(), answer.chars().count().div_ceil(45));
    for reply in &replies {
        broker.send_downlink(reply).unwrap();
    }

    // The querying node reassembles the chunks in reply order
    let mut reassembled = String::new();
    for _ in 0..replies.len() {
        let event = wait_for(&mut field_events, |e| {
            matches!(e, NodeEvent::MessageReceived { from, .. } if from == "Server")
        })
        .await;
        if let NodeEvent::MessageReceived { content, .. } = event {
            reassembled.push_str(&content);
        }
    }
    assert_eq!(reassembled, answer);
}

#[tokio::test]
async fn phone_destination_reaches_sms_gateway() {
    let sms = RecordingSms::default();
    let relay = RelayService::new(
        PresharedKey::derive("password"),
        sms.clone(),
        CannedAssistant {
            answer: String::new(),
        },
    );

    let cipher = Cipher::new(PresharedKey::derive("password"));
    let packet =
        farlink_core::Packet::network("FIELD01", "+15557654321", cipher.encrypt(b"checking in"));
    let frame = codec::to_transport_text(&codec::encode(&packet).unwrap());

    let replies = relay.handle_upstream(&frame).await.unwrap();
    assert!(replies.is_empty());
    assert_eq!(
        sms.sent.lock().as_slice(),
        &[("+15557654321".to_string(), "checking in".to_string())]
    );
}
