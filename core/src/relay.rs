// Upstream relay — the broker-side collaborator that terminates external
// deliveries
//
// Gateways publish still-encrypted packets upstream; this service decrypts
// them with the same mesh key and dispatches by destination sigil:
//   +Q...  -> assistant query; the answer comes back as chunked, individually
//             re-encrypted NetworkMessage packets addressed to the sender
//   +...   -> telephony delivery
//
// The telephony and assistant clients stay behind traits; only the chunking
// and addressing contract is fixed here, because every mesh node depends on
// its exact shape.

use crate::codec::{self, Destination, Packet, PacketPayload};
use crate::crypto::{Cipher, PresharedKey};
use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Reply chunk length, characters.
///
/// Replies ride the radio downlink, so each chunk must fit a LoRa frame
/// after encryption and base64 framing. 45 is the deployed value — changing
/// it breaks no decoder, but longer chunks stop fitting on the air.
pub const REPLY_CHUNK_LEN: usize = 45;

/// Node id the relay signs its replies with.
pub const DEFAULT_REPLY_SOURCE: &str = "Server";

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Malformed upstream frame: {0}")]
    Frame(String),

    #[error("Upstream packet could not be decrypted: {0}")]
    Cipher(String),

    #[error("Telephony delivery failed: {0}")]
    Sms(String),

    #[error("Assistant query failed: {0}")]
    Assistant(String),
}

/// Telephony delivery client.
#[async_trait]
pub trait SmsGateway: Send + Sync {
    async fn deliver(&self, number: &str, text: &str) -> Result<(), RelayError>;
}

/// Generative-assistant query client.
#[async_trait]
pub trait AssistantClient: Send + Sync {
    async fn query(&self, prompt: &str) -> Result<String, RelayError>;
}

/// The relay dispatch engine.
pub struct RelayService<S, A> {
    cipher: Cipher,
    sms: S,
    assistant: A,
    reply_source: String,
}

impl<S, A> RelayService<S, A>
where
    S: SmsGateway,
    A: AssistantClient,
{
    pub fn new(key: PresharedKey, sms: S, assistant: A) -> Self {
        RelayService {
            cipher: Cipher::new(key),
            sms,
            assistant,
            reply_source: DEFAULT_REPLY_SOURCE.to_string(),
        }
    }

    pub fn with_reply_source(mut self, reply_source: &str) -> Self {
        self.reply_source = reply_source.to_string();
        self
    }

    /// Handle one frame from the upstream topic.
    ///
    /// Returns the transport-text reply frames to publish back (empty for
    /// telephony deliveries and ignored packet kinds).
    pub async fn handle_upstream(&self, text: &str) -> Result<Vec<String>, RelayError> {
        let bytes =
            codec::from_transport_text(text).map_err(|e| RelayError::Frame(e.to_string()))?;
        let packet = codec::decode(&bytes).map_err(|e| RelayError::Frame(e.to_string()))?;

        let PacketPayload::Network(msg) = &packet.payload else {
            debug!(id = %packet.id, kind = packet.kind_name(), "ignoring non-message upstream packet");
            return Ok(Vec::new());
        };

        let content = self
            .cipher
            .decrypt(&msg.ciphertext)
            .map_err(|e| RelayError::Cipher(e.to_string()))
            .and_then(|bytes| {
                String::from_utf8(bytes)
                    .map_err(|_| RelayError::Cipher("plaintext is not UTF-8".to_string()))
            })?;

        match Destination::parse(&msg.destination) {
            Destination::AssistantQuery => {
                info!(id = %packet.id, from = %msg.sender, "assistant query");
                let answer = self.assistant.query(content.trim()).await?;
                Ok(self.chunked_replies(&msg.sender, &answer))
            }
            Destination::Phone(number) => {
                info!(id = %packet.id, %number, "telephony delivery");
                self.sms.deliver(&number, &content).await?;
                Ok(Vec::new())
            }
            Destination::Node(node) => {
                // Node-to-node traffic does not belong upstream; a gateway
                // only publishes external destinations.
                warn!(id = %packet.id, %node, "node-addressed packet on the uplink, ignoring");
                Ok(Vec::new())
            }
        }
    }

    /// Split an answer into bounded chunks, each its own encrypted packet
    /// addressed back to the querying node.
    fn chunked_replies(&self, recipient: &str, answer: &str) -> Vec<String> {
        chunk_text(answer, REPLY_CHUNK_LEN)
            .into_iter()
            .filter_map(|chunk| {
                let ciphertext = self.cipher.encrypt(chunk.as_bytes());
                let reply = Packet::network(&self.reply_source, recipient, ciphertext);
                match codec::encode(&reply) {
                    Ok(bytes) => Some(codec::to_transport_text(&bytes)),
                    Err(e) => {
                        warn!(error = %e, "dropping unencodable reply chunk");
                        None
                    }
                }
            })
            .collect()
    }
}

/// Split on character boundaries into chunks of at most `chunk_len` chars.
fn chunk_text(text: &str, chunk_len: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(chunk_len.max(1))
        .map(|chunk| chunk.iter().collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::PacketId;
    use parking_lot::Mutex;

    struct RecordingSms {
        sent: Mutex<Vec<(String, String)>>,
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

    fn service(answer: &str) -> RelayService<RecordingSms, CannedAssistant> {
        RelayService::new(
            PresharedKey::derive("password"),
            RecordingSms {
                sent: Mutex::new(Vec::new()),
            },
            CannedAssistant {
                answer: answer.to_string(),
            },
        )
    }

    fn uplink_frame(sender: &str, destination: &str, content: &str) -> String {
        let cipher = Cipher::new(PresharedKey::derive("password"));
        let packet = Packet::network(sender, destination, cipher.encrypt(content.as_bytes()));
        codec::to_transport_text(&codec::encode(&packet).unwrap())
    }

    #[tokio::test]
    async fn test_sms_dispatch() {
        let relay = service("unused");
        let frame = uplink_frame("FIELD01", "+15551234567", "need pickup at ridge");

        let replies = relay.handle_upstream(&frame).await.unwrap();
        assert!(replies.is_empty());
        assert_eq!(
            relay.sms.sent.lock().as_slice(),
            &[(
                "+15551234567".to_string(),
                "need pickup at ridge".to_string()
            )]
        );
    }

    #[tokio::test]
    async fn test_assistant_reply_is_chunked_and_addressed() {
        let answer = "x".repeat(100);
        let relay = service(&answer);
        let frame = uplink_frame("FIELD01", "+Q", "how long until sunset");

        let replies = relay.handle_upstream(&frame).await.unwrap();
        // ceil(100 / 45) = 3 chunks
        assert_eq!(replies.len(), 3);

        let cipher = Cipher::new(PresharedKey::derive("password"));
        let mut ids: Vec<PacketId> = Vec::new();
        let mut reassembled = String::new();
        for reply in &replies {
            let packet = codec::decode(&codec::from_transport_text(reply).unwrap()).unwrap();
            ids.push(packet.id);
            match &packet.payload {
                PacketPayload::Network(msg) => {
                    assert_eq!(msg.sender, DEFAULT_REPLY_SOURCE);
                    assert_eq!(msg.destination, "FIELD01");
                    let chunk = cipher.decrypt(&msg.ciphertext).unwrap();
                    assert!(chunk.len() <= REPLY_CHUNK_LEN);
                    reassembled.push_str(std::str::from_utf8(&chunk).unwrap());
                }
                other => panic!("Expected network payload, got {:?}", other),
            }
        }
        assert_eq!(reassembled, answer);

        // Every chunk has its own fresh packet id
        ids.sort_by_key(|id| id.to_string());
        ids.dedup();
        assert_eq!(ids.len(), 3);
    }

    #[tokio::test]
    async fn test_short_answer_single_chunk() {
        let relay = service("42");
        let frame = uplink_frame("FIELD01", "+Qmeaning", "meaning of life");
        let replies = relay.handle_upstream(&frame).await.unwrap();
        assert_eq!(replies.len(), 1);
    }

    #[tokio::test]
    async fn test_node_addressed_uplink_ignored() {
        let relay = service("unused");
        let frame = uplink_frame("FIELD01", "FIELD02", "misrouted");
        let replies = relay.handle_upstream(&frame).await.unwrap();
        assert!(replies.is_empty());
        assert!(relay.sms.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn test_non_message_packets_ignored() {
        let relay = service("unused");
        let probe = Packet::discover();
        let frame = codec::to_transport_text(&codec::encode(&probe).unwrap());
        let replies = relay.handle_upstream(&frame).await.unwrap();
        assert!(replies.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_frame_is_an_error() {
        let relay = service("unused");
        assert!(matches!(
            relay.handle_upstream("@@definitely not base64@@").await,
            Err(RelayError::Frame(_))
        ));
    }

    #[tokio::test]
    async fn test_corrupt_ciphertext_is_a_cipher_error() {
        let relay = service("unused");
        // Truncated blob: shorter than IV + one block
        let packet = Packet::network("FIELD01", "+15551234567", vec![0xAA; 7]);
        let frame = codec::to_transport_text(&codec::encode(&packet).unwrap());

        assert!(matches!(
            relay.handle_upstream(&frame).await,
            Err(RelayError::Cipher(_))
        ));
        assert!(relay.sms.sent.lock().is_empty());
    }

    #[test]
    fn test_chunk_text_boundaries() {
        assert_eq!(chunk_text("", 45), Vec::<String>::new());
        assert_eq!(chunk_text("abc", 45), vec!["abc"]);
        let exact = "y".repeat(90);
        assert_eq!(chunk_text(&exact, 45).len(), 2);
        // Multi-byte characters split on char boundaries, not bytes
        let accented = "é".repeat(46);
        let chunks = chunk_text(&accented, 45);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].chars().count(), 45);
        assert_eq!(chunks[1].chars().count(), 1);
    }
}
