// RYLR998 LoRa module adapter — AT command/response line protocol
//
// The module speaks CRLF-terminated lines over a serial link:
//   -> AT+SEND=<addr>,<len>,<data>      (addr 0 = broadcast)
//   <- +OK | +ERR=<code>
//   <- +RCV=<addr>,<len>,<data>,<rssi>,<snr>   (unsolicited, inbound frame)
//
// The link is half-duplex at the command level: a command and its response
// must not interleave with another command. That is enforced structurally —
// one task owns the adapter, and transmit() holds it until +OK/+ERR lands.
// Frames that arrive while we wait for a command response are buffered and
// handed out by the next poll().
//
// Opening and baud-configuring the serial device itself belongs to the
// bootstrap layer; the adapter works over any async byte stream.

use super::{RadioFrame, RadioTransport, TransportError};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::time::timeout;
use tracing::{debug, trace, warn};

/// Broadcast address on the LoRa link.
const BROADCAST_ADDR: u16 = 0;

/// RF configuration applied at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rylr998Config {
    /// This module's link-layer address
    pub address: u16,
    /// Network id shared by the mesh
    pub network_id: u8,
    /// Spreading factor
    pub spreading_factor: u8,
    /// Bandwidth code
    pub bandwidth: u8,
    /// Coding rate
    pub coding_rate: u8,
    /// Preamble length
    pub preamble: u8,
    /// Carrier frequency, Hz
    pub band_hz: u64,
}

impl Default for Rylr998Config {
    fn default() -> Self {
        Rylr998Config {
            address: 0,
            network_id: 18,
            spreading_factor: 11,
            bandwidth: 9,
            coding_rate: 4,
            preamble: 12,
            band_hz: 902_687_500,
        }
    }
}

impl Rylr998Config {
    /// The startup command sequence, in order.
    pub fn init_commands(&self) -> Vec<String> {
        vec![
            format!("AT+ADDRESS={}", self.address),
            format!("AT+NETWORKID={}", self.network_id),
            format!(
                "AT+PARAMETER={},{},{},{}",
                self.spreading_factor, self.bandwidth, self.coding_rate, self.preamble
            ),
            format!("AT+BAND={}", self.band_hz),
        ]
    }
}

/// A parsed line from the module.
#[derive(Debug, Clone, PartialEq)]
pub enum ModuleResponse {
    Ok,
    Error(u32),
    Ready,
    Frame(RadioFrame),
    Other(String),
}

/// Build the send command for a payload.
pub fn send_command(data: &str) -> String {
    format!("AT+SEND={},{},{}", BROADCAST_ADDR, data.len(), data)
}

/// Parse one line from the module. `None` for blank lines.
pub fn parse_line(line: &str) -> Option<ModuleResponse> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    if line == "+OK" {
        return Some(ModuleResponse::Ok);
    }
    if line == "+READY" {
        return Some(ModuleResponse::Ready);
    }
    if let Some(code) = line.strip_prefix("+ERR=") {
        return Some(ModuleResponse::Error(code.parse().unwrap_or(0)));
    }
    if let Some(body) = line.strip_prefix("+RCV=") {
        return Some(parse_rcv(body));
    }
    Some(ModuleResponse::Other(line.to_string()))
}

/// Parse the body of `+RCV=<addr>,<len>,<data>,<rssi>,<snr>`.
///
/// The data field is base64 and never contains commas, so a plain split is
/// safe. Malformed frames degrade to `Other` so the caller can log them.
fn parse_rcv(body: &str) -> ModuleResponse {
    let parts: Vec<&str> = body.split(',').collect();
    if parts.len() < 5 {
        return ModuleResponse::Other(format!("+RCV={}", body));
    }
    let rssi = parts[3].trim().parse().unwrap_or(0);
    let snr = parts[4].trim().parse().unwrap_or(0.0);
    ModuleResponse::Frame(RadioFrame {
        text: parts[2].to_string(),
        rssi,
        snr,
    })
}

/// The radio transport over an RYLR998 module.
pub struct Rylr998Radio<S> {
    stream: BufReader<S>,
    /// Frames that arrived while a command response was pending
    pending: VecDeque<RadioFrame>,
    poll_timeout: Duration,
    command_timeout: Duration,
}

impl<S> Rylr998Radio<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S, poll_timeout: Duration) -> Self {
        Rylr998Radio {
            stream: BufReader::new(stream),
            pending: VecDeque::new(),
            poll_timeout,
            command_timeout: Duration::from_secs(2),
        }
    }

    /// Apply the RF configuration, expecting +OK per command.
    pub async fn init(&mut self, config: &Rylr998Config) -> Result<(), TransportError> {
        for command in config.init_commands() {
            self.command(&command).await?;
        }
        debug!(?config, "radio module configured");
        Ok(())
    }

    async fn write_line(&mut self, line: &str) -> Result<(), TransportError> {
        self.stream.write_all(line.as_bytes()).await?;
        self.stream.write_all(b"\r\n").await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Send one command and wait for its +OK/+ERR, buffering any frames
    /// that arrive in between.
    async fn command(&mut self, line: &str) -> Result<(), TransportError> {
        trace!(%line, "-> module");
        self.write_line(line).await?;

        let deadline = tokio::time::Instant::now() + self.command_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Err(TransportError::Timeout);
            }
            match self.read_response(remaining).await? {
                Some(ModuleResponse::Ok) => return Ok(()),
                Some(ModuleResponse::Error(code)) => {
                    return Err(TransportError::ModuleError(code))
                }
                Some(ModuleResponse::Frame(frame)) => self.pending.push_back(frame),
                Some(ModuleResponse::Ready) | Some(ModuleResponse::Other(_)) | None => continue,
            }
        }
    }

    async fn read_response(
        &mut self,
        wait: Duration,
    ) -> Result<Option<ModuleResponse>, TransportError> {
        let mut line = String::new();
        match timeout(wait, self.stream.read_line(&mut line)).await {
            Ok(Ok(0)) => Err(TransportError::Closed),
            Ok(Ok(_)) => {
                trace!(line = %line.trim_end(), "<- module");
                Ok(parse_line(&line))
            }
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Ok(None),
        }
    }
}

#[async_trait]
impl<S> RadioTransport for Rylr998Radio<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn transmit(&mut self, text: &str) -> Result<(), TransportError> {
        self.command(&send_command(text)).await
    }

    async fn poll(&mut self) -> Result<Option<RadioFrame>, TransportError> {
        if let Some(frame) = self.pending.pop_front() {
            return Ok(Some(frame));
        }

        let deadline = tokio::time::Instant::now() + self.poll_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            match self.read_response(remaining).await? {
                Some(ModuleResponse::Frame(frame)) => return Ok(Some(frame)),
                Some(ModuleResponse::Other(line)) => {
                    warn!(%line, "unexpected line from module");
                    continue;
                }
                Some(_) | None => continue,
            }
        }
    }
}
