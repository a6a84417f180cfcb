// UDP broadcast transport — a radio-shaped link for LAN demos
//
// Every node binds the same port and broadcasts datagrams to it; the mesh
// semantics (unaddressed broadcast, application-layer filtering) match the
// radio exactly. Useful for exercising a multi-node mesh without hardware.
//
// A host receives its own broadcasts back, which the real radio never does,
// so frames whose source matches this host are dropped before they reach
// the engine.

use super::{RadioFrame, RadioTransport, TransportError};
use async_trait::async_trait;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::timeout;

const MAX_DATAGRAM: usize = 8 * 1024;

/// Broadcast radio over a LAN UDP port.
pub struct UdpRadio {
    socket: UdpSocket,
    broadcast_to: SocketAddr,
    local_ip: IpAddr,
    local_port: u16,
    poll_timeout: Duration,
}

impl UdpRadio {
    /// Bind the shared mesh port and enable broadcast.
    pub async fn bind(port: u16, poll_timeout: Duration) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, port)).await?;
        socket.set_broadcast(true)?;
        let local_port = socket.local_addr()?.port();

        Ok(UdpRadio {
            socket,
            broadcast_to: SocketAddr::new(IpAddr::V4(Ipv4Addr::BROADCAST), port),
            local_ip: host_ip(),
            local_port,
            poll_timeout,
        })
    }

    fn is_own_echo(&self, source: SocketAddr) -> bool {
        is_own_echo(source, self.local_ip, self.local_port)
    }
}

fn is_own_echo(source: SocketAddr, local_ip: IpAddr, local_port: u16) -> bool {
    source.port() == local_port && (source.ip() == local_ip || source.ip().is_loopback())
}

#[async_trait]
impl RadioTransport for UdpRadio {
    async fn transmit(&mut self, text: &str) -> Result<(), TransportError> {
        self.socket
            .send_to(text.as_bytes(), self.broadcast_to)
            .await
            .map_err(|e| TransportError::Send(e.to_string()))?;
        Ok(())
    }

    async fn poll(&mut self) -> Result<Option<RadioFrame>, TransportError> {
        let mut buf = [0u8; MAX_DATAGRAM];
        let deadline = tokio::time::Instant::now() + self.poll_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            match timeout(remaining, self.socket.recv_from(&mut buf)).await {
                Ok(Ok((len, source))) => {
                    if self.is_own_echo(source) {
                        continue;
                    }
                    match std::str::from_utf8(&buf[..len]) {
                        Ok(text) => {
                            return Ok(Some(RadioFrame::unmeasured(text.trim_end().to_string())))
                        }
                        Err(_) => {
                            tracing::debug!(%source, "dropping non-text datagram");
                            continue;
                        }
                    }
                }
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => return Ok(None),
            }
        }
    }
}

/// Best-effort discovery of this host's outbound IP.
///
/// Connecting a UDP socket sends nothing; it only fixes the local address
/// the OS would route from. Falls back to loopback when there is no route.
fn host_ip() -> IpAddr {
    std::net::UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
        .and_then(|probe| {
            probe.connect((Ipv4Addr::new(192, 0, 2, 1), 9))?;
            probe.local_addr()
        })
        .map(|addr| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}
