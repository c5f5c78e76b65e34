//! UDP broadcast transport for LAN discovery.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::Transport;
use crate::error::{ChatError, ChatResult};
use crate::wire::MAX_DATAGRAM_SIZE;

/// UDP socket with `SO_BROADCAST` enabled.
///
/// Broadcasts go to `broadcast_target` (normally `255.255.255.255:<port>`).
/// If the OS refuses the broadcast, the datagram is retried on loopback so
/// nodes sharing a host still find each other.
pub struct UdpTransport {
    socket: Mutex<Option<Arc<UdpSocket>>>,
    local_addr: SocketAddr,
    broadcast_target: SocketAddr,
    closed: CancellationToken,
}

impl UdpTransport {
    /// Bind `bind_addr` and direct broadcasts at `broadcast_target`.
    pub async fn bind(bind_addr: SocketAddr, broadcast_target: SocketAddr) -> ChatResult<Self> {
        let socket = UdpSocket::bind(bind_addr).await?;
        socket.set_broadcast(true)?;
        let local_addr = socket.local_addr()?;
        info!(%local_addr, %broadcast_target, "UDP transport bound");

        Ok(Self {
            socket: Mutex::new(Some(Arc::new(socket))),
            local_addr,
            broadcast_target,
            closed: CancellationToken::new(),
        })
    }

    fn socket(&self) -> ChatResult<Arc<UdpSocket>> {
        self.socket.lock().clone().ok_or(ChatError::TransportClosed)
    }

    async fn send_raw(&self, socket: &UdpSocket, addr: SocketAddr, payload: &[u8]) -> ChatResult<()> {
        if payload.len() > MAX_DATAGRAM_SIZE {
            return Err(ChatError::Transport(format!(
                "Datagram too large: {} bytes",
                payload.len()
            )));
        }
        socket
            .send_to(payload, addr)
            .await
            .map_err(|e| ChatError::Transport(format!("Failed to send to {}: {}", addr, e)))?;
        Ok(())
    }
}

#[async_trait]
impl Transport for UdpTransport {
    type Addr = SocketAddr;

    async fn broadcast(&self, payload: &[u8]) -> ChatResult<()> {
        let socket = self.socket()?;
        match self.send_raw(&socket, self.broadcast_target, payload).await {
            Ok(()) => Ok(()),
            Err(e) => {
                let loopback = SocketAddr::new(Ipv4Addr::LOCALHOST.into(), self.broadcast_target.port());
                debug!(error = %e, %loopback, "Broadcast failed, retrying on loopback");
                self.send_raw(&socket, loopback, payload).await
            }
        }
    }

    async fn send_to(&self, addr: &SocketAddr, payload: &[u8]) -> ChatResult<()> {
        let socket = self.socket()?;
        self.send_raw(&socket, *addr, payload).await
    }

    async fn receive(&self) -> ChatResult<(Vec<u8>, SocketAddr)> {
        let socket = self.socket()?;
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        tokio::select! {
            _ = self.closed.cancelled() => Err(ChatError::TransportClosed),
            result = socket.recv_from(&mut buf) => {
                let (len, from) = result
                    .map_err(|e| ChatError::Transport(format!("Failed to receive: {}", e)))?;
                buf.truncate(len);
                Ok((buf, from))
            }
        }
    }

    async fn close(&self) -> ChatResult<()> {
        if self.socket.lock().take().is_some() {
            debug!(local_addr = %self.local_addr, "Closing UDP transport");
        }
        self.closed.cancel();
        Ok(())
    }

    fn local_addr(&self) -> ChatResult<SocketAddr> {
        Ok(self.local_addr)
    }

    fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}
