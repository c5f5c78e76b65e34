//! In-process overlay transport.
//!
//! A [`MemoryNetwork`] is a hub that endpoints attach to. It plays the role
//! of an overlay directory: broadcast reaches every other attached endpoint,
//! `send_to` reaches one. Inboxes are bounded and drop on overflow, like a
//! real datagram socket.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::Transport;
use crate::error::{ChatError, ChatResult};

/// Datagrams buffered per endpoint before new ones are dropped
pub const INBOX_CAPACITY: usize = 1024;

type Datagram = (Vec<u8>, MemoryAddr);

/// Address of an endpoint on a [`MemoryNetwork`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MemoryAddr(pub u64);

impl fmt::Display for MemoryAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mem:{}", self.0)
    }
}

/// Shared hub connecting [`MemoryTransport`] endpoints.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    endpoints: Arc<Mutex<HashMap<MemoryAddr, mpsc::Sender<Datagram>>>>,
    next_id: Arc<AtomicU64>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a new endpoint with a fresh address.
    pub fn attach(&self) -> MemoryTransport {
        let addr = MemoryAddr(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
        self.endpoints.lock().insert(addr, tx);
        debug!(%addr, "Endpoint attached to memory network");

        MemoryTransport {
            addr,
            network: self.clone(),
            inbox: tokio::sync::Mutex::new(rx),
            closed: CancellationToken::new(),
        }
    }

    /// Number of endpoints currently attached.
    pub fn endpoint_count(&self) -> usize {
        self.endpoints.lock().len()
    }

    fn deliver(&self, to: MemoryAddr, datagram: Datagram) {
        let sender = self.endpoints.lock().get(&to).cloned();
        match sender {
            Some(sender) => {
                if sender.try_send(datagram).is_err() {
                    trace!(%to, "Inbox full or closed, datagram dropped");
                }
            }
            None => trace!(%to, "No such endpoint, datagram dropped"),
        }
    }

    fn peers_of(&self, addr: MemoryAddr) -> Vec<MemoryAddr> {
        self.endpoints
            .lock()
            .keys()
            .copied()
            .filter(|other| *other != addr)
            .collect()
    }

    fn detach(&self, addr: MemoryAddr) -> bool {
        self.endpoints.lock().remove(&addr).is_some()
    }
}

/// One endpoint on a [`MemoryNetwork`].
pub struct MemoryTransport {
    addr: MemoryAddr,
    network: MemoryNetwork,
    inbox: tokio::sync::Mutex<mpsc::Receiver<Datagram>>,
    closed: CancellationToken,
}

impl MemoryTransport {
    pub fn addr(&self) -> MemoryAddr {
        self.addr
    }

    fn ensure_open(&self) -> ChatResult<()> {
        if self.closed.is_cancelled() {
            Err(ChatError::TransportClosed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    type Addr = MemoryAddr;

    async fn broadcast(&self, payload: &[u8]) -> ChatResult<()> {
        self.ensure_open()?;
        for peer in self.network.peers_of(self.addr) {
            self.network.deliver(peer, (payload.to_vec(), self.addr));
        }
        Ok(())
    }

    async fn send_to(&self, addr: &MemoryAddr, payload: &[u8]) -> ChatResult<()> {
        self.ensure_open()?;
        self.network.deliver(*addr, (payload.to_vec(), self.addr));
        Ok(())
    }

    async fn receive(&self) -> ChatResult<(Vec<u8>, MemoryAddr)> {
        self.ensure_open()?;
        let mut inbox = tokio::select! {
            _ = self.closed.cancelled() => return Err(ChatError::TransportClosed),
            inbox = self.inbox.lock() => inbox,
        };
        tokio::select! {
            _ = self.closed.cancelled() => Err(ChatError::TransportClosed),
            datagram = inbox.recv() => datagram.ok_or(ChatError::TransportClosed),
        }
    }

    async fn close(&self) -> ChatResult<()> {
        if self.network.detach(self.addr) {
            debug!(addr = %self.addr, "Endpoint detached from memory network");
        }
        self.closed.cancel();
        Ok(())
    }

    fn local_addr(&self) -> ChatResult<MemoryAddr> {
        Ok(self.addr)
    }

    fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}
