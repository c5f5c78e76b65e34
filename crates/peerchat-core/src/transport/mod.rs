//! Transport layer for discovery and chat datagrams.
//!
//! Discovery and sessions only ever talk to the [`Transport`] trait, so the
//! same state machines run over LAN broadcast ([`UdpTransport`]) or an
//! in-process overlay ([`MemoryNetwork`]).
//!
//! All sends are best-effort: unordered, unreliable, unacknowledged.

mod memory;
mod udp;

pub use memory::{MemoryAddr, MemoryNetwork, MemoryTransport, INBOX_CAPACITY};
pub use udp::UdpTransport;

use std::fmt::{Debug, Display};
use std::hash::Hash;

use async_trait::async_trait;

use crate::error::ChatResult;

/// Broadcast-capable datagram transport.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Opaque peer address
    type Addr: Clone + Debug + Display + Eq + Hash + Send + Sync + 'static;

    /// Send to every reachable peer on the discovery channel.
    async fn broadcast(&self, payload: &[u8]) -> ChatResult<()>;

    /// Send to one peer.
    async fn send_to(&self, addr: &Self::Addr, payload: &[u8]) -> ChatResult<()>;

    /// Wait for the next inbound datagram.
    ///
    /// Returns [`ChatError::TransportClosed`](crate::ChatError::TransportClosed)
    /// once [`close`](Transport::close) has been called, including for calls
    /// already waiting.
    async fn receive(&self) -> ChatResult<(Vec<u8>, Self::Addr)>;

    /// Release the underlying resources. Idempotent.
    async fn close(&self) -> ChatResult<()>;

    /// Address the transport is bound to.
    ///
    /// For a wildcard bind this is the unspecified address; peers see the
    /// source address of our datagrams instead.
    fn local_addr(&self) -> ChatResult<Self::Addr>;

    fn is_closed(&self) -> bool;
}
