//! peerchat Core Library
//!
//! Serverless username discovery and encrypted one-to-one messaging.
//!
//! ## Overview
//!
//! Every node periodically broadcasts a small presence announcement carrying
//! its username and X25519 public key. Nodes that share a discovery
//! passphrase can read each other's announcements and build a live directory
//! of peers; everyone else sees opaque bytes. Once a peer is known, a node
//! opens a session, seals a fresh ChaCha20-Poly1305 key to the peer's public
//! key, and exchanges encrypted chat messages over the same transport.
//!
//! ## Core Principles
//!
//! - **No directory server**: presence is learned from broadcasts and expires
//! - **Best-effort discovery**: hostile or garbled datagrams are dropped, never fatal
//! - **Transport-agnostic**: UDP broadcast and the in-memory overlay share one trait
//!
//! ## Quick Start
//!
//! ```ignore
//! use peerchat_core::{Node, NodeConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut node = Node::bind_udp(NodeConfig::new("alice").with_passphrase("x")).await?;
//!     node.register()?;
//!
//!     tokio::time::sleep(std::time::Duration::from_secs(6)).await;
//!     println!("peers: {:?}", node.list_peers());
//!
//!     node.send("bob", "hello").await?;
//!     node.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod announcement;
pub mod config;
pub mod crypto;
pub mod discovery;
pub mod error;
pub mod identity;
pub mod node;
pub mod presence;
pub mod session;
pub mod transport;
pub mod wire;

// Re-exports
pub use announcement::{Announcement, DiscoveryMode};
pub use config::{NodeConfig, UdpConfig};
pub use crypto::{SessionCrypto, SymmetricKey};
pub use discovery::{DiscoveryConfig, DiscoveryService, DiscoveryState, Ingest, RoutedFrame};
pub use error::{ChatError, ChatResult};
pub use identity::{ExchangeKeypair, ExchangePublicKey, Identity};
pub use node::{InboundContent, InboundMessage, Node, NodeState};
pub use presence::{PeerRecord, PresenceDirectory, SharedDirectory};
pub use session::{SecureSession, SessionHandle, SessionState};
pub use transport::{MemoryAddr, MemoryNetwork, MemoryTransport, Transport, UdpTransport};
pub use wire::{Frame, WIRE_VERSION};
