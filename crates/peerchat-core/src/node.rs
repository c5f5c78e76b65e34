//! Node - the primary entry point for peerchat
//!
//! A [`Node`] owns one [`DiscoveryService`], the presence directory it feeds,
//! and one [`SecureSession`] per peer it talks to.
//!
//! # Example
//!
//! ```ignore
//! use peerchat_core::{Node, NodeConfig};
//!
//! let config = NodeConfig::new("alice").with_passphrase("x");
//! let mut node = Node::bind_udp(config).await?;
//! node.register()?;
//!
//! // ...wait for announcements...
//! for peer in node.list_peers() {
//!     println!("{}", peer);
//! }
//!
//! node.send("bob", "hello").await?;
//! while let Some(message) = node.next_message().await {
//!     println!("{}: {}", message.from, message.content);
//! }
//!
//! node.shutdown().await;
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::NodeConfig;
use crate::crypto::SymmetricKey;
use crate::discovery::{DiscoveryService, RoutedFrame, INBOUND_QUEUE_CAPACITY};
use crate::error::{ChatError, ChatResult};
use crate::identity::{validate_username, Identity};
use crate::presence::{PeerRecord, PresenceDirectory, SharedDirectory};
use crate::session::{SecureSession, SessionHandle};
use crate::transport::{Transport, UdpTransport};
use crate::wire::Frame;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// Built but not yet announcing
    Created,
    /// Discovery running
    Registered,
    /// Shut down; terminal
    ShutDown,
}

/// Body of an inbound chat message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundContent {
    Text(String),
    /// Could not be decrypted with the session key (or there is no session)
    Undecryptable(Vec<u8>),
}

impl fmt::Display for InboundContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InboundContent::Text(text) => f.write_str(text),
            InboundContent::Undecryptable(bytes) => {
                write!(f, "<undecryptable message, {} bytes>", bytes.len())
            }
        }
    }
}

/// A chat message delivered to the local user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage<A> {
    /// Claimed sender username
    pub from: String,
    /// Transport address the datagram came from
    pub address: A,
    pub content: InboundContent,
}

/// Discovery plus sessions over one transport.
pub struct Node<T: Transport> {
    identity: Arc<Identity>,
    config: NodeConfig,
    transport: Arc<T>,
    directory: Option<SharedDirectory<T::Addr>>,
    discovery: Option<DiscoveryService<T>>,
    sessions: HashMap<String, SessionHandle<T>>,
    inbound_rx: Option<mpsc::Receiver<RoutedFrame<T::Addr>>>,
    state: NodeState,
}

impl Node<UdpTransport> {
    /// Bind the UDP transport described by `config.udp` and build a node on it.
    pub async fn bind_udp(config: NodeConfig) -> ChatResult<Self> {
        config.validate()?;
        let transport =
            UdpTransport::bind(config.udp.bind_addr(), config.udp.broadcast_target()).await?;
        Self::new(config, transport)
    }
}

impl<T: Transport> Node<T> {
    /// Create a node with a freshly generated identity.
    pub fn new(config: NodeConfig, transport: T) -> ChatResult<Self> {
        config.validate()?;
        let identity = Identity::generate(config.username.trim())?;
        Self::with_identity(config, identity, transport)
    }

    /// Create a node around an existing identity.
    ///
    /// The identity's username takes precedence over `config.username`.
    pub fn with_identity(config: NodeConfig, identity: Identity, transport: T) -> ChatResult<Self> {
        config.validate()?;
        info!(
            username = %identity.username(),
            fingerprint = %identity.public_key().fingerprint(),
            "Node created"
        );
        Ok(Self {
            identity: Arc::new(identity),
            config,
            transport: Arc::new(transport),
            directory: None,
            discovery: None,
            sessions: HashMap::new(),
            inbound_rx: None,
            state: NodeState::Created,
        })
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    pub fn is_registered(&self) -> bool {
        self.state == NodeState::Registered
    }

    /// Our bound address on the transport (see [`Transport::local_addr`]).
    pub fn local_address(&self) -> ChatResult<T::Addr> {
        self.transport.local_addr()
    }

    /// Number of open sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Lifecycle
    // ═══════════════════════════════════════════════════════════════════════

    /// Create the presence directory and start announcing.
    ///
    /// Registering twice is a no-op; registering after shutdown fails.
    pub fn register(&mut self) -> ChatResult<()> {
        match self.state {
            NodeState::Registered => return Ok(()),
            NodeState::ShutDown => {
                return Err(ChatError::InvalidOperation(
                    "node has been shut down".to_string(),
                ))
            }
            NodeState::Created => {}
        }

        let directory = PresenceDirectory::shared(self.config.presence_ttl());
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_QUEUE_CAPACITY);
        let mut discovery = DiscoveryService::new(
            self.identity.clone(),
            self.config.discovery_mode(),
            self.config.discovery_config(),
            self.transport.clone(),
            directory.clone(),
            inbound_tx,
        );
        discovery.start()?;

        self.directory = Some(directory);
        self.discovery = Some(discovery);
        self.inbound_rx = Some(inbound_rx);
        self.state = NodeState::Registered;
        info!(
            username = %self.identity.username(),
            ttl = ?self.config.presence_ttl(),
            "Node registered"
        );
        Ok(())
    }

    /// Close every session, stop discovery, and drop the directory.
    ///
    /// Idempotent. Pending `next_message` calls see `None` afterwards.
    pub async fn shutdown(&mut self) {
        if self.state == NodeState::ShutDown {
            return;
        }

        for (_, session) in self.sessions.drain() {
            session.lock().await.close();
        }

        match self.discovery.take() {
            Some(mut discovery) => discovery.stop().await,
            None => {
                if let Err(e) = self.transport.close().await {
                    warn!(error = %e, "Failed to close transport");
                }
            }
        }

        if let Some(directory) = self.directory.take() {
            directory.write().clear();
        }
        self.inbound_rx = None;
        self.state = NodeState::ShutDown;
        info!(username = %self.identity.username(), "Node shut down");
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Peers
    // ═══════════════════════════════════════════════════════════════════════

    fn directory(&self) -> ChatResult<&SharedDirectory<T::Addr>> {
        self.directory
            .as_ref()
            .ok_or_else(|| ChatError::InvalidOperation("node is not registered".to_string()))
    }

    fn lookup_record(&self, username: &str) -> Option<PeerRecord<T::Addr>> {
        let directory = self.directory.as_ref()?;
        let record = directory.write().lookup_record(username, Instant::now());
        record
    }

    /// Address of a live peer, if any.
    pub fn resolve_peer(&self, username: &str) -> Option<T::Addr> {
        self.lookup_record(username).map(|record| record.address)
    }

    /// Usernames of every live peer, sorted.
    pub fn list_peers(&self) -> Vec<String> {
        match &self.directory {
            Some(directory) => directory.read().list_active(Instant::now()),
            None => Vec::new(),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Sessions
    // ═══════════════════════════════════════════════════════════════════════

    /// The existing session with `username`, if one is open.
    pub fn session(&self, username: &str) -> Option<SessionHandle<T>> {
        self.sessions.get(username).cloned()
    }

    /// Resolve `username` and open (or reuse) the session with them.
    ///
    /// The returned session has a key; if the peer announced a public key,
    /// that key has been offered to them.
    pub async fn chat_with(&mut self, username: &str) -> ChatResult<SessionHandle<T>> {
        let handle = self.session_for(username).await?;
        handle.lock().await.open().await?;
        Ok(handle)
    }

    /// Open (or reuse) a session using a key shared out of band.
    pub async fn chat_with_key(
        &mut self,
        username: &str,
        key: SymmetricKey,
    ) -> ChatResult<SessionHandle<T>> {
        let handle = self.session_for(username).await?;
        handle.lock().await.install_key(key)?;
        Ok(handle)
    }

    /// Send `text` to `username`, opening a session first if needed.
    pub async fn send(&mut self, username: &str, text: &str) -> ChatResult<()> {
        let handle = match self.session(username) {
            Some(handle) => handle,
            None => self.chat_with(username).await?,
        };
        let mut session = handle.lock().await;
        session.send(text).await
    }

    /// Close and forget the session with `username`.
    pub async fn close_session(&mut self, username: &str) -> bool {
        match self.sessions.remove(username) {
            Some(handle) => {
                handle.lock().await.close();
                true
            }
            None => false,
        }
    }

    /// Find or create the session for a live peer, refreshing its address.
    async fn session_for(&mut self, username: &str) -> ChatResult<SessionHandle<T>> {
        self.directory()?;
        if username == self.identity.username() {
            return Err(ChatError::InvalidOperation(
                "cannot open a session with ourselves".to_string(),
            ));
        }

        let record = self
            .lookup_record(username)
            .ok_or_else(|| ChatError::PeerNotFound(username.to_string()))?;

        if let Some(handle) = self.sessions.get(username) {
            let mut session = handle.lock().await;
            if !session.is_closed() {
                session.set_peer_address(record.address);
                if let Some(public_key) = record.public_key {
                    session.set_peer_public_key(public_key);
                }
                return Ok(handle.clone());
            }
        }

        debug!(peer = %username, address = %record.address, "Opening session");
        let handle = SecureSession::new(
            self.identity.username(),
            username,
            record.address,
            record.public_key,
            self.transport.clone(),
        )
        .into_handle();
        self.sessions.insert(username.to_string(), handle.clone());
        Ok(handle)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Inbound
    // ═══════════════════════════════════════════════════════════════════════

    /// Wait for the next chat message.
    ///
    /// Key offers are applied to their session along the way and are not
    /// returned. Returns `None` once the node is shut down (or was never
    /// registered).
    pub async fn next_message(&mut self) -> Option<InboundMessage<T::Addr>> {
        loop {
            let routed = self.inbound_rx.as_mut()?.recv().await?;
            if let Some(message) = self.handle_frame(routed).await {
                return Some(message);
            }
        }
    }

    async fn handle_frame(&mut self, routed: RoutedFrame<T::Addr>) -> Option<InboundMessage<T::Addr>> {
        let RoutedFrame { frame, from: address } = routed;
        match frame {
            Frame::KeyOffer { from, sealed_key } => {
                self.handle_key_offer(&from, address, &sealed_key).await;
                None
            }
            Frame::Chat { from, body } => {
                let content = self.decrypt_chat(&from, &address, body).await;
                Some(InboundMessage {
                    from,
                    address,
                    content,
                })
            }
            Frame::Announce(_) => None,
        }
    }

    /// Apply a key offer to the session with `from`.
    ///
    /// Only live peers get sessions, and the session address always comes
    /// from the directory rather than the datagram.
    async fn handle_key_offer(&mut self, from: &str, address: T::Addr, sealed_key: &[u8]) {
        if validate_username(from).is_err() || from == self.identity.username() {
            debug!(%address, "Ignoring key offer with invalid sender");
            return;
        }
        let Some(record) = self.lookup_record(from) else {
            debug!(peer = %from, %address, "Ignoring key offer from unknown peer");
            return;
        };

        let existing = match self.sessions.get(from).cloned() {
            Some(handle) => {
                let closed = handle.lock().await.is_closed();
                (!closed).then_some(handle)
            }
            None => None,
        };

        match existing {
            Some(handle) => {
                let mut session = handle.lock().await;
                match session.accept_offer(self.identity.keypair(), sealed_key) {
                    Ok(true) => {
                        session.set_peer_address(record.address);
                        if let Some(public_key) = record.public_key {
                            session.set_peer_public_key(public_key);
                        }
                    }
                    Ok(false) => {
                        // The peer may hold only its own key now
                        if let Err(e) = session.reoffer().await {
                            warn!(peer = %from, error = %e, "Failed to re-send session key");
                        }
                    }
                    Err(e) => debug!(peer = %from, %address, error = %e, "Discarding key offer"),
                }
            }
            None => {
                let mut session = SecureSession::new(
                    self.identity.username(),
                    from,
                    record.address,
                    record.public_key,
                    self.transport.clone(),
                );
                match session.accept_offer(self.identity.keypair(), sealed_key) {
                    Ok(_) => {
                        info!(peer = %from, %address, "Session opened by peer");
                        self.sessions.insert(from.to_string(), session.into_handle());
                    }
                    Err(e) => debug!(peer = %from, %address, error = %e, "Discarding key offer"),
                }
            }
        }
    }

    async fn decrypt_chat(&self, from: &str, address: &T::Addr, body: Vec<u8>) -> InboundContent {
        let Some(handle) = self.sessions.get(from) else {
            debug!(peer = %from, %address, "Chat message without a session");
            return InboundContent::Undecryptable(body);
        };

        let mut session = handle.lock().await;
        match session.receive(&body) {
            Ok(text) => {
                session.set_peer_address(address.clone());
                InboundContent::Text(text)
            }
            Err(e) => {
                debug!(peer = %from, %address, error = %e, "Could not decrypt chat message");
                InboundContent::Undecryptable(body)
            }
        }
    }
}

impl<T: Transport> fmt::Debug for Node<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("username", &self.identity.username())
            .field("state", &self.state)
            .field("sessions", &self.sessions.len())
            .finish_non_exhaustive()
    }
}
