//! Presence discovery over a broadcast transport
//!
//! The [`DiscoveryService`] runs two background tasks on a [`Transport`]:
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │  announce task                                                │
//! │  ├── every announce_interval: broadcast Frame::Announce       │
//! │  └── every eviction_interval: directory.evict_expired()       │
//! │                                                               │
//! │  receive task                                                 │
//! │  ├── Frame::Announce  → decode → directory.record_sighting()  │
//! │  ├── Frame::KeyOffer  ┐                                       │
//! │  ├── Frame::Chat      ┴→ forwarded to the node's inbound queue│
//! │  └── anything else    → dropped                               │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! Inbound data on the discovery path is untrusted. Undecryptable or
//! malformed datagrams are dropped at `trace`/`debug` level and never reach
//! the directory.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::announcement::{Announcement, DiscoveryMode};
use crate::error::{ChatError, ChatResult};
use crate::identity::Identity;
use crate::presence::SharedDirectory;
use crate::transport::Transport;
use crate::wire::Frame;

/// Capacity of the queue carrying session frames to the node
pub const INBOUND_QUEUE_CAPACITY: usize = 256;

/// Pause after a transport receive error before trying again
const RECEIVE_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Discovery timing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveryConfig {
    pub announce_interval: Duration,
    pub eviction_interval: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            announce_interval: Duration::from_secs(crate::config::DEFAULT_ANNOUNCE_INTERVAL_SECS),
            eviction_interval: Duration::from_secs(crate::config::DEFAULT_ANNOUNCE_INTERVAL_SECS),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryState {
    Stopped,
    Running,
}

/// A session-path frame handed from the receive task to the node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutedFrame<A> {
    pub frame: Frame,
    pub from: A,
}

/// What the receive path did with one datagram
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ingest {
    /// Valid announcement from another node; directory updated
    Recorded(String),
    /// Our own announcement echoed back
    OwnAnnouncement,
    /// Session frame queued for the node
    Forwarded,
    /// Dropped (undecryptable, malformed, or queue full)
    Discarded,
}

/// Everything the receive task needs to process a datagram.
struct Ingestor<A> {
    local_username: String,
    mode: DiscoveryMode,
    directory: SharedDirectory<A>,
    inbound_tx: mpsc::Sender<RoutedFrame<A>>,
}

impl<A: Clone + std::fmt::Display> Ingestor<A> {
    fn ingest(&self, bytes: &[u8], from: A, now: Instant) -> Ingest {
        let frame = match Frame::decode(bytes) {
            Ok(frame) => frame,
            Err(e) => {
                trace!(%from, error = %e, "Dropping undecodable datagram");
                return Ingest::Discarded;
            }
        };

        match frame {
            Frame::Announce(body) => self.ingest_announcement(&body, from, now),
            frame => match self.inbound_tx.try_send(RoutedFrame { frame, from }) {
                Ok(()) => Ingest::Forwarded,
                Err(mpsc::error::TrySendError::Full(routed)) => {
                    debug!(from = %routed.from, kind = routed.frame.kind(), "Inbound queue full, dropping frame");
                    Ingest::Discarded
                }
                Err(mpsc::error::TrySendError::Closed(_)) => Ingest::Discarded,
            },
        }
    }

    fn ingest_announcement(&self, body: &[u8], from: A, now: Instant) -> Ingest {
        let announcement = match self.mode.decode(body) {
            Ok(announcement) => announcement,
            Err(e) => {
                debug_assert!(e.is_discardable());
                trace!(%from, error = %e, "Dropping announcement");
                return Ingest::Discarded;
            }
        };

        if announcement.username == self.local_username {
            return Ingest::OwnAnnouncement;
        }

        // from_json already validated the key, so this cannot fail here
        let public_key = announcement.decoded_public_key().ok().flatten();
        self.directory
            .write()
            .record_sighting(&announcement.username, from, public_key, now);
        Ingest::Recorded(announcement.username)
    }
}

/// Periodic announce + receive loops over one transport.
pub struct DiscoveryService<T: Transport> {
    identity: Arc<Identity>,
    mode: DiscoveryMode,
    config: DiscoveryConfig,
    transport: Arc<T>,
    directory: SharedDirectory<T::Addr>,
    inbound_tx: mpsc::Sender<RoutedFrame<T::Addr>>,
    state: DiscoveryState,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    transport_closed: bool,
}

impl<T: Transport> DiscoveryService<T> {
    /// Create a stopped service.
    ///
    /// Session frames arriving on the transport are pushed into `inbound_tx`.
    pub fn new(
        identity: Arc<Identity>,
        mode: DiscoveryMode,
        config: DiscoveryConfig,
        transport: Arc<T>,
        directory: SharedDirectory<T::Addr>,
        inbound_tx: mpsc::Sender<RoutedFrame<T::Addr>>,
    ) -> Self {
        Self {
            identity,
            mode,
            config,
            transport,
            directory,
            inbound_tx,
            state: DiscoveryState::Stopped,
            cancel: CancellationToken::new(),
            tasks: Vec::new(),
            transport_closed: false,
        }
    }

    pub fn state(&self) -> DiscoveryState {
        self.state
    }

    pub fn mode(&self) -> &DiscoveryMode {
        &self.mode
    }

    pub fn directory(&self) -> &SharedDirectory<T::Addr> {
        &self.directory
    }

    fn ingestor(&self) -> Ingestor<T::Addr> {
        Ingestor {
            local_username: self.identity.username().to_string(),
            mode: self.mode.clone(),
            directory: self.directory.clone(),
            inbound_tx: self.inbound_tx.clone(),
        }
    }

    /// Start the announce and receive tasks.
    ///
    /// Starting a running service is a no-op. A stopped service cannot be
    /// restarted because its transport has been closed.
    pub fn start(&mut self) -> ChatResult<()> {
        match self.state {
            DiscoveryState::Running => return Ok(()),
            DiscoveryState::Stopped if self.transport_closed => {
                return Err(ChatError::InvalidOperation(
                    "discovery was stopped and its transport closed".to_string(),
                ))
            }
            DiscoveryState::Stopped => {}
        }

        info!(
            username = %self.identity.username(),
            mode = %self.mode,
            interval = ?self.config.announce_interval,
            "Starting discovery"
        );
        if !self.mode.is_encrypted() {
            warn!("Discovery passphrase not set; announcements are sent in cleartext");
        }

        self.tasks.push(tokio::spawn(Self::announce_task(
            self.identity.clone(),
            self.mode.clone(),
            self.config,
            self.transport.clone(),
            self.directory.clone(),
            self.cancel.clone(),
        )));
        self.tasks.push(tokio::spawn(Self::receive_task(
            self.ingestor(),
            self.transport.clone(),
            self.cancel.clone(),
        )));

        self.state = DiscoveryState::Running;
        Ok(())
    }

    /// Cancel both tasks and close the transport.
    ///
    /// Idempotent; the transport is closed exactly once.
    pub async fn stop(&mut self) {
        if self.state == DiscoveryState::Running {
            info!(username = %self.identity.username(), "Stopping discovery");
        }
        self.cancel.cancel();
        for task in self.tasks.drain(..) {
            task.abort();
            let _ = task.await;
        }
        self.state = DiscoveryState::Stopped;

        if !self.transport_closed {
            self.transport_closed = true;
            if let Err(e) = self.transport.close().await {
                warn!(error = %e, "Failed to close transport");
            }
        }
    }

    /// Broadcast one announcement right now.
    pub async fn announce_now(&self) -> ChatResult<()> {
        announce(&self.identity, &self.mode, self.transport.as_ref()).await
    }

    /// Run one inbound datagram through the receive path.
    pub fn ingest(&self, bytes: &[u8], from: T::Addr, now: Instant) -> Ingest {
        self.ingestor().ingest(bytes, from, now)
    }

    async fn announce_task(
        identity: Arc<Identity>,
        mode: DiscoveryMode,
        config: DiscoveryConfig,
        transport: Arc<T>,
        directory: SharedDirectory<T::Addr>,
        cancel: CancellationToken,
    ) {
        let mut announce_tick = tokio::time::interval(config.announce_interval);
        announce_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut evict_tick = tokio::time::interval(config.eviction_interval);
        evict_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = announce_tick.tick() => {
                    match announce(&identity, &mode, transport.as_ref()).await {
                        Ok(()) => {}
                        Err(ChatError::TransportClosed) => break,
                        Err(e) => warn!(error = %e, "Announcement failed"),
                    }
                }
                _ = evict_tick.tick() => {
                    directory.write().evict_expired(Instant::now());
                }
            }
        }
        debug!("Announce task ended");
    }

    async fn receive_task(
        ingestor: Ingestor<T::Addr>,
        transport: Arc<T>,
        cancel: CancellationToken,
    ) {
        loop {
            let received = tokio::select! {
                _ = cancel.cancelled() => break,
                received = transport.receive() => received,
            };

            match received {
                Ok((bytes, from)) => {
                    if let Ingest::Recorded(username) = ingestor.ingest(&bytes, from.clone(), Instant::now()) {
                        trace!(peer = %username, %from, "Announcement recorded");
                    }
                }
                Err(ChatError::TransportClosed) => break,
                Err(e) => {
                    debug!(error = %e, "Receive failed");
                    tokio::time::sleep(RECEIVE_ERROR_BACKOFF).await;
                }
            }
        }
        debug!("Receive task ended");
    }
}

impl<T: Transport> Drop for DiscoveryService<T> {
    fn drop(&mut self) {
        self.cancel.cancel();
        for task in &self.tasks {
            task.abort();
        }
    }
}

async fn announce<T: Transport>(
    identity: &Identity,
    mode: &DiscoveryMode,
    transport: &T,
) -> ChatResult<()> {
    let body = mode.encode(&Announcement::for_identity(identity))?;
    let bytes = Frame::Announce(body).encode()?;
    trace!(username = %identity.username(), bytes = bytes.len(), "Broadcasting announcement");
    transport.broadcast(&bytes).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presence::PresenceDirectory;
    use crate::transport::{MemoryAddr, MemoryNetwork, MemoryTransport};

    struct Fixture {
        service: DiscoveryService<MemoryTransport>,
        inbound_rx: mpsc::Receiver<RoutedFrame<MemoryAddr>>,
    }

    fn fixture(username: &str, passphrase: Option<&str>, network: &MemoryNetwork) -> Fixture {
        let (inbound_tx, inbound_rx) = mpsc::channel(4);
        let service = DiscoveryService::new(
            Arc::new(Identity::generate(username).unwrap()),
            DiscoveryMode::from_passphrase(passphrase),
            DiscoveryConfig {
                announce_interval: Duration::from_secs(5),
                eviction_interval: Duration::from_secs(5),
            },
            Arc::new(network.attach()),
            PresenceDirectory::shared(Duration::from_secs(30)),
            inbound_tx,
        );
        Fixture {
            service,
            inbound_rx,
        }
    }

    fn announcement_bytes(username: &str, passphrase: Option<&str>) -> Vec<u8> {
        let identity = Identity::generate(username).unwrap();
        let body = DiscoveryMode::from_passphrase(passphrase)
            .encode(&Announcement::for_identity(&identity))
            .unwrap();
        Frame::Announce(body).encode().unwrap()
    }

    #[tokio::test]
    async fn test_ingest_records_other_peer() {
        let network = MemoryNetwork::new();
        let f = fixture("bob", Some("x"), &network);
        let now = Instant::now();

        let ingest = f
            .service
            .ingest(&announcement_bytes("alice", Some("x")), MemoryAddr(7), now);
        assert_eq!(ingest, Ingest::Recorded("alice".to_string()));

        let mut dir = f.service.directory().write();
        assert_eq!(dir.lookup("alice", now), Some(MemoryAddr(7)));
        assert!(dir.lookup_record("alice", now).unwrap().public_key.is_some());
    }

    #[tokio::test]
    async fn test_ingest_ignores_own_announcement() {
        let network = MemoryNetwork::new();
        let f = fixture("bob", None, &network);

        let ingest = f
            .service
            .ingest(&announcement_bytes("bob", None), MemoryAddr(1), Instant::now());
        assert_eq!(ingest, Ingest::OwnAnnouncement);
        assert!(f.service.directory().read().is_empty());
    }

    #[tokio::test]
    async fn test_ingest_drops_mismatched_passphrase_and_garbage() {
        let network = MemoryNetwork::new();
        let f = fixture("carol", Some("y"), &network);
        let now = Instant::now();

        let mut inputs = vec![
            announcement_bytes("alice", Some("x")),
            announcement_bytes("alice", None),
            Vec::new(),
            vec![0xFF; 64],
            Frame::Announce(b"{\"type\":\"announce\"".to_vec()).encode().unwrap(),
        ];
        let mut truncated = announcement_bytes("alice", Some("y"));
        truncated.truncate(truncated.len() - 3);
        inputs.push(truncated);

        for bytes in inputs {
            assert_eq!(
                f.service.ingest(&bytes, MemoryAddr(2), now),
                Ingest::Discarded
            );
        }
        assert!(f.service.directory().read().is_empty());
    }

    #[tokio::test]
    async fn test_ingest_forwards_session_frames() {
        let network = MemoryNetwork::new();
        let mut f = fixture("bob", None, &network);

        let frame = Frame::Chat {
            from: "alice".to_string(),
            body: vec![1, 2, 3],
        };
        let ingest = f
            .service
            .ingest(&frame.encode().unwrap(), MemoryAddr(3), Instant::now());
        assert_eq!(ingest, Ingest::Forwarded);

        let routed = f.inbound_rx.recv().await.unwrap();
        assert_eq!(routed.frame, frame);
        assert_eq!(routed.from, MemoryAddr(3));
    }

    #[tokio::test]
    async fn test_full_inbound_queue_drops() {
        let network = MemoryNetwork::new();
        let f = fixture("bob", None, &network);
        let bytes = Frame::Chat {
            from: "alice".to_string(),
            body: Vec::new(),
        }
        .encode()
        .unwrap();

        for _ in 0..4 {
            assert_eq!(
                f.service.ingest(&bytes, MemoryAddr(3), Instant::now()),
                Ingest::Forwarded
            );
        }
        assert_eq!(
            f.service.ingest(&bytes, MemoryAddr(3), Instant::now()),
            Ingest::Discarded
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_running_services_discover_each_other() {
        let network = MemoryNetwork::new();
        let mut alice = fixture("alice", Some("x"), &network);
        let mut bob = fixture("bob", Some("x"), &network);

        alice.service.start().unwrap();
        bob.service.start().unwrap();
        assert_eq!(alice.service.state(), DiscoveryState::Running);

        tokio::time::sleep(Duration::from_secs(6)).await;

        let now = Instant::now();
        assert_eq!(bob.service.directory().read().list_active(now), vec!["alice"]);
        assert_eq!(alice.service.directory().read().list_active(now), vec!["bob"]);

        alice.service.stop().await;
        bob.service.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_peer_is_evicted() {
        let network = MemoryNetwork::new();
        let mut alice = fixture("alice", None, &network);
        let mut bob = fixture("bob", None, &network);

        alice.service.start().unwrap();
        bob.service.start().unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(bob.service.directory().read().len(), 1);

        alice.service.stop().await;
        // TTL 30s + one eviction interval
        tokio::time::sleep(Duration::from_secs(40)).await;
        assert!(bob.service.directory().read().is_empty());

        bob.service.stop().await;
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_and_closes_transport() {
        let network = MemoryNetwork::new();
        let mut f = fixture("alice", None, &network);
        assert_eq!(network.endpoint_count(), 1);

        f.service.start().unwrap();
        f.service.start().unwrap();
        f.service.stop().await;
        f.service.stop().await;

        assert_eq!(f.service.state(), DiscoveryState::Stopped);
        assert_eq!(network.endpoint_count(), 0);
        assert!(matches!(
            f.service.start(),
            Err(ChatError::InvalidOperation(_))
        ));
    }
}
