//! Presence directory: who is online, and where
//!
//! An in-memory table of peers keyed by username, fed by discovery
//! announcements and read by the node when resolving a chat target.
//!
//! ## Consistency
//!
//! Sightings are last-processed-wins. If an older datagram is processed after
//! a newer one, the older address overwrites the newer. Discovery is
//! best-effort and the next periodic announcement corrects it.
//!
//! No authentication happens here: any node can announce any username.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::identity::ExchangePublicKey;

/// Shared handle used by the discovery receive loop (writer) and the node (reader).
pub type SharedDirectory<A> = Arc<RwLock<PresenceDirectory<A>>>;

/// What we know about one peer
#[derive(Debug, Clone, PartialEq)]
pub struct PeerRecord<A> {
    /// Username announced by the peer (unique key)
    pub username: String,
    /// Transport address the announcement arrived from
    pub address: A,
    /// X25519 public key, if the announcement carried one
    pub public_key: Option<ExchangePublicKey>,
    /// When the most recent announcement was processed
    pub last_seen: Instant,
}

impl<A> PeerRecord<A> {
    /// A record is live while `now - last_seen <= ttl`.
    pub fn is_live(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(self.last_seen) <= ttl
    }
}

/// Username → [`PeerRecord`] table with TTL expiry.
#[derive(Debug)]
pub struct PresenceDirectory<A> {
    peers: HashMap<String, PeerRecord<A>>,
    ttl: Duration,
}

impl<A: Clone> PresenceDirectory<A> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            peers: HashMap::new(),
            ttl,
        }
    }

    /// Wrap a new directory for sharing between tasks.
    pub fn shared(ttl: Duration) -> SharedDirectory<A> {
        Arc::new(RwLock::new(Self::new(ttl)))
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Insert or overwrite the record for `username`.
    pub fn record_sighting(
        &mut self,
        username: &str,
        address: A,
        public_key: Option<ExchangePublicKey>,
        now: Instant,
    ) {
        let record = PeerRecord {
            username: username.to_string(),
            address,
            public_key,
            last_seen: now,
        };
        if self.peers.insert(username.to_string(), record).is_none() {
            debug!(peer = %username, "New peer sighted");
        } else {
            trace!(peer = %username, "Peer sighting refreshed");
        }
    }

    /// Address of `username` if its record is still live.
    ///
    /// An expired record is evicted on the way out.
    pub fn lookup(&mut self, username: &str, now: Instant) -> Option<A> {
        self.lookup_record(username, now).map(|r| r.address)
    }

    /// Full record of `username` if still live, evicting it when expired.
    pub fn lookup_record(&mut self, username: &str, now: Instant) -> Option<PeerRecord<A>> {
        let live = self.peers.get(username)?.is_live(now, self.ttl);
        if live {
            self.peers.get(username).cloned()
        } else {
            debug!(peer = %username, "Evicting expired peer on lookup");
            self.peers.remove(username);
            None
        }
    }

    /// Read-only variant of [`lookup_record`](Self::lookup_record) that never evicts.
    pub fn peek(&self, username: &str, now: Instant) -> Option<&PeerRecord<A>> {
        self.peers
            .get(username)
            .filter(|record| record.is_live(now, self.ttl))
    }

    /// Usernames of every live record, sorted.
    pub fn list_active(&self, now: Instant) -> Vec<String> {
        let mut names: Vec<String> = self
            .peers
            .values()
            .filter(|record| record.is_live(now, self.ttl))
            .map(|record| record.username.clone())
            .collect();
        names.sort();
        names
    }

    /// Drop every expired record; returns how many were removed.
    pub fn evict_expired(&mut self, now: Instant) -> usize {
        let ttl = self.ttl;
        let before = self.peers.len();
        self.peers.retain(|_, record| record.is_live(now, ttl));
        let removed = before - self.peers.len();
        if removed > 0 {
            debug!(removed, remaining = self.peers.len(), "Evicted expired peers");
        }
        removed
    }

    /// Number of records held, live or not.
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn clear(&mut self) {
        self.peers.clear();
    }
}
