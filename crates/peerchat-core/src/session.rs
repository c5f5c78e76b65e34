//! Per-peer secure session
//!
//! A [`SecureSession`] owns the symmetric key for one conversation and
//! encrypts/decrypts chat bodies with it.
//!
//! ## State machine
//!
//! ```text
//! Uninitialized ──open()/install_key()──► KeyEstablished ──send()/receive()──► Active
//!        │                                      │                                 │
//!        └──────────────────────close()─────────┴─────────────────────────────────┴──► Closed
//! ```
//!
//! ## Key bootstrap
//!
//! `open()` generates a session key if none exists. When the peer's X25519
//! public key is known (it rides in their announcements) the key is sealed to
//! it and sent as a [`Frame::KeyOffer`]. Without a public key the key is
//! treated as shared out of band.
//!
//! If both sides offer a key before seeing the other's offer, the offer from
//! the peer with the lexicographically smaller username wins on both ends.
//! The tie-break only holds while our session is still `KeyEstablished`; an
//! offer reaching an `Active` session means the peer re-keyed (it closed and
//! reopened, or restarted) and replaces our key.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::crypto::{SessionCrypto, SymmetricKey, KEY_SIZE};
use crate::error::{ChatError, ChatResult};
use crate::identity::{seal, unseal, ExchangeKeypair, ExchangePublicKey};
use crate::transport::Transport;
use crate::wire::Frame;

/// Shared handle to a session owned by the node
pub type SessionHandle<T> = Arc<tokio::sync::Mutex<SecureSession<T>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionState {
    /// No key yet
    Uninitialized,
    /// Key present, nothing exchanged yet
    KeyEstablished,
    /// At least one message sent or received
    Active,
    /// Key discarded; terminal
    Closed,
}

/// Encrypted conversation with one peer.
pub struct SecureSession<T: Transport> {
    local_username: String,
    peer_username: String,
    peer_address: T::Addr,
    peer_public_key: Option<ExchangePublicKey>,
    key: Option<SymmetricKey>,
    crypto: Option<SessionCrypto>,
    /// Whether our own key has been sent to the peer as a KeyOffer
    key_offered: bool,
    state: SessionState,
    transport: Arc<T>,
}

impl<T: Transport> SecureSession<T> {
    pub fn new(
        local_username: impl Into<String>,
        peer_username: impl Into<String>,
        peer_address: T::Addr,
        peer_public_key: Option<ExchangePublicKey>,
        transport: Arc<T>,
    ) -> Self {
        Self {
            local_username: local_username.into(),
            peer_username: peer_username.into(),
            peer_address,
            peer_public_key,
            key: None,
            crypto: None,
            key_offered: false,
            state: SessionState::Uninitialized,
            transport,
        }
    }

    pub fn into_handle(self) -> SessionHandle<T> {
        Arc::new(tokio::sync::Mutex::new(self))
    }

    pub fn peer_username(&self) -> &str {
        &self.peer_username
    }

    pub fn peer_address(&self) -> &T::Addr {
        &self.peer_address
    }

    /// Follow the peer to a new address (it re-announced from elsewhere).
    pub fn set_peer_address(&mut self, address: T::Addr) {
        self.peer_address = address;
    }

    pub fn peer_public_key(&self) -> Option<&ExchangePublicKey> {
        self.peer_public_key.as_ref()
    }

    pub fn set_peer_public_key(&mut self, public_key: ExchangePublicKey) {
        self.peer_public_key = Some(public_key);
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == SessionState::Closed
    }

    pub fn has_key(&self) -> bool {
        self.crypto.is_some()
    }

    fn ensure_open(&self) -> ChatResult<()> {
        if self.is_closed() {
            Err(ChatError::SessionClosed(self.peer_username.clone()))
        } else {
            Ok(())
        }
    }

    fn set_key(&mut self, key: SymmetricKey) {
        self.crypto = Some(SessionCrypto::new(&key));
        self.key = Some(key);
        if self.state == SessionState::Uninitialized {
            self.state = SessionState::KeyEstablished;
        }
    }

    /// Make sure a key exists and, if possible, deliver it to the peer.
    ///
    /// Calling `open` again after a successful offer does not re-send it.
    pub async fn open(&mut self) -> ChatResult<()> {
        self.ensure_open()?;

        let key = match self.key {
            Some(key) => key,
            None => {
                let key = SessionCrypto::generate_key();
                self.set_key(key);
                debug!(peer = %self.peer_username, "Generated session key");
                key
            }
        };

        if self.key_offered {
            return Ok(());
        }
        let Some(public_key) = self.peer_public_key else {
            debug!(
                peer = %self.peer_username,
                "Peer public key unknown; session key must be shared out of band"
            );
            return Ok(());
        };

        let frame = Frame::KeyOffer {
            from: self.local_username.clone(),
            sealed_key: seal(&public_key, &key)?,
        };
        self.transport
            .send_to(&self.peer_address, &frame.encode()?)
            .await?;
        self.key_offered = true;
        debug!(
            peer = %self.peer_username,
            address = %self.peer_address,
            fingerprint = %public_key.fingerprint(),
            "Sent session key offer"
        );
        Ok(())
    }

    /// Send our current key to the peer again, e.g. after winning a tie-break
    /// against an offer the peer may have sent from a fresh session.
    pub async fn reoffer(&mut self) -> ChatResult<()> {
        self.ensure_open()?;
        self.key_offered = false;
        self.open().await
    }

    /// Use a key agreed outside the session protocol.
    pub fn install_key(&mut self, key: SymmetricKey) -> ChatResult<()> {
        self.ensure_open()?;
        self.set_key(key);
        // The peer already holds this key, so there is nothing to offer
        self.key_offered = true;
        Ok(())
    }

    /// Unseal a peer's key offer and adopt it.
    ///
    /// Returns `false` when the offer lost the simultaneous-offer tie-break
    /// and our own key was kept. Nothing changes when the offer is rejected
    /// with an error.
    pub fn accept_offer(&mut self, keypair: &ExchangeKeypair, sealed_key: &[u8]) -> ChatResult<bool> {
        self.ensure_open()?;

        let bytes = unseal(keypair, sealed_key)?;
        let key: SymmetricKey = bytes.as_slice().try_into().map_err(|_| {
            ChatError::MalformedPayload(format!(
                "Session key must be {} bytes, got {}",
                KEY_SIZE,
                bytes.len()
            ))
        })?;

        let simultaneous = self.state == SessionState::KeyEstablished && self.key_offered;
        if simultaneous && self.key.is_some() && self.local_username < self.peer_username {
            debug!(peer = %self.peer_username, "Keeping our session key over peer's offer");
            return Ok(false);
        }

        self.set_key(key);
        self.key_offered = true;
        debug!(peer = %self.peer_username, "Installed session key from peer");
        Ok(true)
    }

    /// Encrypt `text` and send it to the peer.
    pub async fn send(&mut self, text: &str) -> ChatResult<()> {
        self.ensure_open()?;
        let crypto = self
            .crypto
            .as_ref()
            .ok_or_else(|| ChatError::NotReady(format!("no session key for {}", self.peer_username)))?;

        let frame = Frame::Chat {
            from: self.local_username.clone(),
            body: crypto.encrypt(text.as_bytes())?,
        };
        self.transport
            .send_to(&self.peer_address, &frame.encode()?)
            .await?;

        self.state = SessionState::Active;
        trace!(peer = %self.peer_username, bytes = text.len(), "Sent chat message");
        Ok(())
    }

    /// Decrypt a chat body from the peer.
    ///
    /// A [`ChatError::DecryptionFailed`] here is expected (stale or wrong
    /// key) and leaves the session usable.
    pub fn receive(&mut self, body: &[u8]) -> ChatResult<String> {
        self.ensure_open()?;
        let crypto = self
            .crypto
            .as_ref()
            .ok_or_else(|| ChatError::NotReady(format!("no session key for {}", self.peer_username)))?;

        let plaintext = crypto.decrypt(body)?;
        let text = String::from_utf8(plaintext)
            .map_err(|_| ChatError::MalformedPayload("chat message is not UTF-8".to_string()))?;

        self.state = SessionState::Active;
        Ok(text)
    }

    /// Discard the key and move to `Closed`. Idempotent.
    pub fn close(&mut self) {
        if self.is_closed() {
            return;
        }
        self.key = None;
        self.crypto = None;
        self.state = SessionState::Closed;
        debug!(peer = %self.peer_username, "Session closed");
    }
}

impl<T: Transport> fmt::Debug for SecureSession<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecureSession")
            .field("peer_username", &self.peer_username)
            .field("peer_address", &self.peer_address)
            .field("state", &self.state)
            .field("has_key", &self.has_key())
            .finish_non_exhaustive()
    }
}
