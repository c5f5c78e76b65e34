//! Node identity: a username plus an X25519 key-exchange keypair
//!
//! The identity is created once at startup and never changes. The secret key
//! stays in process; the public key travels inside announcements so peers can
//! seal session keys to us.

pub mod keypair;
pub mod sealed;

pub use keypair::{ExchangeKeypair, ExchangePublicKey, PUBLIC_KEY_SIZE};
pub use sealed::{seal, unseal, SEALED_OVERHEAD};

use crate::error::{ChatError, ChatResult};

/// Maximum username length in bytes
pub const MAX_USERNAME_LEN: usize = 64;

/// Local node identity.
#[derive(Debug, Clone)]
pub struct Identity {
    username: String,
    keypair: ExchangeKeypair,
}

impl Identity {
    /// Create an identity with a freshly generated keypair.
    pub fn generate(username: impl Into<String>) -> ChatResult<Self> {
        let keypair = ExchangeKeypair::generate()?;
        Self::with_keypair(username, keypair)
    }

    /// Create an identity from an existing keypair.
    pub fn with_keypair(username: impl Into<String>, keypair: ExchangeKeypair) -> ChatResult<Self> {
        let username = username.into().trim().to_string();
        validate_username(&username)?;
        Ok(Self { username, keypair })
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn public_key(&self) -> ExchangePublicKey {
        self.keypair.public_key()
    }

    pub fn keypair(&self) -> &ExchangeKeypair {
        &self.keypair
    }
}

/// Check that a username is non-empty, bounded, and free of control characters.
pub fn validate_username(username: &str) -> ChatResult<()> {
    if username.is_empty() {
        return Err(ChatError::Config("username must not be empty".to_string()));
    }
    if username.len() > MAX_USERNAME_LEN {
        return Err(ChatError::Config(format!(
            "username exceeds {} bytes",
            MAX_USERNAME_LEN
        )));
    }
    if username.chars().any(char::is_control) {
        return Err(ChatError::Config(
            "username must not contain control characters".to_string(),
        ));
    }
    Ok(())
}
