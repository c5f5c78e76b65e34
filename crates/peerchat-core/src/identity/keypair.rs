//! X25519 key-exchange keys

use std::fmt;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret as X25519StaticSecret};

use crate::error::{ChatError, ChatResult};

/// Size of an X25519 public key in bytes
pub const PUBLIC_KEY_SIZE: usize = 32;

/// X25519 keypair used to receive sealed session keys.
#[derive(Clone)]
pub struct ExchangeKeypair {
    secret: X25519StaticSecret,
    public: X25519PublicKey,
}

impl ExchangeKeypair {
    /// Generate a new random keypair.
    pub fn generate() -> ChatResult<Self> {
        let mut seed = [0u8; 32];
        getrandom::getrandom(&mut seed)
            .map_err(|e| ChatError::Crypto(format!("Failed to generate keypair: {}", e)))?;
        Ok(Self::from_secret_bytes(seed))
    }

    /// Rebuild a keypair from 32 secret bytes.
    pub fn from_secret_bytes(bytes: [u8; 32]) -> Self {
        let secret = X25519StaticSecret::from(bytes);
        let public = X25519PublicKey::from(&secret);
        Self { secret, public }
    }

    pub fn public_key(&self) -> ExchangePublicKey {
        ExchangePublicKey(self.public)
    }

    pub(crate) fn secret(&self) -> &X25519StaticSecret {
        &self.secret
    }
}

impl fmt::Debug for ExchangeKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExchangeKeypair")
            .field("public", &self.public_key())
            .finish_non_exhaustive()
    }
}

/// Public half of an [`ExchangeKeypair`].
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ExchangePublicKey(X25519PublicKey);

impl ExchangePublicKey {
    pub fn from_bytes(bytes: [u8; PUBLIC_KEY_SIZE]) -> Self {
        Self(X25519PublicKey::from(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_SIZE] {
        self.0.as_bytes()
    }

    /// Base64 form carried in announcements.
    pub fn to_base64(&self) -> String {
        BASE64.encode(self.as_bytes())
    }

    pub fn from_base64(encoded: &str) -> ChatResult<Self> {
        let bytes = BASE64
            .decode(encoded)
            .map_err(|e| ChatError::MalformedPayload(format!("Invalid public key encoding: {}", e)))?;
        let bytes: [u8; PUBLIC_KEY_SIZE] = bytes.try_into().map_err(|b: Vec<u8>| {
            ChatError::MalformedPayload(format!(
                "Public key must be {} bytes (got {})",
                PUBLIC_KEY_SIZE,
                b.len()
            ))
        })?;
        Ok(Self::from_bytes(bytes))
    }

    /// Short hex fingerprint for logs.
    pub fn fingerprint(&self) -> String {
        hex::encode(&self.as_bytes()[..8])
    }

    pub(crate) fn inner(&self) -> &X25519PublicKey {
        &self.0
    }
}

impl fmt::Debug for ExchangePublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ExchangePublicKey({})", self.fingerprint())
    }
}
