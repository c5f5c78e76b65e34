//! Symmetric encryption using ChaCha20-Poly1305 AEAD
//!
//! Session keys and the passphrase-derived discovery key both go through
//! [`SessionCrypto`]. Asymmetric sealing lives in [`crate::identity::sealed`].

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::error::{ChatError, ChatResult};

/// Nonce size for ChaCha20-Poly1305 (12 bytes)
pub const NONCE_SIZE: usize = 12;

/// Authentication tag size for ChaCha20-Poly1305 (16 bytes)
pub const TAG_SIZE: usize = 16;

/// Symmetric key size (32 bytes)
pub const KEY_SIZE: usize = 32;

/// A 32-byte symmetric key.
pub type SymmetricKey = [u8; KEY_SIZE];

/// Authenticated symmetric encryption bound to one key.
///
/// # Wire Format
///
/// Encrypted tokens are `[nonce (12 bytes)] + [ciphertext + auth_tag (16 bytes)]`.
///
/// # Example
///
/// ```
/// use peerchat_core::crypto::SessionCrypto;
///
/// let key = SessionCrypto::generate_key();
/// let crypto = SessionCrypto::new(&key);
///
/// let token = crypto.encrypt(b"hello").unwrap();
/// assert_eq!(crypto.decrypt(&token).unwrap(), b"hello");
/// ```
#[derive(Clone)]
pub struct SessionCrypto {
    cipher: ChaCha20Poly1305,
}

impl SessionCrypto {
    /// Create a new instance with the given 32-byte key.
    pub fn new(key: &SymmetricKey) -> Self {
        Self {
            cipher: ChaCha20Poly1305::new(key.into()),
        }
    }

    /// Generate a new random 32-byte key from the system CSPRNG.
    pub fn generate_key() -> SymmetricKey {
        let mut key = [0u8; KEY_SIZE];
        rand::rng().fill_bytes(&mut key);
        key
    }

    /// Derive a key from a shared passphrase.
    ///
    /// Deterministic: every node configured with the same passphrase derives
    /// the same key (SHA-256 of the UTF-8 bytes).
    pub fn derive_key_from_passphrase(passphrase: &str) -> SymmetricKey {
        let digest = Sha256::digest(passphrase.as_bytes());
        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(&digest);
        key
    }

    /// Encrypt `plaintext` under a fresh random nonce.
    ///
    /// The same plaintext encrypts to a different token every call.
    pub fn encrypt(&self, plaintext: &[u8]) -> ChatResult<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| ChatError::Crypto(format!("Encryption failed: {}", e)))?;

        let mut token = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        token.extend_from_slice(&nonce_bytes);
        token.extend_from_slice(&ciphertext);
        Ok(token)
    }

    /// Decrypt a token produced by [`SessionCrypto::encrypt`].
    ///
    /// Wrong key, tampering, and truncation all yield
    /// [`ChatError::DecryptionFailed`].
    pub fn decrypt(&self, token: &[u8]) -> ChatResult<Vec<u8>> {
        if token.len() < NONCE_SIZE + TAG_SIZE {
            return Err(ChatError::DecryptionFailed);
        }

        let (nonce_bytes, ciphertext) = token.split_at(NONCE_SIZE);
        self.cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| ChatError::DecryptionFailed)
    }
}

/// Convenience functions for one-off encryption/decryption.
///
/// For repeated operations with the same key, prefer [`SessionCrypto`].
pub mod stateless {
    use super::*;

    /// Encrypt data using ChaCha20-Poly1305 AEAD.
    pub fn encrypt(key: &SymmetricKey, plaintext: &[u8]) -> ChatResult<Vec<u8>> {
        SessionCrypto::new(key).encrypt(plaintext)
    }

    /// Decrypt data using ChaCha20-Poly1305 AEAD.
    pub fn decrypt(key: &SymmetricKey, token: &[u8]) -> ChatResult<Vec<u8>> {
        SessionCrypto::new(key).decrypt(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_key() {
        let key1 = SessionCrypto::generate_key();
        let key2 = SessionCrypto::generate_key();
        assert_ne!(key1, key2);
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let crypto = SessionCrypto::new(&SessionCrypto::generate_key());

        let token = crypto.encrypt(b"Hello, World!").unwrap();
        assert_eq!(crypto.decrypt(&token).unwrap(), b"Hello, World!");
    }

    #[test]
    fn test_encrypt_decrypt_empty() {
        let crypto = SessionCrypto::new(&SessionCrypto::generate_key());

        let token = crypto.encrypt(b"").unwrap();
        assert_eq!(token.len(), NONCE_SIZE + TAG_SIZE);
        assert!(crypto.decrypt(&token).unwrap().is_empty());
    }

    #[test]
    fn test_same_plaintext_different_token() {
        let crypto = SessionCrypto::new(&SessionCrypto::generate_key());

        let token1 = crypto.encrypt(b"again").unwrap();
        let token2 = crypto.encrypt(b"again").unwrap();
        assert_ne!(token1, token2);
    }

    #[test]
    fn test_wrong_key_fails() {
        let token = stateless::encrypt(&SessionCrypto::generate_key(), b"Secret").unwrap();

        let result = stateless::decrypt(&SessionCrypto::generate_key(), &token);
        assert!(matches!(result, Err(ChatError::DecryptionFailed)));
    }

    #[test]
    fn test_tampered_token_fails() {
        let crypto = SessionCrypto::new(&SessionCrypto::generate_key());
        let mut token = crypto.encrypt(b"Original message").unwrap();

        token[NONCE_SIZE] ^= 0xFF;
        assert!(matches!(
            crypto.decrypt(&token),
            Err(ChatError::DecryptionFailed)
        ));
    }

    #[test]
    fn test_tampered_nonce_fails() {
        let crypto = SessionCrypto::new(&SessionCrypto::generate_key());
        let mut token = crypto.encrypt(b"Original message").unwrap();

        token[0] ^= 0xFF;
        assert!(crypto.decrypt(&token).is_err());
    }

    #[test]
    fn test_truncated_token_collapses_to_decryption_failed() {
        let crypto = SessionCrypto::new(&SessionCrypto::generate_key());
        let token = crypto.encrypt(b"Original message").unwrap();

        assert!(matches!(
            crypto.decrypt(&token[..5]),
            Err(ChatError::DecryptionFailed)
        ));
        assert!(matches!(
            crypto.decrypt(&[]),
            Err(ChatError::DecryptionFailed)
        ));
    }

    #[test]
    fn test_passphrase_derivation_is_deterministic() {
        let a = SessionCrypto::derive_key_from_passphrase("correct horse");
        let b = SessionCrypto::derive_key_from_passphrase("correct horse");
        let c = SessionCrypto::derive_key_from_passphrase("correct horsf");

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_passphrase_key_interoperates() {
        let sender = SessionCrypto::new(&SessionCrypto::derive_key_from_passphrase("x"));
        let receiver = SessionCrypto::new(&SessionCrypto::derive_key_from_passphrase("x"));
        let outsider = SessionCrypto::new(&SessionCrypto::derive_key_from_passphrase("y"));

        let token = sender.encrypt(b"announce").unwrap();
        assert_eq!(receiver.decrypt(&token).unwrap(), b"announce");
        assert!(outsider.decrypt(&token).is_err());
    }
}
