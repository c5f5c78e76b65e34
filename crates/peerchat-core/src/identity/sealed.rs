//! Sealed boxes: asymmetric encryption of small payloads
//!
//! Used to carry a session key to a peer whose public key we learned from an
//! announcement.
//!
//! ```text
//! 1. ephemeral_sk, ephemeral_pk = X25519 keygen
//! 2. shared = X25519(ephemeral_sk, recipient_pk)
//! 3. key = HKDF-SHA256(ikm = shared, salt = ephemeral_pk || recipient_pk, info = HKDF_INFO)
//! 4. sealed = ephemeral_pk || ChaCha20-Poly1305(key, payload)
//! ```
//!
//! ## Wire Format
//!
//! `[ephemeral public key (32)] + [nonce (12)] + [ciphertext + tag (16)]`

use hkdf::Hkdf;
use sha2::Sha256;
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret as X25519StaticSecret};

use super::keypair::{ExchangeKeypair, ExchangePublicKey, PUBLIC_KEY_SIZE};
use crate::crypto::{SessionCrypto, SymmetricKey, KEY_SIZE, NONCE_SIZE, TAG_SIZE};
use crate::error::{ChatError, ChatResult};

/// Domain separation string for HKDF
const HKDF_INFO: &[u8] = b"peerchat-sealed-box-v1";

/// Bytes a sealed box adds on top of its payload
pub const SEALED_OVERHEAD: usize = PUBLIC_KEY_SIZE + NONCE_SIZE + TAG_SIZE;

/// Encrypt `plaintext` so only the holder of `recipient`'s secret can read it.
pub fn seal(recipient: &ExchangePublicKey, plaintext: &[u8]) -> ChatResult<Vec<u8>> {
    let mut ephemeral_seed = [0u8; 32];
    getrandom::getrandom(&mut ephemeral_seed)
        .map_err(|e| ChatError::Crypto(format!("Failed to generate ephemeral key: {}", e)))?;
    let ephemeral_secret = X25519StaticSecret::from(ephemeral_seed);
    let ephemeral_public = X25519PublicKey::from(&ephemeral_secret);

    let shared = ephemeral_secret.diffie_hellman(recipient.inner());
    let key = derive_key(
        shared.as_bytes(),
        ephemeral_public.as_bytes(),
        recipient.as_bytes(),
    )?;

    let ciphertext = SessionCrypto::new(&key).encrypt(plaintext)?;

    let mut sealed = Vec::with_capacity(PUBLIC_KEY_SIZE + ciphertext.len());
    sealed.extend_from_slice(ephemeral_public.as_bytes());
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}

/// Decrypt a sealed box addressed to `keypair`.
///
/// A box sealed to a different key, or any truncated/tampered box, fails
/// with [`ChatError::DecryptionFailed`].
pub fn unseal(keypair: &ExchangeKeypair, sealed: &[u8]) -> ChatResult<Vec<u8>> {
    if sealed.len() < SEALED_OVERHEAD {
        return Err(ChatError::DecryptionFailed);
    }

    let (ephemeral_bytes, ciphertext) = sealed.split_at(PUBLIC_KEY_SIZE);
    let mut ephemeral = [0u8; PUBLIC_KEY_SIZE];
    ephemeral.copy_from_slice(ephemeral_bytes);
    let ephemeral_public = X25519PublicKey::from(ephemeral);

    let shared = keypair.secret().diffie_hellman(&ephemeral_public);
    let key = derive_key(
        shared.as_bytes(),
        &ephemeral,
        keypair.public_key().as_bytes(),
    )?;

    SessionCrypto::new(&key).decrypt(ciphertext)
}

fn derive_key(
    shared_secret: &[u8],
    ephemeral_public: &[u8; PUBLIC_KEY_SIZE],
    recipient_public: &[u8; PUBLIC_KEY_SIZE],
) -> ChatResult<SymmetricKey> {
    let mut salt = [0u8; PUBLIC_KEY_SIZE * 2];
    salt[..PUBLIC_KEY_SIZE].copy_from_slice(ephemeral_public);
    salt[PUBLIC_KEY_SIZE..].copy_from_slice(recipient_public);

    let hkdf = Hkdf::<Sha256>::new(Some(&salt), shared_secret);
    let mut output = [0u8; KEY_SIZE];
    hkdf.expand(HKDF_INFO, &mut output)
        .map_err(|e| ChatError::Crypto(format!("HKDF expand failed: {}", e)))?;
    Ok(output)
}
