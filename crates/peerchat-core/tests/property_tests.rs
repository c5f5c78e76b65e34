//! Property-based tests for crypto and presence invariants
//!
//! Uses proptest to check the round-trip, key-separation, and TTL properties
//! that discovery and sessions rely on.

use std::time::Duration;

use peerchat_core::announcement::{Announcement, DiscoveryMode};
use peerchat_core::crypto::stateless;
use peerchat_core::identity::{seal, unseal, ExchangeKeypair};
use peerchat_core::wire::Frame;
use peerchat_core::{ChatError, Identity, MemoryAddr, PresenceDirectory, SessionCrypto};
use proptest::prelude::*;
use tokio::time::Instant;

// ============================================================================
// Strategy Generators
// ============================================================================

fn key_strategy() -> impl Strategy<Value = [u8; 32]> {
    prop::array::uniform32(any::<u8>())
}

fn username_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9_]{0,15}").expect("valid regex")
}

// ============================================================================
// Symmetric Crypto
// ============================================================================

proptest! {
    /// decrypt(k, encrypt(k, m)) == m
    #[test]
    fn symmetric_roundtrip(key in key_strategy(), message in prop::collection::vec(any::<u8>(), 0..2048)) {
        let token = stateless::encrypt(&key, &message).unwrap();
        prop_assert_eq!(stateless::decrypt(&key, &token).unwrap(), message);
    }

    /// A token never opens under a different key
    #[test]
    fn wrong_key_always_fails(
        k1 in key_strategy(),
        k2 in key_strategy(),
        message in prop::collection::vec(any::<u8>(), 0..256),
    ) {
        prop_assume!(k1 != k2);
        let token = stateless::encrypt(&k1, &message).unwrap();
        prop_assert!(matches!(stateless::decrypt(&k2, &token), Err(ChatError::DecryptionFailed)));
    }

    /// Any single flipped bit is detected
    #[test]
    fn tampering_is_detected(
        key in key_strategy(),
        message in prop::collection::vec(any::<u8>(), 1..256),
        bit in any::<prop::sample::Index>(),
    ) {
        let mut token = stateless::encrypt(&key, &message).unwrap();
        let position = bit.index(token.len() * 8);
        token[position / 8] ^= 1 << (position % 8);
        prop_assert!(stateless::decrypt(&key, &token).is_err());
    }

    /// Arbitrary bytes are rejected as DecryptionFailed, never a panic
    #[test]
    fn garbage_tokens_fail_cleanly(key in key_strategy(), token in prop::collection::vec(any::<u8>(), 0..128)) {
        prop_assert!(matches!(stateless::decrypt(&key, &token), Err(ChatError::DecryptionFailed)));
    }

    /// Same passphrase, same key; different passphrases, different keys
    #[test]
    fn passphrase_derivation_is_deterministic(a in ".{1,64}", b in ".{1,64}") {
        prop_assert_eq!(
            SessionCrypto::derive_key_from_passphrase(&a),
            SessionCrypto::derive_key_from_passphrase(&a)
        );
        if a != b {
            prop_assert_ne!(
                SessionCrypto::derive_key_from_passphrase(&a),
                SessionCrypto::derive_key_from_passphrase(&b)
            );
        }
    }
}

// ============================================================================
// Sealed Box
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn sealed_box_roundtrip(key in key_strategy()) {
        let recipient = ExchangeKeypair::generate().unwrap();
        let sealed = seal(&recipient.public_key(), &key).unwrap();
        prop_assert_eq!(unseal(&recipient, &sealed).unwrap(), key.to_vec());

        let stranger = ExchangeKeypair::generate().unwrap();
        prop_assert!(unseal(&stranger, &sealed).is_err());
    }
}

// ============================================================================
// Discovery Input
// ============================================================================

proptest! {
    /// No byte string makes the announcement decoder panic
    #[test]
    fn announcement_decode_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
        let cleartext = DiscoveryMode::from_passphrase(None);
        let encrypted = DiscoveryMode::from_passphrase(Some("x"));
        if let Err(e) = cleartext.decode(&bytes) {
            prop_assert!(e.is_discardable());
        }
        if let Err(e) = encrypted.decode(&bytes) {
            prop_assert!(e.is_discardable());
        }
        let _ = Frame::decode(&bytes);
    }

    /// Announcements survive the passphrase codec for any valid username
    #[test]
    fn announcement_roundtrip(username in username_strategy(), passphrase in "[a-z]{1,16}") {
        let identity = Identity::generate(username.as_str()).unwrap();
        let mode = DiscoveryMode::from_passphrase(Some(passphrase.as_str()));
        let announcement = Announcement::for_identity(&identity);
        let decoded = mode.decode(&mode.encode(&announcement).unwrap()).unwrap();
        prop_assert_eq!(decoded, announcement);
    }
}

// ============================================================================
// Presence Directory
// ============================================================================

proptest! {
    /// recordSighting(u, a, t0) then lookup(u, t0) returns a
    #[test]
    fn sighting_then_lookup(username in username_strategy(), addr in any::<u64>(), ttl_secs in 1u64..3600) {
        let mut directory = PresenceDirectory::new(Duration::from_secs(ttl_secs));
        let t0 = Instant::now();
        directory.record_sighting(&username, MemoryAddr(addr), None, t0);
        prop_assert_eq!(directory.lookup(&username, t0), Some(MemoryAddr(addr)));
    }

    /// lookup(u, t1) is absent for every t1 > t0 + TTL
    #[test]
    fn expired_lookup_is_absent(
        username in username_strategy(),
        ttl_secs in 1u64..3600,
        extra_millis in 1u64..1_000_000,
    ) {
        let ttl = Duration::from_secs(ttl_secs);
        let mut directory = PresenceDirectory::new(ttl);
        let t0 = Instant::now();
        directory.record_sighting(&username, MemoryAddr(1), None, t0);

        let t1 = t0 + ttl + Duration::from_millis(extra_millis);
        prop_assert!(directory.list_active(t1).is_empty());
        prop_assert_eq!(directory.lookup(&username, t1), None);
        prop_assert!(directory.is_empty());
    }

    /// A username maps to at most one record, holding the last sighting
    #[test]
    fn last_sighting_wins(username in username_strategy(), addrs in prop::collection::vec(any::<u64>(), 1..20)) {
        let mut directory = PresenceDirectory::new(Duration::from_secs(60));
        let now = Instant::now();
        for addr in &addrs {
            directory.record_sighting(&username, MemoryAddr(*addr), None, now);
        }
        prop_assert_eq!(directory.len(), 1);
        prop_assert_eq!(directory.lookup(&username, now), addrs.last().copied().map(MemoryAddr));
    }
}
