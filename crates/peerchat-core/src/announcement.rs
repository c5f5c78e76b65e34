//! Presence announcements and the discovery codec
//!
//! An announcement is a small JSON object:
//!
//! ```json
//! {"type":"announce","username":"alice","timestamp":1760000000000,"public_key":"<base64>"}
//! ```
//!
//! In [`DiscoveryMode::Encrypted`] the JSON bytes are wrapped in a
//! ChaCha20-Poly1305 token under the passphrase-derived key. In
//! [`DiscoveryMode::Cleartext`] they go out as-is and anyone on the segment
//! can read them.

use std::fmt;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::crypto::SessionCrypto;
use crate::error::{ChatError, ChatResult};
use crate::identity::{validate_username, ExchangePublicKey, Identity};

/// Discriminator for the `type` field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnnouncementKind {
    #[serde(rename = "announce")]
    Announce,
}

/// Presence announcement body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Announcement {
    #[serde(rename = "type")]
    pub kind: AnnouncementKind,
    pub username: String,
    /// Sender wall-clock time, milliseconds since the Unix epoch
    pub timestamp: i64,
    /// Base64 X25519 public key for session key bootstrap
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
}

impl Announcement {
    /// Build an announcement for `identity`, stamped now.
    pub fn for_identity(identity: &Identity) -> Self {
        Self {
            kind: AnnouncementKind::Announce,
            username: identity.username().to_string(),
            timestamp: Utc::now().timestamp_millis(),
            public_key: Some(identity.public_key().to_base64()),
        }
    }

    /// Parse and validate JSON bytes.
    pub fn from_json(bytes: &[u8]) -> ChatResult<Self> {
        let announcement: Self = serde_json::from_slice(bytes)
            .map_err(|e| ChatError::MalformedPayload(format!("Invalid announcement: {}", e)))?;
        validate_username(&announcement.username)
            .map_err(|e| ChatError::MalformedPayload(e.to_string()))?;
        if announcement.username != announcement.username.trim() {
            return Err(ChatError::MalformedPayload(
                "username has surrounding whitespace".to_string(),
            ));
        }
        // Reject a bad key up front so a half-valid announcement never lands in the directory
        announcement.decoded_public_key()?;
        Ok(announcement)
    }

    pub fn to_json(&self) -> ChatResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| ChatError::Serialization(e.to_string()))
    }

    /// Decode the optional public key field.
    pub fn decoded_public_key(&self) -> ChatResult<Option<ExchangePublicKey>> {
        self.public_key
            .as_deref()
            .map(ExchangePublicKey::from_base64)
            .transpose()
    }
}

/// Whether discovery traffic is encrypted.
#[derive(Clone)]
pub enum DiscoveryMode {
    /// Announcements are plain JSON; anyone can read usernames
    Cleartext,
    /// Announcements are sealed under a passphrase-derived key
    Encrypted(SessionCrypto),
}

impl DiscoveryMode {
    /// Pick the mode from an optional passphrase.
    ///
    /// An empty passphrase counts as absent.
    pub fn from_passphrase(passphrase: Option<&str>) -> Self {
        match passphrase {
            Some(p) if !p.is_empty() => DiscoveryMode::Encrypted(SessionCrypto::new(
                &SessionCrypto::derive_key_from_passphrase(p),
            )),
            _ => DiscoveryMode::Cleartext,
        }
    }

    pub fn is_encrypted(&self) -> bool {
        matches!(self, DiscoveryMode::Encrypted(_))
    }

    /// Serialize and, in encrypted mode, seal an announcement.
    pub fn encode(&self, announcement: &Announcement) -> ChatResult<Vec<u8>> {
        let json = announcement.to_json()?;
        match self {
            DiscoveryMode::Cleartext => Ok(json),
            DiscoveryMode::Encrypted(crypto) => crypto.encrypt(&json),
        }
    }

    /// Open and parse inbound announcement bytes.
    ///
    /// Fails with [`ChatError::DecryptionFailed`] when the bytes are not
    /// sealed under our key, or [`ChatError::MalformedPayload`] when they do
    /// not parse.
    pub fn decode(&self, bytes: &[u8]) -> ChatResult<Announcement> {
        match self {
            DiscoveryMode::Cleartext => Announcement::from_json(bytes),
            DiscoveryMode::Encrypted(crypto) => {
                let json = crypto.decrypt(bytes)?;
                Announcement::from_json(&json)
            }
        }
    }
}

impl fmt::Debug for DiscoveryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DiscoveryMode::Cleartext => "Cleartext",
            DiscoveryMode::Encrypted(_) => "Encrypted",
        })
    }
}

impl fmt::Display for DiscoveryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DiscoveryMode::Cleartext => "cleartext",
            DiscoveryMode::Encrypted(_) => "encrypted",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> Identity {
        Identity::generate("alice").unwrap()
    }

    #[test]
    fn test_announcement_json_shape() {
        let identity = alice();
        let json = Announcement::for_identity(&identity).to_json().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&json).unwrap();

        assert_eq!(value["type"], "announce");
        assert_eq!(value["username"], "alice");
        assert!(value["timestamp"].is_i64());
        assert_eq!(value["public_key"], identity.public_key().to_base64());
    }

    #[test]
    fn test_minimal_announcement_parses() {
        let parsed =
            Announcement::from_json(br#"{"type":"announce","username":"bob","timestamp":1}"#)
                .unwrap();
        assert_eq!(parsed.username, "bob");
        assert_eq!(parsed.decoded_public_key().unwrap(), None);
    }

    #[test]
    fn test_rejects_wrong_type_and_garbage() {
        let cases: [&[u8]; 8] = [
            br#"{"type":"hello","username":"bob","timestamp":1}"#,
            br#"{"type":"announce","timestamp":1}"#,
            br#"{"type":"announce","username":"","timestamp":1}"#,
            br#"{"type":"announce","username":" bob","timestamp":1}"#,
            br#"{"type":"announce","username":"bob","timestamp":1,"public_key":"AAAA"}"#,
            b"\xff\xfe\x00",
            b"",
            br#"{"type":"announce","username":"bob""#,
        ];
        for bytes in cases {
            assert!(
                matches!(
                    Announcement::from_json(bytes),
                    Err(ChatError::MalformedPayload(_))
                ),
                "accepted {:?}",
                String::from_utf8_lossy(bytes)
            );
        }
    }

    #[test]
    fn test_cleartext_mode_is_plain_json() {
        let mode = DiscoveryMode::from_passphrase(None);
        assert!(!mode.is_encrypted());

        let announcement = Announcement::for_identity(&alice());
        let bytes = mode.encode(&announcement).unwrap();
        assert!(bytes.starts_with(b"{"));
        assert_eq!(mode.decode(&bytes).unwrap(), announcement);
    }

    #[test]
    fn test_empty_passphrase_means_cleartext() {
        assert!(!DiscoveryMode::from_passphrase(Some("")).is_encrypted());
    }

    #[test]
    fn test_same_passphrase_decodes() {
        let sender = DiscoveryMode::from_passphrase(Some("x"));
        let receiver = DiscoveryMode::from_passphrase(Some("x"));

        let announcement = Announcement::for_identity(&alice());
        let bytes = sender.encode(&announcement).unwrap();
        assert_eq!(receiver.decode(&bytes).unwrap(), announcement);
    }

    #[test]
    fn test_mismatched_passphrase_fails() {
        let sender = DiscoveryMode::from_passphrase(Some("x"));
        let bytes = sender.encode(&Announcement::for_identity(&alice())).unwrap();

        let other = DiscoveryMode::from_passphrase(Some("y"));
        assert!(matches!(other.decode(&bytes), Err(ChatError::DecryptionFailed)));

        let cleartext = DiscoveryMode::from_passphrase(None);
        assert!(matches!(
            cleartext.decode(&bytes),
            Err(ChatError::MalformedPayload(_))
        ));
    }

    #[test]
    fn test_encrypted_node_ignores_cleartext_announcements() {
        let bytes = DiscoveryMode::Cleartext
            .encode(&Announcement::for_identity(&alice()))
            .unwrap();
        let encrypted = DiscoveryMode::from_passphrase(Some("x"));
        assert!(encrypted.decode(&bytes).is_err());
    }

    #[test]
    fn test_mode_display() {
        assert_eq!(DiscoveryMode::Cleartext.to_string(), "cleartext");
        assert_eq!(
            format!("{:?}", DiscoveryMode::from_passphrase(Some("x"))),
            "Encrypted"
        );
    }
}
