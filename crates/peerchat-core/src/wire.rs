//! Datagram framing
//!
//! Discovery and chat share one transport, so every datagram carries a
//! [`Frame`] that says which path it belongs to.
//!
//! ## Wire Format
//!
//! ```text
//! +----------+----------------------+
//! | version  | postcard(Frame)      |
//! | (1 byte) | (variable)           |
//! +----------+----------------------+
//! ```
//!
//! The sender username on `KeyOffer` and `Chat` is cleartext routing
//! information only; it is not authenticated.

use serde::{Deserialize, Serialize};

use crate::error::{ChatError, ChatResult};

/// Current wire protocol version
pub const WIRE_VERSION: u8 = 1;

/// Largest datagram we send or accept
pub const MAX_DATAGRAM_SIZE: usize = 64 * 1024;

/// One datagram's worth of protocol data
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Frame {
    /// Presence announcement (cleartext JSON or passphrase-encrypted token)
    Announce(Vec<u8>),

    /// Session key sealed to the recipient's public key
    KeyOffer {
        from: String,
        sealed_key: Vec<u8>,
    },

    /// Chat message encrypted under the session key
    Chat { from: String, body: Vec<u8> },
}

impl Frame {
    /// Encode with the version prefix.
    pub fn encode(&self) -> ChatResult<Vec<u8>> {
        let mut bytes = vec![WIRE_VERSION];
        let body = postcard::to_allocvec(self)
            .map_err(|e| ChatError::Serialization(format!("Failed to encode frame: {}", e)))?;
        bytes.extend_from_slice(&body);
        if bytes.len() > MAX_DATAGRAM_SIZE {
            return Err(ChatError::Serialization(format!(
                "Frame too large: {} bytes",
                bytes.len()
            )));
        }
        Ok(bytes)
    }

    /// Decode a datagram. Anything we cannot parse is `MalformedPayload`.
    pub fn decode(bytes: &[u8]) -> ChatResult<Self> {
        let (&version, body) = bytes
            .split_first()
            .ok_or_else(|| ChatError::MalformedPayload("Empty datagram".to_string()))?;
        if version != WIRE_VERSION {
            return Err(ChatError::MalformedPayload(format!(
                "Unsupported wire version {}",
                version
            )));
        }
        if bytes.len() > MAX_DATAGRAM_SIZE {
            return Err(ChatError::MalformedPayload(format!(
                "Datagram too large: {} bytes",
                bytes.len()
            )));
        }
        postcard::from_bytes(body)
            .map_err(|e| ChatError::MalformedPayload(format!("Invalid frame: {}", e)))
    }

    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Announce(_) => "announce",
            Frame::KeyOffer { .. } => "key_offer",
            Frame::Chat { .. } => "chat",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_roundtrip() {
        let frame = Frame::Chat {
            from: "bob".to_string(),
            body: vec![1, 2, 3],
        };
        let bytes = frame.encode().unwrap();
        assert_eq!(bytes[0], WIRE_VERSION);
        assert_eq!(Frame::decode(&bytes).unwrap(), frame);
    }

    #[test]
    fn test_rejects_unknown_version() {
        let mut bytes = Frame::Announce(b"{}".to_vec()).encode().unwrap();
        bytes[0] = WIRE_VERSION + 1;
        assert!(matches!(
            Frame::decode(&bytes),
            Err(ChatError::MalformedPayload(_))
        ));
    }

    #[test]
    fn test_rejects_empty_and_truncated() {
        assert!(Frame::decode(&[]).is_err());

        let bytes = Frame::KeyOffer {
            from: "alice".to_string(),
            sealed_key: vec![7; 80],
        }
        .encode()
        .unwrap();
        for len in 1..bytes.len() {
            assert!(
                Frame::decode(&bytes[..len]).is_err(),
                "truncated frame of {} bytes decoded",
                len
            );
        }
    }

    #[test]
    fn test_rejects_oversize_frame() {
        let frame = Frame::Announce(vec![0; MAX_DATAGRAM_SIZE]);
        assert!(matches!(frame.encode(), Err(ChatError::Serialization(_))));
    }

    #[test]
    fn test_kind_labels() {
        assert_eq!(Frame::Announce(Vec::new()).kind(), "announce");
        assert_eq!(
            Frame::Chat {
                from: String::new(),
                body: Vec::new()
            }
            .kind(),
            "chat"
        );
    }
}
