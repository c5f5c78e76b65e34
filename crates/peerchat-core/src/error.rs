//! Error types for peerchat

use thiserror::Error;

/// Main error type for peerchat operations
#[derive(Error, Debug)]
pub enum ChatError {
    /// Key generation, encryption, or key handling failed
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// Authenticated decryption rejected a token (wrong key, tampered data, or malformed input)
    #[error("Decryption failed")]
    DecryptionFailed,

    /// Bytes could not be parsed as an announcement, frame, or message
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    /// Username is unknown or its presence record has expired
    #[error("Peer not found: {0}")]
    PeerNotFound(String),

    /// Session has no key material yet
    #[error("Session not ready: {0}")]
    NotReady(String),

    /// Session was closed and its key discarded
    #[error("Session closed: {0}")]
    SessionClosed(String),

    /// Underlying transport failed to send or receive
    #[error("Transport error: {0}")]
    Transport(String),

    /// Transport was closed
    #[error("Transport closed")]
    TransportClosed,

    /// Error during serialization/deserialization
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid node configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Invalid operation for current state
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// General I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ChatError {
    /// Errors caused by inbound data that discovery drops without reporting.
    pub fn is_discardable(&self) -> bool {
        matches!(
            self,
            ChatError::DecryptionFailed | ChatError::MalformedPayload(_)
        )
    }
}

/// Result type alias using ChatError
pub type ChatResult<T> = Result<T, ChatError>;
