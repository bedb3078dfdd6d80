//! Error types for TSS service operations

use thiserror::Error;

/// Result type alias for TSS operations
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of an [`Error`], used by hosts to decide how to react
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed request or committee; fix the request and retry
    InvalidInput,
    /// Unexpected, forged or unverifiable protocol message; the round is dead
    ProtocolViolation,
    /// The messenger failed to deliver a message
    TransportFailure,
    /// No key material stored for the requested public key
    StateNotFound,
    /// Stored key material could not be decoded
    StateCorrupt,
    /// Another session already owns the requested key or session
    SessionBusy,
    /// A configured round timeout elapsed
    Timeout,
    /// Local cryptographic failure (key generation, encryption)
    Crypto,
    /// Anything else
    Internal,
}

/// Errors that can occur during TSS operations
#[derive(Debug, Error)]
pub enum Error {
    // ============ Request Errors ============
    /// Malformed request, committee or encoding
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Too few parties in a signing committee
    #[error("Threshold not met: required {required}, got {actual}")]
    ThresholdNotMet { required: usize, actual: usize },

    /// Derivation path could not be applied
    #[error("Key derivation error: {0}")]
    Derivation(String),

    // ============ Protocol Errors ============
    /// Message from a party that is not part of the committee, or duplicated
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// Share, proof or signature verification failed
    #[error("Verification failed: {0}")]
    VerificationFailed(String),

    // ============ Transport Errors ============
    /// Messenger reported a delivery failure
    #[error("Transport failure: {0}")]
    Transport(String),

    /// Round did not complete within the configured limit
    #[error("Timeout waiting for {0}")]
    Timeout(String),

    // ============ Session Errors ============
    /// Session or key already in use by a running session
    #[error("Session busy: {0}")]
    SessionBusy(String),

    /// Session queue closed before the round finished
    #[error("Session closed: {0}")]
    SessionClosed(String),

    // ============ State Errors ============
    /// No local state for the public key
    #[error("Local state not found: {0}")]
    StateNotFound(String),

    /// Local state could not be decoded
    #[error("Local state corrupt: {0}")]
    StateCorrupt(String),

    /// Storage backend failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Encryption/decryption of stored state failed
    #[error("Encryption error: {0}")]
    Encryption(String),

    // ============ Cryptographic Errors ============
    /// Cryptographic operation failed
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    // ============ Serialization Errors ============
    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    // ============ Internal Errors ============
    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidInput(_)
            | Error::ThresholdNotMet { .. }
            | Error::Derivation(_) => ErrorKind::InvalidInput,
            Error::ProtocolViolation(_)
            | Error::VerificationFailed(_)
            | Error::Deserialization(_) => ErrorKind::ProtocolViolation,
            Error::Transport(_) => ErrorKind::TransportFailure,
            Error::Timeout(_) => ErrorKind::Timeout,
            Error::SessionBusy(_) => ErrorKind::SessionBusy,
            Error::StateNotFound(_) => ErrorKind::StateNotFound,
            Error::StateCorrupt(_) | Error::Encryption(_) => ErrorKind::StateCorrupt,
            Error::Crypto(_) => ErrorKind::Crypto,
            Error::SessionClosed(_)
            | Error::Storage(_)
            | Error::Serialization(_)
            | Error::Internal(_)
            | Error::Io(_) => ErrorKind::Internal,
        }
    }

    /// Check if the caller can recover by fixing the request, running keygen
    /// first, waiting for the busy session, or resending
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::InvalidInput
                | ErrorKind::StateNotFound
                | ErrorKind::SessionBusy
                | ErrorKind::TransportFailure
        )
    }

    /// Check if this error ends the current round for good
    pub fn is_fatal_to_round(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::ProtocolViolation | ErrorKind::Timeout | ErrorKind::TransportFailure
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<hex::FromHexError> for Error {
    fn from(e: hex::FromHexError) -> Self {
        Error::InvalidInput(format!("invalid hex: {}", e))
    }
}

impl From<base64::DecodeError> for Error {
    fn from(e: base64::DecodeError) -> Self {
        Error::InvalidInput(format!("invalid base64: {}", e))
    }
}
