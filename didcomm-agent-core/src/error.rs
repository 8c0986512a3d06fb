//! Error types for the didcomm-agent-core crate.

use std::time::Duration;

use thiserror::Error;

use crate::connection::ConnectionState;

/// Error type for the DIDComm agent core library
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid format error
    #[error("Invalid format: {0}")]
    InvalidFormat(String),
    /// Base64 decode error
    #[error("Base64 decode error: {0}")]
    Base64Decode(#[from] base64::DecodeError),
    /// Missing required field
    #[error("Missing required field: {0}")]
    MissingField(&'static str),
    /// DID resolution error
    #[error("DID resolution error: {0}")]
    DIDResolution(String),
    /// Serialization error
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    /// Signing error
    #[error("Signing error: {0}")]
    Signing(String),
    /// Verification error
    #[error("Verification error: {0}")]
    Verification(String),
    /// Encryption error
    #[error("Encryption error: {0}")]
    Encryption(String),
    /// Decryption error
    #[error("Decryption error: {0}")]
    Decryption(String),

    /// A message or step does not fit the conversation it was applied to
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),
    /// The message type differs from the one the current step expects
    #[error("Unexpected message type: expected {expected}, got {actual}")]
    UnexpectedMessageType {
        /// The type the step expects
        expected: String,
        /// The type that was found
        actual: String,
    },
    /// The message belongs to another thread
    #[error("Message thread {actual} does not belong to exchange thread {expected}")]
    ThreadMismatch {
        /// Thread id of the exchange
        expected: String,
        /// Thread id carried by the message
        actual: String,
    },
    /// A required attachment or collaborator is not available
    #[error("Missing required context: {0}")]
    MissingContext(&'static str),
    /// The connection must be active for this operation
    #[error("Connection {id} not active: {state}")]
    ConnectionNotActive {
        /// The connection id
        id: String,
        /// The state the connection is in
        state: ConnectionState,
    },
    /// The connection cannot move along this edge
    #[error("Invalid connection state transition: {from} => {to}")]
    InvalidStateTransition {
        /// Current state
        from: ConnectionState,
        /// Requested state
        to: ConnectionState,
    },
    /// A future for this message type is already registered
    #[error("Future already placed for: {0}")]
    FutureAlreadyPlaced(String),
    /// No pending future for this message type
    #[error("No pending future for: {0}")]
    NoSuchFuture(String),
    /// The awaited message did not arrive in time
    #[error("Timeout after {timeout:?} waiting for: {message_type}")]
    Timeout {
        /// The awaited message type
        message_type: String,
        /// The timeout that elapsed
        timeout: Duration,
    },
    /// The protocol does not know this message type
    #[error("Unsupported message type: {0}")]
    UnsupportedMessageType(String),
    /// No conversation matches an inbound message
    #[error("Unsolicited message: {0}")]
    UnsolicitedMessage(String),
}

impl Error {
    /// Creates a [`Error::ProtocolViolation`].
    pub fn violation(msg: impl Into<String>) -> Self {
        Self::ProtocolViolation(msg.into())
    }

    /// Whether this error reports an awaited message that never arrived.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Result type for the DIDComm agent core library
pub type Result<T> = std::result::Result<T, Error>;
