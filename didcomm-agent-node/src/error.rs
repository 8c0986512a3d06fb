//! Error types for the didcomm-agent-node crate.

use didcomm_agent_core::connection::AgentType;
use thiserror::Error;

/// The main error type for didcomm-agent-node operations.
#[derive(Error, Debug)]
pub enum Error {
    /// An error from the core crate.
    #[error("Core error: {0}")]
    Core(#[from] didcomm_agent_core::Error),

    /// An error occurred during message dispatch.
    #[error("Dispatch error: {0}")]
    Dispatch(String),

    /// An error occurred during HTTP operations.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The node configuration is invalid.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// An error occurred during serialization or deserialization.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An inbound message exceeds the configured size limit.
    #[error("Message of {size} bytes exceeds the limit of {limit}")]
    MessageTooLarge {
        /// Size of the message
        size: usize,
        /// The configured limit
        limit: usize,
    },

    /// No protocol is registered for the URI.
    #[error("Unsupported protocol: {0}")]
    UnsupportedProtocol(String),

    /// The protocol cannot run on wallets of this agent type.
    #[error("Protocol {protocol} does not support {agent:?} agents")]
    UnsupportedAgentType {
        /// The protocol URI
        protocol: &'static str,
        /// The wallet's agent type
        agent: AgentType,
    },

    /// No wallet matches the lookup.
    #[error("Wallet not found: {0}")]
    WalletNotFound(String),

    /// A credential or presentation is missing or invalid.
    #[error("Credential error: {0}")]
    Credential(String),
}

impl Error {
    /// Shorthand for a core protocol violation.
    pub fn violation(msg: impl Into<String>) -> Self {
        Error::Core(didcomm_agent_core::Error::violation(msg))
    }

    /// Whether this error is an elapsed await.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Core(err) if err.is_timeout())
    }
}

/// A specialized Result type for didcomm-agent-node operations.
pub type Result<T> = std::result::Result<T, Error>;
