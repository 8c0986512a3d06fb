//! Prelude module for commonly used types and traits.
//!
//! Import everything from this module with
//! `use didcomm_agent_core::prelude::*`.
//!
//! # Example
//!
//! ```rust
//! use didcomm_agent_core::prelude::*;
//!
//! fn example(registry: &ExchangeRegistry) -> Result<()> {
//!     let message = Message::new("https://didcomm.org/basicmessage/2.0/message", serde_json::json!({}));
//!     let mex = registry.create_exchange(message.thread_id(), "wallet-1", None);
//!     mex.add_message(EndpointMessage::builder(message).outbound().build()?)?;
//!     Ok(())
//! }
//! ```

// Re-export error types
pub use crate::error::{Error, Result};

// Re-export core traits
pub use crate::plugin::{DIDCommPlugin, DIDResolver, Encryptor, Signer};

// Re-export message types
pub use crate::endpoint::{header, EndpointMessage, MessageBody, MessageDirection};
pub use crate::types::{Attachment, AttachmentData, Message, PackedMessage, PackingType};

// Re-export conversation state
pub use crate::connection::{
    AgentType, Connection, ConnectionParams, ConnectionRole, ConnectionState, SharedConnection,
};
pub use crate::did::{Did, DidDoc, DidMethod};
pub use crate::exchange::MessageExchange;
pub use crate::invitation::{Invitation, InvitationState, SharedInvitation};
pub use crate::registry::ExchangeRegistry;

// Re-export core functions
pub use crate::pack::{pack_message, unpack_message};
