//! Core of a `DIDComm` agent: message exchanges and the state they carry.
//!
//! This crate provides the building blocks protocol implementations are
//! written against. It does not know any concrete protocol.
//!
//! # Features
//!
//! - Endpoint messages that derive their correlation headers (id, type,
//!   thread, parent thread) from `DIDComm` v1 and v2 message bodies
//! - Message exchanges that keep the ordered log of one thread, typed
//!   attachments and futures for awaited replies
//! - A registry that finds exchanges by thread, verification key, connection
//!   or invitation key
//! - The connection state machine and out-of-band invitations
//! - Envelope packing and unpacking over an injected plugin for DID
//!   resolution, signing and encryption
//!
//! # Architecture
//!
//! The crate is organized into these main modules:
//! - `endpoint`: Endpoint messages and their headers
//! - `exchange`: Message exchanges and reply futures
//! - `registry`: Exchange lookup
//! - `connection`: Connections and their lifecycle
//! - `invitation`: Out-of-band invitations
//! - `did`: DIDs and DID documents
//! - `attachment`: Typed attachment keys
//! - `pack`: Envelope packing and unpacking
//! - `plugin`: Plugin system for DID resolution and cryptographic operations
//! - `types`: Wire message types
//! - `error`: Error types and handling
//!
//! # Examples
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use didcomm_agent_core::{EndpointMessage, ExchangeRegistry, Result};
//!
//! async fn example(registry: &ExchangeRegistry, reply: EndpointMessage) -> Result<()> {
//!     let mex = registry.create_exchange("thread-1", "wallet-1", None);
//!     mex.place_endpoint_message_future("https://didcomm.org/trust_ping/1.0/ping_response")?;
//!
//!     // Normally completed by the protocol that receives the reply
//!     mex.complete_endpoint_message_future(
//!         "https://didcomm.org/trust_ping/1.0/ping_response",
//!         reply,
//!     )?;
//!
//!     let reply = mex
//!         .await_endpoint_message(
//!             "https://didcomm.org/trust_ping/1.0/ping_response",
//!             Duration::from_secs(10),
//!         )
//!         .await?;
//!     mex.add_message(reply)?;
//!     Ok(())
//! }
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod attachment;
pub mod connection;
pub mod did;
pub mod endpoint;
pub mod error;
pub mod exchange;
pub mod invitation;
pub mod pack;
pub mod plugin;
pub mod prelude;
pub mod registry;
pub mod types;

#[cfg(test)]
pub(crate) mod tests;

pub use attachment::{AttachmentKey, Shared};
pub use connection::{
    AgentType, Connection, ConnectionParams, ConnectionRole, ConnectionState, SharedConnection,
};
pub use did::{Did, DidDoc, DidMethod};
pub use endpoint::{header, EndpointMessage, MessageBody, MessageDirection};
pub use error::{Error, Result};
pub use exchange::MessageExchange;
pub use invitation::{Invitation, InvitationState, SharedInvitation};
pub use pack::{pack_message, unpack_message, EnvelopeHeader, UnpackedMessage};
pub use plugin::{DIDCommPlugin, DIDResolver, Encryptor, Signer};
pub use registry::ExchangeRegistry;
pub use types::{Attachment, AttachmentData, Message, PackedMessage, PackingType};
