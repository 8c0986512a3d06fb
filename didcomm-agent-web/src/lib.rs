//! HTTP surface of a `DIDComm` agent node.
//!
//! This crate serves an [`didcomm_agent_node::AgentNode`] over HTTP. It
//! exposes endpoints for:
//! - Receiving packed `DIDComm` messages (`POST /didcomm`)
//! - Node status and hosted wallets (`GET /status`)
//!
//! Requests are logged through `tracing-actix-web`; CORS is configurable.

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod handlers;
pub mod server;

// Re-export main types for convenience
pub use error::{Error, Result};
pub use handlers::{get_status, receive_message, Accepted, NodeStatus, WalletStatus};
pub use server::{AgentServer, CorsConfig, ServerConfig};
