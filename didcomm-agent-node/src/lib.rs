//! A `DIDComm` agent node: wallets, protocols and message dispatch.
//!
//! This crate hosts wallets on a node and runs `DIDComm` protocols between
//! them, on top of the exchanges and connections of `didcomm-agent-core`.
//! It can:
//! - Create and accept out-of-band invitations
//! - Establish connections through DID exchange and trust ping
//! - Exchange basic messages over active connections
//! - Issue credentials and present proofs
//! - Receive packed messages and route them to the protocol that owns them
//! - Deliver packed messages over HTTP or to the node's own inbox
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//! - `node`: The node, its configuration and the inbound listener
//! - `wallet`: Wallets and the service that hosts them
//! - `protocol`: The protocol contract and the agent context
//! - `protocols`: The concrete protocols
//! - `dispatch`: Inbound routing and outbound packing
//! - `transport`: HTTP and loopback delivery
//! - `credential`: Minimal verifiable credentials
//! - `mock`: A plugin for tests and demos
//! - `error`: Error types and handling
//!
//! # Examples
//!
//! ```rust,no_run
//! use didcomm_agent_node::mock::MockPlugin;
//! use didcomm_agent_node::protocols::{DidExchangeProtocol, OutOfBandProtocol};
//! use didcomm_agent_node::{AgentNode, NodeConfig, Protocol, TransportMode};
//!
//! async fn example() -> didcomm_agent_node::Result<()> {
//!     let node = AgentNode::new(
//!         NodeConfig { transport: TransportMode::Loopback, ..Default::default() },
//!         MockPlugin::new(),
//!     )?;
//!     node.start()?;
//!
//!     let faber = node.create_wallet("Faber");
//!     let alice = node.create_wallet("Alice");
//!     let invitation = OutOfBandProtocol::create_invitation(node.context(), &faber, None)?
//!         .invitation()?
//!         .read()
//!         .clone();
//!     OutOfBandProtocol::receive_invitation(node.context(), &alice, invitation)?
//!         .with_protocol::<DidExchangeProtocol>()
//!         .connect(None)
//!         .await?;
//!     Ok(())
//! }
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod credential;
pub mod dispatch;
pub mod error;
pub mod mock;
pub mod node;
pub mod protocol;
pub mod protocols;
pub mod transport;
pub mod wallet;


// Re-export main types for convenience
pub use dispatch::MessageDispatchService;
pub use error::{Error, Result};
pub use node::{AgentNode, NodeConfig, TransportMode};
pub use protocol::{AgentContext, Protocol, ProtocolKey};
pub use transport::{DispatchConfig, HttpTransport, LoopbackTransport, Transport};
pub use wallet::{BasicMessageRecord, Wallet, WalletService};
