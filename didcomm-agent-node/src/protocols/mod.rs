//! The protocols a node speaks.
//!
//! Out-of-band, DID exchange and trust ping use `DIDComm` v1 style JSON
//! bodies with `@id`, `@type` and `~thread` decorators. Basic message, issue
//! credential and present proof use structured `DIDComm` v2 messages.

pub mod basic_message;
pub mod did_exchange;
pub mod issue_credential;
pub mod out_of_band;
pub mod present_proof;
pub mod trust_ping;

pub use basic_message::BasicMessageProtocol;
pub use did_exchange::DidExchangeProtocol;
pub use issue_credential::IssueCredentialProtocol;
pub use out_of_band::OutOfBandProtocol;
pub use present_proof::PresentProofProtocol;
pub use trust_ping::TrustPingProtocol;
