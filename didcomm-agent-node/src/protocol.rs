//! The protocol contract and the context protocols run in.
//!
//! A protocol is a thin handle bound to one [`MessageExchange`]. It exposes
//! `send_*`, `receive_*` and `await_*` operations and an
//! [`Protocol::invoke_method`] entry point the dispatch service calls for
//! inbound messages. Handles are cheap to create; [`Protocol::with_protocol`]
//! rebinds the same exchange to another protocol so that a multi-step
//! conversation reads as one chain:
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use didcomm_agent_node::error::Result;
//! use didcomm_agent_node::protocol::{AgentContext, Protocol};
//! use didcomm_agent_node::protocols::{DidExchangeProtocol, OutOfBandProtocol};
//! use didcomm_agent_node::wallet::Wallet;
//!
//! async fn connect(ctx: &Arc<AgentContext>, faber: &Arc<Wallet>, alice: &Arc<Wallet>) -> Result<()> {
//!     let inviter = OutOfBandProtocol::create_invitation(ctx, faber, None)?;
//!     let invitation = inviter.invitation()?.read().clone();
//!     OutOfBandProtocol::receive_invitation(ctx, alice, invitation)?
//!         .with_protocol::<DidExchangeProtocol>()
//!         .connect(None)
//!         .await?;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use didcomm_agent_core::types::random_id;
use didcomm_agent_core::{
    AgentType, DIDCommPlugin, Did, EndpointMessage, Error as CoreError, ExchangeRegistry, Message,
    MessageExchange, PackingType, SharedConnection,
};
use serde_json::{json, Value};
use tracing::debug;

use crate::dispatch::MessageDispatchService;
use crate::error::{Error, Result};
use crate::protocols::{
    BasicMessageProtocol, DidExchangeProtocol, IssueCredentialProtocol, OutOfBandProtocol,
    PresentProofProtocol, TrustPingProtocol,
};
use crate::transport::Transport;
use crate::wallet::{Wallet, WalletService};

/// Everything a protocol step needs besides its exchange.
pub struct AgentContext {
    /// Exchange lookup
    pub registry: Arc<ExchangeRegistry>,
    /// Hosted wallets
    pub wallets: Arc<WalletService>,
    /// Resolver, signer and encryptor
    pub plugin: Arc<dyn DIDCommPlugin>,
    /// Outbound delivery
    pub transport: Arc<dyn Transport>,
    /// Envelope type for outbound messages
    pub packing: PackingType,
    /// Default timeout of `await_*` operations
    pub await_timeout: Duration,
}

impl AgentContext {
    /// The hosted wallet with this id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WalletNotFound`] if no such wallet is hosted.
    pub fn wallet(&self, id: &str) -> Result<Arc<Wallet>> {
        self.wallets
            .find_by_id(id)
            .ok_or_else(|| Error::WalletNotFound(id.to_string()))
    }
}

impl std::fmt::Debug for AgentContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentContext")
            .field("exchanges", &self.registry.len())
            .field("packing", &self.packing)
            .field("await_timeout", &self.await_timeout)
            .finish_non_exhaustive()
    }
}

/// A protocol bound to one message exchange.
#[async_trait]
pub trait Protocol: Sized + Send + Sync {
    /// The protocol URI, the message type prefix of every message.
    const PROTOCOL_URI: &'static str;

    /// Binds the protocol to `mex`.
    fn new(mex: Arc<MessageExchange>, ctx: Arc<AgentContext>) -> Self;

    /// The bound exchange.
    fn mex(&self) -> &Arc<MessageExchange>;

    /// The agent context.
    fn ctx(&self) -> &Arc<AgentContext>;

    /// Agent types whose wallets can run this protocol.
    fn supported_agent_types(&self) -> &'static [AgentType] {
        &[AgentType::Native]
    }

    /// Handles the inbound message of `message_type` that was last appended
    /// to the bound exchange.
    ///
    /// # Errors
    ///
    /// Returns [`didcomm_agent_core::Error::UnsupportedMessageType`] for
    /// types the protocol does not define, or the error of the handler.
    async fn invoke_method(&self, to: &Arc<Wallet>, message_type: &str) -> Result<()>;

    /// Rebinds the exchange to protocol `P`.
    fn with_protocol<P: Protocol>(&self) -> P {
        P::new(Arc::clone(self.mex()), Arc::clone(self.ctx()))
    }

    /// The wallet that owns the bound exchange.
    ///
    /// # Errors
    ///
    /// Fails if the exchange has no wallet or the wallet is gone.
    fn wallet(&self) -> Result<Arc<Wallet>> {
        self.ctx().wallet(&self.mex().wallet_id()?)
    }

    /// A dispatch service over this protocol's context.
    fn dispatcher(&self) -> MessageDispatchService {
        MessageDispatchService::new(Arc::clone(self.ctx()))
    }
}

/// The protocols a node understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolKey {
    /// Out-of-band invitations
    OutOfBand,
    /// DID exchange
    DidExchange,
    /// Trust ping
    TrustPing,
    /// Basic messages
    BasicMessage,
    /// Credential issuance
    IssueCredential,
    /// Proof presentation
    PresentProof,
}

impl ProtocolKey {
    /// All known protocols.
    pub const ALL: [ProtocolKey; 6] = [
        ProtocolKey::OutOfBand,
        ProtocolKey::DidExchange,
        ProtocolKey::TrustPing,
        ProtocolKey::BasicMessage,
        ProtocolKey::IssueCredential,
        ProtocolKey::PresentProof,
    ];

    /// The protocol URI.
    #[must_use]
    pub fn uri(self) -> &'static str {
        match self {
            ProtocolKey::OutOfBand => OutOfBandProtocol::PROTOCOL_URI,
            ProtocolKey::DidExchange => DidExchangeProtocol::PROTOCOL_URI,
            ProtocolKey::TrustPing => TrustPingProtocol::PROTOCOL_URI,
            ProtocolKey::BasicMessage => BasicMessageProtocol::PROTOCOL_URI,
            ProtocolKey::IssueCredential => IssueCredentialProtocol::PROTOCOL_URI,
            ProtocolKey::PresentProof => PresentProofProtocol::PROTOCOL_URI,
        }
    }

    /// Looks up the protocol for `uri`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedProtocol`] for unknown URIs.
    pub fn from_uri(uri: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|key| key.uri() == uri)
            .ok_or_else(|| Error::UnsupportedProtocol(uri.to_string()))
    }

    /// Binds this protocol to `mex` and lets it handle `message_type`.
    ///
    /// # Errors
    ///
    /// Fails if the wallet's agent type is not supported or the handler
    /// fails.
    pub async fn invoke(
        self,
        mex: Arc<MessageExchange>,
        ctx: Arc<AgentContext>,
        to: &Arc<Wallet>,
        message_type: &str,
    ) -> Result<()> {
        match self {
            ProtocolKey::OutOfBand => {
                invoke_with(OutOfBandProtocol::new(mex, ctx), to, message_type).await
            }
            ProtocolKey::DidExchange => {
                invoke_with(DidExchangeProtocol::new(mex, ctx), to, message_type).await
            }
            ProtocolKey::TrustPing => {
                invoke_with(TrustPingProtocol::new(mex, ctx), to, message_type).await
            }
            ProtocolKey::BasicMessage => {
                invoke_with(BasicMessageProtocol::new(mex, ctx), to, message_type).await
            }
            ProtocolKey::IssueCredential => {
                invoke_with(IssueCredentialProtocol::new(mex, ctx), to, message_type).await
            }
            ProtocolKey::PresentProof => {
                invoke_with(PresentProofProtocol::new(mex, ctx), to, message_type).await
            }
        }
    }
}

async fn invoke_with<P: Protocol>(protocol: P, to: &Arc<Wallet>, message_type: &str) -> Result<()> {
    let agent = to.agent_type();
    if !protocol.supported_agent_types().contains(&agent) {
        return Err(Error::UnsupportedAgentType {
            protocol: P::PROTOCOL_URI,
            agent,
        });
    }
    debug!(
        mex = %protocol.mex().id(),
        wallet = %to.name(),
        message_type,
        "Invoke protocol method"
    );
    protocol.invoke_method(to, message_type).await
}

/// A `DIDComm` v1 style JSON body with decorators.
///
/// `fields` must be a JSON object; its members are merged into the body.
pub(crate) fn json_message(
    typ: &str,
    thid: Option<&str>,
    pthid: Option<&str>,
    fields: Value,
) -> Value {
    let mut body = json!({ "@id": random_id(), "@type": typ });
    if thid.is_some() || pthid.is_some() {
        let mut thread = serde_json::Map::new();
        if let Some(thid) = thid {
            thread.insert("thid".into(), json!(thid));
        }
        if let Some(pthid) = pthid {
            thread.insert("pthid".into(), json!(pthid));
        }
        body["~thread"] = Value::Object(thread);
    }
    if let (Some(body), Value::Object(fields)) = (body.as_object_mut(), fields) {
        body.extend(fields);
    }
    body
}

/// A `DIDComm` v2 message from me to them on `con`.
pub(crate) fn connection_message(
    con: &SharedConnection,
    typ: &str,
    thid: Option<&str>,
    body: Value,
) -> Result<Message> {
    let con = con.read();
    let to = con
        .their_did
        .as_ref()
        .map(Did::uri)
        .ok_or(CoreError::MissingContext("their DID"))?;
    let msg = Message::new(typ, body).from(con.my_did.uri()).to([to]);
    Ok(match thid {
        Some(thid) => msg.thid(thid),
        None => msg,
    })
}

/// The latest message of type `typ` in `mex`.
pub(crate) fn last_of_type(
    mex: &MessageExchange,
    typ: &str,
    what: &'static str,
) -> Result<EndpointMessage> {
    mex.messages()
        .into_iter()
        .rev()
        .find(|epm| epm.message_type() == Some(typ))
        .ok_or_else(|| CoreError::MissingContext(what).into())
}

/// The JSON document attached to `epm` in `format`.
pub(crate) fn attached_document(epm: &EndpointMessage, format: &str) -> Result<Value> {
    epm.message()
        .and_then(|msg| msg.attachment_in_format(format))
        .and_then(|at| at.data.json_value())
        .cloned()
        .ok_or_else(|| Error::Credential(format!("No {format} attachment on {}", epm.id())))
}

/// Places a future for `message_type` unless one is already there.
pub(crate) fn ensure_future(mex: &MessageExchange, message_type: &str) -> Result<()> {
    match mex.place_endpoint_message_future(message_type) {
        Ok(()) | Err(CoreError::FutureAlreadyPlaced(_)) => Ok(()),
        Err(err) => Err(err.into()),
    }
}

/// The body of `epm` as JSON.
pub(crate) fn json_body(epm: &EndpointMessage) -> Result<Value> {
    Ok(serde_json::from_str(&epm.body_as_json()?)?)
}

/// Completes the future for `message_type` if one is pending.
pub(crate) fn complete_if_pending(
    mex: &MessageExchange,
    message_type: &str,
    epm: EndpointMessage,
) -> Result<()> {
    if mex.has_endpoint_message_future(message_type) {
        mex.complete_endpoint_message_future(message_type, epm)?;
    }
    Ok(())
}

/// Unix time in whole seconds.
pub(crate) fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_protocol_key_lookup() {
        for key in ProtocolKey::ALL {
            assert_eq!(ProtocolKey::from_uri(key.uri()).unwrap(), key);
        }
        assert_eq!(
            ProtocolKey::from_uri("https://didcomm.org/trust_ping/1.0").unwrap(),
            ProtocolKey::TrustPing
        );
        assert!(matches!(
            ProtocolKey::from_uri("https://didcomm.org/routing/1.0"),
            Err(Error::UnsupportedProtocol(_))
        ));
    }

    #[test]
    fn test_json_message_decorators() {
        let body = json_message(
            "https://example.org/p/1.0/hello",
            Some("t-1"),
            Some("p-1"),
            json!({ "label": "x" }),
        );
        assert_eq!(body["~thread"], json!({ "thid": "t-1", "pthid": "p-1" }));
        assert_eq!(body["label"], json!("x"));

        let epm = EndpointMessage::builder(body.to_string()).build().unwrap();
        assert_eq!(epm.thid(), "t-1");
        assert_eq!(epm.pthid(), Some("p-1"));
        assert_eq!(epm.protocol_uri(), Some("https://example.org/p/1.0"));

        let bare = json_message("https://example.org/p/1.0/hello", None, None, json!({}));
        assert!(bare.get("~thread").is_none());
    }
}
