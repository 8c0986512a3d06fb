//! DID exchange, protocol 1.0.
//!
//! The invitee answers an out-of-band invitation with a request that carries
//! its DID document signed with its own key. The inviter answers with a
//! response carrying a freshly created DID, whose document is signed with
//! the invitation key so the invitee can tie it to the invitation. A
//! `complete` message closes the handshake; a trust ping then makes the
//! connection active on both sides.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use didcomm_agent_core::exchange::{REQUESTER_DID_DOC, RESPONDER_DID_DOC};
use didcomm_agent_core::types::random_id;
use didcomm_agent_core::{
    Attachment, ConnectionState, DidDoc, DidMethod, EndpointMessage, Error as CoreError,
    InvitationState, MessageExchange, SharedInvitation,
};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::protocol::{complete_if_pending, json_body, json_message, AgentContext, Protocol};
use crate::protocols::TrustPingProtocol;
use crate::wallet::Wallet;

const REQUEST: &str = "https://didcomm.org/didexchange/1.0/request";
const RESPONSE: &str = "https://didcomm.org/didexchange/1.0/response";
const COMPLETE: &str = "https://didcomm.org/didexchange/1.0/complete";

const DID_DOC_ATTACH: &str = "did_doc~attach";

/// Messages of the DID exchange protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DidExchangeMessage {
    /// Invitee asks for a connection
    Request,
    /// Inviter accepts with its DID
    Response,
    /// Invitee acknowledges the response
    Complete,
}

impl DidExchangeMessage {
    /// Parses a full message type.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnsupportedMessageType`] for other types.
    pub fn from_type(message_type: &str) -> Result<Self> {
        match message_type {
            REQUEST => Ok(DidExchangeMessage::Request),
            RESPONSE => Ok(DidExchangeMessage::Response),
            COMPLETE => Ok(DidExchangeMessage::Complete),
            other => Err(CoreError::UnsupportedMessageType(other.to_string()).into()),
        }
    }

    /// The full message type.
    #[must_use]
    pub fn message_type(self) -> &'static str {
        match self {
            DidExchangeMessage::Request => REQUEST,
            DidExchangeMessage::Response => RESPONSE,
            DidExchangeMessage::Complete => COMPLETE,
        }
    }
}

/// Establishes a connection from an out-of-band invitation.
#[derive(Debug, Clone)]
pub struct DidExchangeProtocol {
    mex: Arc<MessageExchange>,
    ctx: Arc<AgentContext>,
}

fn did_doc_attachment(body: &Value) -> Result<Attachment> {
    let value = body
        .get(DID_DOC_ATTACH)
        .cloned()
        .ok_or(CoreError::MissingField(DID_DOC_ATTACH))?;
    Ok(serde_json::from_value(value)?)
}

impl DidExchangeProtocol {
    fn invitation(&self) -> Result<SharedInvitation> {
        Ok(self
            .mex
            .invitation()
            .ok_or(CoreError::MissingContext("invitation"))?)
    }

    /// Runs the whole handshake as the invitee.
    ///
    /// Sends the request, awaits the response, sends `complete`, then pings
    /// the inviter and awaits the ping response. `timeout` defaults to the
    /// node's await timeout and applies to each wait.
    ///
    /// # Returns
    ///
    /// A handle bound to the request exchange
    ///
    /// # Errors
    ///
    /// Fails on the first step that fails, including timeouts.
    pub async fn connect(&self, timeout: Option<Duration>) -> Result<Self> {
        let timeout = timeout.unwrap_or(self.ctx.await_timeout);
        let handle = self.send_request().await?;
        handle.await_response(timeout).await?;
        handle.send_complete().await?;
        handle
            .with_protocol::<TrustPingProtocol>()
            .send_ping(None)
            .await?
            .await_ping_response(timeout)
            .await?;
        Ok(handle)
    }

    /// Sends a DID exchange request for the invitation of the bound
    /// exchange.
    ///
    /// The request starts its own thread, a child exchange whose parent
    /// thread is the invitation.
    ///
    /// # Returns
    ///
    /// A handle bound to the request exchange
    ///
    /// # Errors
    ///
    /// Fails without an invitation or connection, or if dispatch fails.
    pub async fn send_request(&self) -> Result<Self> {
        let con = self.mex.connection()?;
        let invitation_id = self.invitation()?.read().id.clone();
        let (my_did, my_label, my_endpoint) = {
            let con = con.read();
            (con.my_did.clone(), con.my_label.clone(), con.my_endpoint.clone())
        };

        let doc = DidDoc::new(&my_did, my_endpoint.as_deref());
        let attachment = doc
            .to_signed_attachment(self.ctx.plugin.signer(), &my_did.verkey)
            .await?;
        let id = random_id();
        let mut body = json_message(
            REQUEST,
            Some(&id),
            Some(&invitation_id),
            json!({
                "label": my_label,
                "goal_code": "request-connection",
                "did": my_did.uri(),
                DID_DOC_ATTACH: attachment,
            }),
        );
        body["@id"] = json!(id);
        let epm = EndpointMessage::builder(body.to_string()).outbound().build()?;

        let wallet = self.wallet()?;
        let rmex = self
            .ctx
            .registry
            .create_exchange(&id, wallet.id(), Some(&self.mex));
        rmex.add_message(epm.clone())?;
        rmex.place_endpoint_message_future(RESPONSE)?;
        rmex.put_attachment(REQUESTER_DID_DOC, doc);
        con.write().advance(ConnectionState::Request)?;

        let handle = Self::new(rmex, Arc::clone(&self.ctx));
        handle
            .dispatcher()
            .dispatch_encrypted_message(&con, &epm, |packed| {
                debug!(alg = ?packed.packing, "Packed DID exchange request");
            })
            .await?;
        Ok(handle)
    }

    /// Handles a request as the inviter.
    ///
    /// Validates the requester's DID document against the sender key and
    /// records their DID. Answers right away when the message allows
    /// auto-accept.
    async fn receive_request(&self, to: &Arc<Wallet>) -> Result<()> {
        let epm = self.mex.last()?;
        epm.check_message_type(REQUEST)?;
        let body = json_body(&epm)?;
        let sender_verkey = epm
            .sender_verkey()
            .ok_or(CoreError::MissingContext("sender verkey"))?;

        let doc = DidDoc::from_signed_attachment(
            &did_doc_attachment(&body)?,
            self.ctx.plugin.signer(),
            sender_verkey,
        )
        .await?;
        let their_did = doc.did()?;
        if their_did.verkey != sender_verkey {
            return Err(Error::violation(format!(
                "Requester DID {} does not match sender key",
                their_did.uri()
            )));
        }

        let con = self.mex.connection()?;
        {
            let mut con = con.write();
            if con.state() != ConnectionState::Invitation {
                return Err(Error::violation(format!(
                    "Invitation of connection {} was already answered",
                    con.id
                )));
            }
            con.rotate_their_did(their_did);
            con.their_label = body.get("label").and_then(Value::as_str).map(String::from);
            con.their_endpoint = doc.service_endpoint().map(String::from);
            con.advance(ConnectionState::Request)?;
        }
        self.mex.put_attachment(REQUESTER_DID_DOC, doc);
        self.mex.place_endpoint_message_future(COMPLETE)?;
        info!(wallet = %to.name(), mex = %self.mex.short_string(), "Accepted DID exchange request");

        if epm.auto_accept() {
            self.send_response().await?;
        }
        Ok(())
    }

    /// Answers the request of the bound exchange as the inviter.
    ///
    /// The inviter moves to a fresh `did:sov`, whose document is signed with
    /// the invitation key.
    ///
    /// # Errors
    ///
    /// Fails if the last message is not a request, or if dispatch fails.
    pub async fn send_response(&self) -> Result<()> {
        self.mex.check_last_message_type(REQUEST)?;
        let con = self.mex.connection()?;
        let invitation = self.invitation()?;
        let invitation_id = invitation.read().id.clone();
        let (invitation_key, my_endpoint) = {
            let con = con.read();
            (con.invitation_key.clone(), con.my_endpoint.clone())
        };

        let wallet = self.wallet()?;
        let new_did = wallet.create_did(DidMethod::Sov);
        let doc = DidDoc::new(&new_did, my_endpoint.as_deref());
        let attachment = doc
            .to_signed_attachment(self.ctx.plugin.signer(), &invitation_key)
            .await?;
        let body = json_message(
            RESPONSE,
            Some(self.mex.thread_id()),
            Some(&invitation_id),
            json!({ "did": new_did.uri(), DID_DOC_ATTACH: attachment }),
        );
        let epm = EndpointMessage::builder(body.to_string()).outbound().build()?;

        self.mex.add_message(epm.clone())?;
        self.mex.put_attachment(RESPONDER_DID_DOC, doc);
        {
            let mut con = con.write();
            con.rotate_my_did(new_did);
            con.advance(ConnectionState::Response)?;
        }
        mark_done(&invitation)?;

        self.dispatcher()
            .dispatch_encrypted_message(&con, &epm, |packed| {
                debug!(alg = ?packed.packing, "Packed DID exchange response");
            })
            .await
    }

    /// Handles a response as the invitee.
    async fn receive_response(&self) -> Result<()> {
        let epm = self.mex.last()?;
        epm.check_message_type(RESPONSE)?;
        let body = json_body(&epm)?;
        let con = self.mex.connection()?;
        let invitation_key = con.read().invitation_key.clone();

        let doc = DidDoc::from_signed_attachment(
            &did_doc_attachment(&body)?,
            self.ctx.plugin.signer(),
            &invitation_key,
        )
        .await?;
        let their_did = doc.did()?;
        {
            let mut con = con.write();
            con.rotate_their_did(their_did);
            if let Some(endpoint) = doc.service_endpoint() {
                con.their_endpoint = Some(endpoint.to_string());
            }
            con.advance(ConnectionState::Response)?;
        }
        self.mex.put_attachment(RESPONDER_DID_DOC, doc);
        mark_done(&self.invitation()?)?;

        complete_if_pending(&self.mex, RESPONSE, epm)
    }

    /// Waits for the response to the request of the bound exchange.
    ///
    /// # Errors
    ///
    /// Returns a timeout error if no response arrives in time.
    pub async fn await_response(&self, timeout: Duration) -> Result<EndpointMessage> {
        Ok(self.mex.await_endpoint_message(RESPONSE, timeout).await?)
    }

    /// Sends `complete` as the invitee.
    ///
    /// # Errors
    ///
    /// Fails if the last message is not a response, or if dispatch fails.
    pub async fn send_complete(&self) -> Result<()> {
        self.mex.check_last_message_type(RESPONSE)?;
        let con = self.mex.connection()?;
        let invitation_id = self.invitation()?.read().id.clone();
        let body = json_message(
            COMPLETE,
            Some(self.mex.thread_id()),
            Some(&invitation_id),
            json!({}),
        );
        let epm = EndpointMessage::builder(body.to_string()).outbound().build()?;

        self.mex.add_message(epm.clone())?;
        con.write().advance(ConnectionState::Completed)?;

        self.dispatcher()
            .dispatch_encrypted_message(&con, &epm, |_| {})
            .await
    }

    /// Handles `complete` as the inviter.
    async fn receive_complete(&self) -> Result<()> {
        let epm = self.mex.last()?;
        epm.check_message_type(COMPLETE)?;
        self.mex
            .connection()?
            .write()
            .advance(ConnectionState::Completed)?;
        complete_if_pending(&self.mex, COMPLETE, epm)
    }

    /// Waits for `complete` as the inviter.
    ///
    /// # Errors
    ///
    /// Returns a timeout error if no message arrives in time.
    pub async fn await_complete(&self, timeout: Duration) -> Result<EndpointMessage> {
        Ok(self.mex.await_endpoint_message(COMPLETE, timeout).await?)
    }
}

fn mark_done(invitation: &SharedInvitation) -> Result<()> {
    let mut invitation = invitation.write();
    if invitation.state() != InvitationState::Done {
        invitation.advance(InvitationState::Done)?;
    }
    Ok(())
}

#[async_trait]
impl Protocol for DidExchangeProtocol {
    const PROTOCOL_URI: &'static str = "https://didcomm.org/didexchange/1.0";

    fn new(mex: Arc<MessageExchange>, ctx: Arc<AgentContext>) -> Self {
        Self { mex, ctx }
    }

    fn mex(&self) -> &Arc<MessageExchange> {
        &self.mex
    }

    fn ctx(&self) -> &Arc<AgentContext> {
        &self.ctx
    }

    async fn invoke_method(&self, to: &Arc<Wallet>, message_type: &str) -> Result<()> {
        match DidExchangeMessage::from_type(message_type)? {
            DidExchangeMessage::Request => self.receive_request(to).await,
            DidExchangeMessage::Response => self.receive_response().await,
            DidExchangeMessage::Complete => self.receive_complete().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_types() {
        for msg in [
            DidExchangeMessage::Request,
            DidExchangeMessage::Response,
            DidExchangeMessage::Complete,
        ] {
            assert_eq!(DidExchangeMessage::from_type(msg.message_type()).unwrap(), msg);
            assert!(msg.message_type().starts_with(DidExchangeProtocol::PROTOCOL_URI));
        }
        assert!(DidExchangeMessage::from_type("https://didcomm.org/didexchange/1.0/problem_report").is_err());
    }
}
