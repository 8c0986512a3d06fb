//! Issue credential, protocol 3.0.
//!
//! Either the holder proposes a credential or the issuer offers one. Every
//! message of an issuance shares the thread of the message that started it.
//! With auto-accept the holder requests an offered credential and the
//! issuer issues a requested one without a caller. The holder verifies and
//! stores the issued credential, then acknowledges it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use didcomm_agent_core::{Attachment, Did, EndpointMessage, Error as CoreError, MessageExchange};
use serde_json::{json, Value};
use tracing::info;

use crate::credential::{self, VC_FORMAT};
use crate::error::{Error, Result};
use crate::protocol::{
    attached_document, complete_if_pending, connection_message, ensure_future, last_of_type,
    AgentContext, Protocol,
};
use crate::wallet::Wallet;

const PROPOSE: &str = "https://didcomm.org/issue-credential/3.0/propose-credential";
const OFFER: &str = "https://didcomm.org/issue-credential/3.0/offer-credential";
const REQUEST: &str = "https://didcomm.org/issue-credential/3.0/request-credential";
const ISSUE: &str = "https://didcomm.org/issue-credential/3.0/issue-credential";
const ACK: &str = "https://didcomm.org/issue-credential/3.0/ack";
const PREVIEW: &str = "https://didcomm.org/issue-credential/3.0/credential-preview";

/// Messages of the issue credential protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueCredentialMessage {
    /// Holder proposes a credential
    Propose,
    /// Issuer offers a credential
    Offer,
    /// Holder requests the offered credential
    Request,
    /// Issuer issues the credential
    Issue,
    /// Holder acknowledges the credential
    Ack,
}

impl IssueCredentialMessage {
    /// Parses a full message type.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnsupportedMessageType`] for other types.
    pub fn from_type(message_type: &str) -> Result<Self> {
        match message_type {
            PROPOSE => Ok(IssueCredentialMessage::Propose),
            OFFER => Ok(IssueCredentialMessage::Offer),
            REQUEST => Ok(IssueCredentialMessage::Request),
            ISSUE => Ok(IssueCredentialMessage::Issue),
            ACK => Ok(IssueCredentialMessage::Ack),
            other => Err(CoreError::UnsupportedMessageType(other.to_string()).into()),
        }
    }
}

/// Issues W3C credentials over an active connection.
#[derive(Debug, Clone)]
pub struct IssueCredentialProtocol {
    mex: Arc<MessageExchange>,
    ctx: Arc<AgentContext>,
}

/// Body fields an issuance carries from one step to the next.
fn goal_fields(epm: &EndpointMessage) -> Value {
    let body = epm.message().map(|msg| &msg.body);
    let field = |name: &str| body.and_then(|b| b.get(name)).cloned().unwrap_or(Value::Null);
    json!({ "goal_code": field("goal_code"), "comment": field("comment") })
}

/// A `credential_preview` listing every claim about the subject of `vc`.
fn credential_preview(vc: &Value) -> Value {
    let attributes: Vec<Value> = vc
        .get("credentialSubject")
        .and_then(Value::as_object)
        .map(|subject| {
            subject
                .iter()
                .map(|(name, value)| json!({ "name": name, "value": value }))
                .collect()
        })
        .unwrap_or_default();
    json!({ "type": PREVIEW, "attributes": attributes })
}

/// Checks that the preview in the body of `epm` names exactly the claims of
/// the attached credential `vc`.
fn check_preview(epm: &EndpointMessage, vc: &Value) -> Result<()> {
    let attributes = epm
        .message()
        .and_then(|msg| msg.body.pointer("/credential_preview/attributes"))
        .and_then(Value::as_array)
        .ok_or(CoreError::MissingField("credential_preview"))?;
    let subject = vc
        .get("credentialSubject")
        .and_then(Value::as_object)
        .ok_or(CoreError::MissingField("credentialSubject"))?;

    for attr in attributes {
        let name = attr
            .get("name")
            .and_then(Value::as_str)
            .ok_or(CoreError::MissingField("name"))?;
        let value = attr.get("value").unwrap_or(&Value::Null);
        if subject.get(name) != Some(value) {
            return Err(Error::violation(format!(
                "Preview attribute {name} does not match the attached credential"
            )));
        }
    }
    if attributes.len() != subject.len() {
        return Err(Error::violation(
            "Preview does not list every claim of the attached credential",
        ));
    }
    Ok(())
}

fn with_goal(mut body: Value, goal_code: Option<&str>, comment: Option<&str>) -> Value {
    body["goal_code"] = json!(goal_code);
    body["comment"] = json!(comment);
    body
}

fn check_same_subject(expected: &Value, actual: &Value, step: &str) -> Result<()> {
    if expected.get("credentialSubject") == actual.get("credentialSubject") {
        Ok(())
    } else {
        Err(Error::violation(format!(
            "Credential preview changed in {step}"
        )))
    }
}

impl IssueCredentialProtocol {
    fn handle(&self, mex: Arc<MessageExchange>) -> Self {
        Self::new(mex, Arc::clone(&self.ctx))
    }

    /// Sends `epm`, appended to the bound exchange, to the counterparty.
    async fn dispatch(&self, epm: &EndpointMessage) -> Result<()> {
        let con = self.mex.connection()?;
        self.dispatcher()
            .dispatch_encrypted_message(&con, epm, |_| {})
            .await
    }

    /// Proposes a credential of `template` type about the holder, as the
    /// holder.
    ///
    /// The proposal starts a child exchange. Futures for the offer and the
    /// issued credential are placed on it.
    ///
    /// # Arguments
    ///
    /// * `template` - The credential type
    /// * `subject_data` - The claims, a JSON object
    /// * `goal_code` - Optional goal code passed on to the offer
    /// * `comment` - Optional comment passed on to the offer
    ///
    /// # Returns
    ///
    /// A handle bound to the proposal exchange
    ///
    /// # Errors
    ///
    /// Fails unless the connection is active, or if dispatch fails.
    pub async fn send_credential_proposal(
        &self,
        template: &str,
        subject_data: &Value,
        goal_code: Option<&str>,
        comment: Option<&str>,
    ) -> Result<Self> {
        let con = self.mex.connection()?;
        let (issuer, holder) = {
            let con = con.read();
            con.check_active()?;
            let issuer = con
                .their_did
                .as_ref()
                .map(Did::uri)
                .ok_or(CoreError::MissingContext("their DID"))?;
            (issuer, con.my_did.uri())
        };
        let preview = credential::unsigned_credential(template, &issuer, &holder, subject_data)?;
        let body = json!({ "credential_preview": credential_preview(&preview) });
        let msg = connection_message(&con, PROPOSE, None, with_goal(body, goal_code, comment))?
            .attachments(vec![Attachment::json(VC_FORMAT, preview)]);
        let epm = EndpointMessage::builder(msg).outbound().build()?;

        let wallet = self.wallet()?;
        let pmex = self
            .ctx
            .registry
            .create_exchange(epm.id(), wallet.id(), Some(&self.mex));
        pmex.add_message(epm.clone())?;
        pmex.place_endpoint_message_future(OFFER)?;
        pmex.place_endpoint_message_future(ISSUE)?;

        let handle = self.handle(pmex);
        handle.dispatch(&epm).await?;
        Ok(handle)
    }

    /// Offers a credential of `template` type to the holder, as the issuer.
    ///
    /// The offer starts a child exchange with a future for the holder's
    /// acknowledgement. `goal_code` and `comment` travel with the request and
    /// the issued credential.
    ///
    /// # Errors
    ///
    /// Fails unless the connection is active, or if dispatch fails.
    pub async fn send_credential_offer(
        &self,
        template: &str,
        subject_data: &Value,
        goal_code: Option<&str>,
        comment: Option<&str>,
    ) -> Result<Self> {
        let con = self.mex.connection()?;
        let (issuer, holder) = {
            let con = con.read();
            con.check_active()?;
            let holder = con
                .their_did
                .as_ref()
                .map(Did::uri)
                .ok_or(CoreError::MissingContext("their DID"))?;
            (con.my_did.uri(), holder)
        };
        let vc = credential::unsigned_credential(template, &issuer, &holder, subject_data)?;
        let body = json!({ "credential_preview": credential_preview(&vc) });
        let msg = connection_message(&con, OFFER, None, with_goal(body, goal_code, comment))?
            .attachments(vec![Attachment::json(VC_FORMAT, vc)]);
        let epm = EndpointMessage::builder(msg).outbound().build()?;

        let wallet = self.wallet()?;
        let omex = self
            .ctx
            .registry
            .create_exchange(epm.id(), wallet.id(), Some(&self.mex));
        omex.add_message(epm.clone())?;
        omex.place_endpoint_message_future(ACK)?;

        let handle = self.handle(omex);
        handle.dispatch(&epm).await?;
        Ok(handle)
    }

    async fn receive_proposal(&self, to: &Arc<Wallet>) -> Result<()> {
        let epm = self.mex.last()?;
        epm.check_message_type(PROPOSE)?;
        let preview = attached_document(&epm, VC_FORMAT)?;
        check_preview(&epm, &preview)?;
        {
            let con = self.mex.connection()?;
            let con = con.read();
            con.check_active()?;
            let holder = con.their_did.as_ref().map(Did::uri);
            if credential::subject_id(&preview) != holder.as_deref() {
                return Err(Error::violation("Proposed credential is not about the proposer"));
            }
            if preview.get("issuer").and_then(Value::as_str) != Some(con.my_did.uri().as_str()) {
                return Err(Error::violation("Proposed credential names another issuer"));
            }
        }
        info!(wallet = %to.name(), types = ?credential::types(&preview), "Credential proposed");

        if epm.auto_accept() {
            self.send_offer_for_proposal().await?;
        }
        Ok(())
    }

    /// Offers the credential proposed on the bound exchange, as the issuer.
    ///
    /// # Errors
    ///
    /// Fails if the exchange holds no proposal, or if dispatch fails.
    pub async fn send_offer_for_proposal(&self) -> Result<()> {
        let proposal = last_of_type(&self.mex, PROPOSE, "credential proposal")?;
        let preview = attached_document(&proposal, VC_FORMAT)?;
        let con = self.mex.connection()?;
        let mut body = goal_fields(&proposal);
        body["credential_preview"] = credential_preview(&preview);
        let msg = connection_message(&con, OFFER, Some(self.mex.thread_id()), body)?
            .attachments(vec![Attachment::json(VC_FORMAT, preview)]);
        let epm = EndpointMessage::builder(msg).outbound().build()?;

        self.mex.add_message(epm.clone())?;
        ensure_future(&self.mex, ACK)?;
        self.dispatch(&epm).await
    }

    async fn receive_offer(&self, to: &Arc<Wallet>) -> Result<()> {
        let epm = self.mex.last()?;
        epm.check_message_type(OFFER)?;
        let offered = attached_document(&epm, VC_FORMAT)?;
        check_preview(&epm, &offered)?;
        if let Ok(proposal) = last_of_type(&self.mex, PROPOSE, "credential proposal") {
            check_same_subject(&attached_document(&proposal, VC_FORMAT)?, &offered, "offer")?;
        }
        {
            let con = self.mex.connection()?;
            let con = con.read();
            con.check_active()?;
            if credential::subject_id(&offered) != Some(con.my_did.uri().as_str()) {
                return Err(Error::violation("Offered credential is not about the holder"));
            }
        }
        info!(wallet = %to.name(), types = ?credential::types(&offered), "Credential offered");

        complete_if_pending(&self.mex, OFFER, epm.clone())?;
        if epm.auto_accept() {
            self.send_credential_request().await?;
        }
        Ok(())
    }

    /// Waits for the offer, as the holder.
    ///
    /// # Returns
    ///
    /// The offered, unsigned credential
    ///
    /// # Errors
    ///
    /// Returns a timeout error if no offer arrives in time.
    pub async fn await_credential_offer(&self, timeout: Duration) -> Result<Value> {
        let epm = self.mex.await_endpoint_message(OFFER, timeout).await?;
        attached_document(&epm, VC_FORMAT)
    }

    /// Requests the credential offered on the bound exchange, as the holder.
    ///
    /// # Errors
    ///
    /// Fails if the exchange holds no offer, or if dispatch fails.
    pub async fn send_credential_request(&self) -> Result<()> {
        let offer = last_of_type(&self.mex, OFFER, "credential offer")?;
        let offered = attached_document(&offer, VC_FORMAT)?;
        let con = self.mex.connection()?;
        let body = goal_fields(&offer);
        let msg = connection_message(&con, REQUEST, Some(self.mex.thread_id()), body)?
            .attachments(vec![Attachment::json(VC_FORMAT, offered)]);
        let epm = EndpointMessage::builder(msg).outbound().build()?;

        self.mex.add_message(epm.clone())?;
        ensure_future(&self.mex, ISSUE)?;
        self.dispatch(&epm).await
    }

    async fn receive_request(&self, to: &Arc<Wallet>) -> Result<()> {
        let epm = self.mex.last()?;
        epm.check_message_type(REQUEST)?;
        let requested = attached_document(&epm, VC_FORMAT)?;
        let offer = last_of_type(&self.mex, OFFER, "credential offer")?;
        check_same_subject(&attached_document(&offer, VC_FORMAT)?, &requested, "request")?;
        self.mex.connection()?.read().check_active()?;
        info!(wallet = %to.name(), mex = %self.mex.short_string(), "Credential requested");

        if epm.auto_accept() {
            self.send_issued_credential().await?;
        }
        Ok(())
    }

    /// Signs and issues the requested credential, as the issuer.
    ///
    /// # Errors
    ///
    /// Fails if the exchange holds no request, or if signing or dispatch
    /// fails.
    pub async fn send_issued_credential(&self) -> Result<()> {
        let request = last_of_type(&self.mex, REQUEST, "credential request")?;
        let requested = attached_document(&request, VC_FORMAT)?;
        let con = self.mex.connection()?;
        let issuer_verkey = con.read().my_verkey().to_string();
        let vc = credential::sign(requested, self.ctx.plugin.signer(), &issuer_verkey).await?;

        let body = goal_fields(&request);
        let msg = connection_message(&con, ISSUE, Some(self.mex.thread_id()), body)?
            .attachments(vec![Attachment::json(VC_FORMAT, vc)]);
        let epm = EndpointMessage::builder(msg).outbound().build()?;

        self.mex.add_message(epm.clone())?;
        self.dispatch(&epm).await
    }

    async fn receive_issued_credential(&self, to: &Arc<Wallet>) -> Result<()> {
        let epm = self.mex.last()?;
        epm.check_message_type(ISSUE)?;
        let vc = attached_document(&epm, VC_FORMAT)?;
        credential::verify(&vc, self.ctx.plugin.signer()).await?;
        {
            let con = self.mex.connection()?;
            let con = con.read();
            if credential::signing_key(&vc) != Some(con.their_verkey()?) {
                return Err(Error::violation("Credential is not signed by the issuer"));
            }
            if credential::subject_id(&vc) != Some(con.my_did.uri().as_str()) {
                return Err(Error::violation("Issued credential is not about the holder"));
            }
        }
        to.add_credential(vc);
        complete_if_pending(&self.mex, ISSUE, epm)?;

        let con = self.mex.connection()?;
        let msg = connection_message(
            &con,
            ACK,
            Some(self.mex.thread_id()),
            json!({ "status": "OK" }),
        )?;
        let ack = EndpointMessage::builder(msg).outbound().build()?;
        self.mex.add_message(ack.clone())?;
        self.dispatch(&ack).await
    }

    /// Waits for the issued credential, as the holder.
    ///
    /// # Returns
    ///
    /// The signed credential, already stored in the holder's wallet
    ///
    /// # Errors
    ///
    /// Returns a timeout error if no credential arrives in time.
    pub async fn await_issued_credential(&self, timeout: Duration) -> Result<Value> {
        let epm = self.mex.await_endpoint_message(ISSUE, timeout).await?;
        attached_document(&epm, VC_FORMAT)
    }

    async fn receive_ack(&self) -> Result<()> {
        let epm = self.mex.last()?;
        epm.check_message_type(ACK)?;
        complete_if_pending(&self.mex, ACK, epm)
    }

    /// Waits for the holder's acknowledgement, as the issuer.
    ///
    /// # Errors
    ///
    /// Returns a timeout error if no acknowledgement arrives in time.
    pub async fn await_credential_ack(&self, timeout: Duration) -> Result<EndpointMessage> {
        Ok(self.mex.await_endpoint_message(ACK, timeout).await?)
    }
}

#[async_trait]
impl Protocol for IssueCredentialProtocol {
    const PROTOCOL_URI: &'static str = "https://didcomm.org/issue-credential/3.0";

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
        match IssueCredentialMessage::from_type(message_type)? {
            IssueCredentialMessage::Propose => self.receive_proposal(to).await,
            IssueCredentialMessage::Offer => self.receive_offer(to).await,
            IssueCredentialMessage::Request => self.receive_request(to).await,
            IssueCredentialMessage::Issue => self.receive_issued_credential(to).await,
            IssueCredentialMessage::Ack => self.receive_ack().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use didcomm_agent_core::Message;
    use pretty_assertions::assert_eq;

    fn proposal(body: Value) -> EndpointMessage {
        EndpointMessage::builder(Message::new(PROPOSE, body))
            .build()
            .unwrap()
    }

    #[test]
    fn test_preview_lists_subject_claims() {
        let vc = json!({ "credentialSubject": { "id": "did:sov:1", "givenName": "Alice" } });
        let mallory = json!({ "credentialSubject": { "id": "did:sov:1", "givenName": "Mallory" } });

        let honest = proposal(json!({ "credential_preview": credential_preview(&vc) }));
        assert!(check_preview(&honest, &vc).is_ok());

        let forged = proposal(json!({ "credential_preview": credential_preview(&mallory) }));
        assert!(matches!(
            check_preview(&forged, &vc),
            Err(Error::Core(CoreError::ProtocolViolation(msg))) if msg.contains("givenName")
        ));

        let partial = proposal(json!({
            "credential_preview": { "attributes": [{ "name": "id", "value": "did:sov:1" }] }
        }));
        assert!(matches!(
            check_preview(&partial, &vc),
            Err(Error::Core(CoreError::ProtocolViolation(_)))
        ));

        assert!(matches!(
            check_preview(&proposal(json!({})), &vc),
            Err(Error::Core(CoreError::MissingField("credential_preview")))
        ));
    }

    #[test]
    fn test_goal_fields_carry_over() {
        let offer = proposal(with_goal(json!({}), Some("Issue Transcript"), Some("For the job")));
        assert_eq!(
            goal_fields(&offer),
            json!({ "goal_code": "Issue Transcript", "comment": "For the job" })
        );
        assert_eq!(
            goal_fields(&proposal(json!({}))),
            json!({ "goal_code": null, "comment": null })
        );
    }

    #[test]
    fn test_preview_comparison() {
        let a = json!({ "credentialSubject": { "id": "did:sov:1", "givenName": "Alice" } });
        let b = json!({ "credentialSubject": { "id": "did:sov:1", "givenName": "Mallory" } });
        assert!(check_same_subject(&a, &a, "offer").is_ok());
        assert!(matches!(
            check_same_subject(&a, &b, "offer"),
            Err(Error::Core(CoreError::ProtocolViolation(_)))
        ));
    }

    #[test]
    fn test_unknown_message_type() {
        assert!(matches!(
            IssueCredentialMessage::from_type("https://didcomm.org/issue-credential/3.0/problem-report"),
            Err(Error::Core(CoreError::UnsupportedMessageType(_)))
        ));
    }
}
