//! Present proof, protocol 3.0.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use didcomm_agent_core::exchange::PRESENTATION;
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

const PROPOSE: &str = "https://didcomm.org/present-proof/3.0/propose-presentation";
const REQUEST: &str = "https://didcomm.org/present-proof/3.0/request-presentation";
const PRESENTATION_TYPE: &str = "https://didcomm.org/present-proof/3.0/presentation";
const ACK: &str = "https://didcomm.org/present-proof/3.0/ack";

/// Messages of the present proof protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentProofMessage {
    /// Prover proposes a presentation
    Propose,
    /// Verifier requests a presentation
    Request,
    /// Prover presents
    Presentation,
    /// Verifier acknowledges the presentation
    Ack,
}

impl PresentProofMessage {
    /// Parses a full message type.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnsupportedMessageType`] for other types.
    pub fn from_type(message_type: &str) -> Result<Self> {
        match message_type {
            PROPOSE => Ok(PresentProofMessage::Propose),
            REQUEST => Ok(PresentProofMessage::Request),
            PRESENTATION_TYPE => Ok(PresentProofMessage::Presentation),
            ACK => Ok(PresentProofMessage::Ack),
            other => Err(CoreError::UnsupportedMessageType(other.to_string()).into()),
        }
    }
}

fn credential_type(epm: &EndpointMessage) -> Result<String> {
    epm.message()
        .and_then(|msg| msg.body.get("credential_type"))
        .and_then(Value::as_str)
        .map(ToString::to_string)
        .ok_or_else(|| CoreError::MissingField("credential_type").into())
}

/// Proves possession of stored credentials over an active connection.
#[derive(Debug, Clone)]
pub struct PresentProofProtocol {
    mex: Arc<MessageExchange>,
    ctx: Arc<AgentContext>,
}

impl PresentProofProtocol {
    async fn dispatch(&self, epm: &EndpointMessage) -> Result<()> {
        let con = self.mex.connection()?;
        self.dispatcher()
            .dispatch_encrypted_message(&con, epm, |_| {})
            .await
    }

    /// Starts a child exchange with `epm` and sends it.
    async fn start(&self, epm: EndpointMessage, awaited: &str) -> Result<Self> {
        let wallet = self.wallet()?;
        let cmex = self
            .ctx
            .registry
            .create_exchange(epm.id(), wallet.id(), Some(&self.mex));
        cmex.add_message(epm.clone())?;
        cmex.place_endpoint_message_future(awaited)?;

        let handle = Self::new(cmex, Arc::clone(&self.ctx));
        handle.dispatch(&epm).await?;
        Ok(handle)
    }

    /// Requests a presentation of a `credential_type` credential, as the
    /// verifier.
    ///
    /// # Returns
    ///
    /// A handle bound to the request exchange, with a future placed for the
    /// presentation
    ///
    /// # Errors
    ///
    /// Fails unless the connection is active, or if dispatch fails.
    pub async fn send_presentation_request(
        &self,
        credential_type: &str,
        goal_code: Option<&str>,
    ) -> Result<Self> {
        let con = self.mex.connection()?;
        con.read().check_active()?;
        let msg = connection_message(
            &con,
            REQUEST,
            None,
            json!({
                "goal_code": goal_code,
                "will_confirm": true,
                "credential_type": credential_type,
            }),
        )?;
        let epm = EndpointMessage::builder(msg).outbound().build()?;
        self.start(epm, PRESENTATION_TYPE).await
    }

    /// Proposes to present a `credential_type` credential, as the prover.
    ///
    /// # Errors
    ///
    /// Fails unless the connection is active, or if dispatch fails.
    pub async fn send_presentation_proposal(&self, credential_type: &str) -> Result<Self> {
        let con = self.mex.connection()?;
        con.read().check_active()?;
        let msg = connection_message(
            &con,
            PROPOSE,
            None,
            json!({ "credential_type": credential_type }),
        )?;
        let epm = EndpointMessage::builder(msg).outbound().build()?;
        self.start(epm, ACK).await
    }

    async fn receive_proposal(&self, to: &Arc<Wallet>) -> Result<()> {
        let epm = self.mex.last()?;
        epm.check_message_type(PROPOSE)?;
        self.mex.connection()?.read().check_active()?;
        let typ = credential_type(&epm)?;
        info!(wallet = %to.name(), credential_type = %typ, "Presentation proposed");

        if epm.auto_accept() {
            self.send_request_for_proposal().await?;
        }
        Ok(())
    }

    /// Requests the presentation proposed on the bound exchange, as the
    /// verifier.
    ///
    /// # Errors
    ///
    /// Fails if the exchange holds no proposal, or if dispatch fails.
    pub async fn send_request_for_proposal(&self) -> Result<()> {
        let proposal = last_of_type(&self.mex, PROPOSE, "presentation proposal")?;
        let typ = credential_type(&proposal)?;
        let con = self.mex.connection()?;
        let msg = connection_message(
            &con,
            REQUEST,
            Some(self.mex.thread_id()),
            json!({ "will_confirm": true, "credential_type": typ }),
        )?;
        let request = EndpointMessage::builder(msg).outbound().build()?;
        self.mex.add_message(request.clone())?;
        ensure_future(&self.mex, PRESENTATION_TYPE)?;
        self.dispatch(&request).await
    }

    async fn receive_request(&self, to: &Arc<Wallet>) -> Result<()> {
        let epm = self.mex.last()?;
        epm.check_message_type(REQUEST)?;
        self.mex.connection()?.read().check_active()?;
        info!(wallet = %to.name(), mex = %self.mex.short_string(), "Presentation requested");
        if epm.auto_accept() {
            self.send_presentation().await?;
        }
        Ok(())
    }

    /// Presents the holder's stored credential of the requested type, as
    /// the prover.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Credential`] if the wallet holds no such credential
    /// about its DID on this connection, or the signing or dispatch error.
    pub async fn send_presentation(&self) -> Result<()> {
        let request = last_of_type(&self.mex, REQUEST, "presentation request")?;
        let typ = credential_type(&request)?;
        let con = self.mex.connection()?;
        let (my_did, my_verkey) = {
            let con = con.read();
            (con.my_did.clone(), con.my_verkey().to_string())
        };
        let my_uri = my_did.uri();

        let wallet = self.wallet()?;
        let vc = wallet
            .find_credentials_by_type(&typ)
            .into_iter()
            .rev()
            .find(|vc| credential::subject_id(vc) == Some(my_uri.as_str()))
            .ok_or_else(|| Error::Credential(format!("No {typ} credential for {my_uri}")))?;
        let vp = credential::unsigned_presentation(&my_did, vec![vc]);
        let vp = credential::sign(vp, self.ctx.plugin.signer(), &my_verkey).await?;

        let msg = connection_message(&con, PRESENTATION_TYPE, Some(self.mex.thread_id()), json!({}))?
            .attachments(vec![Attachment::json(VC_FORMAT, vp)]);
        let epm = EndpointMessage::builder(msg).outbound().build()?;
        self.mex.add_message(epm.clone())?;
        ensure_future(&self.mex, ACK)?;
        self.dispatch(&epm).await
    }

    async fn receive_presentation(&self, to: &Arc<Wallet>) -> Result<()> {
        let epm = self.mex.last()?;
        epm.check_message_type(PRESENTATION_TYPE)?;
        let vp = attached_document(&epm, VC_FORMAT)?;
        let signer = self.ctx.plugin.signer();

        let holder = {
            let con = self.mex.connection()?;
            let con = con.read();
            if credential::signing_key(&vp) != Some(con.their_verkey()?) {
                return Err(Error::violation("Presentation is not signed by the prover"));
            }
            let holder = con.their_did.as_ref().map(Did::uri);
            holder
        };
        credential::verify(&vp, signer).await?;
        if vp.get("holder").and_then(Value::as_str) != holder.as_deref() {
            return Err(Error::violation("Presentation holder is not the prover"));
        }
        let vcs = credential::presented_credentials(&vp);
        if vcs.is_empty() {
            return Err(Error::Credential("Presentation holds no credential".into()));
        }
        for vc in vcs {
            credential::verify(vc, signer).await?;
            if credential::subject_id(vc) != holder.as_deref() {
                return Err(Error::violation("Presented credential is not about the prover"));
            }
        }
        info!(wallet = %to.name(), mex = %self.mex.short_string(), "Presentation verified");

        self.mex.put_attachment(PRESENTATION, vp.clone());
        to.add_presentation(vp);
        complete_if_pending(&self.mex, PRESENTATION_TYPE, epm)?;

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

    /// Waits for the presentation, as the verifier.
    ///
    /// # Returns
    ///
    /// The verified presentation
    ///
    /// # Errors
    ///
    /// Returns a timeout error if no presentation arrives in time.
    pub async fn await_presentation(&self, timeout: Duration) -> Result<Value> {
        let epm = self
            .mex
            .await_endpoint_message(PRESENTATION_TYPE, timeout)
            .await?;
        attached_document(&epm, VC_FORMAT)
    }

    async fn receive_ack(&self) -> Result<()> {
        let epm = self.mex.last()?;
        epm.check_message_type(ACK)?;
        complete_if_pending(&self.mex, ACK, epm)
    }

    /// Waits for the verifier's acknowledgement, as the prover.
    ///
    /// # Errors
    ///
    /// Returns a timeout error if no acknowledgement arrives in time.
    pub async fn await_presentation_ack(&self, timeout: Duration) -> Result<EndpointMessage> {
        Ok(self.mex.await_endpoint_message(ACK, timeout).await?)
    }

    /// The presentation verified on the bound exchange, if any.
    #[must_use]
    pub fn presentation(&self) -> Option<Value> {
        self.mex.attachment(PRESENTATION)
    }
}

#[async_trait]
impl Protocol for PresentProofProtocol {
    const PROTOCOL_URI: &'static str = "https://didcomm.org/present-proof/3.0";

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
        match PresentProofMessage::from_type(message_type)? {
            PresentProofMessage::Propose => self.receive_proposal(to).await,
            PresentProofMessage::Request => self.receive_request(to).await,
            PresentProofMessage::Presentation => self.receive_presentation(to).await,
            PresentProofMessage::Ack => self.receive_ack().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_credential_type_from_body() {
        let msg = didcomm_agent_core::Message::new(
            REQUEST,
            json!({ "credential_type": "UniversityTranscript" }),
        );
        let epm = EndpointMessage::builder(msg).build().unwrap();
        assert_eq!(credential_type(&epm).unwrap(), "UniversityTranscript");

        let msg = didcomm_agent_core::Message::new(REQUEST, json!({}));
        let epm = EndpointMessage::builder(msg).build().unwrap();
        assert!(matches!(
            credential_type(&epm),
            Err(Error::Core(CoreError::MissingField("credential_type")))
        ));
    }

    #[test]
    fn test_message_types() {
        assert_eq!(
            PresentProofMessage::from_type(PRESENTATION_TYPE).unwrap(),
            PresentProofMessage::Presentation
        );
        assert!(PresentProofMessage::from_type(
            "https://didcomm.org/issue-credential/3.0/ack"
        )
        .is_err());
    }
}
