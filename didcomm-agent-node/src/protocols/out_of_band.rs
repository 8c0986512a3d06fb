//! Out-of-band invitations, protocol 1.1.

use std::sync::Arc;

use async_trait::async_trait;
use didcomm_agent_core::exchange::INVITATION;
use didcomm_agent_core::invitation::INVITATION_TYPE;
use didcomm_agent_core::{
    Connection, ConnectionParams, ConnectionRole, Did, DidMethod, EndpointMessage,
    Error as CoreError, Invitation, InvitationState, MessageExchange, Shared, SharedInvitation,
};
use tracing::info;

use crate::error::Result;
use crate::protocol::{AgentContext, Protocol};
use crate::protocols::DidExchangeProtocol;
use crate::wallet::Wallet;

/// Messages of the out-of-band protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutOfBandMessage {
    /// An invitation
    Invitation,
}

impl OutOfBandMessage {
    /// Parses a full message type.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnsupportedMessageType`] for other types.
    pub fn from_type(message_type: &str) -> Result<Self> {
        match message_type {
            INVITATION_TYPE => Ok(OutOfBandMessage::Invitation),
            other => Err(CoreError::UnsupportedMessageType(other.to_string()).into()),
        }
    }
}

/// Creates and accepts out-of-band invitations.
#[derive(Debug, Clone)]
pub struct OutOfBandProtocol {
    mex: Arc<MessageExchange>,
    ctx: Arc<AgentContext>,
}

impl OutOfBandProtocol {
    /// Creates an invitation to a DID exchange with `inviter`.
    ///
    /// The invitation key is a fresh `did:key` of the inviter. The returned
    /// handle is bound to a new exchange whose thread is the invitation id
    /// and which holds the invitation and a connection in the `INVITATION`
    /// state. The invitation is single-use: it yields one connection, and
    /// requests from a second invitee are rejected.
    ///
    /// # Errors
    ///
    /// Fails if the inviter has no endpoint.
    pub fn create_invitation(
        ctx: &Arc<AgentContext>,
        inviter: &Arc<Wallet>,
        label: Option<&str>,
    ) -> Result<Self> {
        let endpoint = inviter
            .endpoint_url()
            .ok_or(CoreError::MissingContext("inviter endpoint"))?
            .to_string();
        let label = label.unwrap_or(inviter.name()).to_string();
        let did = inviter.create_did(DidMethod::Key);
        let invitation = Invitation::new(
            label.clone(),
            vec![DidExchangeProtocol::PROTOCOL_URI.to_string()],
            did.verkey.clone(),
            endpoint.clone(),
        );

        let mex = ctx.registry.create_exchange(&invitation.id, inviter.id(), None);
        mex.add_message(
            EndpointMessage::builder(serde_json::to_string(&invitation)?)
                .outbound()
                .build()?,
        )?;

        let con = Connection::new(ConnectionParams {
            invitation_key: did.verkey.clone(),
            agent: inviter.agent_type(),
            my_did: did,
            my_role: ConnectionRole::Inviter,
            my_label: label,
            my_endpoint: Some(endpoint),
            their_did: None,
            their_role: ConnectionRole::Invitee,
            their_label: None,
            their_endpoint: None,
        })
        .shared();
        mex.set_connection(con.clone())?;
        inviter.add_connection(con);

        info!(wallet = %inviter.name(), invitation = %invitation.id, "Created invitation");
        let invitation = Shared::new(invitation);
        mex.put_attachment(INVITATION, invitation.clone());
        inviter.add_invitation(invitation);

        Ok(Self::new(mex, Arc::clone(ctx)))
    }

    /// Accepts `invitation` on behalf of `invitee`.
    ///
    /// The returned handle is bound to a new exchange on the invitation
    /// thread, ready for the DID exchange request.
    ///
    /// # Errors
    ///
    /// Fails if the invitation has no service key or endpoint.
    pub fn receive_invitation(
        ctx: &Arc<AgentContext>,
        invitee: &Arc<Wallet>,
        invitation: Invitation,
    ) -> Result<Self> {
        let mex = ctx.registry.create_exchange(&invitation.id, invitee.id(), None);
        mex.add_message(
            EndpointMessage::builder(serde_json::to_string(&invitation)?)
                .inbound()
                .build()?,
        )?;
        bind_invitation(&mex, invitee, invitation)?;
        Ok(Self::new(mex, Arc::clone(ctx)))
    }

    /// The invitation of the bound exchange.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::MissingContext`] if the exchange has none.
    pub fn invitation(&self) -> Result<SharedInvitation> {
        Ok(self
            .mex
            .invitation()
            .ok_or(CoreError::MissingContext("invitation"))?)
    }
}

fn bind_invitation(
    mex: &MessageExchange,
    invitee: &Arc<Wallet>,
    mut invitation: Invitation,
) -> Result<()> {
    let invitation_key = invitation.invitation_key()?.to_string();
    let endpoint = invitation.service_endpoint()?.to_string();
    invitation.advance(InvitationState::Received)?;

    let con = Connection::new(ConnectionParams {
        invitation_key: invitation_key.clone(),
        agent: invitee.agent_type(),
        my_did: invitee.create_did(DidMethod::Sov),
        my_role: ConnectionRole::Invitee,
        my_label: invitee.name().to_string(),
        my_endpoint: invitee.endpoint_url().map(ToString::to_string),
        their_did: Some(Did::from_verkey(&invitation_key)),
        their_role: ConnectionRole::Inviter,
        their_label: Some(invitation.label.clone()),
        their_endpoint: Some(endpoint),
    })
    .shared();
    mex.set_connection(con.clone())?;
    invitee.add_connection(con);

    info!(wallet = %invitee.name(), invitation = %invitation.id, "Received invitation");
    let invitation = Shared::new(invitation);
    mex.put_attachment(INVITATION, invitation.clone());
    invitee.add_invitation(invitation);
    Ok(())
}

#[async_trait]
impl Protocol for OutOfBandProtocol {
    const PROTOCOL_URI: &'static str = "https://didcomm.org/out-of-band/1.1";

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
        match OutOfBandMessage::from_type(message_type)? {
            OutOfBandMessage::Invitation => {
                let epm = self.mex.last()?;
                epm.check_message_type(INVITATION_TYPE)?;
                let invitation: Invitation = serde_json::from_str(&epm.body_as_json()?)?;
                bind_invitation(&self.mex, to, invitation)
            }
        }
    }
}
