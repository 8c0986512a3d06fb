//! Message dispatch for `DIDComm` nodes.
//!
//! [`MessageDispatchService`] is the seam between the wire and the protocols.
//! Inbound, it unpacks an envelope, finds the recipient wallet and the
//! exchange the message continues, appends it and invokes the protocol that
//! owns its type. Outbound, it packs a message for the counterparty of a
//! connection and hands it to the transport.
//!
//! # Examples
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use didcomm_agent_node::dispatch::MessageDispatchService;
//! use didcomm_agent_node::error::Result;
//! use didcomm_agent_node::protocol::AgentContext;
//!
//! async fn on_http_post(ctx: Arc<AgentContext>, body: &str) -> Result<()> {
//!     let mex = MessageDispatchService::new(ctx).dispatch_inbound(body).await?;
//!     mex.show_messages("inbound");
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use didcomm_agent_core::{
    header, pack_message, unpack_message, EndpointMessage, EnvelopeHeader, Error as CoreError,
    InvitationState, Message, MessageBody, MessageExchange, PackedMessage, SharedConnection,
};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::protocol::{AgentContext, ProtocolKey};

/// Routes inbound messages to protocols and outbound messages to peers.
#[derive(Debug, Clone)]
pub struct MessageDispatchService {
    ctx: Arc<AgentContext>,
}

impl MessageDispatchService {
    /// Creates a dispatch service over `ctx`.
    #[must_use]
    pub fn new(ctx: Arc<AgentContext>) -> Self {
        Self { ctx }
    }

    /// Processes one packed inbound message.
    ///
    /// The target exchange is the recipient wallet's exchange for the
    /// message thread, else the latest exchange on the connection of the
    /// recipient key, else the latest exchange on the connection with the
    /// sender. The latter two spawn a sub-exchange for the new thread.
    ///
    /// # Arguments
    ///
    /// * `packed` - The packed envelope as received
    ///
    /// # Returns
    ///
    /// The exchange the message was appended to
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - No hosted wallet owns a recipient key
    /// - The envelope cannot be unpacked
    /// - No exchange matches the message
    /// - The protocol or message type is unknown, or the handler fails
    pub async fn dispatch_inbound(&self, packed: &str) -> Result<Arc<MessageExchange>> {
        let envelope = EnvelopeHeader::peek(packed)?;
        let (wallet, recipient) = envelope
            .recipients
            .iter()
            .find_map(|rk| self.ctx.wallets.find_by_verkey(rk).map(|w| (w, rk.clone())))
            .ok_or_else(|| Error::WalletNotFound(envelope.recipients.join(",")))?;

        let unpacked = unpack_message(packed, self.ctx.plugin.as_ref(), Some(&recipient)).await?;
        let body = match serde_json::from_str::<Message>(&unpacked.plaintext) {
            Ok(msg) => MessageBody::Message(msg),
            Err(_) => MessageBody::Json(unpacked.plaintext),
        };

        let connection_id = unpacked.sender_verkey.as_deref().and_then(|sender| {
            wallet
                .find_connection(|con| con.their_verkey().is_ok_and(|vk| vk == sender))
                .map(|con| con.read().id.clone())
        });

        let epm = EndpointMessage::builder(body)
            .inbound()
            .header_opt(header::MESSAGE_SENDER_VERKEY, unpacked.sender_verkey.clone())
            .header(header::MESSAGE_RECIPIENT_VERKEY, recipient.clone())
            .header(header::MESSAGE_AUTO_ACCEPT, wallet.auto_accept())
            .header_opt(header::MESSAGE_CONNECTION_ID, connection_id.clone())
            .build()?;
        let message_type = epm
            .message_type()
            .ok_or(CoreError::MissingField("type"))?
            .to_string();
        let protocol_uri = epm
            .protocol_uri()
            .ok_or(CoreError::MissingField("type"))?
            .to_string();
        info!(
            wallet = %wallet.name(),
            thid = %epm.thid(),
            message_type = %message_type,
            "Inbound message {}",
            epm.id()
        );

        let registry = &self.ctx.registry;
        let thid = epm.thid().to_string();
        let mex = match registry.find_by_thread_id(wallet.id(), &thid) {
            Some(mex) => mex,
            None => {
                let parent = registry.find_by_verkey(&recipient).or_else(|| {
                    connection_id
                        .as_deref()
                        .and_then(|id| registry.find_by_connection_id(id))
                });
                let Some(parent) = parent else {
                    if let Some(invitation) = registry
                        .find_by_invitation_key(&recipient)
                        .iter()
                        .find_map(|mex| mex.invitation())
                        .filter(|invi| invi.read().state() == InvitationState::Done)
                    {
                        let id = invitation.read().id.clone();
                        warn!(wallet = %wallet.name(), invitation = %id, "Invitation already used");
                        return Err(Error::violation(format!("Invitation {id} was already used")));
                    }
                    warn!(wallet = %wallet.name(), thid = %thid, "Unsolicited message");
                    return Err(CoreError::UnsolicitedMessage(format!(
                        "{message_type} with thid={thid}"
                    ))
                    .into());
                };
                debug!(parent = %parent.short_string(), thid = %thid, "Spawn sub exchange");
                registry.create_exchange(thid, wallet.id(), Some(&parent))
            }
        };

        mex.add_message(epm)?;
        let key = ProtocolKey::from_uri(&protocol_uri)?;
        key.invoke(Arc::clone(&mex), Arc::clone(&self.ctx), &wallet, &message_type)
            .await?;
        Ok(mex)
    }

    /// Packs `epm` for the counterparty of `con` and sends it to their
    /// endpoint.
    ///
    /// `on_packed` sees the envelope before it is handed to the transport.
    ///
    /// # Errors
    ///
    /// Fails if their DID or endpoint is unknown, or packing or delivery
    /// fails.
    pub async fn dispatch_encrypted_message(
        &self,
        con: &SharedConnection,
        epm: &EndpointMessage,
        on_packed: impl FnOnce(&PackedMessage) + Send,
    ) -> Result<()> {
        let (sender, recipient, endpoint) = {
            let con = con.read();
            let endpoint = con
                .their_endpoint
                .clone()
                .ok_or(CoreError::MissingContext("their endpoint"))?;
            (
                con.my_verkey().to_string(),
                con.their_verkey()?.to_string(),
                endpoint,
            )
        };
        let plaintext = epm.body_as_json()?;
        let packed = pack_message(
            &plaintext,
            self.ctx.plugin.as_ref(),
            self.ctx.packing,
            Some(&sender),
            &[recipient],
        )
        .await?;
        on_packed(&packed);
        info!(
            message_type = epm.message_type().unwrap_or("none"),
            thid = %epm.thid(),
            "Outbound message {} to {endpoint}",
            epm.id()
        );
        self.dispatch_to_endpoint(&endpoint, &packed).await
    }

    /// Sends an already packed message.
    ///
    /// # Errors
    ///
    /// Returns the transport's error.
    pub async fn dispatch_to_endpoint(&self, url: &str, packed: &PackedMessage) -> Result<()> {
        self.ctx.transport.dispatch_to_endpoint(url, packed).await
    }
}
