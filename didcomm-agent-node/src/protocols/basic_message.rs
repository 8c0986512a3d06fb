//! Basic message, protocol 2.0.

use std::sync::Arc;

use async_trait::async_trait;
use didcomm_agent_core::{EndpointMessage, Error as CoreError, MessageDirection, MessageExchange};
use serde_json::{json, Value};
use tracing::info;

use crate::error::Result;
use crate::protocol::{connection_message, now_secs, AgentContext, Protocol};
use crate::wallet::{BasicMessageRecord, Wallet};

const MESSAGE: &str = "https://didcomm.org/basicmessage/2.0/message";

/// Messages of the basic message protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BasicMessage {
    /// A text message
    Message,
}

impl BasicMessage {
    /// Parses a full message type.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnsupportedMessageType`] for other types.
    pub fn from_type(message_type: &str) -> Result<Self> {
        match message_type {
            MESSAGE => Ok(BasicMessage::Message),
            other => Err(CoreError::UnsupportedMessageType(other.to_string()).into()),
        }
    }
}

/// Sends text over an active connection.
#[derive(Debug, Clone)]
pub struct BasicMessageProtocol {
    mex: Arc<MessageExchange>,
    ctx: Arc<AgentContext>,
}

impl BasicMessageProtocol {
    /// Sends `content` to the counterparty of the bound exchange's
    /// connection, on a child exchange of its own.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ConnectionNotActive`] unless the connection is
    /// active, or the dispatch error.
    pub async fn send_message(&self, content: &str) -> Result<Self> {
        let con = self.mex.connection()?;
        let con_id = {
            let con = con.read();
            con.check_active()?;
            con.id.clone()
        };

        let msg = connection_message(
            &con,
            MESSAGE,
            None,
            json!({ "content": content, "lang": "en" }),
        )?;
        let sent_time = i64::try_from(msg.created_time).unwrap_or_else(|_| now_secs());
        let epm = EndpointMessage::builder(msg).outbound().build()?;

        let wallet = self.wallet()?;
        let mmex = self
            .ctx
            .registry
            .create_exchange(epm.id(), wallet.id(), Some(&self.mex));
        mmex.add_message(epm.clone())?;
        wallet.add_basic_message(BasicMessageRecord {
            id: epm.id().to_string(),
            connection_id: con_id,
            content: content.to_string(),
            sent_time,
            direction: MessageDirection::Outbound,
        });

        let handle = Self::new(mmex, Arc::clone(&self.ctx));
        handle
            .dispatcher()
            .dispatch_encrypted_message(&con, &epm, |_| {})
            .await?;
        Ok(handle)
    }

    async fn receive_message(&self, to: &Arc<Wallet>) -> Result<()> {
        let epm = self.mex.last()?;
        epm.check_message_type(MESSAGE)?;
        let con = self.mex.connection()?;
        let con_id = {
            let con = con.read();
            con.check_active()?;
            con.id.clone()
        };
        let msg = epm.message().ok_or(CoreError::MissingField("body"))?;
        let content = msg
            .body
            .get("content")
            .and_then(Value::as_str)
            .ok_or(CoreError::MissingField("content"))?;
        info!(wallet = %to.name(), "Received basic message: {content}");

        to.add_basic_message(BasicMessageRecord {
            id: epm.id().to_string(),
            connection_id: con_id,
            content: content.to_string(),
            sent_time: i64::try_from(msg.created_time).unwrap_or_else(|_| now_secs()),
            direction: MessageDirection::Inbound,
        });
        Ok(())
    }
}

#[async_trait]
impl Protocol for BasicMessageProtocol {
    const PROTOCOL_URI: &'static str = "https://didcomm.org/basicmessage/2.0";

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
        match BasicMessage::from_type(message_type)? {
            BasicMessage::Message => self.receive_message(to).await,
        }
    }
}
