//! Trust ping, protocol 1.0.
//!
//! A ping over a connection that finished the DID exchange makes it active;
//! so does the response on the pinging side.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use didcomm_agent_core::{
    ConnectionState, EndpointMessage, Error as CoreError, MessageExchange,
};
use serde_json::{json, Value};
use tracing::info;

use crate::error::Result;
use crate::protocol::{complete_if_pending, json_body, json_message, AgentContext, Protocol};
use crate::wallet::Wallet;

const PING: &str = "https://didcomm.org/trust_ping/1.0/ping";
const PING_RESPONSE: &str = "https://didcomm.org/trust_ping/1.0/ping_response";

/// Messages of the trust ping protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustPingMessage {
    /// A ping
    Ping,
    /// The answer to a ping
    PingResponse,
}

impl TrustPingMessage {
    /// Parses a full message type.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnsupportedMessageType`] for other types.
    pub fn from_type(message_type: &str) -> Result<Self> {
        match message_type {
            PING => Ok(TrustPingMessage::Ping),
            PING_RESPONSE => Ok(TrustPingMessage::PingResponse),
            other => Err(CoreError::UnsupportedMessageType(other.to_string()).into()),
        }
    }
}

/// Checks liveness of a connection.
#[derive(Debug, Clone)]
pub struct TrustPingProtocol {
    mex: Arc<MessageExchange>,
    ctx: Arc<AgentContext>,
}

impl TrustPingProtocol {
    /// Pings the counterparty of the bound exchange's connection.
    ///
    /// The ping runs on a child exchange of its own.
    ///
    /// # Returns
    ///
    /// A handle bound to the ping exchange
    ///
    /// # Errors
    ///
    /// Fails without a connection, or if dispatch fails.
    pub async fn send_ping(&self, comment: Option<&str>) -> Result<Self> {
        let con = self.mex.connection()?;
        let mut fields = json!({ "response_requested": true });
        if let Some(comment) = comment {
            fields["comment"] = json!(comment);
        }
        let body = json_message(PING, None, None, fields);
        let epm = EndpointMessage::builder(body.to_string()).outbound().build()?;

        let wallet = self.wallet()?;
        let pmex = self
            .ctx
            .registry
            .create_exchange(epm.id(), wallet.id(), Some(&self.mex));
        pmex.add_message(epm.clone())?;
        pmex.place_endpoint_message_future(PING_RESPONSE)?;

        let handle = Self::new(pmex, Arc::clone(&self.ctx));
        handle
            .dispatcher()
            .dispatch_encrypted_message(&con, &epm, |_| {})
            .await?;
        Ok(handle)
    }

    /// Handles a ping and answers it if asked to.
    async fn receive_ping(&self, to: &Arc<Wallet>) -> Result<()> {
        let epm = self.mex.last()?;
        epm.check_message_type(PING)?;
        let body = json_body(&epm)?;
        let con = self.mex.connection()?;
        con.write().advance(ConnectionState::Active)?;
        info!(wallet = %to.name(), con = %con.read().short_string(), "Connection active");

        let response_requested = body
            .get("response_requested")
            .and_then(Value::as_bool)
            .unwrap_or(true);
        if !response_requested {
            return Ok(());
        }

        let fields = json!({
            "~timing": { "out_time": Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true) },
            "comment": format!("Hi from {}", to.name()),
        });
        let body = json_message(PING_RESPONSE, Some(epm.thid()), None, fields);
        let response = EndpointMessage::builder(body.to_string()).outbound().build()?;
        self.mex.add_message(response.clone())?;

        self.dispatcher()
            .dispatch_encrypted_message(&con, &response, |_| {})
            .await
    }

    async fn receive_ping_response(&self) -> Result<()> {
        let epm = self.mex.last()?;
        epm.check_message_type(PING_RESPONSE)?;
        self.mex
            .connection()?
            .write()
            .advance(ConnectionState::Active)?;
        complete_if_pending(&self.mex, PING_RESPONSE, epm)
    }

    /// Waits for the response to the ping of the bound exchange.
    ///
    /// # Errors
    ///
    /// Returns a timeout error if no response arrives in time.
    pub async fn await_ping_response(&self, timeout: Duration) -> Result<EndpointMessage> {
        Ok(self.mex.await_endpoint_message(PING_RESPONSE, timeout).await?)
    }
}

#[async_trait]
impl Protocol for TrustPingProtocol {
    const PROTOCOL_URI: &'static str = "https://didcomm.org/trust_ping/1.0";

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
        match TrustPingMessage::from_type(message_type)? {
            TrustPingMessage::Ping => self.receive_ping(to).await,
            TrustPingMessage::PingResponse => self.receive_ping_response().await,
        }
    }
}
