//! Endpoint messages: a message body plus correlation headers.
//!
//! Correlation headers are derived once, at construction, from a JSON body.
//! Both DIDComm v1 (`@id`, `@type`, `~thread`) and v2 (`id`, `type`, `thid`,
//! `pthid`) field names are understood. Derived values overwrite headers
//! passed in by the caller.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value;

use crate::error::{Error, Result};
use crate::types::{random_id, Message};

/// Header name constants.
pub mod header {
    /// Message id
    pub const MESSAGE_ID: &str = "MessageId";
    /// Message type URI
    pub const MESSAGE_TYPE: &str = "MessageType";
    /// Thread id
    pub const MESSAGE_THID: &str = "MessageThid";
    /// Parent thread id
    pub const MESSAGE_PTHID: &str = "MessageParentThid";
    /// Protocol URI
    pub const MESSAGE_PROTOCOL_URI: &str = "MessageProtocolUri";
    /// Sender verification key
    pub const MESSAGE_SENDER_VERKEY: &str = "MessageSenderVerkey";
    /// Recipient verification key
    pub const MESSAGE_RECIPIENT_VERKEY: &str = "MessageRecipientVerkey";
    /// Whether the recipient accepts follow-up steps on its own
    pub const MESSAGE_AUTO_ACCEPT: &str = "MessageAutoAccept";
    /// Inbound or outbound
    pub const MESSAGE_DIRECTION: &str = "MessageDirection";
    /// Media type of the body
    pub const MESSAGE_MEDIA_TYPE: &str = "MessageMediaType";
    /// Connection the message travels on
    pub const MESSAGE_CONNECTION_ID: &str = "MessageConnectionId";
}

const INBOUND: &str = "inbound";
const OUTBOUND: &str = "outbound";

/// Direction of an endpoint message relative to the local agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageDirection {
    /// Received from a peer
    Inbound,
    /// Sent to a peer
    Outbound,
}

/// The body of an endpoint message.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageBody {
    /// A structured DIDComm v2 message
    Message(Message),
    /// Raw JSON text
    Json(String),
}

impl From<Message> for MessageBody {
    fn from(msg: Message) -> Self {
        MessageBody::Message(msg)
    }
}

impl From<String> for MessageBody {
    fn from(json: String) -> Self {
        MessageBody::Json(json)
    }
}

impl From<&str> for MessageBody {
    fn from(json: &str) -> Self {
        MessageBody::Json(json.to_string())
    }
}

/// An immutable message body with its headers.
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointMessage {
    body: MessageBody,
    headers: BTreeMap<String, Value>,
}

impl EndpointMessage {
    /// Creates an endpoint message, deriving correlation headers from the body.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidFormat`] if the body is itself a serialized
    /// endpoint message, or if a structured body cannot be serialized.
    pub fn new(body: impl Into<MessageBody>, headers: BTreeMap<String, Value>) -> Result<Self> {
        let body = body.into();
        let mut headers = headers;

        let json = match &body {
            MessageBody::Message(msg) => Some(serde_json::to_value(msg)?),
            MessageBody::Json(text) => serde_json::from_str::<Value>(text).ok(),
        };
        if let Some(json) = json.as_ref().filter(|v| v.is_object()) {
            if json.get("headers").is_some() && json.get("body").is_some() {
                return Err(Error::InvalidFormat("Nested endpoint message".into()));
            }
            let derived = [
                (header::MESSAGE_ID, select(json, &["@id", "id"])),
                (header::MESSAGE_TYPE, select(json, &["@type", "type"])),
                (header::MESSAGE_THID, select(json, &["~thread.thid", "thid"])),
                (header::MESSAGE_PTHID, select(json, &["~thread.pthid", "pthid"])),
            ];
            for (key, value) in derived {
                if let Some(value) = value {
                    headers.insert(key.to_string(), Value::String(value));
                }
            }
        }
        if !headers.get(header::MESSAGE_ID).is_some_and(Value::is_string) {
            headers.insert(header::MESSAGE_ID.to_string(), Value::String(random_id()));
        }
        Ok(Self { body, headers })
    }

    /// Starts a builder for `body`.
    pub fn builder(body: impl Into<MessageBody>) -> EndpointMessageBuilder {
        EndpointMessageBuilder {
            body: body.into(),
            headers: BTreeMap::new(),
        }
    }

    /// The message body.
    #[must_use]
    pub fn body(&self) -> &MessageBody {
        &self.body
    }

    /// The structured body, if there is one.
    #[must_use]
    pub fn message(&self) -> Option<&Message> {
        match &self.body {
            MessageBody::Message(msg) => Some(msg),
            MessageBody::Json(_) => None,
        }
    }

    /// All headers, sorted by name.
    #[must_use]
    pub fn headers(&self) -> &BTreeMap<String, Value> {
        &self.headers
    }

    /// A string header.
    #[must_use]
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).and_then(Value::as_str)
    }

    /// The message id.
    #[must_use]
    pub fn id(&self) -> &str {
        self.header(header::MESSAGE_ID).unwrap_or_default()
    }

    /// The message type URI.
    #[must_use]
    pub fn message_type(&self) -> Option<&str> {
        self.header(header::MESSAGE_TYPE)
    }

    /// The thread id, which is the message id unless set.
    #[must_use]
    pub fn thid(&self) -> &str {
        self.header(header::MESSAGE_THID).unwrap_or_else(|| self.id())
    }

    /// The parent thread id.
    #[must_use]
    pub fn pthid(&self) -> Option<&str> {
        self.header(header::MESSAGE_PTHID)
    }

    /// The protocol URI, taken from the header or else from the message type.
    #[must_use]
    pub fn protocol_uri(&self) -> Option<&str> {
        self.header(header::MESSAGE_PROTOCOL_URI).or_else(|| {
            let typ = self.message_type()?;
            typ.rfind('/').map(|idx| &typ[..idx])
        })
    }

    /// The sender verification key.
    #[must_use]
    pub fn sender_verkey(&self) -> Option<&str> {
        self.header(header::MESSAGE_SENDER_VERKEY)
    }

    /// The recipient verification key.
    #[must_use]
    pub fn recipient_verkey(&self) -> Option<&str> {
        self.header(header::MESSAGE_RECIPIENT_VERKEY)
    }

    /// The connection this message travels on.
    #[must_use]
    pub fn connection_id(&self) -> Option<&str> {
        self.header(header::MESSAGE_CONNECTION_ID)
    }

    /// Whether the recipient accepts follow-up steps without asking.
    #[must_use]
    pub fn auto_accept(&self) -> bool {
        self.headers
            .get(header::MESSAGE_AUTO_ACCEPT)
            .and_then(Value::as_bool)
            .unwrap_or(true)
    }

    /// Direction relative to the local agent.
    #[must_use]
    pub fn direction(&self) -> Option<MessageDirection> {
        match self.header(header::MESSAGE_DIRECTION)? {
            INBOUND => Some(MessageDirection::Inbound),
            OUTBOUND => Some(MessageDirection::Outbound),
            _ => None,
        }
    }

    /// The body as JSON text.
    ///
    /// # Errors
    ///
    /// Fails if a structured body cannot be serialized.
    pub fn body_as_json(&self) -> Result<String> {
        match &self.body {
            MessageBody::Json(text) => Ok(text.clone()),
            MessageBody::Message(msg) => Ok(serde_json::to_string(msg)?),
        }
    }

    /// Ensures the message has the expected type.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnexpectedMessageType`] on mismatch.
    pub fn check_message_type(&self, expected: &str) -> Result<()> {
        match self.message_type() {
            Some(actual) if actual == expected => Ok(()),
            actual => Err(Error::UnexpectedMessageType {
                expected: expected.to_string(),
                actual: actual.unwrap_or("none").to_string(),
            }),
        }
    }
}

impl fmt::Display for EndpointMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[id={}, thid={}, type={}]",
            self.id(),
            self.thid(),
            self.message_type().unwrap_or("none")
        )
    }
}

/// Builder for [`EndpointMessage`].
#[derive(Debug, Clone)]
pub struct EndpointMessageBuilder {
    body: MessageBody,
    headers: BTreeMap<String, Value>,
}

impl EndpointMessageBuilder {
    /// Adds a header.
    #[must_use]
    pub fn header(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Adds a header if the value is present.
    #[must_use]
    pub fn header_opt(self, key: impl Into<String>, value: Option<impl Into<Value>>) -> Self {
        match value {
            Some(value) => self.header(key, value),
            None => self,
        }
    }

    /// Marks the message inbound.
    #[must_use]
    pub fn inbound(self) -> Self {
        self.header(header::MESSAGE_DIRECTION, INBOUND)
    }

    /// Marks the message outbound.
    #[must_use]
    pub fn outbound(self) -> Self {
        self.header(header::MESSAGE_DIRECTION, OUTBOUND)
    }

    /// Builds the message.
    ///
    /// # Errors
    ///
    /// See [`EndpointMessage::new`].
    pub fn build(self) -> Result<EndpointMessage> {
        EndpointMessage::new(self.body, self.headers)
    }
}

/// Selects the first string found at any of the dotted `paths`.
fn select(json: &Value, paths: &[&str]) -> Option<String> {
    paths.iter().find_map(|path| {
        path.split('.')
            .try_fold(json, |node, key| node.get(key))
            .and_then(Value::as_str)
            .map(ToString::to_string)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_v1_headers_derived() {
        let body = json!({
            "@id": "m-1",
            "@type": "https://didcomm.org/trust_ping/1.0/ping",
            "~thread": { "thid": "t-1", "pthid": "p-1" },
        })
        .to_string();
        let msg = EndpointMessage::new(body, BTreeMap::new()).unwrap();
        assert_eq!(msg.id(), "m-1");
        assert_eq!(msg.message_type(), Some("https://didcomm.org/trust_ping/1.0/ping"));
        assert_eq!(msg.thid(), "t-1");
        assert_eq!(msg.pthid(), Some("p-1"));
        assert_eq!(msg.protocol_uri(), Some("https://didcomm.org/trust_ping/1.0"));
    }

    #[test]
    fn test_thid_defaults_to_id() {
        let body = json!({ "@id": "m-2", "@type": "test" }).to_string();
        let msg = EndpointMessage::new(body, BTreeMap::new()).unwrap();
        assert_eq!(msg.thid(), "m-2");
        assert_eq!(msg.pthid(), None);
    }

    #[test]
    fn test_v2_message_body() {
        let message = Message::with_id("m-3", "https://didcomm.org/basicmessage/2.0/message", json!({}))
            .thid("t-3");
        let msg = EndpointMessage::builder(message.clone())
            .outbound()
            .header(header::MESSAGE_ID, "overwritten")
            .build()
            .unwrap();
        assert_eq!(msg.id(), "m-3");
        assert_eq!(msg.thid(), "t-3");
        assert_eq!(msg.message(), Some(&message));
        assert_eq!(msg.direction(), Some(MessageDirection::Outbound));
        assert_eq!(msg.body_as_json().unwrap(), serde_json::to_string(&message).unwrap());
    }

    #[test]
    fn test_non_json_body_gets_random_id() {
        let msg = EndpointMessage::builder("plain text").build().unwrap();
        assert!(!msg.id().is_empty());
        assert_eq!(msg.thid(), msg.id());
        assert_eq!(msg.message_type(), None);
        assert_eq!(msg.body_as_json().unwrap(), "plain text");
    }

    #[test]
    fn test_nested_endpoint_message_rejected() {
        let nested = json!({ "headers": {}, "body": "{}" }).to_string();
        let err = EndpointMessage::new(nested, BTreeMap::new()).unwrap_err();
        assert!(matches!(err, Error::InvalidFormat(_)));
    }

    #[test]
    fn test_auto_accept_and_verkeys() {
        let body = json!({ "id": "m-4", "type": "test" }).to_string();
        let msg = EndpointMessage::builder(body.as_str()).inbound().build().unwrap();
        assert!(msg.auto_accept());

        let msg = EndpointMessage::builder(body)
            .header(header::MESSAGE_AUTO_ACCEPT, false)
            .header(header::MESSAGE_SENDER_VERKEY, "sk")
            .header_opt(header::MESSAGE_RECIPIENT_VERKEY, Some("rk"))
            .header_opt(header::MESSAGE_CONNECTION_ID, None::<String>)
            .build()
            .unwrap();
        assert!(!msg.auto_accept());
        assert_eq!(msg.sender_verkey(), Some("sk"));
        assert_eq!(msg.recipient_verkey(), Some("rk"));
        assert_eq!(msg.connection_id(), None);
    }

    #[test]
    fn test_check_message_type() {
        let body = json!({ "id": "m-5", "type": "a" }).to_string();
        let msg = EndpointMessage::builder(body).build().unwrap();
        assert!(msg.check_message_type("a").is_ok());
        let err = msg.check_message_type("b").unwrap_err();
        assert!(matches!(
            err,
            Error::UnexpectedMessageType { ref expected, ref actual } if expected == "b" && actual == "a"
        ));
    }
}
