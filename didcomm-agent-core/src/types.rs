//! Core DIDComm v2 type definitions.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Media type for plain JSON attachments.
pub const JSON_MEDIA_TYPE: &str = "application/json";

/// Creates a random message id.
#[must_use]
pub fn random_id() -> String {
    Uuid::new_v4().to_string()
}

/// Represents a DIDComm v2 plaintext message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// The message ID
    pub id: String,
    /// The message type
    #[serde(rename = "type")]
    pub typ: String,
    /// The thread this message belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thid: Option<String>,
    /// The parent thread
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pthid: Option<String>,
    /// The sender's DID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    /// The recipient's DIDs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<Vec<String>>,
    /// The time the message was created
    #[serde(default)]
    pub created_time: u64,
    /// The time the message expires
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_time: Option<u64>,
    /// The message body
    #[serde(default)]
    pub body: Value,
    /// Message attachments
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachments: Option<Vec<Attachment>>,
}

impl Message {
    /// Create a new message with a random id
    pub fn new(typ: impl Into<String>, body: impl Into<Value>) -> Self {
        Self::with_id(random_id(), typ, body)
    }

    /// Create a new message with the given id
    pub fn with_id(id: impl Into<String>, typ: impl Into<String>, body: impl Into<Value>) -> Self {
        let created_time = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        Self {
            id: id.into(),
            typ: typ.into(),
            thid: None,
            pthid: None,
            from: None,
            to: None,
            created_time,
            expires_time: None,
            body: body.into(),
            attachments: None,
        }
    }

    /// Set the thread of the message
    #[must_use]
    pub fn thid(mut self, thid: impl Into<String>) -> Self {
        self.thid = Some(thid.into());
        self
    }

    /// Set the parent thread of the message
    #[must_use]
    pub fn pthid(mut self, pthid: impl Into<String>) -> Self {
        self.pthid = Some(pthid.into());
        self
    }

    /// Set the sender of the message
    #[must_use]
    pub fn from(mut self, from: impl Into<String>) -> Self {
        self.from = Some(from.into());
        self
    }

    /// Set the recipients of the message
    #[must_use]
    pub fn to(mut self, to: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.to = Some(to.into_iter().map(Into::into).collect());
        self
    }

    /// Set the attachments of the message
    #[must_use]
    pub fn attachments(mut self, attachments: Vec<Attachment>) -> Self {
        self.attachments = Some(attachments);
        self
    }

    /// The effective thread id, which is the message id unless set.
    #[must_use]
    pub fn thread_id(&self) -> &str {
        self.thid.as_deref().unwrap_or(&self.id)
    }

    /// Finds the first attachment in the given format.
    ///
    /// Attachments without a declared format are treated as matching.
    #[must_use]
    pub fn attachment_in_format(&self, format: &str) -> Option<&Attachment> {
        self.attachments
            .as_ref()?
            .iter()
            .find(|at| at.format.as_deref().map_or(true, |f| f == format))
    }
}

/// Represents a message attachment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    /// The attachment ID
    pub id: String,
    /// The attachment description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// The attachment filename
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    /// The attachment media type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    /// The attachment format
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    /// The attachment data
    pub data: AttachmentData,
}

impl Attachment {
    /// Creates a JSON attachment in the given format.
    pub fn json(format: impl Into<String>, value: Value) -> Self {
        Self {
            id: random_id(),
            description: None,
            filename: None,
            media_type: Some(JSON_MEDIA_TYPE.to_string()),
            format: Some(format.into()),
            data: AttachmentData::Json(value),
        }
    }
}

/// Represents attachment data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentData {
    /// JWS data
    Jws(Value),
    /// Hash data
    Hash(Value),
    /// Links data
    Links(Vec<String>),
    /// Base64 data
    Base64(String),
    /// JSON data
    Json(Value),
}

impl AttachmentData {
    /// The JSON payload, if this is JSON data.
    #[must_use]
    pub fn json_value(&self) -> Option<&Value> {
        match self {
            AttachmentData::Json(value) => Some(value),
            _ => None,
        }
    }
}

/// The type of message packing to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackingType {
    /// No encryption, just signed
    Signed,
    /// Authenticated encryption with sender identity
    #[default]
    AuthcryptV2,
    /// Anonymous encryption without sender identity
    AnonV2,
}

/// A packed DIDComm message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackedMessage {
    /// The packed message data.
    pub data: String,
    /// The type of packing used.
    #[serde(skip)]
    pub packing: PackingType,
}
