//! Decentralized identifiers and minimal DID documents.

use std::fmt;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::{Error, Result};
use crate::plugin::Signer;
use crate::types::{random_id, Attachment, AttachmentData};

/// Media type of an attached DID document.
pub const DID_DOC_MEDIA_TYPE: &str = "application/did+json";

/// Supported DID methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DidMethod {
    /// `did:key`
    Key,
    /// `did:sov`
    Sov,
    /// `did:peer`
    Peer,
}

impl DidMethod {
    /// The method name as it appears in a DID URI.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            DidMethod::Key => "key",
            DidMethod::Sov => "sov",
            DidMethod::Peer => "peer",
        }
    }
}

impl fmt::Display for DidMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A DID together with its verification key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Did {
    /// The method specific id
    pub id: String,
    /// The DID method
    pub method: DidMethod,
    /// The verification key
    pub verkey: String,
}

impl Did {
    /// Creates a DID with fresh random key material.
    #[must_use]
    pub fn generate(method: DidMethod) -> Self {
        let mut key = [0u8; 32];
        OsRng.fill_bytes(&mut key);
        let verkey = URL_SAFE_NO_PAD.encode(key);
        let id = match method {
            DidMethod::Key => format!("z{verkey}"),
            DidMethod::Sov => URL_SAFE_NO_PAD.encode(&key[..16]),
            DidMethod::Peer => format!("0z{verkey}"),
        };
        Self { id, method, verkey }
    }

    /// Parses a DID URI and pairs it with a verification key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidFormat`] if `uri` is not a `did:<method>:<id>`
    /// string with a supported method.
    pub fn parse(uri: &str, verkey: impl Into<String>) -> Result<Self> {
        let mut parts = uri.splitn(3, ':');
        let (Some("did"), Some(method), Some(id)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(Error::InvalidFormat(format!("Not a DID: {uri}")));
        };
        let method = match method {
            "key" => DidMethod::Key,
            "sov" => DidMethod::Sov,
            "peer" => DidMethod::Peer,
            other => return Err(Error::DIDResolution(format!("Unsupported method: {other}"))),
        };
        Ok(Self {
            id: id.to_string(),
            method,
            verkey: verkey.into(),
        })
    }

    /// The full DID URI.
    #[must_use]
    pub fn uri(&self) -> String {
        format!("did:{}:{}", self.method, self.id)
    }

    /// The `did:key` for a bare verification key.
    #[must_use]
    pub fn from_verkey(verkey: &str) -> Self {
        Self {
            id: format!("z{verkey}"),
            method: DidMethod::Key,
            verkey: verkey.to_string(),
        }
    }
}

/// A verification method entry of a [`DidDoc`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationMethod {
    /// Key id
    pub id: String,
    /// Key type
    #[serde(rename = "type")]
    pub typ: String,
    /// Controlling DID
    pub controller: String,
    /// The public key
    pub public_key_base64: String,
}

/// A service entry of a [`DidDoc`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    /// Service id
    pub id: String,
    /// Service type
    #[serde(rename = "type")]
    pub typ: String,
    /// Where messages are delivered
    pub service_endpoint: String,
}

/// A minimal DID document with one key and an optional DIDComm service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DidDoc {
    /// JSON-LD context
    #[serde(rename = "@context")]
    pub context: String,
    /// The DID
    pub id: String,
    /// Verification methods
    pub verification_method: Vec<VerificationMethod>,
    /// Services
    #[serde(default)]
    pub service: Vec<Service>,
}

impl DidDoc {
    /// Builds a document for `did` with an optional DIDComm endpoint.
    #[must_use]
    pub fn new(did: &Did, endpoint: Option<&str>) -> Self {
        let uri = did.uri();
        Self {
            context: "https://www.w3.org/ns/did/v1".to_string(),
            verification_method: vec![VerificationMethod {
                id: format!("{uri}#key-1"),
                typ: "Ed25519VerificationKey2018".to_string(),
                controller: uri.clone(),
                public_key_base64: did.verkey.clone(),
            }],
            service: endpoint
                .map(|ep| Service {
                    id: format!("{uri}#didcomm-1"),
                    typ: "DIDCommMessaging".to_string(),
                    service_endpoint: ep.to_string(),
                })
                .into_iter()
                .collect(),
            id: uri,
        }
    }

    /// The first verification key.
    #[must_use]
    pub fn verkey(&self) -> Option<&str> {
        self.verification_method
            .first()
            .map(|vm| vm.public_key_base64.as_str())
    }

    /// The first service endpoint.
    #[must_use]
    pub fn service_endpoint(&self) -> Option<&str> {
        self.service.first().map(|s| s.service_endpoint.as_str())
    }

    /// The DID this document describes.
    ///
    /// # Errors
    ///
    /// Fails if the document id is not a DID or the document has no key.
    pub fn did(&self) -> Result<Did> {
        let verkey = self.verkey().ok_or(Error::MissingField("verificationMethod"))?;
        Did::parse(&self.id, verkey)
    }

    /// Attaches this document, signed with `key_id`.
    ///
    /// # Errors
    ///
    /// Fails if serialization or signing fails.
    pub async fn to_signed_attachment(&self, signer: &dyn Signer, key_id: &str) -> Result<Attachment> {
        let payload = serde_json::to_vec(self)?;
        let signature = signer.sign(&payload, key_id).await?;
        Ok(Attachment {
            id: random_id(),
            description: None,
            filename: None,
            media_type: Some(DID_DOC_MEDIA_TYPE.to_string()),
            format: None,
            data: AttachmentData::Jws(json!({
                "payload": URL_SAFE_NO_PAD.encode(&payload),
                "signature": URL_SAFE_NO_PAD.encode(signature),
                "header": { "kid": key_id },
            })),
        })
    }

    /// Extracts a document from a signed attachment, verifying it against
    /// `key_id`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Verification`] if the signature does not match, or a
    /// format error if the attachment is malformed.
    pub async fn from_signed_attachment(
        attachment: &Attachment,
        signer: &dyn Signer,
        key_id: &str,
    ) -> Result<Self> {
        let AttachmentData::Jws(jws) = &attachment.data else {
            return Err(Error::InvalidFormat("DID document attachment is not signed".into()));
        };
        let field = |name: &'static str| {
            jws.get(name)
                .and_then(serde_json::Value::as_str)
                .ok_or(Error::MissingField(name))
        };
        let payload = URL_SAFE_NO_PAD.decode(field("payload")?)?;
        let signature = URL_SAFE_NO_PAD.decode(field("signature")?)?;
        if !signer.verify(&payload, &signature, key_id).await? {
            return Err(Error::Verification(format!(
                "DID document signature does not match key {key_id}"
            )));
        }
        Ok(serde_json::from_slice(&payload)?)
    }
}
