//! Envelope packing and unpacking.
//!
//! Every envelope is a JSON object with a base64 `protected` header naming
//! the packing algorithm, the sender key (`skid`, absent for anoncrypt) and
//! the recipient keys. Signed envelopes carry a `payload` and `signature`,
//! encrypted ones a `ciphertext`. The cryptography itself is delegated to the
//! [`DIDCommPlugin`].

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::trace;

use crate::{error::Result, plugin::DIDCommPlugin, types::PackingType, Error, PackedMessage};

/// Protected envelope header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeHeader {
    /// Packing algorithm
    pub alg: PackingType,
    /// Sender verification key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skid: Option<String>,
    /// Recipient verification keys
    pub recipients: Vec<String>,
}

impl EnvelopeHeader {
    /// Reads the protected header of a packed envelope without unpacking it.
    ///
    /// # Errors
    ///
    /// Returns an error if the envelope is not JSON or the header is malformed.
    pub fn peek(packed: &str) -> Result<Self> {
        let envelope: Value = serde_json::from_str(packed)
            .map_err(|e| Error::InvalidFormat(format!("Invalid JSON: {e}")))?;
        Self::from_envelope(&envelope)
    }

    fn from_envelope(envelope: &Value) -> Result<Self> {
        let protected = envelope
            .get("protected")
            .and_then(Value::as_str)
            .ok_or(Error::MissingField("protected"))?;
        Ok(serde_json::from_slice(&URL_SAFE_NO_PAD.decode(protected)?)?)
    }
}

/// Result of unpacking an envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct UnpackedMessage {
    /// The plaintext message JSON
    pub plaintext: String,
    /// The sender verification key, unless anonymously encrypted
    pub sender_verkey: Option<String>,
    /// The recipient key the envelope was opened with
    pub recipient_verkey: String,
    /// How the envelope was packed
    pub packing: PackingType,
}

/// Pack a plaintext message for the given recipient keys.
///
/// # Errors
///
/// Returns an error if:
/// - No recipients are given
/// - A sender key is required for the packing type and missing
/// - Plugin operations (signing/encryption) fail
pub async fn pack_message(
    plaintext: &str,
    plugin: &dyn DIDCommPlugin,
    packing_type: PackingType,
    sender_verkey: Option<&str>,
    recipient_verkeys: &[String],
) -> Result<PackedMessage> {
    if recipient_verkeys.is_empty() {
        return Err(Error::InvalidFormat("At least one recipient required".into()));
    }
    let skid = match packing_type {
        PackingType::Signed | PackingType::AuthcryptV2 => Some(
            sender_verkey
                .ok_or_else(|| {
                    Error::InvalidFormat(format!("Sender key required for {packing_type:?}"))
                })?
                .to_string(),
        ),
        PackingType::AnonV2 => None,
    };
    let header = EnvelopeHeader {
        alg: packing_type,
        skid,
        recipients: recipient_verkeys.to_vec(),
    };
    let protected = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header)?);

    let envelope = match packing_type {
        PackingType::Signed => {
            let skid = header.skid.as_deref().unwrap_or_default();
            let signature = plugin.signer().sign(plaintext.as_bytes(), skid).await?;
            json!({
                "protected": protected,
                "payload": URL_SAFE_NO_PAD.encode(plaintext),
                "signature": URL_SAFE_NO_PAD.encode(signature),
            })
        }
        PackingType::AuthcryptV2 | PackingType::AnonV2 => {
            let to: Vec<&str> = recipient_verkeys.iter().map(String::as_str).collect();
            let encrypted = plugin
                .encryptor()
                .encrypt(plaintext.as_bytes(), &to, header.skid.as_deref())
                .await?;
            json!({
                "protected": protected,
                "ciphertext": URL_SAFE_NO_PAD.encode(encrypted),
            })
        }
    };
    trace!(alg = ?packing_type, recipients = recipient_verkeys.len(), "Packed message");

    Ok(PackedMessage {
        data: serde_json::to_string(&envelope)?,
        packing: packing_type,
    })
}

/// Unpack an envelope.
///
/// When `recipient` is `None` the first recipient key of the envelope is used.
///
/// # Errors
///
/// Returns an error if:
/// - The envelope is not valid JSON or base64
/// - `recipient` is not a recipient of the envelope
/// - Signature verification or decryption fails
pub async fn unpack_message(
    packed: &str,
    plugin: &dyn DIDCommPlugin,
    recipient: Option<&str>,
) -> Result<UnpackedMessage> {
    let envelope: Value = serde_json::from_str(packed)
        .map_err(|e| Error::InvalidFormat(format!("Invalid JSON: {e}")))?;
    let header = EnvelopeHeader::from_envelope(&envelope)?;

    let recipient_verkey = match recipient {
        Some(rk) if header.recipients.iter().any(|r| r == rk) => rk.to_string(),
        Some(rk) => {
            return Err(Error::Decryption(format!("Envelope not addressed to {rk}")));
        }
        None => header
            .recipients
            .first()
            .cloned()
            .ok_or(Error::MissingField("recipients"))?,
    };
    let field = |name: &'static str| {
        envelope
            .get(name)
            .and_then(Value::as_str)
            .ok_or(Error::MissingField(name))
    };

    let plaintext = match header.alg {
        PackingType::Signed => {
            let payload = URL_SAFE_NO_PAD.decode(field("payload")?)?;
            let signature = URL_SAFE_NO_PAD.decode(field("signature")?)?;
            let skid = header.skid.as_deref().ok_or(Error::MissingField("skid"))?;
            if !plugin.signer().verify(&payload, &signature, skid).await? {
                return Err(Error::Verification(format!("Invalid signature by {skid}")));
            }
            payload
        }
        PackingType::AuthcryptV2 | PackingType::AnonV2 => {
            let ciphertext = URL_SAFE_NO_PAD.decode(field("ciphertext")?)?;
            plugin
                .encryptor()
                .decrypt(&ciphertext, &recipient_verkey)
                .await?
        }
    };
    let plaintext = String::from_utf8(plaintext)
        .map_err(|e| Error::InvalidFormat(format!("Plaintext is not UTF-8: {e}")))?;

    Ok(UnpackedMessage {
        plaintext,
        sender_verkey: header.skid,
        recipient_verkey,
        packing: header.alg,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::MockTestPlugin;
    use crate::Message;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn plaintext() -> String {
        let message = Message::with_id(
            "test-1",
            "https://example.com/protocols/1.0/test",
            json!({ "hello": "world" }),
        );
        serde_json::to_string(&message).unwrap()
    }

    #[tokio::test]
    async fn test_pack_signed() -> Result<()> {
        let message = plaintext();
        let plugin = MockTestPlugin;
        let recipients = vec!["bob-key".to_string()];
        let packed = pack_message(
            &message,
            &plugin,
            PackingType::Signed,
            Some("alice-key"),
            &recipients,
        )
        .await?;

        let packed_json: Value = serde_json::from_str(&packed.data)?;
        assert!(packed_json["payload"].is_string());
        assert!(packed_json["signature"].is_string());

        let unpacked = unpack_message(&packed.data, &plugin, None).await?;
        assert_eq!(unpacked.plaintext, message);
        assert_eq!(unpacked.sender_verkey.as_deref(), Some("alice-key"));
        assert_eq!(unpacked.recipient_verkey, "bob-key");
        Ok(())
    }

    #[tokio::test]
    async fn test_pack_authcrypt() -> Result<()> {
        let message = plaintext();
        let plugin = MockTestPlugin;
        let recipients = vec!["bob-key".to_string(), "carol-key".to_string()];
        let packed = pack_message(
            &message,
            &plugin,
            PackingType::AuthcryptV2,
            Some("alice-key"),
            &recipients,
        )
        .await?;

        let header = EnvelopeHeader::peek(&packed.data)?;
        assert_eq!(header.recipients, recipients);
        assert_eq!(header.skid.as_deref(), Some("alice-key"));

        let unpacked = unpack_message(&packed.data, &plugin, Some("carol-key")).await?;
        assert_eq!(unpacked.plaintext, message);
        assert_eq!(unpacked.recipient_verkey, "carol-key");
        Ok(())
    }

    #[tokio::test]
    async fn test_anoncrypt_has_no_sender() -> Result<()> {
        let plugin = MockTestPlugin;
        let packed = pack_message(
            &plaintext(),
            &plugin,
            PackingType::AnonV2,
            Some("alice-key"),
            &["bob-key".to_string()],
        )
        .await?;
        let unpacked = unpack_message(&packed.data, &plugin, None).await?;
        assert_eq!(unpacked.sender_verkey, None);
        Ok(())
    }

    #[tokio::test]
    async fn test_pack_failures() {
        let plugin = MockTestPlugin;
        let err = pack_message(&plaintext(), &plugin, PackingType::AuthcryptV2, None, &["b".into()])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidFormat(_)));

        let err = pack_message(&plaintext(), &plugin, PackingType::AnonV2, None, &[])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidFormat(_)));
    }

    #[tokio::test]
    async fn test_unpack_wrong_recipient() {
        let plugin = MockTestPlugin;
        let packed = pack_message(
            &plaintext(),
            &plugin,
            PackingType::AuthcryptV2,
            Some("alice-key"),
            &["bob-key".to_string()],
        )
        .await
        .unwrap();
        let err = unpack_message(&packed.data, &plugin, Some("mallory-key"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Decryption(_)));
    }
}
