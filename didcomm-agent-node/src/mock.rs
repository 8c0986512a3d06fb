//! A plugin for tests and the demo server.
//!
//! Signatures are HMAC-SHA256 tags keyed by the verification key, so anyone
//! who knows the key can verify them. Ciphertexts carry their recipients in
//! the clear. Neither offers any protection.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use didcomm_agent_core::{
    error::{Error, Result},
    plugin::{DIDCommPlugin, DIDResolver, Encryptor, Signer},
    Did, DidDoc,
};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// A mock plugin for testing `DIDComm` functionality.
#[derive(Debug, Clone, Default)]
pub struct MockPlugin;

impl MockPlugin {
    /// Creates a new instance of the mock plugin.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[derive(Serialize, Deserialize)]
struct MockCiphertext {
    to: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    from: Option<String>,
    data: String,
}

fn mac(key_id: &str) -> Result<HmacSha256> {
    HmacSha256::new_from_slice(key_id.as_bytes()).map_err(|e| Error::Signing(e.to_string()))
}

#[async_trait]
impl DIDResolver for MockPlugin {
    async fn resolve(&self, did: &str) -> Result<DidDoc> {
        let verkey = did
            .strip_prefix("did:key:z")
            .ok_or_else(|| Error::DIDResolution(format!("Cannot resolve: {did}")))?;
        Ok(DidDoc::new(&Did::from_verkey(verkey), None))
    }
}

#[async_trait]
impl Signer for MockPlugin {
    async fn sign(&self, message: &[u8], key_id: &str) -> Result<Vec<u8>> {
        let mut mac = mac(key_id)?;
        mac.update(message);
        Ok(mac.finalize().into_bytes().to_vec())
    }

    async fn verify(&self, message: &[u8], signature: &[u8], key_id: &str) -> Result<bool> {
        let mut mac = mac(key_id)?;
        mac.update(message);
        Ok(mac.verify_slice(signature).is_ok())
    }
}

#[async_trait]
impl Encryptor for MockPlugin {
    async fn encrypt(&self, message: &[u8], to: &[&str], from: Option<&str>) -> Result<Vec<u8>> {
        let ct = MockCiphertext {
            to: to.iter().map(ToString::to_string).collect(),
            from: from.map(ToString::to_string),
            data: STANDARD.encode(message),
        };
        Ok(serde_json::to_vec(&ct)?)
    }

    async fn decrypt(&self, message: &[u8], recipient: &str) -> Result<Vec<u8>> {
        let ct: MockCiphertext = serde_json::from_slice(message)?;
        if !ct.to.iter().any(|to| to == recipient) {
            return Err(Error::Decryption(format!("Not encrypted for {recipient}")));
        }
        Ok(STANDARD.decode(ct.data)?)
    }
}

impl DIDCommPlugin for MockPlugin {
    fn resolver(&self) -> &dyn DIDResolver {
        self
    }

    fn signer(&self) -> &dyn Signer {
        self
    }

    fn encryptor(&self) -> &dyn Encryptor {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use didcomm_agent_core::DidMethod;

    #[tokio::test]
    async fn test_signatures_are_keyed() {
        let plugin = MockPlugin::new();
        let signature = plugin.signer().sign(b"payload", "key-1").await.unwrap();
        assert!(plugin.signer().verify(b"payload", &signature, "key-1").await.unwrap());
        assert!(!plugin.signer().verify(b"payload", &signature, "key-2").await.unwrap());
        assert!(!plugin.signer().verify(b"other", &signature, "key-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_resolve_did_key() {
        let plugin = MockPlugin::new();
        let did = Did::generate(DidMethod::Key);
        let doc = plugin.resolver().resolve(&did.uri()).await.unwrap();
        assert_eq!(doc.verkey(), Some(did.verkey.as_str()));

        let sov = Did::generate(DidMethod::Sov);
        assert!(plugin.resolver().resolve(&sov.uri()).await.is_err());
    }
}
