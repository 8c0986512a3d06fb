use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::{
    did::{Did, DidDoc, DidMethod},
    error::{Error, Result},
    plugin::{DIDCommPlugin, DIDResolver, Encryptor, Signer},
};

/// A mock plugin for testing envelope functionality.
///
/// Signatures are the key id prepended to the payload, ciphertexts are
/// base64 with the recipient list in the clear.
#[derive(Clone)]
pub struct MockTestPlugin;

#[derive(Serialize, Deserialize)]
struct MockCiphertext {
    to: Vec<String>,
    data: String,
}

#[async_trait]
impl DIDResolver for MockTestPlugin {
    async fn resolve(&self, did: &str) -> Result<DidDoc> {
        let verkey = did
            .strip_prefix("did:key:z")
            .ok_or_else(|| Error::DIDResolution(format!("Cannot resolve: {did}")))?;
        let did = Did {
            id: format!("z{verkey}"),
            method: DidMethod::Key,
            verkey: verkey.to_string(),
        };
        Ok(DidDoc::new(&did, None))
    }
}

#[async_trait]
impl Signer for MockTestPlugin {
    async fn sign(&self, message: &[u8], key_id: &str) -> Result<Vec<u8>> {
        Ok([key_id.as_bytes(), b":", message].concat())
    }

    async fn verify(&self, message: &[u8], signature: &[u8], key_id: &str) -> Result<bool> {
        Ok(signature == [key_id.as_bytes(), b":", message].concat().as_slice())
    }
}

#[async_trait]
impl Encryptor for MockTestPlugin {
    async fn encrypt(&self, message: &[u8], to: &[&str], _from: Option<&str>) -> Result<Vec<u8>> {
        let ct = MockCiphertext {
            to: to.iter().map(ToString::to_string).collect(),
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

impl DIDCommPlugin for MockTestPlugin {
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
    use std::sync::Arc;

    #[tokio::test]
    async fn test_mock_plugin() {
        let plugin = Arc::new(MockTestPlugin);

        let did = Did::generate(DidMethod::Key);
        let did_doc = plugin.resolver().resolve(&did.uri()).await.unwrap();
        assert_eq!(did_doc.verkey(), Some(did.verkey.as_str()));

        let message = b"test message";
        let signature = plugin.signer().sign(message, "key-1").await.unwrap();
        assert!(plugin
            .signer()
            .verify(message, &signature, "key-1")
            .await
            .unwrap());
        assert!(!plugin
            .signer()
            .verify(message, &signature, "key-2")
            .await
            .unwrap());

        let encrypted = plugin
            .encryptor()
            .encrypt(message, &["recipient"], Some("sender"))
            .await
            .unwrap();
        let decrypted = plugin
            .encryptor()
            .decrypt(&encrypted, "recipient")
            .await
            .unwrap();
        assert_eq!(decrypted, message);
        assert!(plugin.encryptor().decrypt(&encrypted, "other").await.is_err());
    }
}
