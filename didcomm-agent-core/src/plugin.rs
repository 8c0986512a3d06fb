//! Plugin system for envelope operations.
//!
//! The agent never performs wire-level cryptography itself. Packing and
//! unpacking go through an injected [`DIDCommPlugin`] which bundles three
//! capabilities:
//! - [`DIDResolver`]: resolving DIDs to DID documents
//! - [`Signer`]: signing and verifying payloads by verification key
//! - [`Encryptor`]: encrypting for and decrypting by verification key
//!
//! # Examples
//!
//! ```rust,no_run
//! use didcomm_agent_core::plugin::{DIDCommPlugin, DIDResolver, Encryptor, Signer};
//! use didcomm_agent_core::{DidDoc, Result};
//!
//! struct CustomPlugin;
//!
//! #[async_trait::async_trait]
//! impl DIDResolver for CustomPlugin {
//!     async fn resolve(&self, did: &str) -> Result<DidDoc> {
//!         todo!()
//!     }
//! }
//!
//! #[async_trait::async_trait]
//! impl Signer for CustomPlugin {
//!     async fn sign(&self, data: &[u8], key_id: &str) -> Result<Vec<u8>> {
//!         todo!()
//!     }
//!
//!     async fn verify(&self, data: &[u8], signature: &[u8], key_id: &str) -> Result<bool> {
//!         todo!()
//!     }
//! }
//!
//! #[async_trait::async_trait]
//! impl Encryptor for CustomPlugin {
//!     async fn encrypt(&self, data: &[u8], recipients: &[&str], sender: Option<&str>) -> Result<Vec<u8>> {
//!         todo!()
//!     }
//!
//!     async fn decrypt(&self, data: &[u8], recipient: &str) -> Result<Vec<u8>> {
//!         todo!()
//!     }
//! }
//!
//! impl DIDCommPlugin for CustomPlugin {
//!     fn resolver(&self) -> &dyn DIDResolver { self }
//!     fn signer(&self) -> &dyn Signer { self }
//!     fn encryptor(&self) -> &dyn Encryptor { self }
//! }
//! ```

use crate::{DidDoc, Result};
use async_trait::async_trait;

/// Resolves DIDs to DID Documents.
#[async_trait]
pub trait DIDResolver: Send + Sync {
    /// Resolves a DID to its DID Document.
    ///
    /// # Arguments
    /// * `did` - The DID to resolve (e.g., "did:key:z123")
    ///
    /// # Errors
    /// - If the DID is invalid or its method is unsupported
    /// - If resolution fails
    async fn resolve(&self, did: &str) -> Result<DidDoc>;
}

/// Signs and verifies payloads.
#[async_trait]
pub trait Signer: Send + Sync {
    /// Signs data using a specified key.
    ///
    /// # Arguments
    /// * `data` - The data to sign
    /// * `key_id` - The verification key whose private half signs
    ///
    /// # Errors
    /// - If the key is not found
    /// - If signing fails
    async fn sign(&self, data: &[u8], key_id: &str) -> Result<Vec<u8>>;

    /// Verifies a signature.
    ///
    /// # Arguments
    /// * `data` - The original data that was signed
    /// * `signature` - The signature to verify
    /// * `key_id` - The verification key
    ///
    /// # Errors
    /// - If the signature is malformed
    async fn verify(&self, data: &[u8], signature: &[u8], key_id: &str) -> Result<bool>;
}

/// Encrypts and decrypts payloads.
#[async_trait]
pub trait Encryptor: Send + Sync {
    /// Encrypts data for one or more recipients.
    ///
    /// # Arguments
    /// * `data` - The data to encrypt
    /// * `recipients` - The recipient verification keys
    /// * `sender` - Optional sender key for authenticated encryption
    ///
    /// # Errors
    /// - If encryption fails
    async fn encrypt(
        &self,
        data: &[u8],
        recipients: &[&str],
        sender: Option<&str>,
    ) -> Result<Vec<u8>>;

    /// Decrypts data.
    ///
    /// # Arguments
    /// * `data` - The encrypted data
    /// * `recipient` - The recipient verification key
    ///
    /// # Errors
    /// - If the data was not encrypted for `recipient`
    /// - If decryption fails
    async fn decrypt(&self, data: &[u8], recipient: &str) -> Result<Vec<u8>>;
}

/// Combined interface for envelope operations.
pub trait DIDCommPlugin: Send + Sync {
    /// Gets the DID resolver implementation.
    fn resolver(&self) -> &dyn DIDResolver;

    /// Gets the signer implementation.
    fn signer(&self) -> &dyn Signer;

    /// Gets the encryptor implementation.
    fn encryptor(&self) -> &dyn Encryptor;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::did::{Did, DidMethod};
    use mockall::mock;
    use mockall::predicate::*;

    mock! {
        TestPlugin {}

        #[async_trait]
        impl DIDResolver for TestPlugin {
            async fn resolve(&self, did: &str) -> Result<DidDoc>;
        }

        #[async_trait]
        impl Signer for TestPlugin {
            async fn sign(&self, data: &[u8], key_id: &str) -> Result<Vec<u8>>;
            async fn verify(&self, data: &[u8], signature: &[u8], key_id: &str) -> Result<bool>;
        }
    }

    #[tokio::test]
    async fn test_plugin_mock() {
        let mut plugin = MockTestPlugin::new();
        let test_message = b"test message";
        let test_signature = b"test signature";
        let test_key = "verkey-1";

        plugin
            .expect_sign()
            .with(eq(test_message.as_ref()), eq(test_key))
            .returning(|_, _| Ok(b"test signature".to_vec()));

        plugin
            .expect_verify()
            .with(
                eq(test_message.as_ref()),
                eq(test_signature.as_ref()),
                eq(test_key),
            )
            .returning(|_, _, _| Ok(true));

        let signature = plugin.sign(test_message, test_key).await.unwrap();
        assert_eq!(signature, test_signature);

        let valid = plugin
            .verify(test_message, test_signature, test_key)
            .await
            .unwrap();
        assert!(valid);
    }

    #[tokio::test]
    async fn test_resolver_mock() {
        let did = Did::generate(DidMethod::Key);
        let doc = DidDoc::new(&did, Some("http://localhost:8030"));
        let uri = did.uri();

        let mut plugin = MockTestPlugin::new();
        let expected = doc.clone();
        plugin
            .expect_resolve()
            .with(eq(uri.clone()))
            .returning(move |_| Ok(expected.clone()));

        let resolved = plugin.resolve(&uri).await.unwrap();
        assert_eq!(resolved.did().unwrap(), did);
    }
}
