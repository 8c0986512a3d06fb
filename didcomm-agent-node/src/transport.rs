//! Delivery of packed messages to service endpoints.
//!
//! # Features
//!
//! - HTTP(S) transport through `reqwest`
//! - In-process loopback that feeds the node's own listener
//!
//! # Examples
//!
//! ```rust,no_run
//! use didcomm_agent_core::{PackedMessage, PackingType};
//! use didcomm_agent_node::error::Result;
//! use didcomm_agent_node::transport::{DispatchConfig, HttpTransport, Transport};
//!
//! async fn send(packed: &PackedMessage) -> Result<()> {
//!     let transport = HttpTransport::new(&DispatchConfig::default())?;
//!     transport
//!         .dispatch_to_endpoint("http://localhost:9030/didcomm", packed)
//!         .await
//! }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use didcomm_agent_core::{PackedMessage, PackingType};
use reqwest::{header::CONTENT_TYPE, Client};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{Error, Result};

/// Configuration for message dispatch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// The path inbound messages are posted to
    pub endpoint: String,
    /// The HTTP client timeout in seconds
    pub timeout: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            endpoint: "/didcomm".to_string(),
            timeout: 30,
        }
    }
}

/// Media type of a packed message on the wire.
#[must_use]
pub fn media_type(packing: PackingType) -> &'static str {
    match packing {
        PackingType::Signed => "application/didcomm-signed+json",
        PackingType::AuthcryptV2 | PackingType::AnonV2 => "application/didcomm-encrypted+json",
    }
}

/// Hands packed messages to a service endpoint.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Delivers `packed` to `url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the message cannot be delivered.
    async fn dispatch_to_endpoint(&self, url: &str, packed: &PackedMessage) -> Result<()>;
}

/// Posts packed messages over HTTP.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// Creates a transport with the configured timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &DispatchConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn dispatch_to_endpoint(&self, url: &str, packed: &PackedMessage) -> Result<()> {
        debug!("Dispatching message to {url}");

        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, media_type(packed.packing))
            .body(packed.data.clone())
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::Dispatch(format!(
                "Failed to dispatch message to {url}: {}",
                response.status()
            )));
        }

        Ok(())
    }
}

/// Feeds packed messages back into the local node.
///
/// Every wallet of the node is reachable this way, so the endpoint URL is
/// only logged.
#[derive(Debug, Clone)]
pub struct LoopbackTransport {
    sender: mpsc::UnboundedSender<String>,
}

impl LoopbackTransport {
    /// Creates a transport writing into `sender`.
    #[must_use]
    pub fn new(sender: mpsc::UnboundedSender<String>) -> Self {
        Self { sender }
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn dispatch_to_endpoint(&self, url: &str, packed: &PackedMessage) -> Result<()> {
        debug!("Loopback dispatch for {url}");
        self.sender
            .send(packed.data.clone())
            .map_err(|_| Error::Dispatch("Loopback listener is gone".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::{
        matchers::{header, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    fn packed() -> PackedMessage {
        PackedMessage {
            data: r#"{"protected":"e30","ciphertext":"e30"}"#.to_string(),
            packing: PackingType::AuthcryptV2,
        }
    }

    #[tokio::test]
    async fn test_dispatch_to_endpoint() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/didcomm"))
            .and(header("content-type", "application/didcomm-encrypted+json"))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&mock_server)
            .await;

        let transport = HttpTransport::new(&DispatchConfig::default()).unwrap();
        let url = format!("{}/didcomm", mock_server.uri());
        let result = transport.dispatch_to_endpoint(&url, &packed()).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_dispatch_rejected() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let transport = HttpTransport::new(&DispatchConfig::default()).unwrap();
        let url = format!("{}/didcomm", mock_server.uri());
        let result = transport.dispatch_to_endpoint(&url, &packed()).await;
        assert!(matches!(result, Err(Error::Dispatch(_))));
    }

    #[tokio::test]
    async fn test_loopback() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let transport = LoopbackTransport::new(tx);
        transport
            .dispatch_to_endpoint("http://localhost/didcomm", &packed())
            .await
            .unwrap();
        assert_eq!(rx.recv().await.unwrap(), packed().data);

        drop(rx);
        let result = transport
            .dispatch_to_endpoint("http://localhost/didcomm", &packed())
            .await;
        assert!(matches!(result, Err(Error::Dispatch(_))));
    }

    #[test]
    fn test_dispatch_config() {
        let config = DispatchConfig::default();
        assert_eq!(config.endpoint, "/didcomm");
        assert_eq!(config.timeout, 30);
    }
}
