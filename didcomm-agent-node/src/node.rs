//! The agent node: configuration, hosted wallets and the inbound listener.
//!
//! An [`AgentNode`] owns the [`AgentContext`] every protocol runs in. Inbound
//! envelopes reach it either directly through [`AgentNode::receive`], which
//! is what an HTTP handler calls, or through its inbox channel, which the
//! listener task started by [`AgentNode::start`] drains one envelope at a
//! time. With [`TransportMode::Loopback`] all outbound messages go to that
//! inbox, so wallets of one node can talk to each other without a network.
//!
//! # Examples
//!
//! ```rust,no_run
//! use didcomm_agent_node::mock::MockPlugin;
//! use didcomm_agent_node::node::{AgentNode, NodeConfig, TransportMode};
//! use didcomm_agent_node::protocols::OutOfBandProtocol;
//!
//! async fn example() -> didcomm_agent_node::error::Result<()> {
//!     let config = NodeConfig {
//!         transport: TransportMode::Loopback,
//!         ..Default::default()
//!     };
//!     let node = AgentNode::new(config, MockPlugin::new())?;
//!     let _listener = node.start()?;
//!
//!     let faber = node.create_wallet("Faber");
//!     let invitation = OutOfBandProtocol::create_invitation(node.context(), &faber, None)?;
//!     println!("{}", serde_json::to_string(&*invitation.invitation()?.read())?);
//!     Ok(())
//! }
//! ```

use std::env;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use didcomm_agent_core::{DIDCommPlugin, ExchangeRegistry, MessageExchange, PackingType};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::dispatch::MessageDispatchService;
use crate::error::{Error, Result};
use crate::protocol::AgentContext;
use crate::transport::{DispatchConfig, HttpTransport, LoopbackTransport, Transport};
use crate::wallet::{Wallet, WalletService};

/// How outbound messages leave the node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    /// POST to the counterparty's endpoint
    #[default]
    Http,
    /// Feed the node's own inbox
    Loopback,
}

impl FromStr for TransportMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "http" => Ok(TransportMode::Http),
            "loopback" => Ok(TransportMode::Loopback),
            other => Err(Error::InvalidConfig(format!("Unknown transport: {other}"))),
        }
    }
}

/// Configuration for an agent node.
///
/// # Examples
///
/// ```rust
/// use didcomm_agent_node::node::NodeConfig;
///
/// let config = NodeConfig {
///     port: 9030,
///     host: "localhost".to_string(),
///     ..Default::default()
/// };
/// assert_eq!(config.endpoint_url(), "http://localhost:9030/didcomm");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// The port to listen on for incoming messages
    pub port: u16,

    /// The host address to bind to
    pub host: String,

    /// Whether the public endpoint uses HTTPS
    pub use_https: bool,

    /// Public base URL, if the node is reached through a proxy
    pub public_url: Option<String>,

    /// The maximum size of incoming messages in bytes
    pub max_message_size: usize,

    /// Envelope type of outbound messages
    pub packing: PackingType,

    /// Default timeout of `await_*` operations in seconds
    pub await_timeout: u64,

    /// Outbound delivery
    pub transport: TransportMode,

    /// Configuration for message dispatch
    pub dispatch: DispatchConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            port: 9030,
            host: "127.0.0.1".to_string(),
            use_https: false,
            public_url: None,
            max_message_size: 1024 * 1024,
            packing: PackingType::default(),
            await_timeout: 10,
            transport: TransportMode::default(),
            dispatch: DispatchConfig::default(),
        }
    }
}

fn env_parse<T: FromStr>(key: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(value) => value
            .parse()
            .map(Some)
            .map_err(|e| Error::InvalidConfig(format!("{key}={value}: {e}"))),
        Err(_) => Ok(None),
    }
}

impl NodeConfig {
    /// The URL wallets of this node advertise as their service endpoint.
    #[must_use]
    pub fn endpoint_url(&self) -> String {
        let base = match &self.public_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => {
                let scheme = if self.use_https { "https" } else { "http" };
                format!("{scheme}://{}:{}", self.host, self.port)
            }
        };
        format!("{base}{}", self.dispatch.endpoint)
    }

    /// The default await timeout.
    #[must_use]
    pub fn await_timeout(&self) -> Duration {
        Duration::from_secs(self.await_timeout)
    }

    /// Reads the configuration from `AGENT_*` environment variables.
    ///
    /// Recognized are `AGENT_HOST`, `AGENT_PORT`, `AGENT_USE_HTTPS`,
    /// `AGENT_PUBLIC_URL`, `AGENT_MAX_MESSAGE_SIZE`, `AGENT_PACKING`,
    /// `AGENT_AWAIT_TIMEOUT`, `AGENT_TRANSPORT` and
    /// `AGENT_DISPATCH_TIMEOUT`. Unset variables keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if a variable cannot be parsed.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(host) = env::var("AGENT_HOST") {
            config.host = host;
        }
        if let Some(port) = env_parse("AGENT_PORT")? {
            config.port = port;
        }
        if let Some(use_https) = env_parse("AGENT_USE_HTTPS")? {
            config.use_https = use_https;
        }
        if let Ok(url) = env::var("AGENT_PUBLIC_URL") {
            config.public_url = Some(url);
        }
        if let Some(size) = env_parse("AGENT_MAX_MESSAGE_SIZE")? {
            config.max_message_size = size;
        }
        if let Ok(packing) = env::var("AGENT_PACKING") {
            config.packing = serde_json::from_value(serde_json::Value::String(
                packing.to_ascii_lowercase(),
            ))
            .map_err(|e| Error::InvalidConfig(format!("AGENT_PACKING={packing}: {e}")))?;
        }
        if let Some(timeout) = env_parse("AGENT_AWAIT_TIMEOUT")? {
            config.await_timeout = timeout;
        }
        if let Some(transport) = env_parse("AGENT_TRANSPORT")? {
            config.transport = transport;
        }
        if let Some(timeout) = env_parse("AGENT_DISPATCH_TIMEOUT")? {
            config.dispatch.timeout = timeout;
        }
        Ok(config)
    }
}

/// A node hosting wallets that speak `DIDComm` protocols.
pub struct AgentNode {
    config: NodeConfig,
    ctx: Arc<AgentContext>,
    inbox_tx: mpsc::UnboundedSender<String>,
    inbox_rx: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
}

impl AgentNode {
    /// Creates a node whose transport follows `config.transport`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: NodeConfig, plugin: impl DIDCommPlugin + 'static) -> Result<Self> {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let transport: Arc<dyn Transport> = match config.transport {
            TransportMode::Http => Arc::new(HttpTransport::new(&config.dispatch)?),
            TransportMode::Loopback => Arc::new(LoopbackTransport::new(inbox_tx.clone())),
        };
        Ok(Self::assemble(config, Arc::new(plugin), transport, inbox_tx, inbox_rx))
    }

    /// Creates a node with an explicit transport.
    #[must_use]
    pub fn with_transport(
        config: NodeConfig,
        plugin: impl DIDCommPlugin + 'static,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        Self::assemble(config, Arc::new(plugin), transport, inbox_tx, inbox_rx)
    }

    fn assemble(
        config: NodeConfig,
        plugin: Arc<dyn DIDCommPlugin>,
        transport: Arc<dyn Transport>,
        inbox_tx: mpsc::UnboundedSender<String>,
        inbox_rx: mpsc::UnboundedReceiver<String>,
    ) -> Self {
        let ctx = Arc::new(AgentContext {
            registry: Arc::new(ExchangeRegistry::new()),
            wallets: Arc::new(WalletService::new()),
            plugin,
            transport,
            packing: config.packing,
            await_timeout: config.await_timeout(),
        });
        Self {
            config,
            ctx,
            inbox_tx,
            inbox_rx: Mutex::new(Some(inbox_rx)),
        }
    }

    /// The context protocols of this node run in.
    #[must_use]
    pub fn context(&self) -> &Arc<AgentContext> {
        &self.ctx
    }

    /// Returns a reference to the node's configuration.
    #[must_use]
    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// Creates and hosts a native wallet reachable at this node's endpoint.
    pub fn create_wallet(&self, name: &str) -> Arc<Wallet> {
        self.add_wallet(
            Wallet::builder(name)
                .endpoint_url(self.config.endpoint_url())
                .build(),
        )
    }

    /// Hosts `wallet`.
    pub fn add_wallet(&self, wallet: Wallet) -> Arc<Wallet> {
        info!(wallet = %wallet.name(), "Add wallet");
        self.ctx.wallets.add_wallet(wallet)
    }

    /// Starts the listener that drains the inbox.
    ///
    /// Must be called from within a tokio runtime. Failures of single
    /// messages are logged and do not stop the listener.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the node was already started.
    pub fn start(&self) -> Result<JoinHandle<()>> {
        let mut inbox = self
            .inbox_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| Error::InvalidConfig("Node already started".into()))?;
        info!(
            "Starting agent node on {}:{} ({:?} transport)",
            self.config.host, self.config.port, self.config.transport
        );

        let dispatcher = MessageDispatchService::new(Arc::clone(&self.ctx));
        Ok(tokio::spawn(async move {
            while let Some(packed) = inbox.recv().await {
                if let Err(err) = dispatcher.dispatch_inbound(&packed).await {
                    error!("Failed to process inbound message: {err}");
                }
            }
            info!("Inbox closed");
        }))
    }

    /// Queues a packed message for the listener.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MessageTooLarge`] if the message is too large, or
    /// [`Error::Dispatch`] if the listener is gone.
    pub fn submit(&self, packed: String) -> Result<()> {
        self.check_size(&packed)?;
        self.inbox_tx
            .send(packed)
            .map_err(|_| Error::Dispatch("Listener is gone".into()))
    }

    /// Processes one packed inbound message right away.
    ///
    /// # Returns
    ///
    /// The exchange the message was appended to
    ///
    /// # Errors
    ///
    /// Returns [`Error::MessageTooLarge`] if the message is too large, or
    /// the error of [`MessageDispatchService::dispatch_inbound`].
    pub async fn receive(&self, packed: &str) -> Result<Arc<MessageExchange>> {
        self.check_size(packed)?;
        MessageDispatchService::new(Arc::clone(&self.ctx))
            .dispatch_inbound(packed)
            .await
    }

    fn check_size(&self, packed: &str) -> Result<()> {
        if packed.len() > self.config.max_message_size {
            return Err(Error::MessageTooLarge {
                size: packed.len(),
                limit: self.config.max_message_size,
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for AgentNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentNode")
            .field("config", &self.config)
            .field("ctx", &self.ctx)
            .finish_non_exhaustive()
    }
}
