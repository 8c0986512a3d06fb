//! Wallets: the per-party store of DIDs, connections and credentials.
//!
//! A [`Wallet`] is owned by a [`WalletService`] and shared with the protocols
//! that act on its behalf. Connections and invitations are shared handles, so
//! a protocol step that advances a connection is visible through the wallet
//! right away.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use didcomm_agent_core::{
    AgentType, Connection, Did, DidMethod, MessageDirection, SharedConnection, SharedInvitation,
};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::credential;

/// A basic message sent or received by a wallet.
#[derive(Debug, Clone, PartialEq)]
pub struct BasicMessageRecord {
    /// Message id
    pub id: String,
    /// Connection the message travelled on
    pub connection_id: String,
    /// Message text
    pub content: String,
    /// Unix time the message was sent
    pub sent_time: i64,
    /// Whether we sent or received it
    pub direction: MessageDirection,
}

#[derive(Default)]
struct WalletState {
    dids: Vec<Did>,
    connections: Vec<SharedConnection>,
    invitations: Vec<SharedInvitation>,
    credentials: Vec<Value>,
    presentations: Vec<Value>,
    messages: Vec<BasicMessageRecord>,
    subscribers: Vec<mpsc::UnboundedSender<BasicMessageRecord>>,
}

/// A party's store.
pub struct Wallet {
    id: String,
    name: String,
    agent_type: AgentType,
    endpoint_url: Option<String>,
    auto_accept: bool,
    state: RwLock<WalletState>,
}

/// Builder for [`Wallet`].
#[derive(Debug, Clone)]
pub struct WalletBuilder {
    name: String,
    agent_type: AgentType,
    endpoint_url: Option<String>,
    auto_accept: bool,
}

impl WalletBuilder {
    /// Sets how the wallet's agent is hosted.
    #[must_use]
    pub fn agent_type(mut self, agent_type: AgentType) -> Self {
        self.agent_type = agent_type;
        self
    }

    /// Sets the endpoint peers reach this wallet at.
    #[must_use]
    pub fn endpoint_url(mut self, url: impl Into<String>) -> Self {
        self.endpoint_url = Some(url.into());
        self
    }

    /// Whether inbound offers and requests are answered without a caller.
    #[must_use]
    pub fn auto_accept(mut self, auto_accept: bool) -> Self {
        self.auto_accept = auto_accept;
        self
    }

    /// Builds the wallet.
    #[must_use]
    pub fn build(self) -> Wallet {
        Wallet {
            id: Uuid::new_v4().to_string(),
            name: self.name,
            agent_type: self.agent_type,
            endpoint_url: self.endpoint_url,
            auto_accept: self.auto_accept,
            state: RwLock::new(WalletState::default()),
        }
    }
}

impl Wallet {
    /// Starts building a wallet called `name`.
    pub fn builder(name: impl Into<String>) -> WalletBuilder {
        WalletBuilder {
            name: name.into(),
            agent_type: AgentType::Native,
            endpoint_url: None,
            auto_accept: true,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, WalletState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, WalletState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wallet id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Wallet name, also used as the default label.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// How the wallet's agent is hosted.
    #[must_use]
    pub fn agent_type(&self) -> AgentType {
        self.agent_type
    }

    /// The endpoint peers reach this wallet at.
    #[must_use]
    pub fn endpoint_url(&self) -> Option<&str> {
        self.endpoint_url.as_deref()
    }

    /// Whether inbound offers and requests are answered automatically.
    #[must_use]
    pub fn auto_accept(&self) -> bool {
        self.auto_accept
    }

    /// Creates and stores a DID.
    pub fn create_did(&self, method: DidMethod) -> Did {
        let did = Did::generate(method);
        debug!(wallet = %self.name, did = %did.uri(), "Created DID");
        self.write().dids.push(did.clone());
        did
    }

    /// The wallet's DIDs.
    #[must_use]
    pub fn dids(&self) -> Vec<Did> {
        self.read().dids.clone()
    }

    /// Whether one of the wallet's DIDs uses `verkey`.
    #[must_use]
    pub fn has_verkey(&self, verkey: &str) -> bool {
        self.read().dids.iter().any(|did| did.verkey == verkey)
    }

    /// Whether the wallet owns the DID with this URI.
    #[must_use]
    pub fn has_did(&self, uri: &str) -> bool {
        self.read().dids.iter().any(|did| did.uri() == uri)
    }

    /// Stores a connection.
    pub fn add_connection(&self, con: SharedConnection) {
        debug!(wallet = %self.name, con = %con.read().short_string(), "Add connection");
        self.write().connections.push(con);
    }

    /// The wallet's connections.
    #[must_use]
    pub fn connections(&self) -> Vec<SharedConnection> {
        self.read().connections.clone()
    }

    /// The latest connection matching `pred`.
    pub fn find_connection(&self, pred: impl Fn(&Connection) -> bool) -> Option<SharedConnection> {
        self.read()
            .connections
            .iter()
            .rev()
            .find(|con| pred(&con.read()))
            .cloned()
    }

    /// Stores an invitation.
    pub fn add_invitation(&self, invitation: SharedInvitation) {
        self.write().invitations.push(invitation);
    }

    /// The wallet's invitations.
    #[must_use]
    pub fn invitations(&self) -> Vec<SharedInvitation> {
        self.read().invitations.clone()
    }

    /// Stores an issued credential.
    pub fn add_credential(&self, vc: Value) {
        info!(wallet = %self.name, types = ?credential::types(&vc), "Add credential");
        self.write().credentials.push(vc);
    }

    /// The wallet's credentials.
    #[must_use]
    pub fn credentials(&self) -> Vec<Value> {
        self.read().credentials.clone()
    }

    /// Credentials that carry `typ` in their type list.
    #[must_use]
    pub fn find_credentials_by_type(&self, typ: &str) -> Vec<Value> {
        self.read()
            .credentials
            .iter()
            .filter(|vc| credential::has_type(vc, typ))
            .cloned()
            .collect()
    }

    /// Stores a verified presentation.
    pub fn add_presentation(&self, vp: Value) {
        self.write().presentations.push(vp);
    }

    /// Presentations this wallet verified.
    #[must_use]
    pub fn presentations(&self) -> Vec<Value> {
        self.read().presentations.clone()
    }

    /// Records a basic message and forwards it to subscribers.
    ///
    /// Subscribers whose receiver is gone are dropped.
    pub fn add_basic_message(&self, record: BasicMessageRecord) {
        let mut state = self.write();
        state
            .subscribers
            .retain(|tx| tx.send(record.clone()).is_ok());
        state.messages.push(record);
    }

    /// Sent and received basic messages in order.
    #[must_use]
    pub fn basic_messages(&self) -> Vec<BasicMessageRecord> {
        self.read().messages.clone()
    }

    /// A channel that receives every basic message recorded from now on.
    pub fn subscribe_basic_messages(&self) -> mpsc::UnboundedReceiver<BasicMessageRecord> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.write().subscribers.push(tx);
        rx
    }
}

impl fmt::Debug for Wallet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Wallet")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("agent_type", &self.agent_type)
            .finish_non_exhaustive()
    }
}

/// The wallets hosted by a node.
#[derive(Debug, Default)]
pub struct WalletService {
    wallets: RwLock<Vec<Arc<Wallet>>>,
}

impl WalletService {
    /// Creates an empty service.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<Arc<Wallet>>> {
        self.wallets.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Hosts a wallet.
    pub fn add_wallet(&self, wallet: Wallet) -> Arc<Wallet> {
        info!(wallet = %wallet.name, id = %wallet.id, "Add wallet");
        let wallet = Arc::new(wallet);
        self.wallets
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::clone(&wallet));
        wallet
    }

    /// All hosted wallets.
    #[must_use]
    pub fn wallets(&self) -> Vec<Arc<Wallet>> {
        self.read().clone()
    }

    fn find(&self, pred: impl Fn(&Wallet) -> bool) -> Option<Arc<Wallet>> {
        self.read().iter().find(|w| pred(w)).cloned()
    }

    /// Finds a wallet by id.
    #[must_use]
    pub fn find_by_id(&self, id: &str) -> Option<Arc<Wallet>> {
        self.find(|w| w.id == id)
    }

    /// Finds a wallet by name.
    #[must_use]
    pub fn find_by_name(&self, name: &str) -> Option<Arc<Wallet>> {
        self.find(|w| w.name == name)
    }

    /// Finds the wallet owning `verkey`.
    #[must_use]
    pub fn find_by_verkey(&self, verkey: &str) -> Option<Arc<Wallet>> {
        self.find(|w| w.has_verkey(verkey))
    }

    /// Finds the wallet owning the DID with this URI.
    #[must_use]
    pub fn find_by_did(&self, uri: &str) -> Option<Arc<Wallet>> {
        self.find(|w| w.has_did(uri))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(content: &str) -> BasicMessageRecord {
        BasicMessageRecord {
            id: Uuid::new_v4().to_string(),
            connection_id: "con-1".to_string(),
            content: content.to_string(),
            sent_time: 0,
            direction: MessageDirection::Inbound,
        }
    }

    #[test]
    fn test_wallet_lookup() {
        let service = WalletService::new();
        let faber = service.add_wallet(Wallet::builder("Faber").build());
        let alice = service.add_wallet(Wallet::builder("Alice").auto_accept(false).build());

        let did = alice.create_did(DidMethod::Sov);
        assert_eq!(service.find_by_verkey(&did.verkey).unwrap().id(), alice.id());
        assert_eq!(service.find_by_did(&did.uri()).unwrap().name(), "Alice");
        assert_eq!(service.find_by_name("Faber").unwrap().id(), faber.id());
        assert!(service.find_by_verkey("unknown").is_none());
        assert!(faber.auto_accept());
        assert!(!alice.auto_accept());
    }

    #[test]
    fn test_credentials_by_type() {
        let wallet = Wallet::builder("Alice").build();
        wallet.add_credential(json!({ "type": ["VerifiableCredential", "UniversityTranscript"] }));
        wallet.add_credential(json!({ "type": ["VerifiableCredential", "DriversLicense"] }));

        assert_eq!(wallet.credentials().len(), 2);
        assert_eq!(wallet.find_credentials_by_type("UniversityTranscript").len(), 1);
        assert!(wallet.find_credentials_by_type("Passport").is_empty());
    }

    #[tokio::test]
    async fn test_basic_message_subscribers() {
        let wallet = Wallet::builder("Alice").build();
        let mut rx = wallet.subscribe_basic_messages();
        let dropped = wallet.subscribe_basic_messages();
        drop(dropped);

        wallet.add_basic_message(record("hello"));
        assert_eq!(rx.recv().await.unwrap().content, "hello");
        assert_eq!(wallet.basic_messages().len(), 1);
        assert_eq!(wallet.read().subscribers.len(), 1);
    }
}
