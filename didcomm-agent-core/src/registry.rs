//! Lookup of message exchanges.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard};

use tracing::{debug, warn};

use crate::connection::ConnectionState;
use crate::exchange::{MessageExchange, CONNECTION, INVITATION, WALLET};

/// Process-wide index of message exchanges.
///
/// Exchanges are kept in creation order. Lookups that can match more than one
/// exchange return the most recently registered one.
#[derive(Debug, Default)]
pub struct ExchangeRegistry {
    exchanges: RwLock<Vec<Arc<MessageExchange>>>,
}

impl ExchangeRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<Arc<MessageExchange>>> {
        self.exchanges.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Creates and registers an exchange owned by `wallet_id`.
    ///
    /// A child inherits the parent's connection and invitation.
    pub fn create_exchange(
        &self,
        thread_id: impl Into<String>,
        wallet_id: &str,
        parent: Option<&Arc<MessageExchange>>,
    ) -> Arc<MessageExchange> {
        let mex = MessageExchange::new(thread_id, parent.cloned());
        mex.put_attachment(WALLET, wallet_id.to_string());
        if let Some(con) = parent.and_then(|p| p.connection().ok()) {
            mex.put_attachment(CONNECTION, con);
        }
        if let Some(invi) = parent.and_then(|p| p.invitation()) {
            mex.put_attachment(INVITATION, invi);
        }
        let mex = Arc::new(mex);
        self.register(Arc::clone(&mex));
        mex
    }

    /// Registers an exchange.
    pub fn register(&self, mex: Arc<MessageExchange>) {
        debug!(mex = %mex.id(), thid = %mex.thread_id(), "Register exchange");
        self.exchanges
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(mex);
    }

    /// Number of registered exchanges.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether no exchange is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn find_last(&self, pred: impl Fn(&MessageExchange) -> bool) -> Option<Arc<MessageExchange>> {
        self.read().iter().rev().find(|mex| pred(mex)).cloned()
    }

    /// Finds an exchange by its id.
    #[must_use]
    pub fn find_by_id(&self, id: &str) -> Option<Arc<MessageExchange>> {
        self.find_last(|mex| mex.id() == id)
    }

    /// Finds the exchange of `wallet_id` for thread `thid`.
    #[must_use]
    pub fn find_by_thread_id(&self, wallet_id: &str, thid: &str) -> Option<Arc<MessageExchange>> {
        self.find_last(|mex| {
            mex.thread_id() == thid && mex.wallet_id().is_ok_and(|id| id == wallet_id)
        })
    }

    /// Finds the latest exchange whose connection uses `verkey` as my key.
    #[must_use]
    pub fn find_by_verkey(&self, verkey: &str) -> Option<Arc<MessageExchange>> {
        let found = self.find_last(|mex| {
            mex.connection()
                .is_ok_and(|con| con.read().my_did.verkey == verkey)
        });
        if found.is_none() {
            warn!(verkey, "No exchange for verkey");
        }
        found
    }

    /// Finds the latest exchange on connection `con_id`.
    #[must_use]
    pub fn find_by_connection_id(&self, con_id: &str) -> Option<Arc<MessageExchange>> {
        self.find_last(|mex| mex.connection().is_ok_and(|con| con.read().id == con_id))
    }

    /// Exchanges of `wallet_id` that run on an active connection.
    #[must_use]
    pub fn find_by_wallet(&self, wallet_id: &str) -> Vec<Arc<MessageExchange>> {
        self.read()
            .iter()
            .filter(|mex| {
                mex.wallet_id().is_ok_and(|id| id == wallet_id)
                    && mex
                        .connection()
                        .is_ok_and(|con| con.read().state() == ConnectionState::Active)
            })
            .cloned()
            .collect()
    }

    /// Exchanges whose connection or invitation uses `invitation_key`.
    ///
    /// An exchange may carry an invitation before it has a connection.
    #[must_use]
    pub fn find_by_invitation_key(&self, invitation_key: &str) -> Vec<Arc<MessageExchange>> {
        self.read()
            .iter()
            .filter(|mex| {
                let by_con = mex
                    .connection()
                    .is_ok_and(|con| con.read().invitation_key == invitation_key);
                let by_invi = mex.invitation().is_some_and(|invi| {
                    invi.read().invitation_key().is_ok_and(|key| key == invitation_key)
                });
                by_con || by_invi
            })
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attachment::Shared;
    use crate::connection::{AgentType, Connection, ConnectionParams, ConnectionRole, SharedConnection};
    use crate::did::{Did, DidMethod};
    use crate::invitation::Invitation;

    fn connection(invitation_key: &str) -> SharedConnection {
        Connection::new(ConnectionParams {
            invitation_key: invitation_key.to_string(),
            agent: AgentType::Native,
            my_did: Did::generate(DidMethod::Key),
            my_role: ConnectionRole::Invitee,
            my_label: "Alice".to_string(),
            my_endpoint: None,
            their_did: None,
            their_role: ConnectionRole::Inviter,
            their_label: None,
            their_endpoint: None,
        })
        .shared()
    }

    #[test]
    fn test_find_by_thread_id_is_wallet_scoped() {
        let registry = ExchangeRegistry::new();
        let alice = registry.create_exchange("t-1", "alice", None);
        let faber = registry.create_exchange("t-1", "faber", None);

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.find_by_thread_id("alice", "t-1").unwrap().id(), alice.id());
        assert_eq!(registry.find_by_thread_id("faber", "t-1").unwrap().id(), faber.id());
        assert!(registry.find_by_thread_id("alice", "t-2").is_none());
        assert_eq!(registry.find_by_id(faber.id()).unwrap().thread_id(), "t-1");
    }

    #[test]
    fn test_child_inherits_connection() {
        let registry = ExchangeRegistry::new();
        let parent = registry.create_exchange("t-1", "alice", None);
        let con = connection("inv");
        parent.set_connection(con.clone()).unwrap();

        let invi = Shared::new(Invitation::new("Faber", vec![], "inv", "http://localhost"));
        parent.put_attachment(INVITATION, invi.clone());

        let child = registry.create_exchange("t-2", "alice", Some(&parent));
        assert!(child.connection().unwrap().ptr_eq(&con));
        assert!(child.invitation().unwrap().ptr_eq(&invi));
        assert_eq!(child.parent().unwrap().id(), parent.id());

        let verkey = con.read().my_did.verkey.clone();
        assert_eq!(registry.find_by_verkey(&verkey).unwrap().id(), child.id());
        let con_id = con.read().id.clone();
        assert_eq!(registry.find_by_connection_id(&con_id).unwrap().id(), child.id());
        assert!(registry.find_by_verkey("unknown").is_none());
    }

    #[test]
    fn test_find_by_wallet_requires_active() {
        let registry = ExchangeRegistry::new();
        let mex = registry.create_exchange("t-1", "alice", None);
        let con = connection("inv");
        mex.set_connection(con.clone()).unwrap();
        assert!(registry.find_by_wallet("alice").is_empty());

        {
            let mut con = con.write();
            for next in [
                ConnectionState::Request,
                ConnectionState::Response,
                ConnectionState::Active,
            ] {
                con.advance(next).unwrap();
            }
        }
        assert_eq!(registry.find_by_wallet("alice").len(), 1);
        assert!(registry.find_by_wallet("faber").is_empty());
    }

    #[test]
    fn test_find_by_invitation_key() {
        let registry = ExchangeRegistry::new();
        let with_invitation = registry.create_exchange("t-1", "faber", None);
        with_invitation.put_attachment(
            INVITATION,
            Shared::new(Invitation::new("Faber", vec![], "inv-1", "http://localhost")),
        );
        let with_connection = registry.create_exchange("t-2", "alice", None);
        with_connection.set_connection(connection("inv-1")).unwrap();
        registry.create_exchange("t-3", "alice", None);

        assert_eq!(registry.find_by_invitation_key("inv-1").len(), 2);
        assert!(registry.find_by_invitation_key("inv-2").is_empty());
    }
}
