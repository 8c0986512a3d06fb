//! Pairwise connections and their lifecycle.
//!
//! A [`Connection`] is created when an invitation is made or received and is
//! then advanced by the DID exchange and trust ping protocols:
//!
//! ```text
//! INVITATION -> REQUEST -> RESPONSE -> COMPLETED -> ACTIVE
//!                              \__________________/^
//! ```
//!
//! `ABANDONED` is only entered through [`Connection::abandon`].

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::attachment::Shared;
use crate::did::Did;
use crate::error::{Error, Result};
use crate::types::random_id;

/// Lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    /// An invitation was created or received
    Invitation,
    /// A DID exchange request was sent or received
    Request,
    /// A DID exchange response was sent or received
    Response,
    /// The DID exchange completed
    Completed,
    /// Trust ping confirmed the connection
    Active,
    /// The connection was given up
    Abandoned,
}

impl ConnectionState {
    /// Whether `next` is a legal successor of this state.
    #[must_use]
    pub fn can_advance_to(self, next: ConnectionState) -> bool {
        use ConnectionState::{Active, Completed, Invitation, Request, Response};
        matches!(
            (self, next),
            (Invitation, Request)
                | (Request, Response)
                | (Response, Completed)
                | (Response | Completed | Active, Active)
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Invitation => "INVITATION",
            ConnectionState::Request => "REQUEST",
            ConnectionState::Response => "RESPONSE",
            ConnectionState::Completed => "COMPLETED",
            ConnectionState::Active => "ACTIVE",
            ConnectionState::Abandoned => "ABANDONED",
        };
        f.write_str(s)
    }
}

/// The part a party plays in a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionRole {
    /// Created the invitation
    Inviter,
    /// Received the invitation
    Invitee,
    /// Sent the DID exchange request
    Requester,
    /// Answered the DID exchange request
    Responder,
}

/// How an agent is hosted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentType {
    /// Runs in this process
    #[default]
    Native,
    /// Reached over the network only
    External,
}

/// A negotiated relationship between two parties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    /// Connection id
    pub id: String,
    /// The key the invitation was published under
    pub invitation_key: String,
    /// How the owning agent is hosted
    pub agent: AgentType,
    /// My DID in this relationship
    pub my_did: Did,
    /// My role
    pub my_role: ConnectionRole,
    /// My label
    pub my_label: String,
    /// My service endpoint
    pub my_endpoint: Option<String>,
    /// Their DID in this relationship, unknown until the DID exchange
    pub their_did: Option<Did>,
    /// Their role
    pub their_role: ConnectionRole,
    /// Their label
    pub their_label: Option<String>,
    /// Their service endpoint
    pub their_endpoint: Option<String>,
    state: ConnectionState,
}

/// A connection shared between the owning wallet and its exchanges.
pub type SharedConnection = Shared<Connection>;

/// Fields required to create a [`Connection`].
#[derive(Debug, Clone)]
pub struct ConnectionParams {
    /// The key the invitation was published under
    pub invitation_key: String,
    /// How the owning agent is hosted
    pub agent: AgentType,
    /// My DID
    pub my_did: Did,
    /// My role
    pub my_role: ConnectionRole,
    /// My label
    pub my_label: String,
    /// My service endpoint
    pub my_endpoint: Option<String>,
    /// Their DID, if already known
    pub their_did: Option<Did>,
    /// Their role
    pub their_role: ConnectionRole,
    /// Their label
    pub their_label: Option<String>,
    /// Their service endpoint
    pub their_endpoint: Option<String>,
}

impl Connection {
    /// Creates a connection in the `INVITATION` state.
    #[must_use]
    pub fn new(params: ConnectionParams) -> Self {
        Self {
            id: random_id(),
            invitation_key: params.invitation_key,
            agent: params.agent,
            my_did: params.my_did,
            my_role: params.my_role,
            my_label: params.my_label,
            my_endpoint: params.my_endpoint,
            their_did: params.their_did,
            their_role: params.their_role,
            their_label: params.their_label,
            their_endpoint: params.their_endpoint,
            state: ConnectionState::Invitation,
        }
    }

    /// Wraps the connection for sharing.
    #[must_use]
    pub fn shared(self) -> SharedConnection {
        Shared::new(self)
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Moves the connection to `next`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidStateTransition`] if `next` is not a legal
    /// successor of the current state.
    pub fn advance(&mut self, next: ConnectionState) -> Result<()> {
        if !self.state.can_advance_to(next) {
            return Err(Error::InvalidStateTransition {
                from: self.state,
                to: next,
            });
        }
        debug!(con = %self.short_string(), to = %next, "Connection state transition");
        self.state = next;
        Ok(())
    }

    /// Marks the connection as abandoned.
    pub fn abandon(&mut self) {
        debug!(con = %self.short_string(), "Connection abandoned");
        self.state = ConnectionState::Abandoned;
    }

    /// Whether the connection is active.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == ConnectionState::Active
    }

    /// Ensures the connection is active.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionNotActive`] otherwise.
    pub fn check_active(&self) -> Result<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(Error::ConnectionNotActive {
                id: self.id.clone(),
                state: self.state,
            })
        }
    }

    /// Replaces my DID, keeping the state.
    pub fn rotate_my_did(&mut self, did: Did) {
        debug!(con = %self.short_string(), new = %did.uri(), "Rotate my DID");
        self.my_did = did;
    }

    /// Replaces their DID, keeping the state.
    pub fn rotate_their_did(&mut self, did: Did) {
        debug!(con = %self.short_string(), new = %did.uri(), "Rotate their DID");
        self.their_did = Some(did);
    }

    /// My verification key.
    #[must_use]
    pub fn my_verkey(&self) -> &str {
        &self.my_did.verkey
    }

    /// Their verification key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingContext`] before their DID is known.
    pub fn their_verkey(&self) -> Result<&str> {
        self.their_did
            .as_ref()
            .map(|did| did.verkey.as_str())
            .ok_or(Error::MissingContext("their DID"))
    }

    /// Compact description for logs.
    #[must_use]
    pub fn short_string(&self) -> String {
        format!(
            "{}[id={}, myDid={}, theirDid={}, state={}]",
            self.my_label,
            self.id,
            self.my_did.uri(),
            self.their_did.as_ref().map_or_else(|| "none".to_string(), Did::uri),
            self.state
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::did::DidMethod;

    fn connection() -> Connection {
        let invitation_did = Did::generate(DidMethod::Key);
        Connection::new(ConnectionParams {
            invitation_key: invitation_did.verkey.clone(),
            agent: AgentType::Native,
            my_did: Did::generate(DidMethod::Key),
            my_role: ConnectionRole::Invitee,
            my_label: "Alice".to_string(),
            my_endpoint: None,
            their_did: Some(invitation_did),
            their_role: ConnectionRole::Inviter,
            their_label: Some("Faber".to_string()),
            their_endpoint: Some("http://localhost:9000".to_string()),
        })
    }

    #[test]
    fn test_full_lifecycle() {
        let mut con = connection();
        assert_eq!(con.state(), ConnectionState::Invitation);
        for next in [
            ConnectionState::Request,
            ConnectionState::Response,
            ConnectionState::Completed,
            ConnectionState::Active,
            ConnectionState::Active,
        ] {
            con.advance(next).unwrap();
        }
        assert!(con.check_active().is_ok());
    }

    #[test]
    fn test_trust_ping_from_response() {
        let mut con = connection();
        con.advance(ConnectionState::Request).unwrap();
        con.advance(ConnectionState::Response).unwrap();
        con.advance(ConnectionState::Active).unwrap();
        assert!(con.is_active());
    }

    #[test]
    fn test_illegal_transitions() {
        let mut con = connection();
        let err = con.advance(ConnectionState::Active).unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidStateTransition {
                from: ConnectionState::Invitation,
                to: ConnectionState::Active
            }
        ));
        assert!(con.advance(ConnectionState::Abandoned).is_err());
        assert_eq!(con.state(), ConnectionState::Invitation);
    }

    #[test]
    fn test_check_active_before_activation() {
        let con = connection();
        let err = con.check_active().unwrap_err();
        assert!(matches!(
            err,
            Error::ConnectionNotActive {
                state: ConnectionState::Invitation,
                ..
            }
        ));
    }

    #[test]
    fn test_rotation_keeps_state() {
        let mut con = connection();
        con.advance(ConnectionState::Request).unwrap();
        let did = Did::generate(DidMethod::Sov);
        con.rotate_my_did(did.clone());
        assert_eq!(con.my_did, did);
        assert_eq!(con.my_verkey(), did.verkey);

        let theirs = Did::generate(DidMethod::Sov);
        con.rotate_their_did(theirs.clone());
        assert_eq!(con.their_verkey().unwrap(), theirs.verkey);
        assert_eq!(con.state(), ConnectionState::Request);
    }

    #[test]
    fn test_shared_handles() {
        let shared = connection().shared();
        let other = shared.clone();
        other.write().advance(ConnectionState::Request).unwrap();
        assert_eq!(shared.read().state(), ConnectionState::Request);
        assert!(shared.ptr_eq(&other));
        assert!(!shared.ptr_eq(&connection().shared()));
    }

    #[test]
    fn test_abandon_is_explicit() {
        let mut con = connection();
        con.abandon();
        assert_eq!(con.state(), ConnectionState::Abandoned);
        assert!(con.advance(ConnectionState::Request).is_err());
    }
}
