//! Out-of-band invitations.

use serde::{Deserialize, Serialize};

use crate::attachment::Shared;
use crate::error::{Error, Result};
use crate::types::random_id;

/// Message type of an out-of-band 1.1 invitation.
pub const INVITATION_TYPE: &str = "https://didcomm.org/out-of-band/1.1/invitation";

/// Service type of an inline invitation service.
pub const DIDCOMM_SERVICE_TYPE: &str = "did-communication";

/// Lifecycle state of an invitation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvitationState {
    /// Created, not yet answered
    #[default]
    Initial,
    /// Received by the invitee
    Received,
    /// A connection was established from it. An invitation is single-use:
    /// further requests on its key are rejected.
    Done,
}

/// An inline service block of an invitation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvitationService {
    /// Service id
    pub id: String,
    /// Service type
    #[serde(rename = "type")]
    pub typ: String,
    /// Keys a reply must be encrypted for
    #[serde(rename = "recipientKeys")]
    pub recipient_keys: Vec<String>,
    /// Where a reply is delivered
    #[serde(rename = "serviceEndpoint")]
    pub service_endpoint: String,
}

/// An invitation shared between a wallet and its exchanges.
pub type SharedInvitation = Shared<Invitation>;

/// An out-of-band invitation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invitation {
    /// Invitation id, the parent thread of every reply
    #[serde(rename = "@id")]
    pub id: String,
    /// Message type
    #[serde(rename = "@type")]
    pub typ: String,
    /// Inviter label
    #[serde(default)]
    pub label: String,
    /// Accepted media type profiles
    #[serde(default)]
    pub accept: Vec<String>,
    /// Handshake protocols the invitee may answer with
    #[serde(default)]
    pub handshake_protocols: Vec<String>,
    /// Inline services
    pub services: Vec<InvitationService>,
    #[serde(skip)]
    state: InvitationState,
}

impl Invitation {
    /// Creates an invitation with one inline service.
    pub fn new(
        label: impl Into<String>,
        handshake_protocols: Vec<String>,
        invitation_key: impl Into<String>,
        service_endpoint: impl Into<String>,
    ) -> Self {
        Self {
            id: random_id(),
            typ: INVITATION_TYPE.to_string(),
            label: label.into(),
            accept: vec!["didcomm/v2".to_string()],
            handshake_protocols,
            services: vec![InvitationService {
                id: "#inline".to_string(),
                typ: DIDCOMM_SERVICE_TYPE.to_string(),
                recipient_keys: vec![invitation_key.into()],
                service_endpoint: service_endpoint.into(),
            }],
            state: InvitationState::Initial,
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> InvitationState {
        self.state
    }

    /// Moves the invitation forward.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProtocolViolation`] when moving backwards.
    pub fn advance(&mut self, next: InvitationState) -> Result<()> {
        use InvitationState::{Done, Initial, Received};
        match (self.state, next) {
            (Initial, Received | Done) | (Received, Done) => {
                self.state = next;
                Ok(())
            }
            (from, to) => Err(Error::violation(format!(
                "Invitation {} cannot move from {from:?} to {to:?}",
                self.id
            ))),
        }
    }

    /// The first recipient key of the first service.
    ///
    /// # Errors
    ///
    /// Fails if the invitation carries no service key.
    pub fn invitation_key(&self) -> Result<&str> {
        self.services
            .first()
            .and_then(|s| s.recipient_keys.first())
            .map(String::as_str)
            .ok_or(Error::MissingField("recipientKeys"))
    }

    /// The endpoint of the first service.
    ///
    /// # Errors
    ///
    /// Fails if the invitation carries no service.
    pub fn service_endpoint(&self) -> Result<&str> {
        self.services
            .first()
            .map(|s| s.service_endpoint.as_str())
            .ok_or(Error::MissingField("services"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_shape() {
        let invitation = Invitation::new(
            "Faber",
            vec!["https://didcomm.org/didexchange/1.0".to_string()],
            "inv-key",
            "http://localhost:9030",
        );
        let value = serde_json::to_value(&invitation).unwrap();
        assert_eq!(value["@type"], json!(INVITATION_TYPE));
        assert_eq!(value["services"][0]["recipientKeys"], json!(["inv-key"]));
        assert!(value.get("state").is_none());

        let parsed: Invitation = serde_json::from_value(value).unwrap();
        assert_eq!(parsed.invitation_key().unwrap(), "inv-key");
        assert_eq!(parsed.service_endpoint().unwrap(), "http://localhost:9030");
        assert_eq!(parsed.state(), InvitationState::Initial);
    }

    #[test]
    fn test_state_moves_forward_only() {
        let mut invitation = Invitation::new("Faber", vec![], "k", "http://localhost");
        invitation.advance(InvitationState::Received).unwrap();
        invitation.advance(InvitationState::Done).unwrap();
        assert!(invitation.advance(InvitationState::Received).is_err());
    }

    #[test]
    fn test_missing_service() {
        let mut invitation = Invitation::new("Faber", vec![], "k", "http://localhost");
        invitation.services.clear();
        assert!(matches!(
            invitation.invitation_key(),
            Err(Error::MissingField("recipientKeys"))
        ));
    }
}
