//! Error types for the didcomm-agent-web crate.

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use didcomm_agent_core::Error as CoreError;
use didcomm_agent_node::Error as NodeError;
use serde_json::json;
use thiserror::Error;

/// Error type for the web server.
#[derive(Debug, Error)]
pub enum Error {
    /// The node failed to process a request.
    #[error(transparent)]
    Node(#[from] NodeError),

    /// The request is malformed.
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ResponseError for Error {
    fn status_code(&self) -> StatusCode {
        match self {
            Error::Node(NodeError::Core(CoreError::UnsolicitedMessage(_)))
            | Error::Node(NodeError::WalletNotFound(_)) => StatusCode::NOT_FOUND,
            Error::Node(NodeError::MessageTooLarge { .. }) => StatusCode::PAYLOAD_TOO_LARGE,
            Error::Node(
                NodeError::Core(_)
                | NodeError::Serialization(_)
                | NodeError::UnsupportedProtocol(_)
                | NodeError::UnsupportedAgentType { .. }
                | NodeError::Credential(_),
            )
            | Error::InvalidFormat(_) => StatusCode::BAD_REQUEST,
            Error::Node(_) | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({ "error": self.to_string() }))
    }
}

/// Result type for the web server.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_status_codes() {
        let unsolicited: Error =
            NodeError::from(CoreError::UnsolicitedMessage("ping with thid=1".into())).into();
        assert_eq!(unsolicited.status_code(), StatusCode::NOT_FOUND);

        let unknown_type: Error =
            NodeError::from(CoreError::UnsupportedMessageType("x/1.0/y".into())).into();
        assert_eq!(unknown_type.status_code(), StatusCode::BAD_REQUEST);

        let too_large: Error = NodeError::MessageTooLarge { size: 9, limit: 8 }.into();
        assert_eq!(too_large.status_code(), StatusCode::PAYLOAD_TOO_LARGE);

        let dispatch: Error = NodeError::Dispatch("peer gone".into()).into();
        assert_eq!(dispatch.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
