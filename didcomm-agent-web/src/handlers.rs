//! HTTP endpoint handlers.

use actix_web::{get, post, web, HttpResponse};
use didcomm_agent_core::AgentType;
use didcomm_agent_node::AgentNode;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Response body of an accepted inbound message.
#[derive(Debug, Serialize, Deserialize)]
pub struct Accepted {
    /// The exchange the message was appended to
    pub exchange: String,
    /// The thread of that exchange
    pub thid: String,
}

/// A hosted wallet as reported by `/status`.
#[derive(Debug, Serialize, Deserialize)]
pub struct WalletStatus {
    /// Wallet id
    pub id: String,
    /// Wallet name
    pub name: String,
    /// How the wallet is hosted
    pub agent_type: AgentType,
    /// Number of connections
    pub connections: usize,
    /// Number of stored credentials
    pub credentials: usize,
}

/// Response body for node status.
#[derive(Debug, Serialize, Deserialize)]
pub struct NodeStatus {
    /// The endpoint wallets of this node advertise
    pub endpoint: String,
    /// Hosted wallets
    pub wallets: Vec<WalletStatus>,
    /// Number of registered exchanges
    pub exchanges: usize,
    /// Whether the node is ready to receive messages.
    pub ready: bool,
}

/// Handles an incoming packed `DIDComm` message.
///
/// The message is processed before the response is sent, so protocol
/// failures surface as error responses.
#[post("/didcomm")]
pub async fn receive_message(node: web::Data<AgentNode>, body: String) -> Result<HttpResponse> {
    if body.trim().is_empty() {
        return Err(Error::InvalidFormat("Empty message".into()));
    }
    info!("Received DIDComm message of {} bytes", body.len());
    debug!("Message: {body}");

    let mex = node.receive(&body).await?;
    Ok(HttpResponse::Accepted().json(Accepted {
        exchange: mex.id().to_string(),
        thid: mex.thread_id().to_string(),
    }))
}

/// Returns the node's status.
#[get("/status")]
pub async fn get_status(node: web::Data<AgentNode>) -> HttpResponse {
    let ctx = node.context();
    let wallets = ctx
        .wallets
        .wallets()
        .iter()
        .map(|w| WalletStatus {
            id: w.id().to_string(),
            name: w.name().to_string(),
            agent_type: w.agent_type(),
            connections: w.connections().len(),
            credentials: w.credentials().len(),
        })
        .collect();

    HttpResponse::Ok().json(NodeStatus {
        endpoint: node.config().endpoint_url(),
        wallets,
        exchanges: ctx.registry.len(),
        ready: true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::StatusCode;
    use actix_web::{test, App};
    use didcomm_agent_core::{pack_message, PackingType};
    use didcomm_agent_node::mock::MockPlugin;
    use didcomm_agent_node::NodeConfig;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};

    fn node() -> web::Data<AgentNode> {
        web::Data::new(AgentNode::new(NodeConfig::default(), MockPlugin::new()).unwrap())
    }

    #[actix_rt::test]
    async fn test_status() {
        let node = node();
        node.create_wallet("Faber");
        let app = test::init_service(App::new().app_data(node.clone()).service(get_status)).await;

        let req = test::TestRequest::get().uri("/status").to_request();
        let status: NodeStatus = test::call_and_read_body_json(&app, req).await;
        assert_eq!(status.endpoint, "http://127.0.0.1:9030/didcomm");
        assert_eq!(status.wallets.len(), 1);
        assert_eq!(status.wallets[0].name, "Faber");
        assert_eq!(status.wallets[0].agent_type, AgentType::Native);
        assert_eq!(status.exchanges, 0);
        assert!(status.ready);
    }

    #[actix_rt::test]
    async fn test_receive_empty_body() {
        let app = test::init_service(App::new().app_data(node()).service(receive_message)).await;

        let req = test::TestRequest::post().uri("/didcomm").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_rt::test]
    async fn test_receive_unknown_recipient() {
        let app = test::init_service(App::new().app_data(node()).service(receive_message)).await;

        let packed = pack_message(
            r#"{"@id":"1","@type":"https://didcomm.org/trust_ping/1.0/ping"}"#,
            &MockPlugin::new(),
            PackingType::AuthcryptV2,
            Some("sender-key"),
            &["nobody".to_string()],
        )
        .await
        .unwrap();
        let req = test::TestRequest::post()
            .uri("/didcomm")
            .set_payload(packed.data)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let body: Value = test::read_body_json(resp).await;
        assert!(body["error"].as_str().unwrap().contains("nobody"));
    }

    #[actix_rt::test]
    async fn test_receive_unsolicited() {
        let node = node();
        let faber = node.create_wallet("Faber");
        let verkey = faber.create_did(didcomm_agent_core::DidMethod::Sov).verkey;
        let app = test::init_service(App::new().app_data(node.clone()).service(receive_message)).await;

        let body = json!({
            "@id": "2",
            "@type": "https://didcomm.org/trust_ping/1.0/ping",
        });
        let packed = pack_message(
            &body.to_string(),
            &MockPlugin::new(),
            PackingType::AuthcryptV2,
            Some("stranger-key"),
            &[verkey],
        )
        .await
        .unwrap();
        let req = test::TestRequest::post()
            .uri("/didcomm")
            .set_payload(packed.data)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert!(node.context().registry.is_empty());
    }
}
