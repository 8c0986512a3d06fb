//! The HTTP server that exposes an agent node.

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use didcomm_agent_node::AgentNode;
use serde::{Deserialize, Serialize};
use tracing::info;
use tracing_actix_web::TracingLogger;

use crate::{
    error::{Error, Result},
    handlers::{get_status, receive_message},
};

/// Configuration for the agent server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// The host to bind to.
    pub host: String,
    /// The port to bind to.
    pub port: u16,
    /// CORS configuration.
    pub cors: CorsConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 9030,
            cors: CorsConfig::default(),
        }
    }
}

/// CORS configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    /// Allowed origins, `*` allows any.
    pub allowed_origins: Vec<String>,
    /// Whether to allow credentials.
    pub allow_credentials: bool,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["*".into()],
            allow_credentials: false,
        }
    }
}

impl CorsConfig {
    fn allows(&self, origin: &str) -> bool {
        self.allowed_origins
            .iter()
            .any(|allowed| allowed == "*" || allowed == origin)
    }

    fn middleware(&self) -> Cors {
        let config = self.clone();
        let cors = Cors::default()
            .allowed_origin_fn(move |origin, _| config.allows(origin.to_str().unwrap_or("")))
            .allowed_methods(vec!["GET", "POST"])
            .allowed_headers(vec![actix_web::http::header::CONTENT_TYPE]);
        if self.allow_credentials {
            cors.supports_credentials()
        } else {
            cors
        }
    }
}

/// Serves `POST /didcomm` and `GET /status` for an agent node.
pub struct AgentServer {
    config: ServerConfig,
    node: web::Data<AgentNode>,
}

impl AgentServer {
    /// Creates a server for `node`.
    #[must_use]
    pub fn new(config: ServerConfig, node: AgentNode) -> Self {
        Self {
            config,
            node: web::Data::new(node),
        }
    }

    /// The served node.
    #[must_use]
    pub fn node(&self) -> &AgentNode {
        &self.node
    }

    /// Starts the node's listener and serves until shutdown.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot start, the address cannot be
    /// bound, or the server fails.
    pub async fn run(self) -> Result<()> {
        info!(
            "Starting agent server on {}:{}",
            self.config.host, self.config.port
        );
        let _listener = self.node.start()?;

        let node = self.node.clone();
        let cors = self.config.cors.clone();
        let max_size = node.config().max_message_size;
        HttpServer::new(move || {
            App::new()
                .app_data(node.clone())
                .app_data(web::PayloadConfig::new(max_size))
                .wrap(TracingLogger::default())
                .wrap(cors.middleware())
                .service(receive_message)
                .service(get_status)
        })
        .bind((self.config.host.as_str(), self.config.port))
        .map_err(|e| Error::Internal(format!("Failed to bind server: {e}")))?
        .run()
        .await
        .map_err(|e| Error::Internal(format!("Server error: {e}")))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use didcomm_agent_node::mock::MockPlugin;
    use didcomm_agent_node::NodeConfig;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_cors_origins() {
        let cors = CorsConfig {
            allowed_origins: vec!["https://faber.example.org".into()],
            allow_credentials: true,
        };
        assert!(cors.allows("https://faber.example.org"));
        assert!(!cors.allows("https://mallory.example.org"));
        assert!(CorsConfig::default().allows("https://anyone.example.org"));
    }

    #[actix_rt::test]
    async fn test_server_config() {
        let server = AgentServer::new(
            ServerConfig {
                port: 8030,
                ..Default::default()
            },
            AgentNode::new(NodeConfig::default(), MockPlugin::new()).unwrap(),
        );

        assert_eq!(server.config.host, "127.0.0.1");
        assert_eq!(server.config.port, 8030);
        assert_eq!(server.config.cors.allowed_origins, vec!["*"]);
        assert_eq!(server.node().config().dispatch.endpoint, "/didcomm");
    }
}
