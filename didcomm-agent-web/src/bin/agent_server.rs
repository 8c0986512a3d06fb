//! Runs an agent node over HTTP.
//!
//! The node is configured from `AGENT_*` variables. `AGENT_WALLETS` is a
//! comma separated list of wallet names to host, and `RUST_LOG` sets the log
//! filter.

use anyhow::Context;
use didcomm_agent_node::mock::MockPlugin;
use didcomm_agent_node::protocols::OutOfBandProtocol;
use didcomm_agent_node::{AgentNode, NodeConfig};
use didcomm_agent_web::{AgentServer, CorsConfig, ServerConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[actix_rt::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let node_config = NodeConfig::from_env().context("Invalid node configuration")?;
    let server_config = ServerConfig {
        host: node_config.host.clone(),
        port: node_config.port,
        cors: CorsConfig::default(),
    };
    let node = AgentNode::new(node_config, MockPlugin::new()).context("Cannot create node")?;

    let names = std::env::var("AGENT_WALLETS").unwrap_or_default();
    for name in names.split(',').map(str::trim).filter(|n| !n.is_empty()) {
        let wallet = node.create_wallet(name);
        let inviter = OutOfBandProtocol::create_invitation(node.context(), &wallet, None)
            .with_context(|| format!("Cannot create invitation for {name}"))?;
        let invitation = serde_json::to_string(&*inviter.invitation()?.read())?;
        info!(wallet = %name, "Invitation: {invitation}");
    }

    AgentServer::new(server_config, node).run().await?;
    Ok(())
}
