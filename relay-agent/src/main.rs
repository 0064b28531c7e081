//! Headless tunnel agent binary: reads configuration from the environment,
//! then runs the connector loop until the process is killed or the relay
//! permanently refuses this agent's credentials (spec §6, §9).

mod config;
mod connector;
mod error;
mod executor;

use tracing_subscriber::EnvFilter;

use config::AgentConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("relay_agent=info")))
        .init();

    let config = AgentConfig::from_env().map_err(|e| anyhow::anyhow!(e))?;
    if !config.enabled {
        tracing::info!("AGENT_ENABLED=0, exiting without connecting");
        return Ok(());
    }

    tracing::info!(relay_url = %config.relay_url, services = config.services.len(), "starting tunnel agent");
    connector::run(config).await
}
