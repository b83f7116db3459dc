//! The umbrad node binary: configuration, logging, and component wiring.

mod config;
mod interfaces;
mod node;

use std::path::PathBuf;

use color_eyre::eyre::Report;
use tracing::info;

use config::UmbradConfig;

#[tokio::main]
async fn main() -> Result<(), Report> {
    color_eyre::install()?;

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = UmbradConfig::load(config_path.as_deref())?;

    let filter = config
        .tracing_filter
        .clone()
        .unwrap_or_else(|| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_new(filter)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!(network = ?config.network.network, "starting umbrad");
    let node = node::Node::start(config).await?;

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    node.shutdown().await;
    Ok(())
}
