//! Conductor server binary.
//!
//! Configuration comes from the environment:
//!
//! - `CONDUCTOR_HOST` / `CONDUCTOR_PORT`: bind address (default
//!   `0.0.0.0:8080`)
//! - `CONDUCTOR_DATA`: registry database path (default
//!   `conductor-registry.redb`)
//! - `CONDUCTOR_STRATEGY`: balancing strategy (`round-robin`,
//!   `random`, `least-recent-failure`)
//! - `CONDUCTOR_TLS_CERT` / `CONDUCTOR_TLS_KEY`: enable TLS when both
//!   are set
//! - `RUST_LOG`: tracing filter (default `info`)

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use conductor_server::network::{NetworkConfig, TlsConfig};
use conductor_server::{OrchestratorApp, OrchestratorConfig, RedbRegistryStore, Strategy};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let host = std::env::var("CONDUCTOR_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port = match std::env::var("CONDUCTOR_PORT") {
        Ok(raw) => raw.parse().context("CONDUCTOR_PORT is not a valid port")?,
        Err(_) => 8080,
    };
    let data_path = std::env::var("CONDUCTOR_DATA")
        .map_or_else(|_| PathBuf::from("conductor-registry.redb"), PathBuf::from);
    let strategy = match std::env::var("CONDUCTOR_STRATEGY") {
        Ok(raw) => raw.parse().map_err(|e| anyhow::anyhow!("{e}"))?,
        Err(_) => Strategy::default(),
    };
    let tls = match (
        std::env::var("CONDUCTOR_TLS_CERT"),
        std::env::var("CONDUCTOR_TLS_KEY"),
    ) {
        (Ok(cert_path), Ok(key_path)) => Some(TlsConfig {
            cert_path: PathBuf::from(cert_path),
            key_path: PathBuf::from(key_path),
        }),
        _ => None,
    };

    info!(%host, port, data = %data_path.display(), "starting conductor");

    let store = Arc::new(
        RedbRegistryStore::open(&data_path)
            .with_context(|| format!("failed to open registry store at {}", data_path.display()))?,
    );
    let app = OrchestratorApp::build_with_strategy(OrchestratorConfig::default(), store, strategy)?;

    let network = NetworkConfig {
        host,
        port,
        tls,
        ..NetworkConfig::default()
    };
    app.run(network, shutdown_signal()).await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }
    info!("shutdown signal received");
}
