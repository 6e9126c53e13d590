mod config;
mod api;
mod directory;
mod directory_manager;
mod mdns;
mod scrape;
mod static_hosts;

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use anyhow::{Context, Result};
use crate::config::Config;
use crate::directory_manager::Discovery;
use crate::mdns::scanner::MdnsScanner;
use crate::scrape::ShellyClient;

#[tokio::main]
async fn main() -> Result<()> {
    // Load config
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/etc/shelly-discovery/discoveryd.toml".to_string());

    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path))?;

    init_tracing(config.log.json);
    tracing::info!("Starting shelly-discoveryd v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Loaded config from {}", config_path);

    // Create cancellation token for graceful shutdown
    let cancel = CancellationToken::new();

    // Start the directory and its refresh loop
    let scanner = MdnsScanner::new(
        config.discovery.service_types.clone(),
        config.discovery.ipv6,
    );
    let discovery = Discovery::enable(&config, scanner, cancel.clone())
        .context("Failed to enable discovery")?;

    // Build API router
    let app_state = api::routes::AppState {
        directory: discovery.directory.clone(),
        fingerprint_rx: discovery.fingerprint_rx.clone(),
        client: ShellyClient::new(&config.probe)?,
        probe: Arc::new(config.probe.clone()),
    };
    let app = api::routes::router(app_state);

    // Bind HTTP server
    let listener = tokio::net::TcpListener::bind(&config.api.listen)
        .await
        .with_context(|| format!("Failed to bind to {}", config.api.listen))?;

    tracing::info!("API listening on {}", config.api.listen);

    // Run server with graceful shutdown
    let server_cancel = cancel.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async move { server_cancel.cancelled().await })
            .await
        {
            tracing::error!("Server error: {}", e);
        }
    });

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutdown signal received");

    // Trigger cancellation
    cancel.cancel();

    // Wait for all tasks to complete
    let _ = tokio::join!(discovery.refresh_task, server_handle);

    // Shutdown directory thread
    if let Err(e) = discovery.directory.shutdown().await {
        tracing::error!("Failed to shutdown directory: {}", e);
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("shelly_discoveryd=info"));

    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
