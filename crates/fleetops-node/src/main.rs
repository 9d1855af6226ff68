//! fleetops-node — the fleet control plane server binary.
//!
//! Loads layered configuration, wires an in-memory store, executor and
//! provider behind the gRPC service shell, and serves until either Ctrl+C
//! or SIGTERM is received.

use std::sync::Arc;

use anyhow::{Context, Result};
use fleetops_config::{FleetConfig, ProviderKind};
use fleetops_executor::{RetryConfig, Runner};
use fleetops_provider::{FakeProvider, FakeProviderConfig};
use fleetops_store::plan::PlanRegistry;
use fleetops_store::Store;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = FleetConfig::load().context("failed to load configuration")?;

    if !config.server.state_dir.exists() {
        std::fs::create_dir_all(&config.server.state_dir)
            .with_context(|| format!("failed to create state dir {}", config.server.state_dir.display()))?;
    }

    let addr = config
        .server
        .bind_address
        .parse()
        .with_context(|| format!("invalid bind address {}", config.server.bind_address))?;

    let store = Arc::new(Store::new());
    let plans = Arc::new(PlanRegistry::with_builtins());
    let retry = RetryConfig {
        base_retry_wait: config.executor.base_delay(),
        max_retry_wait: config.executor.max_delay(),
    };

    match config.provider.kind {
        ProviderKind::Fake => {}
    }
    let provider = Arc::new(FakeProvider::with_config(FakeProviderConfig::default()));
    let runner = Runner::new(store.clone(), provider, plans, retry);
    let shutdown = fleetops_server::serve(addr, store, runner).await.context("failed to start gRPC server")?;

    tracing::info!(%addr, "fleetops-node listening");
    wait_for_shutdown_signal().await;
    tracing::info!("shutdown signal received, draining in-flight operations");
    shutdown.shutdown().await;

    Ok(())
}

/// Waits for Ctrl+C or, on Unix, SIGTERM — whichever arrives first.
async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
