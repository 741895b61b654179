//! Interop Finalizer - cross-rollup message finalization through a gateway chain
//!
//! This service accepts interop requests sent from one rollup to another,
//! waits until the source rollup, the gateway chain and the destination
//! rollup have each made the message provable, and then broadcasts the
//! interop transaction that executes it on the destination.

use anyhow::Result;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

mod api;
mod chain;
mod config;
mod coordination;
mod error;
mod metrics;
mod proof;
mod state;
mod tx;

#[cfg(test)]
mod testing;

use chain::ChainManager;
use config::Settings;
use coordination::FinalizerService;
use metrics::MetricsServer;
use state::StateManager;
use tx::AccountProvider;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    init_logging();

    info!("Starting Interop Finalizer v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let settings = Settings::load()?;
    info!(
        "Loaded configuration for {} chains ({} rollups)",
        settings.enabled_chains().len(),
        settings.rollup_chains().len()
    );

    // Optional durable request state
    let state_manager = match &settings.database {
        Some(database) => {
            let manager = Arc::new(StateManager::new(database).await?);
            manager.run_migrations().await?;
            info!("Database connection established");
            Some(manager)
        }
        None => {
            warn!("No database configured - requests will not survive a restart");
            None
        }
    };

    // Initialize chain manager (handles all chain connections)
    let chain_manager = Arc::new(ChainManager::new(&settings).await?);
    info!("Chain connections initialized");

    let accounts = Arc::new(AccountProvider::from_config(
        &settings.wallet,
        chain_manager.clone(),
    )?);

    // Initialize finalizer service and resume unfinished work
    let service = Arc::new(FinalizerService::new(
        chain_manager.clone(),
        state_manager.clone(),
        Some(accounts),
        settings.finalizer.clone(),
        settings.contracts.clone(),
    ));
    service.restore_pending().await?;

    let cancel = CancellationToken::new();
    let runner_handles = service.spawn(&cancel)?;

    // Start API server
    let api_handle = tokio::spawn({
        let config = settings.api.clone();
        let service = service.clone();
        let chain_manager = chain_manager.clone();
        async move {
            if let Err(e) = api::run_server(config, service, chain_manager).await {
                error!("API server error: {}", e);
            }
        }
    });

    // Start metrics server
    let metrics_handle = settings.metrics.enabled.then(|| {
        let server = MetricsServer::new(settings.metrics.port);
        tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {}", e);
            }
        })
    });

    // Health check loop
    let health_handle = tokio::spawn({
        let chain_manager = chain_manager.clone();
        let state_manager = state_manager.clone();
        let interval = settings.finalizer.health_check_interval_secs;
        async move {
            loop {
                tokio::time::sleep(tokio::time::Duration::from_secs(interval)).await;

                let health = chain_manager.health_check().await;
                let mut healthy = health.iter().all(|(_, ok)| *ok);

                if let Some(state_manager) = &state_manager {
                    if let Err(e) = state_manager.health_check().await {
                        warn!("Database health check failed: {}", e);
                        healthy = false;
                    }
                }

                if healthy {
                    metrics::record_health_check();
                } else {
                    metrics::record_health_check_failure();
                }
            }
        }
    });

    info!("Interop Finalizer is running");
    info!("API server: http://{}:{}", settings.api.host, settings.api.port);
    if settings.metrics.enabled {
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
    }

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutdown signal received, stopping...");

    // Runners write their in-flight request back before exiting
    cancel.cancel();
    for handle in runner_handles {
        if let Err(e) = handle.await {
            error!("Finalizer runner panicked: {}", e);
        }
    }

    // Abort background tasks
    api_handle.abort();
    health_handle.abort();
    if let Some(h) = metrics_handle {
        h.abort();
    }

    info!("Interop Finalizer stopped");
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,interop_finalizer=debug,sqlx=warn,hyper=warn")
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
