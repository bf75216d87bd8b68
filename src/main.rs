//! Courier job offloading service.
//!
//! Main entry point for the Courier server. Initializes all subsystems
//! and coordinates graceful startup and shutdown.

use std::sync::Arc;

use anyhow::{Context, Result};
use courier_api::{retention::run_retention_sweep, start_server, AppState, Config};
use courier_core::{Clock, HashWorkExecutor, RealClock, SqliteStatusStore, WorkExecutor};
use courier_delivery::WorkerPool;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;
    init_tracing(&config.rust_log)?;

    info!("Starting Courier job offloading service");
    info!(
        database_url = %config.database_url,
        host = %config.host,
        port = config.port,
        worker_count = config.worker_count,
        queue_capacity = config.queue_capacity,
        "Configuration loaded"
    );

    let store = Arc::new(
        SqliteStatusStore::connect(&config.database_url, config.database_max_connections)
            .await
            .context("Failed to open request store")?,
    );
    info!("Request store ready");

    let executor: Arc<dyn WorkExecutor> = Arc::new(HashWorkExecutor);
    let clock: Arc<dyn Clock> = Arc::new(RealClock);

    let pool = Arc::new(
        WorkerPool::new(config.to_delivery_config(), store.clone(), executor.clone(), clock.clone())
            .context("Failed to build worker pool")?,
    );
    pool.start();

    let shutdown = CancellationToken::new();

    let sweep_handle = tokio::spawn(run_retention_sweep(
        store.clone(),
        clock.clone(),
        config.retention(),
        config.sweep_interval(),
        shutdown.child_token(),
    ));

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            shutdown.cancel();
        }
    });

    let state = AppState::new(store.clone(), pool.clone(), executor, clock)
        .with_retention(config.retention())
        .with_request_timeout(config.request_timeout());
    let addr = config.parse_server_addr()?;

    info!(addr = %addr, "Courier is ready to accept work");

    let server_shutdown = shutdown.clone();
    let server_result =
        start_server(state, addr, async move { server_shutdown.cancelled().await }).await;
    if let Err(e) = &server_result {
        error!(error = %e, "Server failed");
    }

    info!("Starting graceful shutdown");
    shutdown.cancel();

    if let Err(e) = sweep_handle.await {
        warn!(error = %e, "Retention sweep task ended abnormally");
    }

    match pool.shutdown().await {
        Ok(()) => info!("Worker pool stopped"),
        Err(e) => warn!(error = %e, "Worker pool did not stop cleanly"),
    }

    store.close().await;
    info!("Request store closed");

    info!("Courier shutdown complete");
    server_result.context("HTTP server error")
}

/// Initializes tracing; `RUST_LOG` takes precedence over the configured
/// filter.
fn init_tracing(default_filter: &str) -> Result<()> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(format!("{default_filter},courier=debug")))
        .context("Invalid log filter")?;

    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .context("Failed to install tracing subscriber")
}

/// Waits for shutdown signal (CTRL+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received CTRL+C signal");
        },
        () = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}
