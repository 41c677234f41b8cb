//! Imagery Cache - maintenance server
//!
//! Owns the storage handle for the lifetime of the process and exposes the
//! maintenance API.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use imagery_cache::api::{create_router, AppState};
use imagery_cache::config::Config;
use imagery_cache::tasks::spawn_cleanup_task;

/// Time allowed for pending access records to reach storage on shutdown.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Main entry point for the imagery cache server.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from environment variables
/// 3. Open the storage backend and start the accounting worker
/// 4. Start background expiry sweep
/// 5. Create Axum router with all endpoints
/// 6. Start HTTP server on configured port
/// 7. Handle graceful shutdown on SIGINT/SIGTERM, then flush accounting
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing subscriber with env filter
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "imagery_cache=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Imagery Cache Server");

    // Load configuration from environment variables
    let config = Config::from_env();
    info!(
        "Configuration loaded: backend={:?}, database={}, default_ttl={}s, port={}, cleanup_interval={}s",
        config.backend,
        config.database_path.display(),
        config.default_ttl,
        config.server_port,
        config.cleanup_interval
    );

    let (state, worker) =
        AppState::from_config(&config).context("failed to open cache storage")?;
    let caches = state.caches.clone();

    let cleanup_handle = spawn_cleanup_task(caches.clone(), config.cleanup_interval);
    info!("Background expiry sweep started");

    let app = create_router(state);

    // Bind to configured port
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cleanup_handle))
        .await
        .context("server error")?;

    // Apply pending hit counts before the storage handle goes away
    if tokio::time::timeout(FLUSH_TIMEOUT, caches.flush()).await.is_err() {
        warn!("Timed out flushing access accounting");
    }
    drop(caches);
    if tokio::time::timeout(FLUSH_TIMEOUT, worker).await.is_err() {
        warn!("Accounting worker did not stop in time");
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM).
///
/// On shutdown signal, aborts the sweep task and allows graceful shutdown.
async fn shutdown_signal(cleanup_handle: tokio::task::JoinHandle<()>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }

    // Abort the sweep task
    cleanup_handle.abort();
    warn!("Expiry sweep task aborted");
}
