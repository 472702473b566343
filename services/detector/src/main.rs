//! Proxy detector
//!
//! Classifies client IPs as open proxies or Tor exit nodes. Verdicts are
//! cached in Redis and recorded in Postgres; the cache is reconciled against
//! the record store before any traffic is served.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use pxd_detector::{
    api,
    cache::{ProxyCache, RedisCache},
    config,
    db::{Database, RecordStore},
    probe::{NetworkProbe, Probe},
    state::AppState,
    ProxyDetector,
};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

fn log_server_exit(result: Result<std::io::Result<()>, tokio::task::JoinError>) {
    match result {
        Ok(Ok(())) => info!("Server exited normally"),
        Ok(Err(e)) => error!(error = %e, "Server error"),
        Err(e) => error!(error = %e, "Server task panicked"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = config::Config::from_env()?;

    // Initialize tracing (prefer RUST_LOG, fallback to PXD_LOG_LEVEL)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting proxy detector");
    info!(
        listen_addr = %config.listen_addr,
        reconcile_mode = config.reconcile_mode.as_str(),
        ports = ?config.probe.ports,
        "Configuration loaded"
    );

    // Connect to the record store
    let db = match Database::connect(&config.database).await {
        Ok(db) => db,
        Err(e) => {
            error!(error = %e, "Failed to connect to database");
            return Err(e.into());
        }
    };

    // Run migrations in dev mode
    if config.dev_mode {
        info!("Running database migrations (dev mode)");
        if let Err(e) = db.run_migrations().await {
            error!(error = %e, "Failed to run migrations");
            return Err(e.into());
        }
    }

    // Connect to the cache
    let cache = match RedisCache::connect(&config.cache).await {
        Ok(cache) => cache,
        Err(e) => {
            error!(error = %e, "Failed to connect to cache");
            return Err(e.into());
        }
    };

    let cache: Arc<dyn ProxyCache> = Arc::new(cache);
    let store: Arc<dyn RecordStore> = Arc::new(db.record_store());
    let probe: Arc<dyn Probe> = Arc::new(NetworkProbe::new(&config.probe));

    // Reconcile before accepting traffic
    let detector = match ProxyDetector::init(
        cache,
        store,
        probe,
        config.probe.ports.clone(),
        config.reconcile_mode,
    )
    .await
    {
        Ok((detector, report)) => {
            info!(
                action = ?report.action,
                store_count = report.store_count,
                cache_count = report.cache_count,
                loaded = report.loaded,
                "Cache reconciled"
            );
            detector
        }
        Err(e) => {
            error!(error = %e, divergence = e.is_divergence(), "Startup reconciliation failed");
            return Err(e.into());
        }
    };

    // Create shutdown channel for graceful shutdown
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let state = AppState::new(detector);
    let app = api::create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!(addr = %config.listen_addr, "Listening for connections");

    // Spawn the server with graceful shutdown
    let mut server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let mut shutdown_rx = shutdown_rx;
                loop {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                    if shutdown_rx.changed().await.is_err() {
                        break;
                    }
                }
                info!("HTTP server shutting down");
            })
            .await
    });

    // Wait for shutdown signal (Ctrl+C)
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = &mut server_handle => {
            log_server_exit(result);
            return Ok(());
        }
    }

    let _ = shutdown_tx.send(true);

    // Let in-flight requests drain
    match tokio::time::timeout(SHUTDOWN_TIMEOUT, server_handle).await {
        Ok(result) => log_server_exit(result),
        Err(_) => warn!("HTTP server did not shut down in time"),
    }

    info!("Proxy detector shutdown complete");
    Ok(())
}
