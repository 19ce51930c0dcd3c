//! CDP status engine
//!
//! Consumes orchestrator and platform lifecycle events, reconciles them into
//! deployment and entity status documents, and serves those documents over
//! HTTP.

use std::sync::Arc;

use anyhow::Result;
use cdp_status_engine::{
    api,
    config,
    consumer::ConsumerPool,
    db::{Database, PgContainerRepositoryCheck},
    engine::StatusEngine,
    state::AppState,
    sweep::{SweepWorker, SweepWorkerConfig},
};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let config = config::Config::from_env()?;

    // Prefer RUST_LOG, fall back to CDP_LOG_LEVEL
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting CDP status engine");
    info!(
        listen_addr = %config.listen_addr,
        environments = ?config.reconcile.environments,
        "Configuration loaded"
    );

    let db = match Database::connect(&config.database).await {
        Ok(db) => {
            info!("Database connection established");
            db
        }
        Err(e) => {
            error!(error = %e, "Failed to connect to database");
            return Err(e.into());
        }
    };

    if config.dev_mode {
        info!("Running database migrations (dev mode)");
        if let Err(e) = db.run_migrations().await {
            error!(error = %e, "Failed to run migrations");
            return Err(e.into());
        }
    }

    let engine = Arc::new(
        StatusEngine::new(
            Arc::new(db.status_store()),
            Arc::new(db.artifact_resolver()),
            config.reconcile.clone(),
        )
        .with_resource_check(Arc::new(PgContainerRepositoryCheck::new(db.pool().clone()))),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let consumer_pool = ConsumerPool::new(
        Arc::new(db.message_queue(config.queue_visibility_timeout)),
        engine.clone(),
        config.consumer.clone(),
    );
    let consumer_handle = tokio::spawn({
        let shutdown_rx = shutdown_rx.clone();
        async move {
            consumer_pool.run(shutdown_rx).await;
        }
    });

    let sweep_worker = SweepWorker::new(
        engine.clone(),
        SweepWorkerConfig {
            interval: config.sweep_interval,
        },
    );
    let sweep_handle = tokio::spawn({
        let shutdown_rx = shutdown_rx.clone();
        async move {
            sweep_worker.run(shutdown_rx).await;
        }
    });

    let app = api::create_router(AppState::new(engine));

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!(addr = %config.listen_addr, "Listening for connections");

    let server_handle = tokio::spawn(async move {
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

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = server_handle => {
            match result {
                Ok(Ok(())) => info!("Server exited normally"),
                Ok(Err(e)) => error!(error = %e, "Server error"),
                Err(e) => error!(error = %e, "Server task panicked"),
            }
        }
    }

    let _ = shutdown_tx.send(true);

    info!("Waiting for workers to shut down...");
    let shutdown_timeout = std::time::Duration::from_secs(10);

    // In-flight messages finish; unacked ones become visible again.
    if let Err(e) = tokio::time::timeout(shutdown_timeout, consumer_handle).await {
        warn!(error = %e, "Consumer pool did not shut down in time");
    }

    if let Err(e) = tokio::time::timeout(shutdown_timeout, sweep_handle).await {
        warn!(error = %e, "Sweep worker did not shut down in time");
    }

    info!("Status engine shutdown complete");
    Ok(())
}
