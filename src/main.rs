// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Stride API Server
//!
//! Imports TCX uploads, syncs Strava activities and exports structured
//! workouts as FIT files.

use std::sync::Arc;
use stride_tracker::{
    config::Config,
    db::{ActivityStore, FirestoreDb, MemoryStore, SecretStore},
    AppState,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured JSON logging
    init_logging()?;

    // Load configuration from environment
    let config = Config::from_env()?;
    tracing::info!(port = config.port, "Starting Stride API");

    let (activities, secrets): (Arc<dyn ActivityStore>, Arc<dyn SecretStore>) =
        match config.gcp_project_id.as_deref() {
            Some(project_id) => {
                let db = FirestoreDb::new(project_id).await?;
                (Arc::new(db.clone()), Arc::new(db))
            }
            None => {
                tracing::warn!("GCP_PROJECT_ID not set, using in-memory store");
                let store = MemoryStore::new();
                (Arc::new(store.clone()), Arc::new(store))
            }
        };

    let shutdown = CancellationToken::new();
    let state = Arc::new(AppState::new(
        config.clone(),
        activities,
        secrets,
        shutdown.clone(),
    )?);

    // Build router
    let app = stride_tracker::routes::create_router(state);

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(address = %addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

/// Wait for Ctrl-C, then cancel in-flight sync batches.
async fn shutdown_signal(shutdown: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
    tracing::info!("Shutdown requested");
    shutdown.cancel();
}

/// Initialize structured JSON logging.
fn init_logging() -> Result<(), Box<dyn std::error::Error>> {
    let format = tracing_subscriber::fmt::layer()
        .json()
        .with_target(false)
        .with_current_span(true)
        .flatten_event(true);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("stride_tracker=debug".parse()?)
                .add_directive("info".parse()?),
        )
        .with(format)
        .init();
    Ok(())
}
