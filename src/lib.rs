// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Stride: activity ingestion and workout export for a running tracker.
//!
//! This crate turns uploaded TCX files and Strava activities into one
//! normalized activity model, and encodes structured workouts as FIT files
//! for GPS watches.

pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod time_utils;

use config::Config;
use db::{ActivityStore, SecretStore};
use services::{ImportService, RefreshLocks, StravaApi, StravaService, SyncOrchestrator};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub activities: Arc<dyn ActivityStore>,
    pub strava: StravaService,
    pub sync: SyncOrchestrator,
    pub imports: ImportService,
    /// Cancelled on shutdown; each sync batch runs on a child token
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Wire services to the given stores.
    pub fn new(
        config: Config,
        activities: Arc<dyn ActivityStore>,
        secrets: Arc<dyn SecretStore>,
        shutdown: CancellationToken,
    ) -> error::Result<Self> {
        let refresh_locks: RefreshLocks = Arc::new(dashmap::DashMap::new());
        let strava = StravaService::new(
            StravaApi::new(&config)?,
            secrets,
            refresh_locks,
            config.token_refresh_margin_secs,
        );
        let sync = SyncOrchestrator::new(activities.clone(), strava.clone(), config.sync_page_size);
        let imports = ImportService::new(activities.clone());

        Ok(Self {
            config,
            activities,
            strava,
            sync,
            imports,
            shutdown,
        })
    }
}
