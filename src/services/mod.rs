// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Services module - business logic layer.

pub mod fit;
pub mod import;
pub mod normalize;
pub mod strava;
pub mod sync;
pub mod tcx;

pub use import::ImportService;
pub use strava::{ActivityClient, RefreshLocks, RemoteActivitySource, StravaApi, StravaService};
pub use sync::{BatchHalt, IngestReport, SyncOrchestrator};
