// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! API routes for authenticated users: ingestion and activity listing.

use crate::error::{AppError, Result};
use crate::middleware::auth::AuthUser;
use crate::models::{ActivityRecord, ActivityType, SourceKind, TokenState};
use crate::services::IngestReport;
use crate::time_utils::{format_utc_rfc3339, parse_rfc3339_utc};
use crate::AppState;
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Query, State},
    http::StatusCode,
    routing::{get, post, put},
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

/// Largest accepted TCX upload.
const MAX_TCX_BYTES: usize = 25 * 1024 * 1024;

const DEFAULT_LIMIT: u32 = 50;
const MAX_LIMIT: u32 = 200;

/// API routes (require authentication via JWT).
/// The auth middleware is applied in routes/mod.rs for these routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/api/imports/tcx",
            post(import_tcx).layer(DefaultBodyLimit::max(MAX_TCX_BYTES)),
        )
        .route("/api/sync", post(sync_activities))
        .route("/api/activities", get(get_activities))
        .route("/api/connection/tokens", put(put_tokens))
}

// ─── Ingestion ───────────────────────────────────────────────

/// Import an uploaded TCX document (request body is the XML text).
async fn import_tcx(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    body: String,
) -> Result<Json<IngestReport>> {
    if body.trim().is_empty() {
        return Err(AppError::BadRequest("Empty TCX document".to_string()));
    }

    tracing::info!(user_id = %user.user_id, bytes = body.len(), "TCX upload received");
    let report = state.imports.import_tcx(&user.user_id, &body).await?;
    Ok(Json(report))
}

#[derive(Debug, Default, Deserialize)]
struct SyncRequest {
    /// Only activities started after this instant (RFC3339); default: all
    after: Option<String>,
}

/// Pull new activities from Strava.
async fn sync_activities(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    body: Bytes,
) -> Result<Json<IngestReport>> {
    let request: SyncRequest = if body.iter().all(u8::is_ascii_whitespace) {
        SyncRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| AppError::BadRequest(format!("Invalid sync request: {}", e)))?
    };
    let since = match request.after.as_deref() {
        Some(raw) => parse_rfc3339_utc(raw)
            .ok_or_else(|| {
                AppError::BadRequest("Invalid 'after': must be RFC3339 datetime".to_string())
            })?
            .timestamp(),
        None => 0,
    };

    let cancel = state.shutdown.child_token();
    let report = state.sync.sync_batch(&user.user_id, since, &cancel).await?;
    Ok(Json(report))
}

// ─── Activities ──────────────────────────────────────────────

#[derive(Deserialize)]
struct ActivitiesQuery {
    #[serde(default = "default_limit")]
    limit: u32,
}

fn default_limit() -> u32 {
    DEFAULT_LIMIT
}

#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct ActivitiesResponse {
    pub activities: Vec<ActivitySummary>,
}

/// List entry; the track and splits are left out.
#[derive(Serialize, Clone, Debug)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct ActivitySummary {
    pub external_id: String,
    #[cfg_attr(feature = "binding-generation", ts(type = "string"))]
    pub source_kind: SourceKind,
    pub activity_type: ActivityType,
    pub name: Option<String>,
    pub started_at: String,
    pub duration_seconds: f64,
    pub moving_time_seconds: f64,
    pub distance_meters: f64,
    pub avg_pace_sec_per_km: Option<f64>,
    pub avg_heart_rate: Option<u16>,
    pub trackpoints: usize,
    pub splits: usize,
}

impl From<ActivityRecord> for ActivitySummary {
    fn from(record: ActivityRecord) -> Self {
        let a = record.activity;
        Self {
            started_at: format_utc_rfc3339(a.started_at),
            trackpoints: a.track.len(),
            splits: a.splits.len(),
            external_id: a.external_id,
            source_kind: a.source_kind,
            activity_type: a.activity_type,
            name: a.name,
            duration_seconds: a.duration_seconds,
            moving_time_seconds: a.moving_time_seconds,
            distance_meters: a.distance_meters,
            avg_pace_sec_per_km: a.avg_pace_sec_per_km,
            avg_heart_rate: a.avg_heart_rate,
        }
    }
}

/// Most recent activities for the current user.
async fn get_activities(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Query(params): Query<ActivitiesQuery>,
) -> Result<Json<ActivitiesResponse>> {
    if params.limit == 0 {
        return Err(AppError::BadRequest(
            "Limit must be greater than 0".to_string(),
        ));
    }
    let limit = params.limit.min(MAX_LIMIT);

    let records = state
        .activities
        .list_for_user(&user.user_id, limit)
        .await?;

    Ok(Json(ActivitiesResponse {
        activities: records.into_iter().map(ActivitySummary::from).collect(),
    }))
}

// ─── Connection ──────────────────────────────────────────────

/// Store the user's Strava tokens after the OAuth handshake.
async fn put_tokens(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(tokens): Json<TokenState>,
) -> Result<StatusCode> {
    if tokens.access_token.trim().is_empty() || tokens.refresh_token.trim().is_empty() {
        return Err(AppError::BadRequest(
            "access_token and refresh_token are required".to_string(),
        ));
    }

    state.strava.store_tokens(&user.user_id, &tokens).await?;
    Ok(StatusCode::NO_CONTENT)
}
