// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Batch ingestion of remote activities.
//!
//! Each remote activity moves through
//! `Fetched -> DuplicateCheck -> {Skipped | DetailFetch -> Normalize -> Persist -> Synced}`,
//! with `Failed` reachable from the last three. Items are processed one at a
//! time; a failed item never stops the batch. Only rate limits and token
//! refresh failures do, because no later provider call could succeed.

use crate::db::{ActivityStore, InsertOutcome};
use crate::error::{AppError, Result};
use crate::models::{NormalizedActivity, SourceKind};
use crate::services::normalize::RawLap;
use crate::services::strava::{
    normalize_remote, RawStreamBundle, RemoteActivitySource, RemoteActivitySummary,
    StravaService,
};
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

/// Why a batch stopped before reaching the end of its list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BatchHalt {
    RateLimited {
        #[cfg_attr(feature = "binding-generation", ts(type = "number"))]
        retry_after_seconds: u64,
    },
    TokenRefresh { message: String },
}

impl BatchHalt {
    fn from_error(err: &AppError) -> Option<Self> {
        match err {
            AppError::RateLimited {
                retry_after_seconds,
            } => Some(BatchHalt::RateLimited {
                retry_after_seconds: *retry_after_seconds,
            }),
            AppError::TokenRefresh(msg) => Some(BatchHalt::TokenRefresh {
                message: msg.clone(),
            }),
            _ => None,
        }
    }
}

/// Structured result of a batch ingestion, returned even when items failed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct IngestReport {
    pub synced_count: u32,
    pub skipped_count: u32,
    pub failed_count: u32,
    /// One human-readable message per failed item
    pub errors: Vec<String>,
    /// The batch stopped early because cancellation was requested
    pub cancelled: bool,
    /// The batch stopped early on a batch-fatal error
    pub halted: Option<BatchHalt>,
}

impl IngestReport {
    pub(crate) fn record(&mut self, outcome: ItemOutcome) {
        match outcome {
            ItemOutcome::Synced => self.synced_count += 1,
            ItemOutcome::Skipped => self.skipped_count += 1,
        }
    }

    pub(crate) fn record_failure(&mut self, message: String) {
        self.failed_count += 1;
        self.errors.push(message);
    }
}

/// Terminal state of one successfully handled item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ItemOutcome {
    Synced,
    Skipped,
}

/// Persist a normalized activity unless the user already has it.
///
/// The lookup only saves a write; the store's insert is what guarantees a
/// single record when two ingestions of the same activity race.
pub(crate) async fn persist_new(
    store: &dyn ActivityStore,
    user_id: &str,
    activity: &NormalizedActivity,
) -> Result<ItemOutcome> {
    if store.find(user_id, &activity.external_id).await?.is_some() {
        tracing::debug!(
            user_id,
            external_id = %activity.external_id,
            "Activity already imported, skipping"
        );
        return Ok(ItemOutcome::Skipped);
    }

    insert_activity(store, user_id, activity).await
}

/// Insert, treating a storage-level conflict as an idempotent skip.
async fn insert_activity(
    store: &dyn ActivityStore,
    user_id: &str,
    activity: &NormalizedActivity,
) -> Result<ItemOutcome> {
    match store.insert(user_id, activity).await? {
        InsertOutcome::Inserted => {
            tracing::info!(
                user_id,
                external_id = %activity.external_id,
                "Activity stored"
            );
            Ok(ItemOutcome::Synced)
        }
        InsertOutcome::Duplicate => {
            tracing::debug!(
                user_id,
                external_id = %activity.external_id,
                "Concurrent import won the insert, skipping"
            );
            Ok(ItemOutcome::Skipped)
        }
    }
}

/// Drives `sync_batch` for users with stored Strava tokens.
#[derive(Clone)]
pub struct SyncOrchestrator {
    store: Arc<dyn ActivityStore>,
    strava: StravaService,
    page_size: u32,
}

impl SyncOrchestrator {
    pub fn new(store: Arc<dyn ActivityStore>, strava: StravaService, page_size: u32) -> Self {
        Self {
            store,
            strava,
            page_size,
        }
    }

    /// Ingest every Strava activity started after `since` (Unix seconds).
    ///
    /// Fails only when the batch cannot start: no stored tokens, or the
    /// activity listing itself failed.
    pub async fn sync_batch(
        &self,
        user_id: &str,
        since: i64,
        cancel: &CancellationToken,
    ) -> Result<IngestReport> {
        let client = self.strava.client_for(user_id).await?;
        sync_from(
            self.store.as_ref(),
            &client,
            user_id,
            since,
            self.page_size,
            cancel,
        )
        .await
    }
}

/// Run one batch against any remote source.
pub async fn sync_from(
    store: &dyn ActivityStore,
    source: &dyn RemoteActivitySource,
    user_id: &str,
    since: i64,
    per_page: u32,
    cancel: &CancellationToken,
) -> Result<IngestReport> {
    let summaries = source.list_activities(since, per_page).await?;
    tracing::info!(user_id, count = summaries.len(), since, "Starting sync batch");

    let mut report = IngestReport::default();

    for summary in &summaries {
        // Checked between items only; an item in flight always completes
        if cancel.is_cancelled() {
            tracing::info!(user_id, "Sync cancelled");
            report.cancelled = true;
            break;
        }

        match sync_one(store, source, user_id, summary).await {
            Ok(outcome) => report.record(outcome),
            Err(e) => {
                if let Some(halt) = BatchHalt::from_error(&e) {
                    tracing::warn!(
                        user_id,
                        activity_id = summary.id,
                        error = %e,
                        "Sync batch halted"
                    );
                    report.halted = Some(halt);
                    break;
                }

                tracing::warn!(
                    user_id,
                    activity_id = summary.id,
                    error = %e,
                    "Failed to sync activity"
                );
                report.record_failure(format!("Activity {}: {}", summary.id, e));
            }
        }
    }

    tracing::info!(
        user_id,
        synced = report.synced_count,
        skipped = report.skipped_count,
        failed = report.failed_count,
        "Sync batch finished"
    );
    Ok(report)
}

async fn sync_one(
    store: &dyn ActivityStore,
    source: &dyn RemoteActivitySource,
    user_id: &str,
    summary: &RemoteActivitySummary,
) -> Result<ItemOutcome> {
    let external_id = SourceKind::SyncedService.external_id(&summary.id.to_string());
    if store.find(user_id, &external_id).await?.is_some() {
        tracing::debug!(user_id, external_id = %external_id, "Activity already imported, skipping");
        return Ok(ItemOutcome::Skipped);
    }

    let streams = fetch_streams(source, summary.id).await?;
    let laps = fetch_laps(source, summary.id).await?;

    let activity = normalize_remote(summary, streams.as_ref(), laps)?;
    insert_activity(store, user_id, &activity).await
}

async fn fetch_streams(
    source: &dyn RemoteActivitySource,
    activity_id: u64,
) -> Result<Option<RawStreamBundle>> {
    match source.get_streams(activity_id).await {
        Ok(streams) => Ok(Some(streams)),
        Err(AppError::DetailUnavailable(reason)) => {
            tracing::debug!(activity_id, reason = %reason, "Streams unavailable");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

async fn fetch_laps(source: &dyn RemoteActivitySource, activity_id: u64) -> Result<Vec<RawLap>> {
    match source.get_laps(activity_id).await {
        Ok(laps) => Ok(laps),
        Err(AppError::DetailUnavailable(reason)) => {
            tracing::debug!(activity_id, reason = %reason, "Laps unavailable");
            Ok(Vec::new())
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_halt_only_for_batch_fatal_errors() {
        assert_eq!(
            BatchHalt::from_error(&AppError::RateLimited {
                retry_after_seconds: 60
            }),
            Some(BatchHalt::RateLimited {
                retry_after_seconds: 60
            })
        );
        assert!(BatchHalt::from_error(&AppError::Persist("disk".into())).is_none());
    }

    #[test]
    fn test_report_serializes_snake_case() {
        let mut report = IngestReport::default();
        report.record(ItemOutcome::Synced);
        report.record_failure("Activity 3: boom".to_string());
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["synced_count"], 1);
        assert_eq!(json["failed_count"], 1);
        assert_eq!(json["halted"], serde_json::Value::Null);
    }
}
