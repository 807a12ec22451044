// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Sync orchestrator tests: partial failure, idempotence, batch halts and
//! cancellation, against a scripted remote source and the in-memory store.

use futures_util::future::BoxFuture;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use stride_tracker::db::{ActivityStore, InsertOutcome, MemoryStore, SecretStore};
use stride_tracker::error::{AppError, Result};
use stride_tracker::models::{ActivityRecord, NormalizedActivity, TokenState};
use stride_tracker::services::normalize::RawLap;
use stride_tracker::services::strava::{
    RawStreamBundle, RemoteActivitySource, RemoteActivitySummary,
};
use stride_tracker::services::sync::sync_from;
use stride_tracker::services::{BatchHalt, StravaService, SyncOrchestrator};
use tokio_util::sync::CancellationToken;

mod common;
use common::{activity_json, spawn_mock_strava, MockStravaState};

#[derive(Clone, Copy)]
enum Failure {
    DetailsMissing,
    RateLimited,
    Timeout,
    TokenRejected,
}

/// Remote source with per-activity scripted failures.
#[derive(Default)]
struct FakeSource {
    summaries: Vec<RemoteActivitySummary>,
    failures: HashMap<u64, Failure>,
    list_error: bool,
    /// Cancel this token while fetching the given activity
    cancel_during: Option<(u64, CancellationToken)>,
    detail_calls: Mutex<Vec<u64>>,
}

impl FakeSource {
    fn with_ids(ids: impl IntoIterator<Item = u64>) -> Self {
        Self {
            summaries: ids
                .into_iter()
                .map(|id| serde_json::from_value(activity_json(id)).unwrap())
                .collect(),
            ..Default::default()
        }
    }

    fn fail(mut self, id: u64, failure: Failure) -> Self {
        self.failures.insert(id, failure);
        self
    }

    fn failure_for(&self, id: u64) -> Option<AppError> {
        self.failures.get(&id).map(|f| match f {
            Failure::DetailsMissing => AppError::DetailUnavailable("HTTP 404".to_string()),
            Failure::RateLimited => AppError::RateLimited {
                retry_after_seconds: 60,
            },
            Failure::Timeout => AppError::Timeout("operation timed out".to_string()),
            Failure::TokenRejected => AppError::TokenRefresh("invalid_grant".to_string()),
        })
    }
}

impl RemoteActivitySource for FakeSource {
    fn list_activities(
        &self,
        _after: i64,
        _per_page: u32,
    ) -> BoxFuture<'_, Result<Vec<RemoteActivitySummary>>> {
        Box::pin(async move {
            if self.list_error {
                return Err(AppError::StravaApi("HTTP 500".to_string()));
            }
            Ok(self.summaries.clone())
        })
    }

    fn get_streams(&self, activity_id: u64) -> BoxFuture<'_, Result<RawStreamBundle>> {
        Box::pin(async move {
            self.detail_calls.lock().unwrap().push(activity_id);
            if let Some((id, token)) = &self.cancel_during {
                if *id == activity_id {
                    token.cancel();
                }
            }
            match self.failure_for(activity_id) {
                Some(e) => Err(e),
                None => Ok(serde_json::from_value(serde_json::json!({
                    "time": {"data": [0, 10]},
                    "latlng": {"data": [[37.0, -122.0], [37.0004, -122.0]]}
                }))
                .unwrap()),
            }
        })
    }

    fn get_laps(&self, activity_id: u64) -> BoxFuture<'_, Result<Vec<RawLap>>> {
        Box::pin(async move {
            match self.failure_for(activity_id) {
                Some(e) => Err(e),
                None => Ok(vec![RawLap {
                    duration_seconds: 1600.0,
                    distance_meters: 5000.0,
                    ..Default::default()
                }]),
            }
        })
    }
}

/// In-memory store that fails inserts for chosen external ids.
#[derive(Clone, Default)]
struct FlakyStore {
    inner: MemoryStore,
    fail_inserts: Vec<String>,
}

impl ActivityStore for FlakyStore {
    fn find<'a>(
        &'a self,
        user_id: &'a str,
        external_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<ActivityRecord>>> {
        self.inner.find(user_id, external_id)
    }

    fn insert<'a>(
        &'a self,
        user_id: &'a str,
        activity: &'a NormalizedActivity,
    ) -> BoxFuture<'a, Result<InsertOutcome>> {
        if self.fail_inserts.contains(&activity.external_id) {
            return Box::pin(async { Err(AppError::Persist("write rejected".to_string())) });
        }
        self.inner.insert(user_id, activity)
    }

    fn list_for_user<'a>(
        &'a self,
        user_id: &'a str,
        limit: u32,
    ) -> BoxFuture<'a, Result<Vec<ActivityRecord>>> {
        self.inner.list_for_user(user_id, limit)
    }
}

async fn stored(store: &MemoryStore, id: u64) -> bool {
    store
        .find("u1", &format!("strava_{}", id))
        .await
        .unwrap()
        .is_some()
}

#[tokio::test]
async fn test_persist_failure_is_isolated_to_one_item() {
    let store = FlakyStore {
        fail_inserts: vec!["strava_3".to_string()],
        ..Default::default()
    };
    let source = FakeSource::with_ids(1..=5);

    let report = sync_from(&store, &source, "u1", 0, 50, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.synced_count, 4);
    assert_eq!(report.failed_count, 1);
    assert_eq!(report.errors.len(), 1);
    assert!(report.errors[0].contains("Activity 3"));
    assert!(report.halted.is_none());
    for id in [1, 2, 4, 5] {
        assert!(stored(&store.inner, id).await, "activity {} missing", id);
    }
    assert!(!stored(&store.inner, 3).await);
}

#[tokio::test]
async fn test_second_sync_skips_everything() {
    let store = MemoryStore::new();
    let source = FakeSource::with_ids(1..=3);
    let cancel = CancellationToken::new();

    let first = sync_from(&store, &source, "u1", 0, 50, &cancel).await.unwrap();
    let second = sync_from(&store, &source, "u1", 0, 50, &cancel).await.unwrap();

    assert_eq!(first.synced_count, 3);
    assert_eq!(second.synced_count, 0);
    assert_eq!(second.skipped_count, 3);
    assert!(second.errors.is_empty());
    assert_eq!(store.activity_count(), 3);
    // Skipped items never fetch details
    assert_eq!(source.detail_calls.lock().unwrap().len(), 3);
}

#[tokio::test]
async fn test_missing_details_still_persist_summary() {
    let store = MemoryStore::new();
    let source = FakeSource::with_ids([1, 2]).fail(2, Failure::DetailsMissing);

    let report = sync_from(&store, &source, "u1", 0, 50, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.synced_count, 2);
    assert!(report.errors.is_empty());

    let record = store.find("u1", "strava_2").await.unwrap().unwrap();
    assert!(record.activity.track.is_empty());
    assert!(record.activity.splits.is_empty());
    assert_eq!(record.activity.distance_meters, 5000.0);
    assert_eq!(record.activity.avg_pace_sec_per_km, Some(300.0));

    let with_detail = store.find("u1", "strava_1").await.unwrap().unwrap();
    assert_eq!(with_detail.activity.track.len(), 2);
    assert_eq!(with_detail.activity.splits[0].lap_number, 1);
}

#[tokio::test]
async fn test_rate_limit_halts_batch() {
    let store = MemoryStore::new();
    let source = FakeSource::with_ids(1..=5).fail(3, Failure::RateLimited);

    let report = sync_from(&store, &source, "u1", 0, 50, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.synced_count, 2);
    assert_eq!(
        report.halted,
        Some(BatchHalt::RateLimited {
            retry_after_seconds: 60
        })
    );
    assert!(!stored(&store, 4).await);
    assert_eq!(*source.detail_calls.lock().unwrap(), vec![1, 2, 3]);
}

#[tokio::test]
async fn test_token_failure_halts_batch() {
    let store = MemoryStore::new();
    let source = FakeSource::with_ids(1..=3).fail(1, Failure::TokenRejected);

    let report = sync_from(&store, &source, "u1", 0, 50, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.synced_count, 0);
    assert!(matches!(report.halted, Some(BatchHalt::TokenRefresh { .. })));
    assert_eq!(store.activity_count(), 0);
}

#[tokio::test]
async fn test_timeout_fails_one_item_and_continues() {
    let store = MemoryStore::new();
    let source = FakeSource::with_ids(1..=3).fail(2, Failure::Timeout);

    let report = sync_from(&store, &source, "u1", 0, 50, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.synced_count, 2);
    assert_eq!(report.failed_count, 1);
    assert!(report.errors[0].contains("timed out"));
    assert!(report.halted.is_none());
}

#[tokio::test]
async fn test_cancellation_completes_in_flight_item() {
    let store = MemoryStore::new();
    let cancel = CancellationToken::new();
    let source = FakeSource {
        cancel_during: Some((2, cancel.clone())),
        ..FakeSource::with_ids(1..=5)
    };

    let report = sync_from(&store, &source, "u1", 0, 50, &cancel).await.unwrap();

    assert!(report.cancelled);
    assert_eq!(report.synced_count, 2);
    assert!(stored(&store, 2).await);
    assert!(!stored(&store, 3).await);
}

#[tokio::test]
async fn test_listing_failure_is_an_error() {
    let store = MemoryStore::new();
    let source = FakeSource {
        list_error: true,
        ..Default::default()
    };

    let result = sync_from(&store, &source, "u1", 0, 50, &CancellationToken::new()).await;
    assert!(matches!(result, Err(AppError::StravaApi(_))));
}

#[tokio::test]
async fn test_sync_batch_without_tokens_fails_to_start() {
    let mock = spawn_mock_strava(MockStravaState::default()).await;
    let store = MemoryStore::new();
    let strava = StravaService::new(
        mock.api(Duration::from_secs(5)),
        Arc::new(store.clone()),
        Arc::new(dashmap::DashMap::new()),
        300,
    );
    let orchestrator = SyncOrchestrator::new(Arc::new(store), strava, 50);

    let result = orchestrator
        .sync_batch("u1", 0, &CancellationToken::new())
        .await;
    assert!(matches!(result, Err(AppError::NotFound(_))));
    assert!(mock.state.events().is_empty());
}

#[tokio::test]
async fn test_sync_batch_end_to_end() {
    let mock = spawn_mock_strava(MockStravaState {
        activities: (1..=3).map(activity_json).collect(),
        missing_details: [3].into_iter().collect(),
        ..Default::default()
    })
    .await;
    let store = MemoryStore::new();
    store
        .set(
            "u1",
            &TokenState {
                access_token: "stale".to_string(),
                refresh_token: "refresh_0".to_string(),
                expires_at: chrono::Utc::now().timestamp() - 10,
            },
        )
        .await
        .unwrap();

    let strava = StravaService::new(
        mock.api(Duration::from_secs(5)),
        Arc::new(store.clone()),
        Arc::new(dashmap::DashMap::new()),
        300,
    );
    let orchestrator = SyncOrchestrator::new(Arc::new(store.clone()), strava, 50);

    let report = orchestrator
        .sync_batch("u1", 0, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.synced_count, 3);
    assert_eq!(mock.state.refresh_count(), 1);

    let refreshed = SecretStore::get(&store, "u1").await.unwrap().unwrap();
    assert_eq!(refreshed.access_token, "fresh_access_1");

    let first = store.find("u1", "strava_1").await.unwrap().unwrap();
    assert_eq!(first.activity.track.len(), 3);
    assert_eq!(first.activity.splits.len(), 2);
    assert_eq!(first.activity.elevation_loss_meters, Some(1.5));

    let third = store.find("u1", "strava_3").await.unwrap().unwrap();
    assert!(third.activity.track.is_empty());
}
