// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! In-process store for local development and tests.

use crate::db::{ActivityStore, InsertOutcome, SecretStore};
use crate::error::Result;
use crate::models::{ActivityRecord, NormalizedActivity, TokenState};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::future::BoxFuture;
use std::sync::Arc;

/// DashMap-backed activity and token storage. Clones share state.
#[derive(Clone, Default)]
pub struct MemoryStore {
    activities: Arc<DashMap<(String, String), ActivityRecord>>,
    tokens: Arc<DashMap<String, TokenState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored activities across all users.
    pub fn activity_count(&self) -> usize {
        self.activities.len()
    }
}

impl ActivityStore for MemoryStore {
    fn find<'a>(
        &'a self,
        user_id: &'a str,
        external_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<ActivityRecord>>> {
        Box::pin(async move {
            let key = (user_id.to_string(), external_id.to_string());
            Ok(self.activities.get(&key).map(|r| r.value().clone()))
        })
    }

    fn insert<'a>(
        &'a self,
        user_id: &'a str,
        activity: &'a NormalizedActivity,
    ) -> BoxFuture<'a, Result<InsertOutcome>> {
        Box::pin(async move {
            let key = (user_id.to_string(), activity.external_id.clone());
            match self.activities.entry(key) {
                Entry::Occupied(_) => Ok(InsertOutcome::Duplicate),
                Entry::Vacant(slot) => {
                    slot.insert(ActivityRecord {
                        user_id: user_id.to_string(),
                        activity: activity.clone(),
                        imported_at: chrono::Utc::now(),
                    });
                    Ok(InsertOutcome::Inserted)
                }
            }
        })
    }

    fn list_for_user<'a>(
        &'a self,
        user_id: &'a str,
        limit: u32,
    ) -> BoxFuture<'a, Result<Vec<ActivityRecord>>> {
        Box::pin(async move {
            let mut records: Vec<ActivityRecord> = self
                .activities
                .iter()
                .filter(|entry| entry.key().0 == user_id)
                .map(|entry| entry.value().clone())
                .collect();
            records.sort_by(|a, b| b.activity.started_at.cmp(&a.activity.started_at));
            records.truncate(limit as usize);
            Ok(records)
        })
    }
}

impl SecretStore for MemoryStore {
    fn get<'a>(&'a self, user_id: &'a str) -> BoxFuture<'a, Result<Option<TokenState>>> {
        Box::pin(async move { Ok(self.tokens.get(user_id).map(|t| t.value().clone())) })
    }

    fn set<'a>(&'a self, user_id: &'a str, tokens: &'a TokenState) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.tokens.insert(user_id.to_string(), tokens.clone());
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ActivityType, SourceKind};
    use chrono::{Duration, TimeZone, Utc};

    fn activity(external_id: &str, day: u32) -> NormalizedActivity {
        let started_at = Utc.with_ymd_and_hms(2024, 6, day, 7, 0, 0).unwrap();
        NormalizedActivity {
            external_id: external_id.to_string(),
            source_kind: SourceKind::SyncedService,
            activity_type: ActivityType::Run,
            name: None,
            started_at,
            finished_at: started_at + Duration::minutes(30),
            duration_seconds: 1800.0,
            moving_time_seconds: 1800.0,
            distance_meters: 6000.0,
            avg_pace_sec_per_km: Some(300.0),
            best_pace_sec_per_km: None,
            avg_heart_rate: None,
            max_heart_rate: None,
            elevation_gain_meters: None,
            elevation_loss_meters: None,
            avg_cadence: None,
            calories: None,
            track: vec![],
            splits: vec![],
        }
    }

    #[tokio::test]
    async fn test_insert_is_unique_per_user_and_external_id() {
        let store = MemoryStore::new();
        let a = activity("strava_1", 1);

        assert_eq!(store.insert("u1", &a).await.unwrap(), InsertOutcome::Inserted);
        assert_eq!(store.insert("u1", &a).await.unwrap(), InsertOutcome::Duplicate);
        assert_eq!(store.insert("u2", &a).await.unwrap(), InsertOutcome::Inserted);
        assert_eq!(store.activity_count(), 2);
        assert!(store.find("u1", "strava_1").await.unwrap().is_some());
        assert!(store.find("u1", "strava_2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_is_newest_first_and_limited() {
        let store = MemoryStore::new();
        for day in 1..=3 {
            store
                .insert("u1", &activity(&format!("strava_{}", day), day))
                .await
                .unwrap();
        }
        let listed = store.list_for_user("u1", 2).await.unwrap();
        let ids: Vec<_> = listed.iter().map(|r| r.activity.external_id.as_str()).collect();
        assert_eq!(ids, vec!["strava_3", "strava_2"]);
    }

    #[tokio::test]
    async fn test_token_upsert_last_writer_wins() {
        let store = MemoryStore::new();
        assert!(SecretStore::get(&store, "u1").await.unwrap().is_none());

        for expires_at in [100, 200] {
            let tokens = TokenState {
                access_token: format!("a{}", expires_at),
                refresh_token: "r".to_string(),
                expires_at,
            };
            store.set("u1", &tokens).await.unwrap();
        }
        let stored = SecretStore::get(&store, "u1").await.unwrap().unwrap();
        assert_eq!(stored.expires_at, 200);
    }
}
