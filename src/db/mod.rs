// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Persistence layer.
//!
//! Ingestion talks to storage only through [`ActivityStore`] and
//! [`SecretStore`]. Firestore backs both in production; [`MemoryStore`]
//! backs local runs without GCP and the tests.

pub mod firestore;
pub mod memory;

pub use firestore::FirestoreDb;
pub use memory::MemoryStore;

use crate::error::Result;
use crate::models::{ActivityRecord, NormalizedActivity, TokenState};
use futures_util::future::BoxFuture;

/// Collection names as constants.
pub mod collections {
    pub const TOKENS: &str = "tokens";
    pub const ACTIVITIES: &str = "activities";
}

/// Outcome of inserting an activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// A record with the same `(user_id, external_id)` already exists
    Duplicate,
}

/// Activity storage keyed by owner and external id.
///
/// `insert` is the authoritative uniqueness guard: a concurrent insert of the
/// same key must come back as [`InsertOutcome::Duplicate`], not an error.
pub trait ActivityStore: Send + Sync {
    fn find<'a>(
        &'a self,
        user_id: &'a str,
        external_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<ActivityRecord>>>;

    fn insert<'a>(
        &'a self,
        user_id: &'a str,
        activity: &'a NormalizedActivity,
    ) -> BoxFuture<'a, Result<InsertOutcome>>;

    /// Most recent activities first.
    fn list_for_user<'a>(
        &'a self,
        user_id: &'a str,
        limit: u32,
    ) -> BoxFuture<'a, Result<Vec<ActivityRecord>>>;
}

/// Per-user OAuth token storage. `set` is a last-writer-wins upsert.
pub trait SecretStore: Send + Sync {
    fn get<'a>(&'a self, user_id: &'a str) -> BoxFuture<'a, Result<Option<TokenState>>>;

    fn set<'a>(&'a self, user_id: &'a str, tokens: &'a TokenState) -> BoxFuture<'a, Result<()>>;
}
