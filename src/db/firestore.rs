// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Firestore implementation of the activity and token stores.
//!
//! Activities live at `activities/{user_id}:{external_id}`, both parts
//! percent-encoded so neither can contain the separator. Inserts use
//! Firestore's create semantics, so a second write of the same key fails
//! with a conflict on the server; that conflict is the uniqueness guard
//! for concurrent imports.

use crate::db::{collections, ActivityStore, InsertOutcome, SecretStore};
use crate::error::{AppError, Result};
use crate::models::{ActivityRecord, NormalizedActivity, TokenState};
use firestore::errors::FirestoreError;
use futures_util::future::BoxFuture;

/// Firestore database client.
#[derive(Clone)]
pub struct FirestoreDb {
    client: Option<firestore::FirestoreDb>,
}

impl FirestoreDb {
    /// Create a new Firestore client.
    ///
    /// For local development with emulator, set FIRESTORE_EMULATOR_HOST.
    pub async fn new(project_id: &str) -> Result<Self> {
        if std::env::var("FIRESTORE_EMULATOR_HOST").is_ok() {
            return Self::create_emulator_client(project_id).await;
        }

        let client = firestore::FirestoreDb::new(project_id)
            .await
            .map_err(|e| AppError::Database(format!("Failed to connect to Firestore: {}", e)))?;

        tracing::info!(project = project_id, "Connected to Firestore");

        Ok(Self {
            client: Some(client),
        })
    }

    /// Create a Firestore client for the emulator with unauthenticated access.
    async fn create_emulator_client(project_id: &str) -> Result<Self> {
        let token_source = gcloud_sdk::ExternalJwtFunctionSource::new(|| async {
            Ok(gcloud_sdk::Token {
                token_type: "Bearer".to_string(),
                token: gcloud_sdk::SecretValue::new(
                    "eyJhbGciOiJub25lIn0.eyJ1aWQiOiJ0ZXN0In0."
                        .to_string()
                        .into(),
                ),
                expiry: chrono::Utc::now() + chrono::Duration::hours(1),
            })
        });

        let options = firestore::FirestoreDbOptions::new(project_id.to_string());

        let client = firestore::FirestoreDb::with_options_token_source(
            options,
            gcloud_sdk::GCP_DEFAULT_SCOPES.clone(),
            gcloud_sdk::TokenSourceType::ExternalSource(Box::new(token_source)),
        )
        .await
        .map_err(|e| {
            AppError::Database(format!("Failed to connect to Firestore Emulator: {}", e))
        })?;

        tracing::info!(
            project = project_id,
            "Connected to Firestore (Emulator/Unauthenticated)"
        );

        Ok(Self {
            client: Some(client),
        })
    }

    /// Create an offline client; every operation returns an error.
    pub fn new_mock() -> Self {
        Self { client: None }
    }

    fn get_client(&self) -> Result<&firestore::FirestoreDb> {
        self.client
            .as_ref()
            .ok_or_else(|| AppError::Database("Database not connected (offline mode)".to_string()))
    }
}

/// Document id for an activity.
///
/// Percent-encoding leaves no raw `:` or `/` in either part, so distinct
/// `(user_id, external_id)` pairs always get distinct ids.
pub fn activity_document_id(user_id: &str, external_id: &str) -> String {
    format!(
        "{}:{}",
        urlencoding::encode(user_id),
        urlencoding::encode(external_id)
    )
}

fn token_document_id(user_id: &str) -> String {
    urlencoding::encode(user_id).into_owned()
}

impl ActivityStore for FirestoreDb {
    fn find<'a>(
        &'a self,
        user_id: &'a str,
        external_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<ActivityRecord>>> {
        Box::pin(async move {
            let found: Option<ActivityRecord> = self
                .get_client()?
                .fluent()
                .select()
                .by_id_in(collections::ACTIVITIES)
                .obj()
                .one(&activity_document_id(user_id, external_id))
                .await
                .map_err(|e| AppError::Database(e.to_string()))?;

            Ok(found.filter(|record| {
                record.user_id == user_id && record.activity.external_id == external_id
            }))
        })
    }

    fn insert<'a>(
        &'a self,
        user_id: &'a str,
        activity: &'a NormalizedActivity,
    ) -> BoxFuture<'a, Result<InsertOutcome>> {
        Box::pin(async move {
            let record = ActivityRecord {
                user_id: user_id.to_string(),
                activity: activity.clone(),
                imported_at: chrono::Utc::now(),
            };

            let result: std::result::Result<ActivityRecord, FirestoreError> = self
                .get_client()
                .map_err(|e| AppError::Persist(e.to_string()))?
                .fluent()
                .insert()
                .into(collections::ACTIVITIES)
                .document_id(activity_document_id(user_id, &activity.external_id))
                .object(&record)
                .execute()
                .await;

            match result {
                Ok(_) => Ok(InsertOutcome::Inserted),
                Err(FirestoreError::DataConflictError(_)) => Ok(InsertOutcome::Duplicate),
                Err(e) => Err(AppError::Persist(e.to_string())),
            }
        })
    }

    fn list_for_user<'a>(
        &'a self,
        user_id: &'a str,
        limit: u32,
    ) -> BoxFuture<'a, Result<Vec<ActivityRecord>>> {
        Box::pin(async move {
            let owner = user_id.to_string();
            self.get_client()?
                .fluent()
                .select()
                .from(collections::ACTIVITIES)
                .filter(move |q| q.field("user_id").eq(owner.clone()))
                .order_by([(
                    "activity.started_at",
                    firestore::FirestoreQueryDirection::Descending,
                )])
                .limit(limit)
                .obj()
                .query()
                .await
                .map_err(|e| AppError::Database(e.to_string()))
        })
    }
}

impl SecretStore for FirestoreDb {
    fn get<'a>(&'a self, user_id: &'a str) -> BoxFuture<'a, Result<Option<TokenState>>> {
        Box::pin(async move {
            self.get_client()?
                .fluent()
                .select()
                .by_id_in(collections::TOKENS)
                .obj()
                .one(&token_document_id(user_id))
                .await
                .map_err(|e| AppError::Database(e.to_string()))
        })
    }

    fn set<'a>(&'a self, user_id: &'a str, tokens: &'a TokenState) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let _: () = self
                .get_client()?
                .fluent()
                .update()
                .in_col(collections::TOKENS)
                .document_id(token_document_id(user_id))
                .object(tokens)
                .execute()
                .await
                .map_err(|e| AppError::Database(e.to_string()))?;
            Ok(())
        })
    }
}
