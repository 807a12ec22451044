// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Uploaded-file ingestion.

use crate::db::ActivityStore;
use crate::error::Result;
use crate::services::sync::{persist_new, IngestReport};
use crate::services::tcx;
use std::sync::Arc;

#[derive(Clone)]
pub struct ImportService {
    store: Arc<dyn ActivityStore>,
}

impl ImportService {
    pub fn new(store: Arc<dyn ActivityStore>) -> Self {
        Self { store }
    }

    /// Import every activity in a TCX document for `user_id`.
    ///
    /// Fails only if the document as a whole cannot be read. Each
    /// `<Activity>` is otherwise handled on its own: one that cannot be
    /// decoded or stored is reported in `errors` and the rest still import.
    pub async fn import_tcx(&self, user_id: &str, xml: &str) -> Result<IngestReport> {
        let document = tcx::parse(xml)?;
        let mut report = IngestReport::default();

        for rejected in document.rejected {
            tracing::warn!(user_id, error = %rejected, "Skipping undecodable TCX activity");
            report.record_failure(rejected.to_string());
        }

        for parsed in document.activities {
            let activity = parsed.into_normalized();
            match persist_new(self.store.as_ref(), user_id, &activity).await {
                Ok(outcome) => report.record(outcome),
                Err(e) => {
                    tracing::warn!(
                        user_id,
                        external_id = %activity.external_id,
                        error = %e,
                        "Failed to import TCX activity"
                    );
                    report.record_failure(format!("{}: {}", activity.external_id, e));
                }
            }
        }

        tracing::info!(
            user_id,
            imported = report.synced_count,
            skipped = report.skipped_count,
            failed = report.failed_count,
            "TCX import finished"
        );
        Ok(report)
    }
}
