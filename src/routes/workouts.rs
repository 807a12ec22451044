// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Structured workout export.
//!
//! Encoding is deterministic, so the SHA-256 of the file is a strong ETag
//! and a matching `If-None-Match` gets a 304 without a body.

use crate::error::{AppError, Result};
use crate::middleware::auth::AuthUser;
use crate::models::WorkoutExport;
use crate::services::fit;
use crate::AppState;
use axum::{
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Extension, Json, Router,
};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use validator::Validate;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/api/workouts/export", post(export_workout))
}

/// Encode a workout as a FIT file download.
async fn export_workout(
    Extension(user): Extension<AuthUser>,
    headers: HeaderMap,
    Json(workout): Json<WorkoutExport>,
) -> Result<Response> {
    workout
        .validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    let bytes = fit::encode(&workout)?;
    let etag = format!("\"{}\"", hex::encode(Sha256::digest(&bytes)));

    tracing::info!(
        user_id = %user.user_id,
        bytes = bytes.len(),
        etag = %etag,
        "Workout exported"
    );

    let not_modified = headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.split(',').any(|tag| tag.trim() == etag));

    let etag_value = HeaderValue::from_str(&etag)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("Invalid ETag header: {}", e)))?;

    if not_modified {
        return Ok((StatusCode::NOT_MODIFIED, [(header::ETAG, etag_value)]).into_response());
    }

    let disposition = HeaderValue::from_str(&format!(
        "attachment; filename=\"{}.fit\"",
        download_name(&workout.title)
    ))
    .map_err(|e| AppError::Internal(anyhow::anyhow!("Invalid Content-Disposition: {}", e)))?;

    Ok((
        [
            (
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/octet-stream"),
            ),
            (header::CONTENT_DISPOSITION, disposition),
            (header::ETAG, etag_value),
        ],
        bytes,
    )
        .into_response())
}

/// File name stem from the sanitized title: ASCII alphanumerics, `-` and `_`.
fn download_name(title: &str) -> String {
    fit::sanitize_title(title)
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
