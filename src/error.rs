// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application error types with consistent API responses.
//!
//! Ingestion failures are split into kinds that decide how far they
//! propagate: a single-item failure (parse, persist, encoding) never aborts
//! a batch, while rate limits and token refresh failures do.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Application error type that converts to HTTP responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Authentication required")]
    Unauthorized,

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Malformed activity file: {0}")]
    Parse(String),

    #[error("Strava rate limit exceeded, retry after {retry_after_seconds}s")]
    RateLimited { retry_after_seconds: u64 },

    #[error("Token refresh failed: {0}")]
    TokenRefresh(String),

    #[error("Activity detail unavailable: {0}")]
    DetailUnavailable(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Strava API error: {0}")]
    StravaApi(String),

    #[error("Failed to persist activity: {0}")]
    Persist(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Cannot encode workout: {0}")]
    Encoding(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Errors after which no further provider call in the same batch can succeed.
    pub fn is_batch_fatal(&self) -> bool {
        matches!(
            self,
            AppError::RateLimited { .. } | AppError::TokenRefresh(_)
        )
    }

    /// Errors the caller may retry later without changing the request.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::RateLimited { .. } | AppError::Timeout(_))
    }
}

/// JSON error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, details) = match &self {
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized", None),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", Some(msg.clone())),
            AppError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, "bad_request", Some(msg.clone()))
            }
            AppError::Parse(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "parse_error",
                Some(msg.clone()),
            ),
            AppError::Encoding(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "encoding_error",
                Some(msg.clone()),
            ),
            AppError::RateLimited { .. } => (
                StatusCode::TOO_MANY_REQUESTS,
                "rate_limited",
                Some(self.to_string()),
            ),
            AppError::TokenRefresh(msg) => {
                (StatusCode::BAD_GATEWAY, "token_refresh_failed", Some(msg.clone()))
            }
            AppError::DetailUnavailable(msg) | AppError::StravaApi(msg) => {
                (StatusCode::BAD_GATEWAY, "strava_error", Some(msg.clone()))
            }
            AppError::Timeout(msg) => (StatusCode::GATEWAY_TIMEOUT, "timeout", Some(msg.clone())),
            AppError::Persist(msg) | AppError::Database(msg) => {
                tracing::error!(error = %msg, "Database error");
                (StatusCode::INTERNAL_SERVER_ERROR, "database_error", None)
            }
            AppError::Internal(err) => {
                tracing::error!(error = %err, "Internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", None)
            }
        };

        let body = ErrorResponse {
            error: error.to_string(),
            details,
        };

        let mut response = (status, Json(body)).into_response();
        if let AppError::RateLimited {
            retry_after_seconds,
        } = self
        {
            if let Ok(value) = HeaderValue::from_str(&retry_after_seconds.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

/// Result type alias for handlers
pub type Result<T> = std::result::Result<T, AppError>;
