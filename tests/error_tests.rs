// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use stride_tracker::error::AppError;

#[test]
fn test_batch_fatal_kinds() {
    assert!(AppError::RateLimited {
        retry_after_seconds: 60
    }
    .is_batch_fatal());
    assert!(AppError::TokenRefresh("invalid_grant".to_string()).is_batch_fatal());
}

#[test]
fn test_item_failures_are_not_batch_fatal() {
    for err in [
        AppError::Parse("bad".to_string()),
        AppError::Persist("down".to_string()),
        AppError::DetailUnavailable("404".to_string()),
        AppError::Timeout("slow".to_string()),
        AppError::Encoding("deep".to_string()),
        AppError::StravaApi("500".to_string()),
    ] {
        assert!(!err.is_batch_fatal(), "{:?}", err);
    }
}

#[test]
fn test_retryable_kinds() {
    assert!(AppError::Timeout("slow".to_string()).is_retryable());
    assert!(AppError::RateLimited {
        retry_after_seconds: 1
    }
    .is_retryable());
    assert!(!AppError::TokenRefresh("revoked".to_string()).is_retryable());
    assert!(!AppError::Parse("bad".to_string()).is_retryable());
}

#[test]
fn test_rate_limit_response_has_retry_after() {
    let response = AppError::RateLimited {
        retry_after_seconds: 900,
    }
    .into_response();

    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.headers()[header::RETRY_AFTER], "900");
}

#[test]
fn test_status_codes() {
    let cases = [
        (AppError::Unauthorized, StatusCode::UNAUTHORIZED),
        (AppError::NotFound("x".to_string()), StatusCode::NOT_FOUND),
        (AppError::BadRequest("x".to_string()), StatusCode::BAD_REQUEST),
        (AppError::Parse("x".to_string()), StatusCode::UNPROCESSABLE_ENTITY),
        (AppError::Encoding("x".to_string()), StatusCode::UNPROCESSABLE_ENTITY),
        (AppError::TokenRefresh("x".to_string()), StatusCode::BAD_GATEWAY),
        (AppError::Timeout("x".to_string()), StatusCode::GATEWAY_TIMEOUT),
        (AppError::Persist("x".to_string()), StatusCode::INTERNAL_SERVER_ERROR),
    ];

    for (err, status) in cases {
        let label = format!("{:?}", err);
        let response = err.into_response();
        assert_eq!(response.status(), status, "{}", label);
        assert!(response.headers().get(header::RETRY_AFTER).is_none());
    }
}
