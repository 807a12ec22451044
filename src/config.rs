// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application configuration loaded from environment variables.

use std::env;
use std::time::Duration;

const DEFAULT_STRAVA_API_BASE: &str = "https://www.strava.com/api/v3";
const DEFAULT_STRAVA_TOKEN_URL: &str = "https://www.strava.com/oauth/token";

/// Strava caps `per_page` at 200.
const MAX_SYNC_PAGE_SIZE: u32 = 200;

/// Application configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Strava OAuth client ID (public)
    pub strava_client_id: String,
    /// Strava OAuth client secret
    pub strava_client_secret: String,
    /// Base URL of the Strava REST API
    pub strava_api_base: String,
    /// Strava OAuth token endpoint
    pub strava_token_url: String,
    /// Frontend URL allowed by CORS
    pub frontend_url: String,
    /// GCP project ID; `None` selects the in-memory store
    pub gcp_project_id: Option<String>,
    /// Server port
    pub port: u16,
    /// JWT signing key for session tokens (raw bytes)
    pub jwt_signing_key: Vec<u8>,
    /// Timeout applied to every Strava request
    pub http_timeout: Duration,
    /// Page size for activity listing during sync
    pub sync_page_size: u32,
    /// Refresh access tokens this many seconds before they expire
    pub token_refresh_margin_secs: i64,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok(); // Load .env file if present

        Ok(Self {
            strava_client_id: env::var("STRAVA_CLIENT_ID")
                .map_err(|_| ConfigError::Missing("STRAVA_CLIENT_ID"))?,
            strava_client_secret: env::var("STRAVA_CLIENT_SECRET")
                .map(|v| v.trim().to_string())
                .map_err(|_| ConfigError::Missing("STRAVA_CLIENT_SECRET"))?,
            strava_api_base: env::var("STRAVA_API_BASE")
                .unwrap_or_else(|_| DEFAULT_STRAVA_API_BASE.to_string()),
            strava_token_url: env::var("STRAVA_TOKEN_URL")
                .unwrap_or_else(|_| DEFAULT_STRAVA_TOKEN_URL.to_string()),
            frontend_url: env::var("FRONTEND_URL")
                .unwrap_or_else(|_| "http://localhost:5173".to_string()),
            gcp_project_id: env::var("GCP_PROJECT_ID")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            port: parse_or("PORT", 8080)?,
            jwt_signing_key: env::var("JWT_SIGNING_KEY")
                .map_err(|_| ConfigError::Missing("JWT_SIGNING_KEY"))?
                .into_bytes(),
            http_timeout: Duration::from_secs(parse_or("HTTP_TIMEOUT_SECS", 30)?),
            sync_page_size: parse_or::<u32>("SYNC_PAGE_SIZE", 50)?.clamp(1, MAX_SYNC_PAGE_SIZE),
            token_refresh_margin_secs: parse_or("TOKEN_REFRESH_MARGIN_SECS", 300)?,
        })
    }

    /// Config for tests; never reads the environment.
    pub fn test_default() -> Self {
        Self {
            strava_client_id: "test_client_id".to_string(),
            strava_client_secret: "test_secret".to_string(),
            strava_api_base: "http://127.0.0.1:9/api/v3".to_string(),
            strava_token_url: "http://127.0.0.1:9/oauth/token".to_string(),
            frontend_url: "http://localhost:5173".to_string(),
            gcp_project_id: None,
            port: 8080,
            jwt_signing_key: b"test_jwt_key_32_bytes_minimum!!".to_vec(),
            http_timeout: Duration::from_secs(5),
            sync_page_size: 50,
            token_refresh_margin_secs: 300,
        }
    }
}

/// Parse an optional numeric variable, rejecting values that are set but malformed.
fn parse_or<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(name)),
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),
}
