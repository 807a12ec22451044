// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Strava API client for pulling recorded activities.
//!
//! Handles:
//! - Paginated activity listing
//! - Per-activity time-series streams and laps
//! - Token refresh before a request would use an expiring token
//! - Rate limit detection (surfaced to the sync orchestrator, never retried here)

use crate::config::Config;
use crate::db::SecretStore;
use crate::error::{AppError, Result};
use crate::models::{ActivityType, NormalizedActivity, SourceKind, TokenState};
use crate::services::normalize::{
    elevation_gain_loss, pace_from_speed, pace_sec_per_km, to_split_set, to_track, RawLap,
    RawPoint,
};
use crate::time_utils::{now_epoch_seconds, offset_by_seconds, parse_rfc3339_utc};
use dashmap::DashMap;
use futures_util::future::BoxFuture;
use reqwest::StatusCode;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Stream types requested for every activity.
const STREAM_KEYS: &str = "time,latlng,altitude,heartrate,cadence,distance,velocity_smooth";

/// Strava's `per_page` ceiling.
const MAX_PER_PAGE: u32 = 200;

/// Upper bound on pages fetched by one listing.
const MAX_PAGES: u32 = 100;

/// Used when a 429 carries no usable `Retry-After` (Strava's 15-minute window).
const DEFAULT_RETRY_AFTER_SECS: u64 = 900;

/// Which kind of endpoint a response came from; decides how failures map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Endpoint {
    Listing,
    Detail,
    Token,
}

/// Low-level Strava HTTP API. Stateless apart from the HTTP client.
#[derive(Clone)]
pub struct StravaApi {
    http: reqwest::Client,
    base_url: String,
    token_url: String,
    client_id: String,
    client_secret: String,
}

impl StravaApi {
    /// Create a client from application config.
    pub fn new(config: &Config) -> Result<Self> {
        Self::with_endpoints(
            config.strava_client_id.clone(),
            config.strava_client_secret.clone(),
            config.strava_api_base.clone(),
            config.strava_token_url.clone(),
            config.http_timeout,
        )
    }

    /// Create a client against explicit endpoints, with a timeout on every request.
    pub fn with_endpoints(
        client_id: String,
        client_secret: String,
        base_url: String,
        token_url: String,
        timeout: std::time::Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token_url,
            client_id,
            client_secret,
        })
    }

    /// Fetch one page of the athlete's activities.
    pub async fn list_activities_page(
        &self,
        access_token: &str,
        after: i64, // Unix timestamp
        page: u32,
        per_page: u32,
    ) -> Result<Vec<RemoteActivitySummary>> {
        let url = format!("{}/athlete/activities", self.base_url);

        let response = self
            .http
            .get(&url)
            .bearer_auth(access_token)
            .query(&[
                ("after", after.to_string()),
                ("page", page.to_string()),
                ("per_page", per_page.to_string()),
            ])
            .send()
            .await
            .map_err(|e| send_error(e, Endpoint::Listing))?;

        check_response_json(response, Endpoint::Listing).await
    }

    /// Fetch the time-series streams of one activity.
    pub async fn get_streams(&self, access_token: &str, activity_id: u64) -> Result<RawStreamBundle> {
        let url = format!("{}/activities/{}/streams", self.base_url, activity_id);

        let response = self
            .http
            .get(&url)
            .bearer_auth(access_token)
            .query(&[("keys", STREAM_KEYS), ("key_by_type", "true")])
            .send()
            .await
            .map_err(|e| send_error(e, Endpoint::Detail))?;

        check_response_json(response, Endpoint::Detail).await
    }

    /// Fetch the laps of one activity.
    pub async fn get_laps(&self, access_token: &str, activity_id: u64) -> Result<Vec<RawLapResponse>> {
        let url = format!("{}/activities/{}/laps", self.base_url, activity_id);

        let response = self
            .http
            .get(&url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| send_error(e, Endpoint::Detail))?;

        check_response_json(response, Endpoint::Detail).await
    }

    /// Exchange a refresh token for a new token triple.
    pub async fn refresh_token(&self, refresh_token: &str) -> Result<TokenRefreshResponse> {
        let response = self
            .http
            .post(&self.token_url)
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await
            .map_err(|e| send_error(e, Endpoint::Token))?;

        check_response_json(response, Endpoint::Token).await
    }
}

fn send_error(err: reqwest::Error, endpoint: Endpoint) -> AppError {
    match endpoint {
        Endpoint::Token => AppError::TokenRefresh(format!("Token refresh request failed: {}", err)),
        _ if err.is_timeout() => AppError::Timeout(err.to_string()),
        _ => AppError::StravaApi(err.to_string()),
    }
}

/// Check response status and parse the JSON body.
async fn check_response_json<T: for<'de> Deserialize<'de>>(
    response: reqwest::Response,
    endpoint: Endpoint,
) -> Result<T> {
    let status = response.status();

    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after_seconds = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
        tracing::warn!(retry_after_seconds, "Strava rate limit hit (429)");
        return Err(AppError::RateLimited {
            retry_after_seconds,
        });
    }

    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(match endpoint {
            Endpoint::Token => AppError::TokenRefresh(format!("HTTP {}: {}", status, body)),
            // Access token rejected: no further call in this batch can succeed
            _ if status == StatusCode::UNAUTHORIZED => {
                AppError::TokenRefresh(format!("Access token rejected: {}", body))
            }
            Endpoint::Detail => AppError::DetailUnavailable(format!("HTTP {}", status)),
            Endpoint::Listing => AppError::StravaApi(format!("HTTP {}: {}", status, body)),
        });
    }

    response.json().await.map_err(|e| match endpoint {
        Endpoint::Token => AppError::TokenRefresh(format!("JSON parse error: {}", e)),
        Endpoint::Detail => AppError::DetailUnavailable(format!("JSON parse error: {}", e)),
        Endpoint::Listing if e.is_timeout() => AppError::Timeout(e.to_string()),
        Endpoint::Listing => AppError::StravaApi(format!("JSON parse error: {}", e)),
    })
}

/// Token refresh response from Strava.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenRefreshResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: i64,
}

impl From<TokenRefreshResponse> for TokenState {
    fn from(resp: TokenRefreshResponse) -> Self {
        TokenState {
            access_token: resp.access_token,
            refresh_token: resp.refresh_token,
            expires_at: resp.expires_at,
        }
    }
}

/// Summary activity from the list endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteActivitySummary {
    pub id: u64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub sport_type: String,
    pub start_date: String,
    #[serde(default)]
    pub elapsed_time: f64,
    #[serde(default)]
    pub moving_time: f64,
    #[serde(default)]
    pub distance: f64,
    pub max_speed: Option<f64>,
    pub average_heartrate: Option<f64>,
    pub max_heartrate: Option<f64>,
    pub total_elevation_gain: Option<f64>,
    pub average_cadence: Option<f64>,
    pub calories: Option<f64>,
}

/// One stream from a `key_by_type=true` response.
#[derive(Debug, Clone, Deserialize)]
pub struct Stream<T> {
    pub data: Vec<T>,
}

/// Streams keyed by type. Every stream is optional; most indoor activities
/// have no `latlng`, many have no heart rate.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawStreamBundle {
    /// Seconds since the activity start
    pub time: Option<Stream<f64>>,
    pub latlng: Option<Stream<[f64; 2]>>,
    pub altitude: Option<Stream<Option<f64>>>,
    pub heartrate: Option<Stream<Option<f64>>>,
    pub cadence: Option<Stream<Option<f64>>>,
    pub distance: Option<Stream<Option<f64>>>,
    pub velocity_smooth: Option<Stream<Option<f64>>>,
}

impl RawStreamBundle {
    /// Zip the streams into raw samples, one per `latlng` entry.
    ///
    /// Streams shorter than `latlng` leave the remaining samples without that value.
    pub fn to_points(&self, start: chrono::DateTime<chrono::Utc>) -> Vec<RawPoint> {
        let Some(latlng) = &self.latlng else {
            return Vec::new();
        };

        latlng
            .data
            .iter()
            .enumerate()
            .map(|(i, [lat, lon])| RawPoint {
                lat: Some(*lat),
                lon: Some(*lon),
                elevation: sample(&self.altitude, i),
                timestamp: self
                    .time
                    .as_ref()
                    .and_then(|t| t.data.get(i))
                    .and_then(|secs| offset_by_seconds(start, *secs)),
                heart_rate: sample(&self.heartrate, i),
                cadence: sample(&self.cadence, i),
            })
            .collect()
    }

    fn altitudes(&self) -> Vec<Option<f64>> {
        self.altitude
            .as_ref()
            .map(|s| s.data.clone())
            .unwrap_or_default()
    }
}

fn sample(stream: &Option<Stream<Option<f64>>>, index: usize) -> Option<f64> {
    stream.as_ref().and_then(|s| s.data.get(index).copied().flatten())
}

/// Lap from the laps endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct RawLapResponse {
    pub start_date: Option<String>,
    #[serde(default)]
    pub elapsed_time: f64,
    #[serde(default)]
    pub distance: f64,
    pub average_heartrate: Option<f64>,
    pub max_heartrate: Option<f64>,
    pub average_cadence: Option<f64>,
}

impl From<RawLapResponse> for RawLap {
    fn from(lap: RawLapResponse) -> Self {
        RawLap {
            start_time: lap.start_date.as_deref().and_then(parse_rfc3339_utc),
            duration_seconds: lap.elapsed_time,
            distance_meters: lap.distance,
            avg_heart_rate: lap.average_heartrate,
            max_heart_rate: lap.max_heartrate,
            cadence: lap.average_cadence,
            // Strava laps carry no energy figure
            calories: None,
        }
    }
}

/// Build the normalized activity for a remote summary and whatever detail was available.
pub fn normalize_remote(
    summary: &RemoteActivitySummary,
    streams: Option<&RawStreamBundle>,
    laps: Vec<RawLap>,
) -> Result<NormalizedActivity> {
    let started_at = parse_rfc3339_utc(&summary.start_date).ok_or_else(|| {
        AppError::Parse(format!(
            "Activity {} has invalid start_date {:?}",
            summary.id, summary.start_date
        ))
    })?;

    let elapsed = non_negative(summary.elapsed_time);
    let finished_at = offset_by_seconds(started_at, elapsed).ok_or_else(|| {
        AppError::Parse(format!(
            "Activity {} has out-of-range elapsed_time {}",
            summary.id, summary.elapsed_time
        ))
    })?;
    let moving = non_negative(summary.moving_time);
    let distance = non_negative(summary.distance);

    let (stream_gain, stream_loss) = streams
        .map(|s| elevation_gain_loss(s.altitudes()))
        .unwrap_or((None, None));

    let track = streams
        .map(|s| to_track(s.to_points(started_at)))
        .unwrap_or_default();

    Ok(NormalizedActivity {
        external_id: SourceKind::SyncedService.external_id(&summary.id.to_string()),
        source_kind: SourceKind::SyncedService,
        activity_type: ActivityType::from_strava_sport(&summary.sport_type),
        name: Some(summary.name.trim().to_string()).filter(|n| !n.is_empty()),
        started_at,
        finished_at,
        duration_seconds: elapsed,
        moving_time_seconds: moving,
        distance_meters: distance,
        avg_pace_sec_per_km: pace_sec_per_km(moving, distance),
        best_pace_sec_per_km: summary.max_speed.and_then(pace_from_speed),
        avg_heart_rate: round_u16(summary.average_heartrate),
        max_heart_rate: round_u16(summary.max_heartrate),
        elevation_gain_meters: summary
            .total_elevation_gain
            .filter(|g| g.is_finite() && *g >= 0.0)
            .or(stream_gain),
        elevation_loss_meters: stream_loss,
        avg_cadence: round_u16(summary.average_cadence),
        calories: summary
            .calories
            .filter(|c| c.is_finite() && *c > 0.0)
            .map(|c| c.round() as u32),
        track,
        splits: to_split_set(laps),
    })
}

fn non_negative(value: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        0.0
    }
}

fn round_u16(value: Option<f64>) -> Option<u16> {
    value
        .filter(|v| v.is_finite() && *v > 0.0 && *v < f64::from(u16::MAX))
        .map(|v| v.round() as u16)
}

// ─────────────────────────────────────────────────────────────────────────────
// ActivityClient - per-user client with token lifecycle
// ─────────────────────────────────────────────────────────────────────────────

/// Invoked with a freshly refreshed token; awaited before the request that
/// needed it is sent.
pub type TokenRefreshedHook = Arc<dyn Fn(TokenState) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Reads the currently stored token, for the double-check under the refresh lock.
pub type TokenReloadHook =
    Arc<dyn Fn() -> BoxFuture<'static, Result<Option<TokenState>>> + Send + Sync>;

/// Shared refresh locks, one per user id.
pub type RefreshLocks = Arc<DashMap<String, Arc<Mutex<()>>>>;

/// Remote activity provider as seen by the sync orchestrator.
pub trait RemoteActivitySource: Send + Sync {
    /// All activities started after `after`, newest first.
    fn list_activities(
        &self,
        after: i64,
        per_page: u32,
    ) -> BoxFuture<'_, Result<Vec<RemoteActivitySummary>>>;

    fn get_streams(&self, activity_id: u64) -> BoxFuture<'_, Result<RawStreamBundle>>;

    fn get_laps(&self, activity_id: u64) -> BoxFuture<'_, Result<Vec<RawLap>>>;
}

/// Stateful Strava client for one user.
///
/// Every request first makes sure the access token is valid for at least
/// the refresh margin. A refresh updates the in-memory token and then
/// awaits `on_token_refreshed` so the caller can persist it before any
/// request uses the new token.
pub struct ActivityClient {
    api: StravaApi,
    tokens: Mutex<TokenState>,
    refresh_margin_secs: i64,
    on_token_refreshed: TokenRefreshedHook,
    single_flight: Option<(Arc<Mutex<()>>, TokenReloadHook)>,
}

impl ActivityClient {
    pub fn new<F>(api: StravaApi, tokens: TokenState, on_token_refreshed: F) -> Self
    where
        F: Fn(TokenState) -> BoxFuture<'static, Result<()>> + Send + Sync + 'static,
    {
        Self {
            api,
            tokens: Mutex::new(tokens),
            refresh_margin_secs: 300,
            on_token_refreshed: Arc::new(on_token_refreshed),
            single_flight: None,
        }
    }

    pub fn with_refresh_margin(mut self, secs: i64) -> Self {
        self.refresh_margin_secs = secs;
        self
    }

    /// Serialize refreshes through `lock` and re-read the stored token with
    /// `reload` before refreshing, so a token another caller just refreshed
    /// is adopted instead of being replaced.
    pub fn with_single_flight(mut self, lock: Arc<Mutex<()>>, reload: TokenReloadHook) -> Self {
        self.single_flight = Some((lock, reload));
        self
    }

    /// Current in-memory token state.
    pub async fn token_state(&self) -> TokenState {
        self.tokens.lock().await.clone()
    }

    /// Get an access token valid for at least the refresh margin.
    async fn access_token(&self) -> Result<String> {
        let mut tokens = self.tokens.lock().await;
        let now = now_epoch_seconds();
        if !tokens.needs_refresh(now, self.refresh_margin_secs) {
            return Ok(tokens.access_token.clone());
        }

        let _guard = match &self.single_flight {
            Some((lock, _)) => Some(lock.lock().await),
            None => None,
        };

        // Another task may have refreshed while we were waiting
        if let Some(stored) = self.reload_valid(now).await? {
            *tokens = stored;
            return Ok(tokens.access_token.clone());
        }

        tracing::info!(expires_at = tokens.expires_at, "Access token expiring, refreshing");

        let refreshed: TokenState = match self.api.refresh_token(&tokens.refresh_token).await {
            Ok(resp) => resp.into(),
            Err(AppError::TokenRefresh(ref msg)) if msg.contains("invalid_grant") => {
                // Another instance may have won the refresh race and rotated
                // the refresh token; use its result if it is in the store.
                match self.reload_valid(now_epoch_seconds()).await? {
                    Some(stored) => {
                        tracing::info!("Refresh token race detected, adopting stored token");
                        *tokens = stored;
                        return Ok(tokens.access_token.clone());
                    }
                    None => return Err(AppError::TokenRefresh(msg.clone())),
                }
            }
            Err(e) => return Err(e),
        };

        *tokens = refreshed.clone();
        let access_token = refreshed.access_token.clone();

        (self.on_token_refreshed)(refreshed).await.map_err(|e| {
            AppError::TokenRefresh(format!("Failed to persist refreshed token: {}", e))
        })?;

        tracing::info!("Token refreshed and persisted");
        Ok(access_token)
    }

    /// Stored token, if a reload hook is set and the stored token is still valid.
    async fn reload_valid(&self, now: i64) -> Result<Option<TokenState>> {
        let Some((_, reload)) = &self.single_flight else {
            return Ok(None);
        };
        Ok(reload()
            .await?
            .filter(|stored| !stored.needs_refresh(now, self.refresh_margin_secs)))
    }

    /// List all activities after `after`, following pages until a short page.
    pub async fn list_activities(
        &self,
        after: i64,
        per_page: u32,
    ) -> Result<Vec<RemoteActivitySummary>> {
        let per_page = per_page.clamp(1, MAX_PER_PAGE);
        let mut activities = Vec::new();

        for page in 1..=MAX_PAGES {
            let access_token = self.access_token().await?;
            let batch = self
                .api
                .list_activities_page(&access_token, after, page, per_page)
                .await?;
            let len = batch.len();
            activities.extend(batch);

            if len < per_page as usize {
                break;
            }
            if page == MAX_PAGES {
                tracing::warn!(pages = MAX_PAGES, "Activity listing hit page cap");
            }
        }

        Ok(activities)
    }

    pub async fn get_streams(&self, activity_id: u64) -> Result<RawStreamBundle> {
        let access_token = self.access_token().await?;
        self.api.get_streams(&access_token, activity_id).await
    }

    pub async fn get_laps(&self, activity_id: u64) -> Result<Vec<RawLap>> {
        let access_token = self.access_token().await?;
        let laps = self.api.get_laps(&access_token, activity_id).await?;
        Ok(laps.into_iter().map(RawLap::from).collect())
    }
}

impl RemoteActivitySource for ActivityClient {
    fn list_activities(
        &self,
        after: i64,
        per_page: u32,
    ) -> BoxFuture<'_, Result<Vec<RemoteActivitySummary>>> {
        Box::pin(ActivityClient::list_activities(self, after, per_page))
    }

    fn get_streams(&self, activity_id: u64) -> BoxFuture<'_, Result<RawStreamBundle>> {
        Box::pin(ActivityClient::get_streams(self, activity_id))
    }

    fn get_laps(&self, activity_id: u64) -> BoxFuture<'_, Result<Vec<RawLap>>> {
        Box::pin(ActivityClient::get_laps(self, activity_id))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// StravaService - builds per-user clients wired to the Secret Store
// ─────────────────────────────────────────────────────────────────────────────

/// High-level Strava service shared across requests.
///
/// Clients built here persist refreshed tokens to the Secret Store and
/// serialize refreshes per user through `refresh_locks`.
#[derive(Clone)]
pub struct StravaService {
    api: StravaApi,
    secrets: Arc<dyn SecretStore>,
    refresh_locks: RefreshLocks,
    refresh_margin_secs: i64,
}

impl StravaService {
    pub fn new(
        api: StravaApi,
        secrets: Arc<dyn SecretStore>,
        refresh_locks: RefreshLocks,
        refresh_margin_secs: i64,
    ) -> Self {
        Self {
            api,
            secrets,
            refresh_locks,
            refresh_margin_secs,
        }
    }

    /// Build a client for `user_id` from its stored tokens.
    pub async fn client_for(&self, user_id: &str) -> Result<ActivityClient> {
        let tokens = self
            .secrets
            .get(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Strava tokens for user {}", user_id)))?;

        let lock = self
            .refresh_locks
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let persist = {
            let secrets = self.secrets.clone();
            let user_id = user_id.to_string();
            move |tokens: TokenState| -> BoxFuture<'static, Result<()>> {
                let secrets = secrets.clone();
                let user_id = user_id.clone();
                Box::pin(async move { secrets.set(&user_id, &tokens).await })
            }
        };

        let reload: TokenReloadHook = {
            let secrets = self.secrets.clone();
            let user_id = user_id.to_string();
            Arc::new(move || -> BoxFuture<'static, Result<Option<TokenState>>> {
                let secrets = secrets.clone();
                let user_id = user_id.clone();
                Box::pin(async move { secrets.get(&user_id).await })
            })
        };

        Ok(ActivityClient::new(self.api.clone(), tokens, persist)
            .with_refresh_margin(self.refresh_margin_secs)
            .with_single_flight(lock, reload))
    }

    /// Store a user's tokens (initial connection or manual rotation).
    pub async fn store_tokens(&self, user_id: &str, tokens: &TokenState) -> Result<()> {
        self.secrets.set(user_id, tokens).await?;
        tracing::info!(user_id, "Strava tokens stored");
        Ok(())
    }
}
