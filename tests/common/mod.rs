// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Form, Json, Router,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use stride_tracker::config::Config;
use stride_tracker::db::{FirestoreDb, MemoryStore};
use stride_tracker::routes::create_router;
use stride_tracker::services::StravaApi;
use stride_tracker::AppState;
use tokio_util::sync::CancellationToken;

/// Check if emulator is available via environment variable.
#[allow(dead_code)]
pub fn emulator_available() -> bool {
    std::env::var("FIRESTORE_EMULATOR_HOST").is_ok()
}

/// Skip test with message if emulator not available.
#[macro_export]
macro_rules! require_emulator {
    () => {
        if !crate::common::emulator_available() {
            eprintln!("⚠️  Skipping: FIRESTORE_EMULATOR_HOST not set");
            return;
        }
    };
}

/// Create a test database connection.
#[allow(dead_code)]
pub async fn test_db() -> FirestoreDb {
    FirestoreDb::new("test-project")
        .await
        .expect("Failed to connect to Firestore emulator")
}

/// Unique id for test isolation against a shared emulator.
#[allow(dead_code)]
pub fn unique_user_id(prefix: &str) -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    format!("{}-{}", prefix, nanos)
}

/// Create a test app backed by an in-memory store.
/// Returns the router, the shared state and the store.
#[allow(dead_code)]
pub fn create_test_app(config: Config) -> (axum::Router, Arc<AppState>, MemoryStore) {
    let store = MemoryStore::new();
    let state = Arc::new(
        AppState::new(
            config,
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            CancellationToken::new(),
        )
        .expect("Failed to build app state"),
    );
    (create_router(state.clone()), state, store)
}

/// `Authorization` header value for `user_id`.
#[allow(dead_code)]
pub fn bearer(user_id: &str, config: &Config) -> String {
    let token = stride_tracker::middleware::auth::create_jwt(user_id, &config.jwt_signing_key)
        .expect("Failed to create JWT");
    format!("Bearer {}", token)
}

/// Summary JSON as returned by the activity list endpoint.
#[allow(dead_code)]
pub fn activity_json(id: u64) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "name": format!("Run {}", id),
        "sport_type": "Run",
        "start_date": format!("2024-05-{:02}T14:00:00Z", (id % 28) + 1),
        "elapsed_time": 1600,
        "moving_time": 1500,
        "distance": 5000.0,
        "max_speed": 4.0,
        "average_heartrate": 150.0
    })
}

// ─── Mock Strava server ──────────────────────────────────────

/// Behavior and call log of the mock Strava API.
#[derive(Default)]
pub struct MockStravaState {
    pub activities: Vec<serde_json::Value>,
    /// Activity ids whose streams and laps return 404
    pub missing_details: HashSet<u64>,
    /// Activity ids whose streams return 429
    pub rate_limited_details: HashSet<u64>,
    pub rate_limit_listing: bool,
    /// Delay before answering detail requests
    pub detail_delay: Option<Duration>,
    /// Token endpoint answers `invalid_grant`
    pub refresh_fails: bool,
    pub refresh_calls: AtomicUsize,
    pub events: Mutex<Vec<String>>,
}

impl MockStravaState {
    pub fn record(&self, event: impl Into<String>) {
        self.events.lock().unwrap().push(event.into());
    }

    #[allow(dead_code)]
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    #[allow(dead_code)]
    pub fn refresh_count(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }
}

pub struct MockStrava {
    pub api_base: String,
    pub token_url: String,
    pub state: Arc<MockStravaState>,
}

impl MockStrava {
    /// API client against this server.
    #[allow(dead_code)]
    pub fn api(&self, timeout: Duration) -> StravaApi {
        StravaApi::with_endpoints(
            "test_client_id".to_string(),
            "test_secret".to_string(),
            self.api_base.clone(),
            self.token_url.clone(),
            timeout,
        )
        .unwrap()
    }

    /// Test config pointing at this server.
    #[allow(dead_code)]
    pub fn config(&self) -> Config {
        Config {
            strava_api_base: self.api_base.clone(),
            strava_token_url: self.token_url.clone(),
            ..Config::test_default()
        }
    }
}

/// Start a mock Strava API on an ephemeral port.
#[allow(dead_code)]
pub async fn spawn_mock_strava(state: MockStravaState) -> MockStrava {
    let state = Arc::new(state);
    let app = Router::new()
        .route("/api/v3/athlete/activities", get(list_activities))
        .route("/api/v3/activities/{id}/streams", get(get_streams))
        .route("/api/v3/activities/{id}/laps", get(get_laps))
        .route("/oauth/token", post(refresh_token))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    MockStrava {
        api_base: format!("http://{}/api/v3", addr),
        token_url: format!("http://{}/oauth/token", addr),
        state,
    }
}

fn bearer_token(headers: &HeaderMap) -> String {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or("")
        .to_string()
}

fn rate_limited(retry_after: &'static str) -> Response {
    (
        StatusCode::TOO_MANY_REQUESTS,
        [(header::RETRY_AFTER, retry_after)],
        Json(serde_json::json!({"message": "Rate Limit Exceeded"})),
    )
        .into_response()
}

fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({"message": "Resource Not Found"})),
    )
        .into_response()
}

async fn list_activities(
    State(state): State<Arc<MockStravaState>>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let page: usize = params.get("page").and_then(|p| p.parse().ok()).unwrap_or(1);
    let per_page: usize = params
        .get("per_page")
        .and_then(|p| p.parse().ok())
        .unwrap_or(30);
    state.record(format!("list:{}:{}", page, bearer_token(&headers)));

    if state.rate_limit_listing {
        return rate_limited("120");
    }

    let start = (page - 1) * per_page;
    let items: Vec<serde_json::Value> = state
        .activities
        .iter()
        .skip(start)
        .take(per_page)
        .cloned()
        .collect();
    Json(items).into_response()
}

async fn get_streams(
    State(state): State<Arc<MockStravaState>>,
    headers: HeaderMap,
    Path(id): Path<u64>,
) -> Response {
    state.record(format!("streams:{}:{}", id, bearer_token(&headers)));
    if let Some(delay) = state.detail_delay {
        tokio::time::sleep(delay).await;
    }
    if state.rate_limited_details.contains(&id) {
        return rate_limited("60");
    }
    if state.missing_details.contains(&id) {
        return not_found();
    }

    Json(serde_json::json!({
        "time": {"data": [0, 10, 20], "series_type": "distance"},
        "latlng": {"data": [[37.0, -122.0], [37.0004, -122.0], [37.0008, -122.0]]},
        "altitude": {"data": [10.0, 12.5, 11.0]},
        "heartrate": {"data": [140, 145, 150]}
    }))
    .into_response()
}

async fn get_laps(
    State(state): State<Arc<MockStravaState>>,
    headers: HeaderMap,
    Path(id): Path<u64>,
) -> Response {
    state.record(format!("laps:{}:{}", id, bearer_token(&headers)));
    if state.missing_details.contains(&id) {
        return not_found();
    }

    Json(serde_json::json!([
        {"lap_index": 1, "start_date": "2024-05-01T14:00:00Z", "elapsed_time": 800, "distance": 2500.0},
        {"lap_index": 2, "start_date": "2024-05-01T14:13:20Z", "elapsed_time": 800, "distance": 2500.0}
    ]))
    .into_response()
}

async fn refresh_token(
    State(state): State<Arc<MockStravaState>>,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    let n = state.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;
    state.record("refresh");

    if state.refresh_fails || form.get("grant_type").map(String::as_str) != Some("refresh_token") {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({
                "message": "Bad Request",
                "errors": [{"resource": "RefreshToken", "field": "refresh_token", "code": "invalid_grant"}]
            })),
        )
            .into_response();
    }

    let expires_at = chrono::Utc::now().timestamp() + 6 * 60 * 60;
    Json(serde_json::json!({
        "token_type": "Bearer",
        "access_token": format!("fresh_access_{}", n),
        "refresh_token": format!("fresh_refresh_{}", n),
        "expires_at": expires_at,
        "expires_in": 21600
    }))
    .into_response()
}
