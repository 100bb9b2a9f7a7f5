// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
// Thin read-only surface over the service state, plus the publication
// artifact and single-key settings updates. Everything lives under `/api/v1/`
// except the artifact, which the arbitrage executor pulls from
// `/config/dynamic-strategy.toml`.
//
// CORS is configured permissively for development; tighten `allowed_origins`
// in production.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Json, Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::warn;

use crate::app_state::AppState;
use crate::publication;
use crate::store::{Pool, ScoreRecord, StatusChange, StoreError, Token};
use crate::types::TokenStatus;

/// Server-side cache lifetime for the rendered artifact. The HTTP
/// Cache-Control max-age matches it so downstream caches stay within the
/// required 60-second staleness bound.
const ARTIFACT_CACHE_TTL: Duration = Duration::from_secs(30);

const ARTIFACT_CACHE_KEY: &str = "dynamic-strategy.toml";

/// Default page size for token listings.
const DEFAULT_PAGE_LIMIT: usize = 50;

// =============================================================================
// Router construction
// =============================================================================

/// Build the full REST router with CORS middleware and shared state.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/stats", get(stats))
        .route("/api/v1/tokens", get(list_tokens))
        .route("/api/v1/tokens/:address", get(token_detail))
        .route("/api/v1/settings", get(get_settings))
        .route("/api/v1/settings", post(update_setting))
        .route("/config/dynamic-strategy.toml", get(strategy_artifact))
        .layer(cors)
        .with_state(state)
}

// =============================================================================
// Health & stats
// =============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    state_version: u64,
    server_time: i64,
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        state_version: state.current_state_version(),
        server_time: Utc::now().timestamp_millis(),
    })
}

async fn stats(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.build_snapshot())
}

// =============================================================================
// Tokens
// =============================================================================

#[derive(Debug, Deserialize)]
struct TokensQuery {
    status: Option<String>,
    limit: Option<usize>,
    offset: Option<usize>,
}

#[derive(Serialize)]
struct TokenListResponse {
    total: usize,
    tokens: Vec<Token>,
}

/// Parse a status filter from its query-string form.
fn parse_status(raw: &str) -> Option<TokenStatus> {
    match raw {
        "monitored" => Some(TokenStatus::Monitored),
        "active" => Some(TokenStatus::Active),
        "archived" => Some(TokenStatus::Archived),
        _ => None,
    }
}

async fn list_tokens(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TokensQuery>,
) -> impl IntoResponse {
    let status = match query.status.as_deref() {
        None => TokenStatus::Active,
        Some(raw) => match parse_status(raw) {
            Some(status) => status,
            None => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(serde_json::json!({
                        "error": format!("unknown status filter: {raw}")
                    })),
                )
                    .into_response()
            }
        },
    };

    let limit = query.limit.unwrap_or(DEFAULT_PAGE_LIMIT);
    let offset = query.offset.unwrap_or(0);

    match (
        state.store.list_by_status(status, limit, offset),
        state.store.count_by_status(status),
    ) {
        (Ok(tokens), Ok(total)) => Json(TokenListResponse { total, tokens }).into_response(),
        (Err(e), _) | (_, Err(e)) => store_error_response(e),
    }
}

#[derive(Serialize)]
struct TokenDetailResponse {
    token: Token,
    pools: Vec<Pool>,
    recent_scores: Vec<ScoreRecord>,
    status_history: Vec<StatusChange>,
}

async fn token_detail(
    State(state): State<Arc<AppState>>,
    Path(address): Path<String>,
) -> impl IntoResponse {
    let token = match state.store.get(&address) {
        Ok(Some(token)) => token,
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                Json(serde_json::json!({"error": format!("token not found: {address}")})),
            )
                .into_response()
        }
        Err(e) => return store_error_response(e),
    };

    let detail = (|| -> Result<TokenDetailResponse, StoreError> {
        Ok(TokenDetailResponse {
            pools: state.store.list_pools(&address, false)?,
            recent_scores: state.store.list_scores(&address, 20)?,
            status_history: state.store.list_status_history(&address, 20)?,
            token,
        })
    })();

    match detail {
        Ok(detail) => Json(detail).into_response(),
        Err(e) => store_error_response(e),
    }
}

// =============================================================================
// Settings
// =============================================================================

async fn get_settings(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.settings.snapshot().as_ref().clone())
}

#[derive(Debug, Deserialize)]
struct SettingUpdateRequest {
    key: String,
    value: serde_json::Value,
}

async fn update_setting(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SettingUpdateRequest>,
) -> impl IntoResponse {
    match state.settings.update_key(&request.key, request.value) {
        Ok(()) => {
            state.increment_version();
            Json(serde_json::json!({"status": "ok", "key": request.key})).into_response()
        }
        Err(e) => {
            warn!(key = %request.key, error = %e, "settings update rejected");
            (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(serde_json::json!({"error": e.to_string(), "key": request.key})),
            )
                .into_response()
        }
    }
}

// =============================================================================
// Publication artifact
// =============================================================================

async fn strategy_artifact(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    // Serve from the short-lived cache when possible; the generator itself is
    // pure so this only bounds rendering work, not correctness.
    let text = match state.artifact_cache.get(ARTIFACT_CACHE_KEY) {
        Some(cached) => cached.as_str().unwrap_or_default().to_string(),
        None => {
            let cfg = state.settings.snapshot();
            let artifact = match publication::generate(state.store.as_ref(), &cfg, Utc::now()) {
                Ok(artifact) => artifact,
                Err(e) => return store_error_response(e),
            };
            let text = match publication::render(&artifact) {
                Ok(text) => text,
                Err(e) => {
                    return (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        Json(serde_json::json!({"error": e.to_string()})),
                    )
                        .into_response()
                }
            };
            state.artifact_cache.set(
                ARTIFACT_CACHE_KEY,
                serde_json::Value::String(text.clone()),
                ARTIFACT_CACHE_TTL,
            );
            text
        }
    };

    (
        [
            (header::CONTENT_TYPE, "application/toml; charset=utf-8"),
            (header::CACHE_CONTROL, "public, max-age=60"),
        ],
        text,
    )
        .into_response()
}

// =============================================================================
// Error mapping
// =============================================================================

fn store_error_response(e: StoreError) -> axum::response::Response {
    let status = match e {
        StoreError::NotFound(_) => StatusCode::NOT_FOUND,
        StoreError::IllegalTransition { .. } => StatusCode::CONFLICT,
    };
    (status, Json(serde_json::json!({"error": e.to_string()}))).into_response()
}
