//! HTTP API for health checks, request intake and status queries

use crate::chain::{ChainKind, ChainManager};
use crate::config::ApiConfig;
use crate::coordination::engine::parse_tx_hash;
use crate::coordination::{FinalizerService, RequestSnapshot};
use crate::error::{FinalizerError, FinalizerResult};
use crate::state::RequestStats;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<FinalizerService>,
    pub chain_manager: Arc<ChainManager>,
}

/// Run the HTTP API server
pub async fn run_server(
    config: ApiConfig,
    service: Arc<FinalizerService>,
    chain_manager: Arc<ChainManager>,
) -> FinalizerResult<()> {
    let app = router(AppState {
        service,
        chain_manager,
    });

    let addr = format!("{}:{}", config.host, config.port);
    info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| FinalizerError::Internal(format!("bind {}: {}", addr, e)))?;
    axum::serve(listener, app)
        .await
        .map_err(|e| FinalizerError::Internal(format!("API server: {}", e)))?;

    Ok(())
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/requests", get(list_requests).post(submit_request))
        .route("/requests/:source_tx_hash", get(get_request))
        .route("/stats", get(get_stats))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Health check endpoint - basic liveness
async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Readiness check - every configured chain answers
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let chain_health = state.chain_manager.health_check().await;
    let ready = chain_health.iter().all(|(_, healthy)| *healthy);

    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(ReadinessResponse {
            ready,
            chains: chain_health
                .into_iter()
                .map(|(chain, healthy)| ChainHealth { chain, healthy })
                .collect(),
        }),
    )
}

/// Every known request, active and completed
async fn list_requests(State(state): State<AppState>) -> impl IntoResponse {
    let requests = state.service.book().requests();
    Json(RequestsResponse {
        count: requests.len(),
        requests,
    })
}

/// Status query by source transaction hash
async fn get_request(
    State(state): State<AppState>,
    Path(source_tx_hash): Path<String>,
) -> Result<Json<RequestSnapshot>, ApiError> {
    let hash = parse_tx_hash(&source_tx_hash)?;
    state
        .service
        .book()
        .request(&hash)
        .map(Json)
        .ok_or(ApiError::NotFound(source_tx_hash))
}

/// Request counts per outcome
async fn get_stats(State(state): State<AppState>) -> Result<Json<RequestStats>, ApiError> {
    Ok(Json(state.service.stats().await?))
}

/// Enqueue API
async fn submit_request(
    State(state): State<AppState>,
    Json(body): Json<SubmitRequest>,
) -> Result<(StatusCode, Json<RequestSnapshot>), ApiError> {
    state
        .service
        .submit(&body.from, &body.to, &body.source_tx_hash)
        .await?;

    let hash = parse_tx_hash(&body.source_tx_hash)?;
    let snapshot = state
        .service
        .book()
        .request(&hash)
        .ok_or_else(|| ApiError::NotFound(body.source_tx_hash.clone()))?;
    Ok((StatusCode::ACCEPTED, Json(snapshot)))
}

/// Errors surfaced to API callers
enum ApiError {
    BadRequest(String),
    NotFound(String),
    Internal(String),
}

impl From<FinalizerError> for ApiError {
    fn from(err: FinalizerError) -> Self {
        match err {
            FinalizerError::MalformedIdentifier(_)
            | FinalizerError::UnsupportedChain { .. }
            | FinalizerError::ChainNotFound { .. } => ApiError::BadRequest(err.to_string()),
            other => {
                warn!("API request failed: {}", other);
                ApiError::Internal(other.to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error) = match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::NotFound(hash) => (StatusCode::NOT_FOUND, format!("unknown request {}", hash)),
            ApiError::Internal(message) => (StatusCode::INTERNAL_SERVER_ERROR, message),
        };
        (status, Json(ErrorResponse { error })).into_response()
    }
}

// Request/response types

#[derive(Deserialize)]
struct SubmitRequest {
    from: String,
    to: String,
    source_tx_hash: String,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Serialize)]
struct ReadinessResponse {
    ready: bool,
    chains: Vec<ChainHealth>,
}

#[derive(Serialize)]
struct ChainHealth {
    chain: ChainKind,
    healthy: bool,
}

#[derive(Serialize)]
struct RequestsResponse {
    count: usize,
    requests: Vec<RequestSnapshot>,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}
