//! REST endpoint handlers

use super::error::ApiError;
use crate::error::AppError;
use crate::exchanges::types::{ApiCredentials, ExchangeName};
use crate::progress::{MarketMakingChecker, MarketMakingResult, ProgressCheckInput};
use crate::scheduler::LastTick;
use crate::state::AppState;
use axum::extract::rejection::JsonRejection;
use axum::extract::{OriginalUri, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub cache: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_progress_check: Option<LastTick>,
}

/// Health check - GET /health
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let cache_up = match state.cache.ping().await {
        Ok(()) => true,
        Err(e) => {
            warn!("Cache backend is not responding: {}", e);
            false
        }
    };

    let body = HealthResponse {
        status: if cache_up { "ok" } else { "degraded" },
        cache: if cache_up { "up" } else { "down" },
        last_progress_check: state.scheduler.as_ref().and_then(|s| s.last_tick()),
    };
    let status = if cache_up { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };

    (status, Json(body))
}

/// Supported exchanges - GET /exchanges
pub async fn list_exchanges(State(state): State<AppState>) -> Json<Vec<ExchangeName>> {
    Json(state.exchanges.supported())
}

#[derive(Debug, Deserialize)]
pub struct MarketMakingProgressRequest {
    pub exchange_name: String,
    pub api_key: String,
    pub secret: String,
    pub pair: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
}

/// One-shot market making check - POST /progress/market-making
pub async fn check_market_making(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    payload: Result<Json<MarketMakingProgressRequest>, JsonRejection>,
) -> Result<Json<MarketMakingResult>, ApiError> {
    let path = uri.path();
    let Json(request) =
        payload.map_err(|rejection| ApiError::new(AppError::Validation(rejection.body_text()), path))?;

    let exchange_name: ExchangeName = request.exchange_name.parse().map_err(|e| ApiError::new(e, path))?;
    let input = ProgressCheckInput {
        exchange_name,
        credentials: ApiCredentials::new(request.api_key, request.secret),
        pair: request.pair,
        start_date: request.start_date,
        end_date: request.end_date,
    };

    MarketMakingChecker::new(state.pagination_limits())
        .check_input(&state.exchanges, &input)
        .await
        .map(Json)
        .map_err(|e| ApiError::new(e, path))
}
