//! HTTP API
//!
//! Provides:
//! - Health check with cache backend liveness (/health)
//! - Supported exchanges (/exchanges)
//! - One-shot market making progress check (/progress/market-making)

mod error;
pub mod handlers;

pub use error::ApiError;

use crate::config::ApiConfig;
use crate::error::{AppError, Result};
use crate::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use std::future::Future;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/exchanges", get(handlers::list_exchanges))
        .route("/progress/market-making", post(handlers::check_market_making))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the API until `shutdown` resolves
pub async fn serve<F>(config: &ApiConfig, state: AppState, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|e| AppError::Config(format!("Invalid address: {}", e)))?;

    let listener = TcpListener::bind(addr).await?;
    info!("API server listening on {}", addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("API server stopped");
    Ok(())
}
