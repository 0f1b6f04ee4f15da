//! Application error types

use crate::exchanges::types::ExchangePermission;
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Exchange not supported: {0}")]
    UnsupportedExchange(String),

    #[error("Exchange error: {0}")]
    Exchange(String),

    #[error("Exchange access error ({exchange}, {permission}): {message}")]
    ExchangeAccess {
        exchange: String,
        permission: ExchangePermission,
        message: String,
    },

    #[error("Pagination error: {0}")]
    Pagination(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Lock error: {0}")]
    Lock(String),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<redis::RedisError> for AppError {
    fn from(err: redis::RedisError) -> Self {
        AppError::Cache(err.to_string())
    }
}

impl From<figment::Error> for AppError {
    fn from(err: figment::Error) -> Self {
        AppError::Config(err.to_string())
    }
}

impl AppError {
    /// Whether the error was caused by the caller's input rather than infrastructure
    pub fn is_validation(&self) -> bool {
        matches!(self, AppError::Validation(_) | AppError::UnsupportedExchange(_))
    }

    /// Whether the error came from talking to an exchange
    pub fn is_exchange(&self) -> bool {
        matches!(
            self,
            AppError::Exchange(_) | AppError::ExchangeAccess { .. } | AppError::Http(_)
        )
    }
}

/// Serializable error response, the same shape for every failing request
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub message: String,
    pub timestamp: String,
    pub path: String,
}

impl ErrorResponse {
    pub fn new(err: &AppError, path: &str) -> Self {
        let message = match err {
            AppError::Validation(_)
            | AppError::UnsupportedExchange(_)
            | AppError::ExchangeAccess { .. }
            | AppError::Pagination(_)
            | AppError::Timeout(_) => err.to_string(),
            AppError::Exchange(_) | AppError::Http(_) => "Exchange request failed".to_string(),
            _ => "Internal server error".to_string(),
        };

        Self {
            message,
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            path: path.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
