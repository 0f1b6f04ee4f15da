use crate::error::{AppError, ErrorResponse};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::{error, warn};

/// Failed request, rendered as [`ErrorResponse`]
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorResponse,
}

impl ApiError {
    pub fn new(err: AppError, path: &str) -> Self {
        let status = status_for(&err);
        if status.is_server_error() {
            error!(path, "Request failed: {}", err);
        } else {
            warn!(path, "Request rejected: {}", err);
        }

        Self {
            status,
            body: ErrorResponse::new(&err, path),
        }
    }
}

pub fn status_for(err: &AppError) -> StatusCode {
    if err.is_validation() {
        StatusCode::BAD_REQUEST
    } else if matches!(err, AppError::ExchangeAccess { .. }) {
        StatusCode::FORBIDDEN
    } else if err.is_exchange() {
        StatusCode::BAD_GATEWAY
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}
