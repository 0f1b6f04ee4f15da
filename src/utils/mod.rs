//! Small shared helpers

use crate::error::{AppError, Result};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::future::Future;
use std::time::Duration;

/// SHA-256 hex digest, used to reference API keys in logs
pub fn hash_string(value: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(value.as_bytes());
    hex::encode(hasher.finalize())
}

/// Hex-encoded HMAC-SHA256 of `payload`, the request signature most exchanges expect
pub fn hmac_sha256_hex(secret: &str, payload: &str) -> Result<String> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|e| AppError::Internal(format!("Invalid HMAC key: {}", e)))?;
    mac.update(payload.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Current time in milliseconds since epoch
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Run `operation`, failing with [`AppError::Timeout`] once `timeout` elapses
pub async fn with_timeout<T, F>(operation: F, timeout: Duration, message: &str) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, operation).await {
        Ok(result) => result,
        Err(_) => Err(AppError::Timeout(message.to_string())),
    }
}
