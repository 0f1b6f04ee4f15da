use super::{LockBackend, LockHandle};
use crate::error::{AppError, Result};
use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Postgres;
use std::time::Duration;
use tracing::{info, warn};

/// Session-level Postgres advisory locks.
///
/// Each held lock pins one pooled connection, since the lock belongs to the
/// database session that took it.
#[derive(Clone)]
pub struct PgAdvisoryLockBackend {
    pool: PgPool,
}

impl PgAdvisoryLockBackend {
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect(url)
            .await?;
        info!(max_connections, "Connected to lock backend");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LockBackend for PgAdvisoryLockBackend {
    async fn try_acquire(&self, key: &str) -> Result<Option<Box<dyn LockHandle>>> {
        let mut conn = self.pool.acquire().await?;

        let acquired: bool = sqlx::query_scalar("SELECT pg_try_advisory_lock(hashtext($1))")
            .bind(key)
            .fetch_one(&mut *conn)
            .await?;

        if !acquired {
            return Ok(None);
        }

        Ok(Some(Box::new(PgLockHandle {
            conn: Some(conn),
            key: key.to_string(),
        })))
    }
}

struct PgLockHandle {
    conn: Option<PoolConnection<Postgres>>,
    key: String,
}

#[async_trait]
impl LockHandle for PgLockHandle {
    async fn release(mut self: Box<Self>) -> Result<()> {
        let Some(mut conn) = self.conn.take() else {
            return Ok(());
        };

        let unlocked = sqlx::query_scalar::<_, bool>("SELECT pg_advisory_unlock(hashtext($1))")
            .bind(&self.key)
            .fetch_one(&mut *conn)
            .await;

        match unlocked {
            Ok(true) => Ok(()),
            Ok(false) => {
                // not held by this session anymore, do not hand the session back
                let _ = conn.detach();
                Err(AppError::Lock(format!("Advisory lock {} was not held on release", self.key)))
            }
            Err(e) => {
                let _ = conn.detach();
                Err(e.into())
            }
        }
    }
}

impl Drop for PgLockHandle {
    fn drop(&mut self) {
        // closing the session makes Postgres drop the lock
        if let Some(conn) = self.conn.take() {
            warn!(key = %self.key, "Advisory lock dropped without release, closing its session");
            drop(conn.detach());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::AdvisoryLock;
    use std::sync::Arc;

    // cargo test -- --ignored, with HUFI_TEST_DATABASE_URL pointing at a scratch database
    async fn backend() -> Option<PgAdvisoryLockBackend> {
        let url = std::env::var("HUFI_TEST_DATABASE_URL").ok()?;
        Some(PgAdvisoryLockBackend::connect(&url, 4).await.unwrap())
    }

    fn key() -> String {
        format!("hufi-test:{}", uuid::Uuid::new_v4())
    }

    #[tokio::test]
    #[ignore]
    async fn test_second_session_is_refused_until_release() {
        let Some(backend) = backend().await else { return };
        let key = key();

        let handle = backend.try_acquire(&key).await.unwrap().unwrap();
        assert!(backend.try_acquire(&key).await.unwrap().is_none());

        handle.release().await.unwrap();
        let again = backend.try_acquire(&key).await.unwrap().unwrap();
        again.release().await.unwrap();
    }

    #[tokio::test]
    #[ignore]
    async fn test_dropped_handle_frees_lock() {
        let Some(backend) = backend().await else { return };
        let key = key();

        drop(backend.try_acquire(&key).await.unwrap().unwrap());

        // the server notices the closed session asynchronously
        let mut reacquired = None;
        for _ in 0..50 {
            reacquired = backend.try_acquire(&key).await.unwrap();
            if reacquired.is_some() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }
        reacquired.unwrap().release().await.unwrap();
    }

    #[tokio::test]
    #[ignore]
    async fn test_with_lock_over_postgres() {
        let Some(backend) = backend().await else { return };
        let lock = AdvisoryLock::new(Arc::new(backend));
        let key = key();

        let outer = lock
            .with_lock(&key, || async {
                let inner = lock.with_lock(&key, || async { Ok(1) }).await?;
                Ok(inner)
            })
            .await
            .unwrap();

        assert_eq!(outer, Some(None));
    }
}
