//! Named mutual exclusion for scheduled jobs
//!
//! [`AdvisoryLock::with_lock`] never waits: when the lock is held elsewhere it
//! returns `Ok(None)` and the caller skips this round.

mod memory;
mod overlap;
mod postgres;

pub use memory::InMemoryLockBackend;
pub use overlap::{OverlapGuard, OverlapPermit};
pub use postgres::PgAdvisoryLockBackend;

use crate::error::Result;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

/// Proof of holding a lock. Dropping it without [`LockHandle::release`]
/// must still free the lock eventually.
#[async_trait]
pub trait LockHandle: Send {
    async fn release(self: Box<Self>) -> Result<()>;
}

#[async_trait]
pub trait LockBackend: Send + Sync {
    /// Take the lock if it is free, `None` otherwise
    async fn try_acquire(&self, key: &str) -> Result<Option<Box<dyn LockHandle>>>;
}

#[derive(Clone)]
pub struct AdvisoryLock {
    backend: Arc<dyn LockBackend>,
}

impl AdvisoryLock {
    pub fn new(backend: Arc<dyn LockBackend>) -> Self {
        Self { backend }
    }

    /// Run `operation` while holding `key`.
    ///
    /// Returns `Ok(None)` without running it when the lock is taken. The lock
    /// is released whether `operation` succeeds or fails.
    pub async fn with_lock<T, F, Fut>(&self, key: &str, operation: F) -> Result<Option<T>>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<T>> + Send,
        T: Send,
    {
        let Some(handle) = self.backend.try_acquire(key).await? else {
            debug!(key, "Lock is held elsewhere, skipping");
            return Ok(None);
        };

        let result = operation().await;
        let released = handle.release().await;

        match (result, released) {
            (Ok(value), Ok(())) => Ok(Some(value)),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), released) => {
                if let Err(release_error) = released {
                    warn!(key, "Failed to release lock after error: {}", release_error);
                }
                Err(e)
            }
        }
    }
}
