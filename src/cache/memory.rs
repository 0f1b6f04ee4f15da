use super::{CacheStore, CachedValue, Expiry};
use crate::error::Result;
use crate::utils::now_ms;
use async_trait::async_trait;
use dashmap::DashMap;

struct Entry {
    value: CachedValue,
    /// ms since epoch
    expires_at: Option<i64>,
}

impl Entry {
    fn is_expired(&self, now: i64) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Process-local store, expired entries are dropped when touched
#[derive(Default)]
pub struct MemoryCacheStore {
    entries: DashMap<String, Entry>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &str) -> Result<Option<CachedValue>> {
        let now = now_ms();
        self.entries.remove_if(key, |_, entry| entry.is_expired(now));
        Ok(self.entries.get(key).map(|entry| entry.value.clone()))
    }

    async fn set(&self, key: &str, value: CachedValue, expiry: Option<Expiry>) -> Result<()> {
        let expires_at = expiry.map(|e| e.deadline_ms(now_ms()));
        self.entries.insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<bool> {
        let now = now_ms();
        Ok(self
            .entries
            .remove(key)
            .is_some_and(|(_, entry)| !entry.is_expired(now)))
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
