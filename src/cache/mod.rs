//! Namespaced key-value cache
//!
//! Every key is stored as `<namespace>:<key>`, so several services can share
//! one Redis/Valkey instance. Entries may carry a relative TTL or an
//! absolute expiry time.

mod memory;
mod redis_store;

pub use memory::MemoryCacheStore;
pub use redis_store::RedisCacheStore;

use crate::error::{AppError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub const KEY_SEPARATOR: &str = ":";

/// Value as it comes out of the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CachedValue {
    Text(String),
    Bytes(Vec<u8>),
}

impl CachedValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            CachedValue::Text(text) => Some(text),
            CachedValue::Bytes(bytes) => std::str::from_utf8(bytes).ok(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            CachedValue::Text(text) => text.as_bytes(),
            CachedValue::Bytes(bytes) => bytes,
        }
    }
}

impl From<String> for CachedValue {
    fn from(value: String) -> Self {
        CachedValue::Text(value)
    }
}

impl From<&str> for CachedValue {
    fn from(value: &str) -> Self {
        CachedValue::Text(value.to_string())
    }
}

impl From<Vec<u8>> for CachedValue {
    fn from(value: Vec<u8>) -> Self {
        CachedValue::Bytes(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    /// Relative to now, millisecond precision
    Ttl(Duration),
    /// Absolute point in time
    At(DateTime<Utc>),
}

impl Expiry {
    /// Absolute expiry in ms since epoch
    pub fn deadline_ms(&self, now_ms: i64) -> i64 {
        match self {
            Expiry::Ttl(ttl) => now_ms.saturating_add(i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX)),
            Expiry::At(at) => at.timestamp_millis(),
        }
    }
}

/// Physical storage behind [`CacheManager`], working on already namespaced keys
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<CachedValue>>;

    async fn set(&self, key: &str, value: CachedValue, expiry: Option<Expiry>) -> Result<()>;

    /// Returns whether a key was actually removed
    async fn del(&self, key: &str) -> Result<bool>;

    async fn ping(&self) -> Result<()>;
}

#[derive(Clone)]
pub struct CacheManager {
    namespace: String,
    store: Arc<dyn CacheStore>,
}

impl CacheManager {
    pub fn new(namespace: impl Into<String>, store: Arc<dyn CacheStore>) -> Result<Self> {
        let namespace = namespace.into();
        if namespace.trim().is_empty() {
            return Err(AppError::Config("Cache namespace must be non-empty string".to_string()));
        }
        Ok(Self { namespace, store })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn make_cache_key<S: AsRef<str>>(parts: &[S]) -> String {
        parts
            .iter()
            .map(AsRef::as_ref)
            .collect::<Vec<_>>()
            .join(KEY_SEPARATOR)
    }

    fn physical_key(&self, key: &str) -> String {
        Self::make_cache_key(&[self.namespace.as_str(), key])
    }

    pub async fn get(&self, key: &str) -> Result<Option<CachedValue>> {
        self.store.get(&self.physical_key(key)).await
    }

    pub async fn set(&self, key: &str, value: impl Into<CachedValue>, expiry: Option<Expiry>) -> Result<()> {
        if let Some(Expiry::Ttl(ttl)) = expiry {
            if ttl.as_millis() == 0 {
                return Err(AppError::Validation("Cache TTL must be at least 1ms".to_string()));
            }
        }

        let key = self.physical_key(key);
        debug!(%key, ?expiry, "Setting cache entry");
        self.store.set(&key, value.into(), expiry).await
    }

    pub async fn del(&self, key: &str) -> Result<bool> {
        self.store.del(&self.physical_key(key)).await
    }

    /// Backend liveness
    pub async fn ping(&self) -> Result<()> {
        self.store.ping().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn manager(namespace: &str) -> (CacheManager, Arc<MemoryCacheStore>) {
        let store = Arc::new(MemoryCacheStore::new());
        (CacheManager::new(namespace, store.clone()).unwrap(), store)
    }

    #[test]
    fn test_make_cache_key() {
        assert_eq!(CacheManager::make_cache_key(&["0xabc", "interim_progress"]), "0xabc:interim_progress");
        assert_eq!(CacheManager::make_cache_key(&["single"]), "single");
    }

    #[test]
    fn test_rejects_empty_namespace() {
        let store = Arc::new(MemoryCacheStore::new());
        assert!(matches!(CacheManager::new("  ", store), Err(AppError::Config(_))));
    }

    #[tokio::test]
    async fn test_round_trip_and_delete() {
        let (cache, _) = manager("oracle");

        cache.set("key", "value", Some(Expiry::Ttl(Duration::from_secs(60)))).await.unwrap();
        assert_eq!(cache.get("key").await.unwrap(), Some(CachedValue::Text("value".to_string())));

        assert!(cache.del("key").await.unwrap());
        assert_eq!(cache.get("key").await.unwrap(), None);
        assert!(!cache.del("key").await.unwrap());
    }

    #[tokio::test]
    async fn test_keys_are_namespaced() {
        let (first, store) = manager("first");
        let second = CacheManager::new("second", store.clone()).unwrap();

        first.set("shared", "one", None).await.unwrap();
        second.set("shared", "two", None).await.unwrap();

        assert_eq!(first.get("shared").await.unwrap().unwrap().as_text(), Some("one"));
        assert_eq!(second.get("shared").await.unwrap().unwrap().as_text(), Some("two"));
        assert!(store.get("first:shared").await.unwrap().is_some());
    }

    #[rstest]
    #[case(Duration::ZERO)]
    #[case(Duration::from_micros(999))]
    #[tokio::test]
    async fn test_rejects_sub_millisecond_ttl(#[case] ttl: Duration) {
        let (cache, store) = manager("oracle");
        let result = cache.set("key", "value", Some(Expiry::Ttl(ttl))).await;
        assert!(matches!(result, Err(AppError::Validation(_))));
        assert_eq!(store.get("oracle:key").await.unwrap(), None);
    }

    #[test]
    fn test_expiry_deadline() {
        assert_eq!(Expiry::Ttl(Duration::from_millis(1500)).deadline_ms(1000), 2500);

        let at = DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z").unwrap().with_timezone(&Utc);
        assert_eq!(Expiry::At(at).deadline_ms(0), 1735689600000);
    }
}
