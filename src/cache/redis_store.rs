use super::{CacheStore, CachedValue, Expiry};
use crate::error::Result;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::info;

/// Redis/Valkey store over a reconnecting connection manager
#[derive(Clone)]
pub struct RedisCacheStore {
    connection: ConnectionManager,
}

impl RedisCacheStore {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let connection = client.get_connection_manager().await?;
        info!("Connected to cache backend");
        Ok(Self { connection })
    }
}

#[async_trait]
impl CacheStore for RedisCacheStore {
    async fn get(&self, key: &str) -> Result<Option<CachedValue>> {
        let mut conn = self.connection.clone();
        let raw: Option<Vec<u8>> = conn.get(key).await?;

        Ok(raw.map(|bytes| match String::from_utf8(bytes) {
            Ok(text) => CachedValue::Text(text),
            Err(e) => CachedValue::Bytes(e.into_bytes()),
        }))
    }

    async fn set(&self, key: &str, value: CachedValue, expiry: Option<Expiry>) -> Result<()> {
        let mut conn = self.connection.clone();

        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value.as_bytes());
        match expiry {
            Some(Expiry::Ttl(ttl)) => {
                cmd.arg("PX").arg(u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX));
            }
            Some(Expiry::At(at)) => {
                cmd.arg("PXAT").arg(at.timestamp_millis());
            }
            None => {}
        }

        let (): () = cmd.query_async(&mut conn).await?;
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<bool> {
        let mut conn = self.connection.clone();
        let removed: i64 = conn.del(key).await?;
        Ok(removed > 0)
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.connection.clone();
        let _pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}
