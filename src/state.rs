//! Application state management

use crate::cache::{CacheManager, CacheStore, MemoryCacheStore, RedisCacheStore};
use crate::config::{AppConfig, CacheBackendKind, LockBackendKind};
use crate::error::Result;
use crate::exchanges::pagination::PaginationLimits;
use crate::exchanges::ExchangeApiClientFactory;
use crate::lock::{AdvisoryLock, InMemoryLockBackend, LockBackend, PgAdvisoryLockBackend};
use crate::progress::CampaignsCache;
use crate::scheduler::{ProgressCheckScheduler, StaticCampaignSource};
use std::sync::Arc;
use tracing::info;

/// Application state shared by the HTTP server and the scheduler
#[derive(Clone)]
pub struct AppState {
    /// Immutable configuration built at startup
    pub config: Arc<AppConfig>,

    /// Exchange client registry
    pub exchanges: Arc<ExchangeApiClientFactory>,

    pub cache: CacheManager,

    pub campaigns_cache: CampaignsCache,

    pub lock: AdvisoryLock,

    /// Present when the progress check job runs in this process
    pub scheduler: Option<Arc<ProgressCheckScheduler>>,
}

impl AppState {
    /// Connect the configured backends
    pub async fn new(config: AppConfig) -> Result<Self> {
        let store: Arc<dyn CacheStore> = match config.cache.backend {
            CacheBackendKind::Redis => Arc::new(RedisCacheStore::connect(&config.cache.url).await?),
            CacheBackendKind::Memory => Arc::new(MemoryCacheStore::new()),
        };

        let lock_backend: Arc<dyn LockBackend> = match config.lock.backend {
            LockBackendKind::Postgres => {
                Arc::new(PgAdvisoryLockBackend::connect(&config.lock.url, config.lock.max_connections).await?)
            }
            LockBackendKind::Memory => Arc::new(InMemoryLockBackend::new()),
        };

        let state = Self::with_backends(config, store, lock_backend)?;
        info!(
            cache_backend = ?state.config.cache.backend,
            cache_namespace = state.cache.namespace(),
            lock_backend = ?state.config.lock.backend,
            "Application state initialized"
        );
        Ok(state)
    }

    pub fn with_backends(
        config: AppConfig,
        store: Arc<dyn CacheStore>,
        lock_backend: Arc<dyn LockBackend>,
    ) -> Result<Self> {
        let cache = CacheManager::new(config.cache.namespace.clone(), store)?;
        let exchanges = Arc::new(ExchangeApiClientFactory::new(config.exchanges.clone())?);

        Ok(Self {
            campaigns_cache: CampaignsCache::new(cache.clone()),
            cache,
            exchanges,
            lock: AdvisoryLock::new(lock_backend),
            scheduler: None,
            config: Arc::new(config),
        })
    }

    /// Attach a progress check scheduler over the campaigns from config
    pub fn with_scheduler(mut self) -> Self {
        let source = Arc::new(StaticCampaignSource::new(self.config.campaigns.clone()));
        self.scheduler = Some(Arc::new(ProgressCheckScheduler::new(
            source,
            self.exchanges.clone(),
            self.lock.clone(),
            self.campaigns_cache.clone(),
            self.config.progress.clone(),
        )));
        self
    }

    pub fn pagination_limits(&self) -> PaginationLimits {
        PaginationLimits {
            max_pages: self.config.progress.max_pages,
        }
    }
}
