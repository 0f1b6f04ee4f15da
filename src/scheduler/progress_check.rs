//! Periodic campaign progress check
//!
//! Every tick recomputes the progress of each running campaign over
//! `[start, now)` and stores it as interim progress. Ticks never overlap
//! inside a process, and a campaign is checked by one process at a time
//! thanks to the advisory lock.

use crate::config::{CampaignEntry, ProgressConfig};
use crate::error::Result;
use crate::exchanges::pagination::PaginationLimits;
use crate::exchanges::ExchangeApiClientFactory;
use crate::lock::{AdvisoryLock, OverlapGuard};
use crate::progress::{check_campaign_progress, CampaignsCache};
use crate::utils::with_timeout;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Where the scheduler gets campaigns and their participants from
#[async_trait]
pub trait CampaignSource: Send + Sync {
    async fn campaigns(&self) -> Result<Vec<CampaignEntry>>;
}

/// Campaigns fixed at startup
pub struct StaticCampaignSource {
    campaigns: Vec<CampaignEntry>,
}

impl StaticCampaignSource {
    pub fn new(campaigns: Vec<CampaignEntry>) -> Self {
        Self { campaigns }
    }
}

#[async_trait]
impl CampaignSource for StaticCampaignSource {
    async fn campaigns(&self) -> Result<Vec<CampaignEntry>> {
        Ok(self.campaigns.clone())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TickSummary {
    /// Previous tick was still running
    pub overlapped: bool,
    pub checked: usize,
    /// Held by another process
    pub locked: usize,
    pub failed: usize,
}

/// Last tick that actually ran
#[derive(Debug, Clone, Copy, Serialize)]
pub struct LastTick {
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub summary: TickSummary,
}

enum CampaignRun {
    Checked,
    Locked,
    Failed,
}

pub struct ProgressCheckScheduler {
    source: Arc<dyn CampaignSource>,
    factory: Arc<ExchangeApiClientFactory>,
    lock: AdvisoryLock,
    campaigns_cache: CampaignsCache,
    config: ProgressConfig,
    guard: OverlapGuard,
    last_tick: RwLock<Option<LastTick>>,
}

impl ProgressCheckScheduler {
    pub fn new(
        source: Arc<dyn CampaignSource>,
        factory: Arc<ExchangeApiClientFactory>,
        lock: AdvisoryLock,
        campaigns_cache: CampaignsCache,
        config: ProgressConfig,
    ) -> Self {
        Self {
            source,
            factory,
            lock,
            campaigns_cache,
            config,
            guard: OverlapGuard::new(),
            last_tick: RwLock::new(None),
        }
    }

    /// Spawn the tick loop on the runtime
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        let period = Duration::from_secs(self.config.interval_secs);

        tokio::spawn(async move {
            info!(interval_secs = period.as_secs(), "Progress check scheduler started");

            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                interval.tick().await;

                match self.run_once(Utc::now()).await {
                    Ok(summary) => debug!(?summary, "Progress check tick finished"),
                    Err(e) => error!("Progress check tick failed: {}", e),
                }
            }
        })
    }

    pub fn last_tick(&self) -> Option<LastTick> {
        *self.last_tick.read()
    }

    /// One tick: check every campaign running at `now` concurrently
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<TickSummary> {
        let Some(_permit) = self.guard.try_enter() else {
            warn!("Previous progress check is still running, skipping tick");
            return Ok(TickSummary {
                overlapped: true,
                ..TickSummary::default()
            });
        };

        let campaigns = self.source.campaigns().await?;
        let runs: Vec<_> = campaigns
            .iter()
            .filter_map(|entry| {
                let window = entry.setup.active_window(now);
                if window.is_none() {
                    debug!(campaign_id = %entry.setup.id, "Campaign is not running, skipping");
                }
                window.map(|(from, to)| self.run_campaign(entry, from, to))
            })
            .collect();

        let mut summary = TickSummary::default();
        for run in join_all(runs).await {
            match run {
                CampaignRun::Checked => summary.checked += 1,
                CampaignRun::Locked => summary.locked += 1,
                CampaignRun::Failed => summary.failed += 1,
            }
        }

        *self.last_tick.write() = Some(LastTick { at: now, summary });

        info!(
            checked = summary.checked,
            locked = summary.locked,
            failed = summary.failed,
            "Progress check finished"
        );
        Ok(summary)
    }

    async fn run_campaign(&self, entry: &CampaignEntry, from: DateTime<Utc>, to: DateTime<Utc>) -> CampaignRun {
        let campaign_id = entry.setup.id.as_str();
        let lock_key = format!("campaign-progress:{}", campaign_id);
        let timeout = Duration::from_secs(self.config.check_timeout_secs);
        let limits = PaginationLimits {
            max_pages: self.config.max_pages,
        };

        let result = self
            .lock
            .with_lock(&lock_key, || async move {
                let progress = with_timeout(
                    check_campaign_progress(
                        self.factory.clone(),
                        &entry.setup,
                        &entry.participants,
                        from,
                        to,
                        limits,
                    ),
                    timeout,
                    &format!("progress check of campaign {}", campaign_id),
                )
                .await?;

                self.campaigns_cache
                    .set_interim_progress(campaign_id, &progress, entry.setup.end_date)
                    .await
            })
            .await;

        match result {
            Ok(Some(())) => CampaignRun::Checked,
            Ok(None) => {
                debug!(campaign_id, "Campaign is being checked elsewhere");
                CampaignRun::Locked
            }
            Err(e) => {
                error!(campaign_id, "Failed to get interim progress for campaign: {}", e);
                CampaignRun::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheManager, MemoryCacheStore};
    use crate::exchanges::testing::{credentials, scripted_factory, trade, ScriptedExchangeClient};
    use crate::exchanges::types::{ExchangeName, TakerOrMaker, TradingSide};
    use crate::lock::{InMemoryLockBackend, LockBackend};
    use crate::progress::{CampaignSetup, CampaignType};
    use chrono::Duration as ChronoDuration;
    use rust_decimal_macros::dec;

    /// Campaign running from `start_hours` to `end_hours` relative to `now`
    fn campaign(id: &str, now: DateTime<Utc>, start_hours: i64, end_hours: i64, participants: &[&str]) -> CampaignEntry {
        CampaignEntry {
            setup: CampaignSetup {
                id: id.to_string(),
                campaign_type: CampaignType::MarketMaking,
                exchange_name: ExchangeName::Binance,
                symbol: "HMT/USDT".to_string(),
                start_date: now + ChronoDuration::hours(start_hours),
                end_date: now + ChronoDuration::hours(end_hours),
                minimum_balance_target: None,
            },
            participants: participants.iter().map(|p| credentials(p)).collect(),
        }
    }

    struct Fixture {
        scheduler: ProgressCheckScheduler,
        cache: CampaignsCache,
        locks: Arc<InMemoryLockBackend>,
    }

    fn fixture(now: DateTime<Utc>, campaigns: Vec<CampaignEntry>) -> Fixture {
        let now_ms = now.timestamp_millis();
        let client = ScriptedExchangeClient::new().with_my_trades(vec![
            trade("t-1", TradingSide::Buy, TakerOrMaker::Maker, dec!(10), now_ms - 1000),
            trade("t-after-now", TradingSide::Buy, TakerOrMaker::Maker, dec!(10), now_ms + 1000),
        ]);
        let factory = scripted_factory(vec![("alice", Arc::new(client))]);

        let cache = CampaignsCache::new(CacheManager::new("oracle", Arc::new(MemoryCacheStore::new())).unwrap());
        let locks = Arc::new(InMemoryLockBackend::new());

        let scheduler = ProgressCheckScheduler::new(
            Arc::new(StaticCampaignSource::new(campaigns)),
            factory,
            AdvisoryLock::new(locks.clone()),
            cache.clone(),
            ProgressConfig::default(),
        );

        Fixture { scheduler, cache, locks }
    }

    #[tokio::test]
    async fn test_tick_stores_interim_progress_of_running_campaigns() {
        let now = Utc::now();
        let fixture = fixture(
            now,
            vec![
                campaign("running", now, -12, 12, &["alice"]),
                campaign("future", now, 24, 48, &["alice"]),
                campaign("finished", now, -48, -24, &["alice"]),
            ],
        );

        let summary = fixture.scheduler.run_once(now).await.unwrap();
        assert_eq!(summary.checked, 1);
        assert_eq!(summary.failed, 0);

        let progress = fixture.cache.get_interim_progress("running").await.unwrap().unwrap();
        assert_eq!(progress.from.timestamp_millis(), (now - ChronoDuration::hours(12)).timestamp_millis());
        assert_eq!(progress.to.timestamp_millis(), now.timestamp_millis());
        assert_eq!(progress.meta["total_volume"], serde_json::json!("10"));

        assert_eq!(fixture.cache.get_interim_progress("future").await.unwrap(), None);
        assert!(!fixture.locks.is_locked("campaign-progress:running"));
        assert_eq!(fixture.scheduler.last_tick().map(|t| t.at), Some(now));
    }

    #[tokio::test]
    async fn test_campaign_locked_elsewhere_is_skipped() {
        let now = Utc::now();
        let fixture = fixture(now, vec![campaign("running", now, -12, 12, &["alice"])]);
        let _held = fixture.locks.try_acquire("campaign-progress:running").await.unwrap().unwrap();

        let summary = fixture.scheduler.run_once(now).await.unwrap();

        assert_eq!(summary.locked, 1);
        assert_eq!(summary.checked, 0);
        assert_eq!(fixture.cache.get_interim_progress("running").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_failing_campaign_does_not_affect_others() {
        let now = Utc::now();
        let fixture = fixture(
            now,
            vec![
                campaign("broken", now, -12, 12, &["unknown-key"]),
                campaign("running", now, -12, 12, &["alice"]),
            ],
        );

        let summary = fixture.scheduler.run_once(now).await.unwrap();

        assert_eq!(summary.failed, 1);
        assert_eq!(summary.checked, 1);
        assert!(fixture.cache.get_interim_progress("running").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_overlapping_tick_is_skipped() {
        let fixture = fixture(Utc::now(), vec![]);
        let _permit = fixture.scheduler.guard.try_enter().unwrap();

        let summary = fixture.scheduler.run_once(Utc::now()).await.unwrap();
        assert!(summary.overlapped);
        assert!(fixture.scheduler.last_tick().is_none());
    }
}
