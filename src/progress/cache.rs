use super::CampaignProgress;
use crate::cache::{CacheManager, Expiry};
use crate::error::{AppError, Result};
use chrono::{DateTime, Utc};

const INTERIM_PROGRESS_KEY: &str = "interim_progress";

/// Latest not yet finalized progress per campaign
#[derive(Clone)]
pub struct CampaignsCache {
    cache: CacheManager,
}

impl CampaignsCache {
    pub fn new(cache: CacheManager) -> Self {
        Self { cache }
    }

    fn interim_progress_key(campaign_id: &str) -> String {
        CacheManager::make_cache_key(&[campaign_id, INTERIM_PROGRESS_KEY])
    }

    pub async fn get_interim_progress(&self, campaign_id: &str) -> Result<Option<CampaignProgress>> {
        let Some(value) = self.cache.get(&Self::interim_progress_key(campaign_id)).await? else {
            return Ok(None);
        };

        let text = value.as_text().ok_or_else(|| {
            AppError::Cache(format!("Interim progress of {} is not valid UTF-8", campaign_id))
        })?;
        Ok(Some(serde_json::from_str(text)?))
    }

    /// Stored until `expires_at`, normally the campaign end
    pub async fn set_interim_progress(
        &self,
        campaign_id: &str,
        progress: &CampaignProgress,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        let json = serde_json::to_string(progress)?;
        self.cache
            .set(&Self::interim_progress_key(campaign_id), json, Some(Expiry::At(expires_at)))
            .await
    }
}
