//! Campaign progress checking
//!
//! A [`CampaignProgressChecker`] is created per campaign and fed participants
//! one by one, so it can keep campaign-wide state (abuse samples, totals)
//! between them. [`check_campaign_progress`] picks the checker for the
//! campaign type and collects the outcomes.

pub mod cache;
pub mod holding;
pub mod market_making;
pub mod threshold;

pub use cache::CampaignsCache;
pub use holding::HoldingProgressChecker;
pub use market_making::{MarketMakingChecker, MarketMakingProgressChecker, MarketMakingResult};
pub use threshold::ThresholdProgressChecker;

use crate::error::{AppError, Result};
use crate::exchanges::pagination::PaginationLimits;
use crate::exchanges::types::{ApiCredentials, ExchangeName, TradingPair};
use crate::exchanges::ExchangeApiClientFactory;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignType {
    MarketMaking,
    Holding,
    Threshold,
}

impl fmt::Display for CampaignType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CampaignType::MarketMaking => "market_making",
            CampaignType::Holding => "holding",
            CampaignType::Threshold => "threshold",
        };
        f.write_str(name)
    }
}

/// What a campaign checks and where
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignSetup {
    pub id: String,
    pub campaign_type: CampaignType,
    pub exchange_name: ExchangeName,
    /// Trading pair for market making, token symbol otherwise
    pub symbol: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    #[serde(default)]
    pub minimum_balance_target: Option<Decimal>,
}

impl CampaignSetup {
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(AppError::Validation("Campaign id must not be empty".to_string()));
        }
        if self.start_date >= self.end_date {
            return Err(AppError::Validation(format!(
                "Campaign {} must start before it ends",
                self.id
            )));
        }

        match self.campaign_type {
            CampaignType::MarketMaking => {
                TradingPair::parse(&self.symbol)?;
            }
            CampaignType::Holding | CampaignType::Threshold => {
                if self.symbol.is_empty() || !self.symbol.chars().all(|c| c.is_ascii_alphanumeric()) {
                    return Err(AppError::Validation(format!("Invalid token symbol: {}", self.symbol)));
                }
            }
        }

        if self.campaign_type == CampaignType::Threshold {
            match self.minimum_balance_target {
                Some(target) if target > Decimal::ZERO => {}
                _ => {
                    return Err(AppError::Validation(format!(
                        "Threshold campaign {} needs a positive minimum balance target",
                        self.id
                    )))
                }
            }
        }

        Ok(())
    }

    /// Window checked at `now`, `None` when the campaign is not running
    pub fn active_window(&self, now: DateTime<Utc>) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        if now <= self.start_date || now >= self.end_date {
            return None;
        }
        Some((self.start_date, now))
    }
}

/// One-shot market making check for a single account
#[derive(Debug, Clone)]
pub struct ProgressCheckInput {
    pub exchange_name: ExchangeName,
    pub credentials: ApiCredentials,
    pub pair: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
}

impl ProgressCheckInput {
    pub fn validate(&self) -> Result<TradingPair> {
        if self.start_date >= self.end_date {
            return Err(AppError::Validation("start_date must be before end_date".to_string()));
        }
        TradingPair::parse(&self.pair)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantOutcome<R> {
    pub abuse_detected: bool,
    pub result: R,
}

/// Outcome of one participant as reported in campaign progress
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantProgress {
    pub user_id: String,
    #[serde(flatten)]
    pub outcome: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignProgress {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub participants_outcomes: Vec<ParticipantProgress>,
    pub meta: serde_json::Value,
}

#[async_trait]
pub trait CampaignProgressChecker: Send {
    type Outcome: Serialize + Send;
    type Meta: Serialize + Send;

    async fn check_for_participant(
        &mut self,
        credentials: &ApiCredentials,
    ) -> Result<ParticipantOutcome<Self::Outcome>>;

    /// Totals over every participant checked so far
    fn collected_meta(&self) -> Self::Meta;
}

fn to_object<T: Serialize>(value: &T) -> Result<serde_json::Map<String, serde_json::Value>> {
    match serde_json::to_value(value)? {
        serde_json::Value::Object(map) => Ok(map),
        other => Err(AppError::Internal(format!("Expected an object outcome, got {}", other))),
    }
}

/// Feed every participant to `checker`.
///
/// Participants flagged for abuse or whose API key lacks access are left out
/// of the outcomes. Any other error aborts the whole campaign.
pub async fn check_participants<C: CampaignProgressChecker>(
    mut checker: C,
    participants: &[ApiCredentials],
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Result<CampaignProgress> {
    let mut outcomes = Vec::with_capacity(participants.len());

    for participant in participants {
        match checker.check_for_participant(participant).await {
            Ok(outcome) if outcome.abuse_detected => {
                warn!(user_id = %participant.user_id, "Abuse detected. Skipping participant outcome");
            }
            Ok(outcome) => outcomes.push(ParticipantProgress {
                user_id: participant.user_id.clone(),
                outcome: to_object(&outcome.result)?,
            }),
            Err(AppError::ExchangeAccess { exchange, permission, message }) => {
                warn!(
                    user_id = %participant.user_id,
                    %exchange,
                    %permission,
                    "Exchange access failed for provided api key: {}",
                    message
                );
            }
            Err(e) => return Err(e),
        }
    }

    Ok(CampaignProgress {
        from,
        to,
        participants_outcomes: outcomes,
        meta: serde_json::to_value(checker.collected_meta())?,
    })
}

/// Check `participants` of a campaign over `[from, to)` with the checker of its type
pub async fn check_campaign_progress(
    factory: Arc<ExchangeApiClientFactory>,
    setup: &CampaignSetup,
    participants: &[ApiCredentials],
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    limits: PaginationLimits,
) -> Result<CampaignProgress> {
    info!(
        campaign_id = %setup.id,
        campaign_type = %setup.campaign_type,
        exchange = %setup.exchange_name,
        %from,
        %to,
        period_duration_secs = (to - from).num_seconds(),
        "Checking campaign progress"
    );
    let started = Instant::now();

    let progress = match setup.campaign_type {
        CampaignType::MarketMaking => {
            let checker = MarketMakingProgressChecker::new(factory, setup, from, to, limits);
            check_participants(checker, participants, from, to).await?
        }
        CampaignType::Holding => {
            let checker = HoldingProgressChecker::new(factory, setup);
            check_participants(checker, participants, from, to).await?
        }
        CampaignType::Threshold => {
            let checker = ThresholdProgressChecker::new(factory, setup)?;
            check_participants(checker, participants, from, to).await?
        }
    };

    info!(
        campaign_id = %setup.id,
        n_participants = participants.len(),
        check_duration_ms = started.elapsed().as_millis() as u64,
        "Campaign progress checked"
    );

    Ok(progress)
}
