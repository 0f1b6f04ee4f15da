use super::{CampaignProgressChecker, CampaignSetup, ParticipantOutcome};
use crate::error::{AppError, Result};
use crate::exchanges::types::{ApiCredentials, ExchangeName};
use crate::exchanges::{ExchangeApiClientFactory, ETH_TOKEN_SYMBOL};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThresholdResult {
    pub score: Decimal,
    pub token_balance: Decimal,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThresholdMeta {
    pub total_balance: Decimal,
    pub total_score: Decimal,
}

/// Score 1 for every participant holding at least the target balance
pub struct ThresholdProgressChecker {
    factory: Arc<ExchangeApiClientFactory>,
    exchange: ExchangeName,
    token_symbol: String,
    minimum_balance_target: Decimal,
    deposit_addresses: HashSet<String>,
    total_balance_meta: Decimal,
    total_score_meta: Decimal,
}

impl ThresholdProgressChecker {
    pub fn new(factory: Arc<ExchangeApiClientFactory>, setup: &CampaignSetup) -> Result<Self> {
        let minimum_balance_target = setup.minimum_balance_target.ok_or_else(|| {
            AppError::Validation(format!("No minimum balance target provided for campaign {}", setup.id))
        })?;

        Ok(Self {
            factory,
            exchange: setup.exchange_name,
            token_symbol: setup.symbol.clone(),
            minimum_balance_target,
            deposit_addresses: HashSet::new(),
            total_balance_meta: Decimal::ZERO,
            total_score_meta: Decimal::ZERO,
        })
    }
}

#[async_trait]
impl CampaignProgressChecker for ThresholdProgressChecker {
    type Outcome = ThresholdResult;
    type Meta = ThresholdMeta;

    async fn check_for_participant(
        &mut self,
        credentials: &ApiCredentials,
    ) -> Result<ParticipantOutcome<ThresholdResult>> {
        let client = self.factory.create(self.exchange, credentials.clone())?;

        let (deposit_address, balance) = tokio::try_join!(
            client.fetch_deposit_address(ETH_TOKEN_SYMBOL),
            client.fetch_balance()
        )?;

        let mut token_balance = balance.total(&self.token_symbol);
        let mut score = if token_balance >= self.minimum_balance_target {
            Decimal::ONE
        } else {
            Decimal::ZERO
        };

        let abuse_detected = !self.deposit_addresses.insert(deposit_address);
        if abuse_detected {
            score = Decimal::ZERO;
            token_balance = Decimal::ZERO;
        }

        self.total_balance_meta += token_balance;
        self.total_score_meta += score;

        Ok(ParticipantOutcome {
            abuse_detected,
            result: ThresholdResult { score, token_balance },
        })
    }

    fn collected_meta(&self) -> ThresholdMeta {
        ThresholdMeta {
            total_balance: self.total_balance_meta,
            total_score: self.total_score_meta,
        }
    }
}
