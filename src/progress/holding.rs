use super::{CampaignProgressChecker, CampaignSetup, ParticipantOutcome};
use crate::error::Result;
use crate::exchanges::types::{ApiCredentials, ExchangeName};
use crate::exchanges::{ExchangeApiClientFactory, ETH_TOKEN_SYMBOL};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoldingResult {
    pub score: Decimal,
    pub token_balance: Decimal,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoldingMeta {
    pub total_balance: Decimal,
}

/// Scores participants by how much of the campaign token they hold.
///
/// Accounts are told apart by their ETH deposit address; a repeated address
/// scores zero.
pub struct HoldingProgressChecker {
    factory: Arc<ExchangeApiClientFactory>,
    exchange: ExchangeName,
    token_symbol: String,
    deposit_addresses: HashSet<String>,
    total_balance_meta: Decimal,
}

impl HoldingProgressChecker {
    pub fn new(factory: Arc<ExchangeApiClientFactory>, setup: &CampaignSetup) -> Self {
        Self {
            factory,
            exchange: setup.exchange_name,
            token_symbol: setup.symbol.clone(),
            deposit_addresses: HashSet::new(),
            total_balance_meta: Decimal::ZERO,
        }
    }
}

#[async_trait]
impl CampaignProgressChecker for HoldingProgressChecker {
    type Outcome = HoldingResult;
    type Meta = HoldingMeta;

    async fn check_for_participant(
        &mut self,
        credentials: &ApiCredentials,
    ) -> Result<ParticipantOutcome<HoldingResult>> {
        let client = self.factory.create(self.exchange, credentials.clone())?;

        let (deposit_address, balance) = tokio::try_join!(
            client.fetch_deposit_address(ETH_TOKEN_SYMBOL),
            client.fetch_balance()
        )?;
        let token_balance = balance.total(&self.token_symbol);

        if !self.deposit_addresses.insert(deposit_address) {
            return Ok(ParticipantOutcome {
                abuse_detected: true,
                result: HoldingResult {
                    score: Decimal::ZERO,
                    token_balance,
                },
            });
        }

        self.total_balance_meta += token_balance;

        Ok(ParticipantOutcome {
            abuse_detected: false,
            result: HoldingResult {
                score: token_balance,
                token_balance,
            },
        })
    }

    fn collected_meta(&self) -> HoldingMeta {
        HoldingMeta {
            total_balance: self.total_balance_meta,
        }
    }
}
