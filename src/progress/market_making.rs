//! Market making score
//!
//! Score rewards liquidity provision: filled parts of buy limit orders and
//! maker fills. Volume counts everything seen in the window.

use super::{CampaignProgressChecker, CampaignSetup, ParticipantOutcome, ProgressCheckInput};
use crate::error::Result;
use crate::exchanges::pagination::{my_trade_pages, open_order_pages, PaginationLimits};
use crate::exchanges::types::*;
use crate::exchanges::{ExchangeApiClient, ExchangeApiClientFactory};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::TryStreamExt;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::pin::pin;
use std::sync::Arc;
use tracing::{debug, info};

/// Trades per participant kept as fingerprints for cross-account duplicate checks
pub const N_TRADES_FOR_ABUSE_CHECK: usize = 5;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketMakingResult {
    pub score: Decimal,
    pub total_volume: Decimal,
}

impl MarketMakingResult {
    pub fn add_order(&mut self, order: &Order) {
        self.total_volume += order.cost;
        self.score += order_score(order);
    }

    pub fn add_trade(&mut self, trade: &Trade) {
        self.total_volume += trade.cost;
        self.score += trade_score(trade);
    }
}

/// `cost * filled / amount` for buy limit orders, zero otherwise
pub fn order_score(order: &Order) -> Decimal {
    if order.side != TradingSide::Buy || order.order_type != OrderType::Limit || order.amount.is_zero() {
        return Decimal::ZERO;
    }
    order.cost * order.filled / order.amount
}

/// Full cost for maker fills, zero for taker fills
pub fn trade_score(trade: &Trade) -> Decimal {
    match trade.taker_or_maker {
        TakerOrMaker::Maker => trade.cost,
        TakerOrMaker::Taker => Decimal::ZERO,
    }
}

/// Stateless market making check of a single account
#[derive(Debug, Clone, Copy, Default)]
pub struct MarketMakingChecker {
    limits: PaginationLimits,
}

impl MarketMakingChecker {
    pub fn new(limits: PaginationLimits) -> Self {
        Self { limits }
    }

    /// Score open orders and own trades of `symbol` within `[start_ms, end_ms)`
    pub async fn check(
        &self,
        client: &dyn ExchangeApiClient,
        symbol: &str,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<MarketMakingResult> {
        let mut result = MarketMakingResult::default();

        let mut orders = pin!(open_order_pages(client, symbol, start_ms, end_ms, self.limits));
        while let Some(page) = orders.try_next().await? {
            page.iter().for_each(|order| result.add_order(order));
        }

        let mut trades = pin!(my_trade_pages(client, symbol, start_ms, end_ms, self.limits));
        while let Some(page) = trades.try_next().await? {
            page.iter().for_each(|trade| result.add_trade(trade));
        }

        debug!(
            exchange = %client.exchange_name(),
            symbol,
            score = %result.score,
            total_volume = %result.total_volume,
            "Market making check finished"
        );

        Ok(result)
    }

    /// Validate `input`, build the client and run [`Self::check`]
    pub async fn check_input(
        &self,
        factory: &ExchangeApiClientFactory,
        input: &ProgressCheckInput,
    ) -> Result<MarketMakingResult> {
        let pair = input.validate()?;
        let client = factory.create(input.exchange_name, input.credentials.clone())?;

        info!(
            exchange = %input.exchange_name,
            user_id = %input.credentials.user_id,
            pair = %pair.unified(),
            start_date = %input.start_date,
            end_date = %input.end_date,
            "Checking market making progress"
        );

        self.check(
            client.as_ref(),
            &pair.unified(),
            input.start_date.timestamp_millis(),
            input.end_date.timestamp_millis(),
        )
        .await
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketMakingMeta {
    pub total_volume: Decimal,
}

/// Campaign-wide market making checker.
///
/// Samples the first [`N_TRADES_FOR_ABUSE_CHECK`] trades of each participant.
/// Meeting an already sampled trade means two participants share one account:
/// the score is zeroed and the volume stays out of the campaign total.
pub struct MarketMakingProgressChecker {
    factory: Arc<ExchangeApiClientFactory>,
    exchange: ExchangeName,
    symbol: String,
    start_ms: i64,
    end_ms: i64,
    limits: PaginationLimits,
    trade_samples: HashSet<String>,
    total_volume_meta: Decimal,
}

impl MarketMakingProgressChecker {
    pub fn new(
        factory: Arc<ExchangeApiClientFactory>,
        setup: &CampaignSetup,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limits: PaginationLimits,
    ) -> Self {
        Self {
            factory,
            exchange: setup.exchange_name,
            symbol: setup.symbol.clone(),
            start_ms: from.timestamp_millis(),
            end_ms: to.timestamp_millis(),
            limits,
            trade_samples: HashSet::new(),
            total_volume_meta: Decimal::ZERO,
        }
    }

    fn fingerprint(trade: &Trade) -> String {
        let side = match trade.side {
            TradingSide::Buy => "buy",
            TradingSide::Sell => "sell",
        };
        format!("{}-{}", trade.id, side)
    }
}

#[async_trait]
impl CampaignProgressChecker for MarketMakingProgressChecker {
    type Outcome = MarketMakingResult;
    type Meta = MarketMakingMeta;

    async fn check_for_participant(
        &mut self,
        credentials: &ApiCredentials,
    ) -> Result<ParticipantOutcome<MarketMakingResult>> {
        let client = self.factory.create(self.exchange, credentials.clone())?;
        let mut result = MarketMakingResult::default();
        let mut abuse_detected = false;
        let mut n_sampled = 0;

        let mut orders = pin!(open_order_pages(
            client.as_ref(),
            &self.symbol,
            self.start_ms,
            self.end_ms,
            self.limits
        ));
        while let Some(page) = orders.try_next().await? {
            page.iter().for_each(|order| result.add_order(order));
        }

        let mut trades = pin!(my_trade_pages(
            client.as_ref(),
            &self.symbol,
            self.start_ms,
            self.end_ms,
            self.limits
        ));
        'pages: while let Some(page) = trades.try_next().await? {
            for trade in &page {
                let fingerprint = Self::fingerprint(trade);
                if self.trade_samples.contains(&fingerprint) {
                    abuse_detected = true;
                    break 'pages;
                }
                if n_sampled < N_TRADES_FOR_ABUSE_CHECK {
                    self.trade_samples.insert(fingerprint);
                    n_sampled += 1;
                }
                result.add_trade(trade);
            }
        }

        if abuse_detected {
            result.score = Decimal::ZERO;
        } else {
            // volume between two participants is counted twice, rare enough to ignore
            self.total_volume_meta += result.total_volume;
        }

        Ok(ParticipantOutcome { abuse_detected, result })
    }

    fn collected_meta(&self) -> MarketMakingMeta {
        MarketMakingMeta {
            total_volume: self.total_volume_meta,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::exchanges::testing::{credentials, order, scripted_factory, trade, ScriptedExchangeClient};
    use crate::progress::tests::setup;
    use crate::progress::CampaignType;
    use rstest::rstest;
    use rust_decimal_macros::dec;

    const START: i64 = 1_000;
    const END: i64 = 10_000;

    #[rstest]
    #[case::maker_buy(TradingSide::Buy, TakerOrMaker::Maker, dec!(100))]
    #[case::maker_sell(TradingSide::Sell, TakerOrMaker::Maker, dec!(100))]
    #[case::taker_buy(TradingSide::Buy, TakerOrMaker::Taker, dec!(0))]
    #[case::taker_sell(TradingSide::Sell, TakerOrMaker::Taker, dec!(0))]
    fn test_trade_contribution(#[case] side: TradingSide, #[case] role: TakerOrMaker, #[case] score: Decimal) {
        let mut result = MarketMakingResult::default();
        result.add_trade(&trade("1", side, role, dec!(100), START));

        assert_eq!(result.score, score);
        assert_eq!(result.total_volume, dec!(100));
    }

    #[rstest]
    #[case::half_filled_buy_limit(TradingSide::Buy, OrderType::Limit, dec!(100), dec!(100))]
    #[case::half_filled_sell_limit(TradingSide::Sell, OrderType::Limit, dec!(100), dec!(0))]
    #[case::market_buy(TradingSide::Buy, OrderType::Market, dec!(100), dec!(0))]
    #[case::zero_amount(TradingSide::Buy, OrderType::Limit, dec!(0), dec!(0))]
    fn test_order_contribution(
        #[case] side: TradingSide,
        #[case] order_type: OrderType,
        #[case] amount: Decimal,
        #[case] score: Decimal,
    ) {
        let mut result = MarketMakingResult::default();
        result.add_order(&order("1", side, order_type, amount, dec!(50), dec!(200), START));

        assert_eq!(result.score, score);
        assert_eq!(result.total_volume, dec!(200));
    }

    #[tokio::test]
    async fn test_check_walks_pages_inside_window() {
        let client = ScriptedExchangeClient::new()
            .with_page_size(2)
            .with_orders(vec![
                order("o-1", TradingSide::Buy, OrderType::Limit, dec!(10), dec!(5), dec!(40), START + 5),
                order("o-2", TradingSide::Sell, OrderType::Limit, dec!(10), dec!(10), dec!(30), START + 7),
                order("o-late", TradingSide::Buy, OrderType::Limit, dec!(10), dec!(10), dec!(999), END),
            ])
            .with_my_trades(vec![
                trade("early", TradingSide::Buy, TakerOrMaker::Maker, dec!(999), START - 1),
                trade("t-1", TradingSide::Buy, TakerOrMaker::Maker, dec!(10), START),
                trade("t-2", TradingSide::Sell, TakerOrMaker::Taker, dec!(20), START + 10),
                trade("t-3", TradingSide::Sell, TakerOrMaker::Maker, dec!(30), START + 20),
                trade("t-late", TradingSide::Buy, TakerOrMaker::Maker, dec!(999), END + 1),
            ]);

        let result = MarketMakingChecker::default()
            .check(&client, "HMT/USDT", START, END)
            .await
            .unwrap();

        // orders: 40 * 5/10 = 20, trades: 10 + 30 makers
        assert_eq!(result.score, dec!(60));
        assert_eq!(result.total_volume, dec!(130));

        assert_eq!(client.requested_since("my_trades"), vec![START, START + 11]);
        assert_eq!(client.requested_since("open_orders"), vec![START, START + 8]);
    }

    #[tokio::test]
    async fn test_score_grows_with_more_activity() {
        let base = vec![trade("t-1", TradingSide::Buy, TakerOrMaker::Maker, dec!(10), START)];
        let mut more = base.clone();
        more.push(trade("t-2", TradingSide::Buy, TakerOrMaker::Taker, dec!(5), START + 1));
        more.push(trade("t-3", TradingSide::Sell, TakerOrMaker::Maker, dec!(7), START + 2));

        let checker = MarketMakingChecker::default();
        let small = checker
            .check(&ScriptedExchangeClient::new().with_my_trades(base), "HMT/USDT", START, END)
            .await
            .unwrap();
        let large = checker
            .check(&ScriptedExchangeClient::new().with_my_trades(more), "HMT/USDT", START, END)
            .await
            .unwrap();

        assert!(large.score >= small.score);
        assert_eq!(large.total_volume, dec!(22));
    }

    #[tokio::test]
    async fn test_page_limit_discards_partial_score() {
        let client = ScriptedExchangeClient::new().with_page_size(2).with_my_trades(vec![
            trade("t-1", TradingSide::Buy, TakerOrMaker::Maker, dec!(10), START),
            trade("t-2", TradingSide::Buy, TakerOrMaker::Maker, dec!(10), START + 1),
            trade("t-3", TradingSide::Buy, TakerOrMaker::Maker, dec!(10), START + 2),
        ]);

        let result = MarketMakingChecker::new(PaginationLimits { max_pages: 1 })
            .check(&client, "HMT/USDT", START, END)
            .await;

        assert!(matches!(result, Err(AppError::Pagination(_))));
    }

    #[tokio::test]
    async fn test_check_input_rejects_bad_pair() {
        let factory = scripted_factory(vec![("key", Arc::new(ScriptedExchangeClient::new()))]);
        let input = ProgressCheckInput {
            exchange_name: ExchangeName::Binance,
            credentials: credentials("key"),
            pair: "HMT-USDT".to_string(),
            start_date: DateTime::from_timestamp_millis(START).unwrap(),
            end_date: DateTime::from_timestamp_millis(END).unwrap(),
        };

        let result = MarketMakingChecker::default().check_input(&factory, &input).await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn test_abuse_zeroes_score_and_keeps_meta_clean() {
        let first = Arc::new(ScriptedExchangeClient::new().with_my_trades(vec![
            trade("t-1", TradingSide::Buy, TakerOrMaker::Maker, dec!(10), START),
            trade("t-2", TradingSide::Sell, TakerOrMaker::Maker, dec!(20), START + 1),
        ]));
        let second = Arc::new(ScriptedExchangeClient::new().with_my_trades(vec![
            trade("x-1", TradingSide::Buy, TakerOrMaker::Maker, dec!(5), START),
            trade("t-2", TradingSide::Sell, TakerOrMaker::Maker, dec!(20), START + 1),
        ]));
        // same id on the other side is a different trade
        let third = Arc::new(ScriptedExchangeClient::new().with_my_trades(vec![trade(
            "t-1",
            TradingSide::Sell,
            TakerOrMaker::Maker,
            dec!(3),
            START,
        )]));
        let factory = scripted_factory(vec![("first", first), ("second", second), ("third", third)]);

        let campaign = setup(CampaignType::MarketMaking, "HMT/USDT");
        let mut checker = MarketMakingProgressChecker::new(
            factory,
            &campaign,
            DateTime::from_timestamp_millis(START).unwrap(),
            DateTime::from_timestamp_millis(END).unwrap(),
            PaginationLimits::default(),
        );

        let outcome = checker.check_for_participant(&credentials("first")).await.unwrap();
        assert!(!outcome.abuse_detected);
        assert_eq!(outcome.result.score, dec!(30));

        let outcome = checker.check_for_participant(&credentials("second")).await.unwrap();
        assert!(outcome.abuse_detected);
        assert_eq!(outcome.result.score, Decimal::ZERO);

        let outcome = checker.check_for_participant(&credentials("third")).await.unwrap();
        assert!(!outcome.abuse_detected);

        assert_eq!(checker.collected_meta().total_volume, dec!(33));
    }
}
