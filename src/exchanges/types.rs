//! Common exchange types

use crate::error::{AppError, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Exchanges with a registered API client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeName {
    Binance,
    Bybit,
    Mexc,
}

impl ExchangeName {
    pub const ALL: [ExchangeName; 3] = [ExchangeName::Binance, ExchangeName::Bybit, ExchangeName::Mexc];

    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeName::Binance => "binance",
            ExchangeName::Bybit => "bybit",
            ExchangeName::Mexc => "mexc",
        }
    }
}

impl fmt::Display for ExchangeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExchangeName {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        ExchangeName::ALL
            .into_iter()
            .find(|name| name.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| AppError::UnsupportedExchange(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradingSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TakerOrMaker {
    Maker,
    Taker,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Limit,
    Market,
}

/// Executed fill
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: String,
    pub symbol: String,
    pub side: TradingSide,
    pub taker_or_maker: TakerOrMaker,
    pub price: Decimal,
    pub amount: Decimal,
    pub cost: Decimal,
    /// Milliseconds since epoch
    pub timestamp: i64,
}

/// Point-in-time snapshot of a resting order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub symbol: String,
    pub side: TradingSide,
    pub order_type: OrderType,
    pub amount: Decimal,
    pub filled: Decimal,
    pub cost: Decimal,
    /// Milliseconds since epoch
    pub timestamp: i64,
}

/// Balance of a single asset
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssetBalance {
    pub free: Decimal,
    pub used: Decimal,
    pub total: Decimal,
}

/// Account balances keyed by asset symbol
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountBalance(pub HashMap<String, AssetBalance>);

impl AccountBalance {
    pub fn insert(&mut self, asset: impl Into<String>, balance: AssetBalance) {
        self.0.insert(asset.into(), balance);
    }

    /// Total balance for asset, zero when the account never held it
    pub fn total(&self, asset: &str) -> Decimal {
        self.0.get(asset).map(|b| b.total).unwrap_or(Decimal::ZERO)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExchangePermission {
    ViewAccountBalance,
    ViewDepositAddress,
    ViewSpotTradingHistory,
}

impl fmt::Display for ExchangePermission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExchangePermission::ViewAccountBalance => "view_account_balance",
            ExchangePermission::ViewDepositAddress => "view_deposit_address",
            ExchangePermission::ViewSpotTradingHistory => "view_spot_trading_history",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequiredAccessCheckResult {
    pub success: bool,
    pub missing: Vec<ExchangePermission>,
}

/// API credentials of a campaign participant
#[derive(Clone, Default, Deserialize)]
pub struct ApiCredentials {
    pub api_key: String,
    pub secret: String,
    /// Only used for log context
    #[serde(default)]
    pub user_id: String,
}

impl ApiCredentials {
    pub fn new(api_key: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            secret: secret.into(),
            ..Default::default()
        }
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = user_id.into();
        self
    }
}

impl fmt::Debug for ApiCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiCredentials")
            .field("api_key_hash", &crate::utils::hash_string(&self.api_key))
            .field("user_id", &self.user_id)
            .finish_non_exhaustive()
    }
}

/// Unified trading pair in `BASE/QUOTE` form
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradingPair {
    pub base: String,
    pub quote: String,
}

impl TradingPair {
    pub fn parse(symbol: &str) -> Result<Self> {
        match symbol.split_once('/') {
            Some((base, quote))
                if !base.is_empty()
                    && !quote.is_empty()
                    && !quote.contains('/')
                    && base.chars().chain(quote.chars()).all(|c| c.is_ascii_alphanumeric()) =>
            {
                Ok(Self {
                    base: base.to_ascii_uppercase(),
                    quote: quote.to_ascii_uppercase(),
                })
            }
            _ => Err(AppError::Validation(format!("Invalid trading pair: {}", symbol))),
        }
    }

    /// Venue symbol without separator, e.g. `BTCUSDT`
    pub fn concatenated(&self) -> String {
        format!("{}{}", self.base, self.quote)
    }

    pub fn unified(&self) -> String {
        format!("{}/{}", self.base, self.quote)
    }
}
