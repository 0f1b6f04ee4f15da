//! Exchange API clients
//!
//! Every supported exchange is reached through the same [`ExchangeApiClient`]
//! capability set, producing normalized [`Trade`]/[`Order`] records.

pub mod types;
pub mod pagination;
pub mod factory;
pub mod spot_v3;
pub mod bybit;

#[cfg(test)]
pub mod testing;

use crate::error::{AppError, Result};
use crate::utils::now_ms;
use async_trait::async_trait;
use types::*;

pub use factory::{ClientContext, ExchangeApiClientFactory};

/// Asset used to check deposit address access
pub const ETH_TOKEN_SYMBOL: &str = "ETH";

/// Pair used to check trading history access
pub const ETH_USDT_PAIR: &str = "ETH/USDT";

/// Exchange client trait that all exchange implementations must implement
#[async_trait]
pub trait ExchangeApiClient: Send + Sync {
    fn exchange_name(&self) -> ExchangeName;

    /// Whether all credentials the exchange needs are present
    fn check_required_credentials(&self) -> bool;

    /// Open orders created at or after `since` (ms), ascending
    async fn fetch_open_orders(&self, symbol: &str, since: i64) -> Result<Vec<Order>>;

    /// Public market trades executed at or after `since` (ms), ascending
    async fn fetch_trades(&self, symbol: &str, since: i64) -> Result<Vec<Trade>>;

    /// The account's own trades executed at or after `since` (ms), ascending
    async fn fetch_my_trades(&self, symbol: &str, since: i64) -> Result<Vec<Trade>>;

    async fn fetch_balance(&self) -> Result<AccountBalance>;

    async fn fetch_deposit_address(&self, symbol: &str) -> Result<String>;

    /// Try each permission and report the missing ones.
    ///
    /// Access errors count as "missing", anything else aborts the check.
    async fn check_required_access(
        &self,
        permissions: &[ExchangePermission],
    ) -> Result<RequiredAccessCheckResult> {
        let mut to_check: Vec<ExchangePermission> = Vec::with_capacity(permissions.len());
        for permission in permissions {
            if !to_check.contains(permission) {
                to_check.push(*permission);
            }
        }
        if to_check.is_empty() {
            return Err(AppError::Validation(
                "At least one exchange permission must be provided for check".to_string(),
            ));
        }

        let mut missing = Vec::new();
        for permission in to_check {
            let outcome = match permission {
                ExchangePermission::ViewAccountBalance => self.fetch_balance().await.map(|_| ()),
                ExchangePermission::ViewDepositAddress => {
                    self.fetch_deposit_address(ETH_TOKEN_SYMBOL).await.map(|_| ())
                }
                ExchangePermission::ViewSpotTradingHistory => {
                    self.fetch_my_trades(ETH_USDT_PAIR, now_ms() - 1).await.map(|_| ())
                }
            };

            match outcome {
                Ok(()) => {}
                Err(AppError::ExchangeAccess { .. }) => missing.push(permission),
                Err(e) => {
                    tracing::error!(
                        exchange = %self.exchange_name(),
                        %permission,
                        "Error while checking exchange access: {}",
                        e
                    );
                    return Err(e);
                }
            }
        }

        Ok(RequiredAccessCheckResult {
            success: missing.is_empty(),
            missing,
        })
    }
}
