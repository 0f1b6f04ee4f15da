//! In-memory exchange client for tests

use crate::config::ExchangesConfig;
use crate::error::{AppError, Result};
use crate::exchanges::types::*;
use crate::exchanges::{ClientContext, ExchangeApiClient, ExchangeApiClientFactory};
use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;

/// Well-behaved exchange serving fixed data in pages of `page_size`
pub struct ScriptedExchangeClient {
    exchange: ExchangeName,
    orders: Vec<Order>,
    my_trades: Vec<Trade>,
    public_trades: Vec<Trade>,
    balance: AccountBalance,
    deposit_address: String,
    page_size: usize,
    denied: Vec<ExchangePermission>,
    balance_error: Option<String>,
    requests: Mutex<Vec<(&'static str, i64)>>,
}

impl ScriptedExchangeClient {
    pub fn new() -> Self {
        Self {
            exchange: ExchangeName::Binance,
            orders: Vec::new(),
            my_trades: Vec::new(),
            public_trades: Vec::new(),
            balance: AccountBalance::default(),
            deposit_address: "0x0000000000000000000000000000000000000001".to_string(),
            page_size: 2,
            denied: Vec::new(),
            balance_error: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_orders(mut self, orders: Vec<Order>) -> Self {
        self.orders = orders;
        self
    }

    pub fn with_my_trades(mut self, trades: Vec<Trade>) -> Self {
        self.my_trades = trades;
        self
    }

    pub fn with_public_trades(mut self, trades: Vec<Trade>) -> Self {
        self.public_trades = trades;
        self
    }

    pub fn with_balance(mut self, asset: &str, total: Decimal) -> Self {
        self.balance.insert(
            asset,
            AssetBalance {
                free: total,
                used: Decimal::ZERO,
                total,
            },
        );
        self
    }

    pub fn with_deposit_address(mut self, address: &str) -> Self {
        self.deposit_address = address.to_string();
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn deny(mut self, permission: ExchangePermission) -> Self {
        self.denied.push(permission);
        self
    }

    pub fn fail_balance_with(mut self, message: &str) -> Self {
        self.balance_error = Some(message.to_string());
        self
    }

    /// `since` values requested for the given endpoint, in call order
    pub fn requested_since(&self, endpoint: &str) -> Vec<i64> {
        self.requests
            .lock()
            .iter()
            .filter(|(name, _)| *name == endpoint)
            .map(|(_, since)| *since)
            .collect()
    }

    fn check(&self, permission: ExchangePermission) -> Result<()> {
        if self.denied.contains(&permission) {
            return Err(AppError::ExchangeAccess {
                exchange: self.exchange.to_string(),
                permission,
                message: "denied".to_string(),
            });
        }
        Ok(())
    }

    fn page<T: Clone>(&self, items: &[T], since: i64, timestamp: impl Fn(&T) -> i64) -> Vec<T> {
        let mut page: Vec<T> = items.iter().filter(|i| timestamp(i) >= since).cloned().collect();
        page.sort_by_key(|i| timestamp(i));
        page.truncate(self.page_size);
        page
    }
}

impl Default for ScriptedExchangeClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExchangeApiClient for ScriptedExchangeClient {
    fn exchange_name(&self) -> ExchangeName {
        self.exchange
    }

    fn check_required_credentials(&self) -> bool {
        true
    }

    async fn fetch_open_orders(&self, _symbol: &str, since: i64) -> Result<Vec<Order>> {
        self.requests.lock().push(("open_orders", since));
        self.check(ExchangePermission::ViewSpotTradingHistory)?;
        Ok(self.page(&self.orders, since, |o| o.timestamp))
    }

    async fn fetch_trades(&self, _symbol: &str, since: i64) -> Result<Vec<Trade>> {
        self.requests.lock().push(("trades", since));
        Ok(self.page(&self.public_trades, since, |t| t.timestamp))
    }

    async fn fetch_my_trades(&self, _symbol: &str, since: i64) -> Result<Vec<Trade>> {
        self.requests.lock().push(("my_trades", since));
        self.check(ExchangePermission::ViewSpotTradingHistory)?;
        Ok(self.page(&self.my_trades, since, |t| t.timestamp))
    }

    async fn fetch_balance(&self) -> Result<AccountBalance> {
        if let Some(message) = &self.balance_error {
            return Err(AppError::Exchange(message.clone()));
        }
        self.check(ExchangePermission::ViewAccountBalance)?;
        Ok(self.balance.clone())
    }

    async fn fetch_deposit_address(&self, _symbol: &str) -> Result<String> {
        self.check(ExchangePermission::ViewDepositAddress)?;
        Ok(self.deposit_address.clone())
    }
}

pub fn trade(id: &str, side: TradingSide, taker_or_maker: TakerOrMaker, cost: Decimal, timestamp: i64) -> Trade {
    Trade {
        id: id.to_string(),
        symbol: "HMT/USDT".to_string(),
        side,
        taker_or_maker,
        price: Decimal::ONE,
        amount: cost,
        cost,
        timestamp,
    }
}

pub fn order(
    id: &str,
    side: TradingSide,
    order_type: OrderType,
    amount: Decimal,
    filled: Decimal,
    cost: Decimal,
    timestamp: i64,
) -> Order {
    Order {
        id: id.to_string(),
        symbol: "HMT/USDT".to_string(),
        side,
        order_type,
        amount,
        filled,
        cost,
        timestamp,
    }
}

pub fn credentials(api_key: &str) -> ApiCredentials {
    ApiCredentials::new(api_key, "secret").with_user_id(api_key)
}

/// Factory resolving every exchange to the scripted client registered under the API key
pub fn scripted_factory(clients: Vec<(&str, Arc<ScriptedExchangeClient>)>) -> Arc<ExchangeApiClientFactory> {
    let clients: Arc<HashMap<String, Arc<ScriptedExchangeClient>>> = Arc::new(
        clients
            .into_iter()
            .map(|(api_key, client)| (api_key.to_string(), client))
            .collect(),
    );

    let mut factory = ExchangeApiClientFactory::new(ExchangesConfig::default()).unwrap();
    for exchange in ExchangeName::ALL {
        let clients = clients.clone();
        factory.register(
            exchange,
            Arc::new(move |ctx: ClientContext| -> Result<Arc<dyn ExchangeApiClient>> {
                let client: Arc<dyn ExchangeApiClient> = clients
                    .get(&ctx.credentials.api_key)
                    .cloned()
                    .ok_or_else(|| AppError::Validation(format!("unknown api key {}", ctx.credentials.api_key)))?;
                Ok(client)
            }),
        );
    }

    Arc::new(factory)
}
