//! Bybit v5 REST adapter

use crate::error::{AppError, Result};
use crate::exchanges::factory::ClientContext;
use crate::exchanges::types::*;
use crate::exchanges::ExchangeApiClient;
use crate::utils::{hash_string, hmac_sha256_hex, now_ms};
use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use std::str::FromStr;
use tracing::{debug, info};

const BASE_URL: &str = "https://api.bybit.com";
const TESTNET_URL: &str = "https://api-testnet.bybit.com";
const RECV_WINDOW_MS: u64 = 5000;

/// Execution history only accepts windows of up to 7 days
const EXECUTION_WINDOW_MS: i64 = 7 * 24 * 60 * 60 * 1000;
const EXECUTION_PAGE_LIMIT: u32 = 100;
const OPEN_ORDERS_PAGE_LIMIT: u32 = 50;
/// Spot recent trades accept at most 60
const RECENT_TRADES_LIMIT: u32 = 60;

/// Wrong key, key expired, IP not allowed, no permission
const ACCESS_ERROR_CODES: &[i64] = &[10003, 10004, 10005, 10010, 33004];

pub struct BybitClient {
    client: Client,
    base_url: String,
    credentials: ApiCredentials,
    log_permission_errors: bool,
    api_key_hash: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope<T> {
    ret_code: i64,
    ret_msg: String,
    result: Option<T>,
}

impl BybitClient {
    pub fn new(ctx: ClientContext) -> Result<Self> {
        let base_url = match ctx.base_url {
            Some(url) => url,
            None if ctx.sandbox => TESTNET_URL.to_string(),
            None => BASE_URL.to_string(),
        };

        Ok(Self {
            client: ctx.http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key_hash: hash_string(&ctx.credentials.api_key),
            credentials: ctx.credentials,
            log_permission_errors: ctx.log_permission_errors,
        })
    }

    fn build_query(params: &[(&str, String)]) -> String {
        params
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&")
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        params: Vec<(&str, String)>,
        permission: Option<ExchangePermission>,
    ) -> Result<T> {
        let query = Self::build_query(&params);
        let mut request = self.client.get(format!("{}{}?{}", self.base_url, path, query));

        if permission.is_some() {
            let timestamp = now_ms().to_string();
            let recv_window = RECV_WINDOW_MS.to_string();
            let payload = format!("{}{}{}{}", timestamp, self.credentials.api_key, recv_window, query);
            request = request
                .header("X-BAPI-API-KEY", &self.credentials.api_key)
                .header("X-BAPI-TIMESTAMP", timestamp)
                .header("X-BAPI-RECV-WINDOW", recv_window)
                .header("X-BAPI-SIGN", hmac_sha256_hex(&self.credentials.secret, &payload)?);
        }

        let response = request
            .send()
            .await
            .map_err(|e| AppError::Exchange(format!("bybit request failed: {}", e)))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AppError::Exchange(format!("bybit response read failed: {}", e)))?;

        // auth failures come back as plain 401/403 without the envelope
        let (code, message) = match serde_json::from_str::<Envelope<serde_json::Value>>(&body) {
            Ok(envelope) if status.is_success() && envelope.ret_code == 0 => {
                let result = envelope
                    .result
                    .ok_or_else(|| AppError::Exchange(format!("bybit returned no result on {}", path)))?;
                return serde_json::from_value(result).map_err(|e| {
                    AppError::Exchange(format!("bybit returned unexpected payload on {}: {}", path, e))
                });
            }
            Ok(envelope) => (Some(envelope.ret_code), envelope.ret_msg),
            Err(_) => (None, body),
        };

        let is_access_error = status.as_u16() == 401
            || status.as_u16() == 403
            || code.is_some_and(|c| ACCESS_ERROR_CODES.contains(&c));

        match permission {
            Some(permission) if is_access_error => {
                if self.log_permission_errors {
                    info!(
                        exchange = "bybit",
                        user_id = %self.credentials.user_id,
                        api_key_hash = %self.api_key_hash,
                        path,
                        ?code,
                        "Failed to access exchange API: {}",
                        message
                    );
                }
                Err(AppError::ExchangeAccess {
                    exchange: ExchangeName::Bybit.to_string(),
                    permission,
                    message,
                })
            }
            _ => Err(AppError::Exchange(format!("bybit {} on {}: {:?} {}", status, path, code, message))),
        }
    }

    /// Fetch every page of a cursor-paginated list, following `nextPageCursor`
    async fn fetch_all_pages<T: DeserializeOwned + Send>(
        &self,
        path: &str,
        params: Vec<(&'static str, String)>,
        permission: ExchangePermission,
    ) -> Result<Vec<T>> {
        let mut items = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let mut page_params = params.clone();
            if let Some(cursor) = &cursor {
                page_params.push(("cursor", cursor.clone()));
            }

            let page: ApiList<T> = self.get(path, page_params, Some(permission)).await?;

            let received = page.list.len();
            items.extend(page.list);

            match page.next_page_cursor {
                Some(next) if !next.is_empty() && received > 0 && cursor.as_deref() != Some(next.as_str()) => {
                    cursor = Some(next)
                }
                _ => break,
            }
        }

        Ok(items)
    }

    /// Execution history of one window
    async fn fetch_execution_window(&self, symbol: &str, start: i64, end: i64) -> Result<Vec<ApiExecution>> {
        self.fetch_all_pages(
            "/v5/execution/list",
            vec![
                ("category", "spot".to_string()),
                ("symbol", symbol.to_string()),
                ("startTime", start.to_string()),
                ("endTime", end.to_string()),
                ("limit", EXECUTION_PAGE_LIMIT.to_string()),
            ],
            ExchangePermission::ViewSpotTradingHistory,
        )
        .await
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiList<T> {
    list: Vec<T>,
    #[serde(default)]
    next_page_cursor: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiExecution {
    exec_id: String,
    side: String,
    exec_price: Decimal,
    exec_qty: Decimal,
    exec_value: Decimal,
    #[serde(deserialize_with = "millis")]
    exec_time: i64,
    is_maker: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiOrder {
    order_id: String,
    side: String,
    order_type: String,
    qty: Decimal,
    #[serde(deserialize_with = "decimal_or_zero")]
    cum_exec_qty: Decimal,
    #[serde(deserialize_with = "decimal_or_zero")]
    cum_exec_value: Decimal,
    #[serde(deserialize_with = "millis")]
    created_time: i64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiPublicTrade {
    exec_id: String,
    price: Decimal,
    size: Decimal,
    side: String,
    #[serde(deserialize_with = "millis")]
    time: i64,
}

#[derive(Deserialize)]
struct ApiWallet {
    coin: Vec<ApiCoinBalance>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiCoinBalance {
    coin: String,
    #[serde(deserialize_with = "decimal_or_zero")]
    wallet_balance: Decimal,
    #[serde(default, deserialize_with = "decimal_or_zero")]
    locked: Decimal,
}

#[derive(Deserialize)]
struct ApiDepositAddresses {
    chains: Vec<ApiDepositChain>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiDepositChain {
    chain_type: String,
    address_deposit: String,
}

fn millis<'de, D>(deserializer: D) -> std::result::Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    raw.parse().map_err(serde::de::Error::custom)
}

/// Bybit sends `""` for amounts that do not apply
fn decimal_or_zero<'de, D>(deserializer: D) -> std::result::Result<Decimal, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    if raw.is_empty() {
        return Ok(Decimal::ZERO);
    }
    Decimal::from_str(&raw).map_err(serde::de::Error::custom)
}

fn map_side(side: &str) -> TradingSide {
    if side.eq_ignore_ascii_case("buy") {
        TradingSide::Buy
    } else {
        TradingSide::Sell
    }
}

#[async_trait]
impl ExchangeApiClient for BybitClient {
    fn exchange_name(&self) -> ExchangeName {
        ExchangeName::Bybit
    }

    fn check_required_credentials(&self) -> bool {
        let complete = !self.credentials.api_key.is_empty() && !self.credentials.secret.is_empty();
        if !complete {
            debug!(exchange = "bybit", "Incomplete required credentials: apiKey, secret");
        }
        complete
    }

    async fn fetch_open_orders(&self, symbol: &str, since: i64) -> Result<Vec<Order>> {
        let pair = TradingPair::parse(symbol)?;

        // newest first, so the whole list is needed before filtering by `since`
        let orders: Vec<ApiOrder> = self
            .fetch_all_pages(
                "/v5/order/realtime",
                vec![
                    ("category", "spot".to_string()),
                    ("symbol", pair.concatenated()),
                    ("openOnly", "0".to_string()),
                    ("limit", OPEN_ORDERS_PAGE_LIMIT.to_string()),
                ],
                ExchangePermission::ViewSpotTradingHistory,
            )
            .await?;

        let mut orders: Vec<Order> = orders
            .into_iter()
            .filter(|o| o.created_time >= since)
            .map(|o| Order {
                id: o.order_id,
                symbol: pair.unified(),
                side: map_side(&o.side),
                order_type: if o.order_type.eq_ignore_ascii_case("market") {
                    OrderType::Market
                } else {
                    OrderType::Limit
                },
                amount: o.qty,
                filled: o.cum_exec_qty,
                cost: o.cum_exec_value,
                timestamp: o.created_time,
            })
            .collect();
        orders.sort_by_key(|o| o.timestamp);

        Ok(orders)
    }

    async fn fetch_trades(&self, symbol: &str, since: i64) -> Result<Vec<Trade>> {
        let pair = TradingPair::parse(symbol)?;

        let trades: ApiList<ApiPublicTrade> = self
            .get(
                "/v5/market/recent-trade",
                vec![
                    ("category", "spot".to_string()),
                    ("symbol", pair.concatenated()),
                    ("limit", RECENT_TRADES_LIMIT.to_string()),
                ],
                None,
            )
            .await?;

        // only the latest trades are served; a full list starting after `since`
        // means older trades exist that cannot be fetched
        let oldest = trades.list.iter().map(|t| t.time).min();
        if let Some(oldest) = oldest {
            if trades.list.len() >= RECENT_TRADES_LIMIT as usize && oldest > since {
                return Err(AppError::Exchange(format!(
                    "bybit has no public trade history for since={}, oldest available trade is at {}",
                    since, oldest
                )));
            }
        }

        let mut trades: Vec<Trade> = trades
            .list
            .into_iter()
            .filter(|t| t.time >= since)
            .map(|t| Trade {
                id: t.exec_id,
                symbol: pair.unified(),
                side: map_side(&t.side),
                taker_or_maker: TakerOrMaker::Taker,
                price: t.price,
                amount: t.size,
                cost: t.price * t.size,
                timestamp: t.time,
            })
            .collect();
        trades.sort_by_key(|t| t.timestamp);

        Ok(trades)
    }

    async fn fetch_my_trades(&self, symbol: &str, since: i64) -> Result<Vec<Trade>> {
        let pair = TradingPair::parse(symbol)?;
        let now = now_ms();

        // move forward window by window until something shows up
        let mut start = since;
        let mut executions = Vec::new();
        while start < now && executions.is_empty() {
            let end = (start + EXECUTION_WINDOW_MS).min(now);
            executions = self.fetch_execution_window(&pair.concatenated(), start, end).await?;
            start = end + 1;
        }

        let mut trades: Vec<Trade> = executions
            .into_iter()
            .filter(|e| e.exec_time >= since)
            .map(|e| Trade {
                id: e.exec_id,
                symbol: pair.unified(),
                side: map_side(&e.side),
                taker_or_maker: if e.is_maker { TakerOrMaker::Maker } else { TakerOrMaker::Taker },
                price: e.exec_price,
                amount: e.exec_qty,
                cost: e.exec_value,
                timestamp: e.exec_time,
            })
            .collect();
        trades.sort_by_key(|t| t.timestamp);

        Ok(trades)
    }

    async fn fetch_balance(&self) -> Result<AccountBalance> {
        let wallets: ApiList<ApiWallet> = self
            .get(
                "/v5/account/wallet-balance",
                vec![("accountType", "UNIFIED".to_string())],
                Some(ExchangePermission::ViewAccountBalance),
            )
            .await?;

        let mut balance = AccountBalance::default();
        for wallet in wallets.list {
            for coin in wallet.coin {
                balance.insert(
                    coin.coin,
                    AssetBalance {
                        free: coin.wallet_balance - coin.locked,
                        used: coin.locked,
                        total: coin.wallet_balance,
                    },
                );
            }
        }

        Ok(balance)
    }

    async fn fetch_deposit_address(&self, symbol: &str) -> Result<String> {
        let coin = symbol.to_ascii_uppercase();

        let addresses: ApiDepositAddresses = self
            .get(
                "/v5/asset/deposit/query-address",
                vec![("coin", coin.clone()), ("chainType", "ETH".to_string())],
                Some(ExchangePermission::ViewDepositAddress),
            )
            .await?;

        addresses
            .chains
            .into_iter()
            .find(|c| c.chain_type.eq_ignore_ascii_case("ETH") && !c.address_deposit.is_empty())
            .map(|c| c.address_deposit)
            .ok_or_else(|| AppError::ExchangeAccess {
                exchange: ExchangeName::Bybit.to_string(),
                permission: ExchangePermission::ViewDepositAddress,
                message: format!("No deposit address for {} on ETH", coin),
            })
    }
}
