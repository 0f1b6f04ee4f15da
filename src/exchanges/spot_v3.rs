//! Spot v3 REST adapter shared by Binance and MEXC
//!
//! Both venues sign the query string with HMAC-SHA256 and accept a
//! `startTime` cursor on trade history, returning results ascending.

use crate::error::{AppError, Result};
use crate::exchanges::factory::ClientContext;
use crate::exchanges::types::*;
use crate::exchanges::ExchangeApiClient;
use crate::utils::{hash_string, hmac_sha256_hex, now_ms};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use tracing::{debug, info};

const RECV_WINDOW_MS: u64 = 5000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DepositAddressApi {
    /// `GET /sapi/v1/capital/deposit/address`, single object
    BinanceSapi,
    /// `GET /api/v3/capital/deposit/address`, list over networks
    MexcCapital,
}

/// Per-venue differences of the spot v3 API
#[derive(Debug, Clone, Copy)]
struct Venue {
    exchange: ExchangeName,
    base_url: &'static str,
    sandbox_url: Option<&'static str>,
    api_key_header: &'static str,
    /// Max page size of trade history endpoints
    trades_limit: u32,
    deposit_address_api: DepositAddressApi,
    deposit_network: &'static str,
    /// Error codes meaning the key lacks access rather than a failure
    access_error_codes: &'static [i64],
}

const BINANCE: Venue = Venue {
    exchange: ExchangeName::Binance,
    base_url: "https://api.binance.com",
    sandbox_url: Some("https://testnet.binance.vision"),
    api_key_header: "X-MBX-APIKEY",
    trades_limit: 1000,
    deposit_address_api: DepositAddressApi::BinanceSapi,
    deposit_network: "ETH",
    // invalid key format, invalid key/IP/permissions, bad signature, invalid symbol
    access_error_codes: &[-2014, -2015, -1022, -1121],
};

const MEXC: Venue = Venue {
    exchange: ExchangeName::Mexc,
    base_url: "https://api.mexc.com",
    sandbox_url: None,
    api_key_header: "X-MEXC-APIKEY",
    trades_limit: 100,
    deposit_address_api: DepositAddressApi::MexcCapital,
    deposit_network: "ERC20",
    // removed key, IP not whitelisted, no permission
    access_error_codes: &[10072, 700006, 700007, 602],
};

/// Binance/MEXC spot client
pub struct SpotV3Client {
    venue: Venue,
    client: Client,
    base_url: String,
    credentials: ApiCredentials,
    log_permission_errors: bool,
    api_key_hash: String,
}

impl SpotV3Client {
    pub fn binance(ctx: ClientContext) -> Result<Self> {
        Self::new(BINANCE, ctx)
    }

    pub fn mexc(ctx: ClientContext) -> Result<Self> {
        Self::new(MEXC, ctx)
    }

    fn new(venue: Venue, ctx: ClientContext) -> Result<Self> {
        let base_url = match (ctx.base_url, ctx.sandbox) {
            (Some(url), _) => url,
            (None, false) => venue.base_url.to_string(),
            (None, true) => venue
                .sandbox_url
                .ok_or_else(|| {
                    AppError::Config(format!("{} has no sandbox environment", venue.exchange))
                })?
                .to_string(),
        };

        Ok(Self {
            venue,
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

    async fn signed_get<T: DeserializeOwned>(
        &self,
        path: &str,
        mut params: Vec<(&str, String)>,
        permission: ExchangePermission,
    ) -> Result<T> {
        params.push(("recvWindow", RECV_WINDOW_MS.to_string()));
        params.push(("timestamp", now_ms().to_string()));

        let query = Self::build_query(&params);
        let signature = hmac_sha256_hex(&self.credentials.secret, &query)?;

        let response = self
            .client
            .get(format!("{}{}?{}&signature={}", self.base_url, path, query, signature))
            .header(self.venue.api_key_header, &self.credentials.api_key)
            .send()
            .await
            .map_err(|e| AppError::Exchange(format!("{} request failed: {}", self.venue.exchange, e)))?;

        self.parse_response(path, response, Some(permission)).await
    }

    async fn public_get<T: DeserializeOwned>(&self, path: &str, params: Vec<(&str, String)>) -> Result<T> {
        let response = self
            .client
            .get(format!("{}{}?{}", self.base_url, path, Self::build_query(&params)))
            .send()
            .await
            .map_err(|e| AppError::Exchange(format!("{} request failed: {}", self.venue.exchange, e)))?;

        self.parse_response(path, response, None).await
    }

    async fn parse_response<T: DeserializeOwned>(
        &self,
        path: &str,
        response: reqwest::Response,
        permission: Option<ExchangePermission>,
    ) -> Result<T> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AppError::Exchange(format!("{} response read failed: {}", self.venue.exchange, e)))?;

        if status.is_success() {
            return serde_json::from_str(&body).map_err(|e| {
                AppError::Exchange(format!("{} returned unexpected payload on {}: {}", self.venue.exchange, path, e))
            });
        }

        #[derive(Deserialize)]
        struct ApiError {
            code: i64,
            msg: String,
        }

        let (code, message) = match serde_json::from_str::<ApiError>(&body) {
            Ok(err) => (Some(err.code), err.msg),
            Err(_) => (None, body),
        };

        let is_access_error = matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN)
            || code.is_some_and(|c| self.venue.access_error_codes.contains(&c));

        match permission {
            Some(permission) if is_access_error => {
                if self.log_permission_errors {
                    info!(
                        exchange = %self.venue.exchange,
                        user_id = %self.credentials.user_id,
                        api_key_hash = %self.api_key_hash,
                        path,
                        ?code,
                        "Failed to access exchange API: {}",
                        message
                    );
                }
                Err(AppError::ExchangeAccess {
                    exchange: self.venue.exchange.to_string(),
                    permission,
                    message,
                })
            }
            _ => Err(AppError::Exchange(format!(
                "{} {} on {}: {}",
                self.venue.exchange, status, path, message
            ))),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiMyTrade {
    #[serde(deserialize_with = "string_or_number")]
    id: String,
    price: Decimal,
    qty: Decimal,
    quote_qty: Decimal,
    time: i64,
    is_buyer: bool,
    is_maker: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiOpenOrder {
    #[serde(deserialize_with = "string_or_number")]
    order_id: String,
    orig_qty: Decimal,
    executed_qty: Decimal,
    cummulative_quote_qty: Decimal,
    #[serde(rename = "type")]
    order_type: String,
    side: String,
    time: i64,
}

#[derive(Deserialize)]
struct ApiAggTrade {
    #[serde(rename = "a")]
    id: i64,
    #[serde(rename = "p")]
    price: Decimal,
    #[serde(rename = "q")]
    qty: Decimal,
    #[serde(rename = "T")]
    time: i64,
    /// Buyer was the maker, so the taker sold
    #[serde(rename = "m")]
    buyer_is_maker: bool,
}

#[derive(Deserialize)]
struct ApiAccount {
    balances: Vec<ApiBalance>,
}

#[derive(Deserialize)]
struct ApiBalance {
    asset: String,
    free: Decimal,
    locked: Decimal,
}

#[derive(Deserialize)]
struct ApiDepositAddress {
    address: String,
    #[serde(default)]
    network: Option<String>,
}

fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Number(i64),
    }

    Ok(match Id::deserialize(deserializer)? {
        Id::Text(s) => s,
        Id::Number(n) => n.to_string(),
    })
}

fn map_side(side: &str) -> TradingSide {
    if side.eq_ignore_ascii_case("BUY") {
        TradingSide::Buy
    } else {
        TradingSide::Sell
    }
}

fn map_order_type(order_type: &str) -> OrderType {
    if order_type.eq_ignore_ascii_case("MARKET") {
        OrderType::Market
    } else {
        OrderType::Limit
    }
}

#[async_trait]
impl ExchangeApiClient for SpotV3Client {
    fn exchange_name(&self) -> ExchangeName {
        self.venue.exchange
    }

    fn check_required_credentials(&self) -> bool {
        let complete = !self.credentials.api_key.is_empty() && !self.credentials.secret.is_empty();
        if !complete {
            debug!(exchange = %self.venue.exchange, "Incomplete required credentials: apiKey, secret");
        }
        complete
    }

    async fn fetch_open_orders(&self, symbol: &str, since: i64) -> Result<Vec<Order>> {
        let pair = TradingPair::parse(symbol)?;

        let orders: Vec<ApiOpenOrder> = self
            .signed_get(
                "/api/v3/openOrders",
                vec![("symbol", pair.concatenated())],
                ExchangePermission::ViewSpotTradingHistory,
            )
            .await?;

        // no cursor support on this endpoint, the venue returns every open order
        let mut orders: Vec<Order> = orders
            .into_iter()
            .filter(|o| o.time >= since)
            .map(|o| Order {
                id: o.order_id,
                symbol: pair.unified(),
                side: map_side(&o.side),
                order_type: map_order_type(&o.order_type),
                amount: o.orig_qty,
                filled: o.executed_qty,
                cost: o.cummulative_quote_qty,
                timestamp: o.time,
            })
            .collect();
        orders.sort_by_key(|o| o.timestamp);

        Ok(orders)
    }

    async fn fetch_trades(&self, symbol: &str, since: i64) -> Result<Vec<Trade>> {
        let pair = TradingPair::parse(symbol)?;

        let trades: Vec<ApiAggTrade> = self
            .public_get(
                "/api/v3/aggTrades",
                vec![
                    ("symbol", pair.concatenated()),
                    ("startTime", since.to_string()),
                    ("limit", self.venue.trades_limit.to_string()),
                ],
            )
            .await?;

        Ok(trades
            .into_iter()
            .map(|t| Trade {
                id: t.id.to_string(),
                symbol: pair.unified(),
                side: if t.buyer_is_maker { TradingSide::Sell } else { TradingSide::Buy },
                taker_or_maker: TakerOrMaker::Taker,
                price: t.price,
                amount: t.qty,
                cost: t.price * t.qty,
                timestamp: t.time,
            })
            .collect())
    }

    async fn fetch_my_trades(&self, symbol: &str, since: i64) -> Result<Vec<Trade>> {
        let pair = TradingPair::parse(symbol)?;

        let trades: Vec<ApiMyTrade> = self
            .signed_get(
                "/api/v3/myTrades",
                vec![
                    ("symbol", pair.concatenated()),
                    ("startTime", since.to_string()),
                    ("limit", self.venue.trades_limit.to_string()),
                ],
                ExchangePermission::ViewSpotTradingHistory,
            )
            .await?;

        Ok(trades
            .into_iter()
            .map(|t| Trade {
                id: t.id,
                symbol: pair.unified(),
                side: if t.is_buyer { TradingSide::Buy } else { TradingSide::Sell },
                taker_or_maker: if t.is_maker { TakerOrMaker::Maker } else { TakerOrMaker::Taker },
                price: t.price,
                amount: t.qty,
                cost: t.quote_qty,
                timestamp: t.time,
            })
            .collect())
    }

    async fn fetch_balance(&self) -> Result<AccountBalance> {
        let account: ApiAccount = self
            .signed_get("/api/v3/account", vec![], ExchangePermission::ViewAccountBalance)
            .await?;

        let mut balance = AccountBalance::default();
        for asset in account.balances {
            balance.insert(
                asset.asset,
                AssetBalance {
                    free: asset.free,
                    used: asset.locked,
                    total: asset.free + asset.locked,
                },
            );
        }

        Ok(balance)
    }

    async fn fetch_deposit_address(&self, symbol: &str) -> Result<String> {
        let coin = symbol.to_ascii_uppercase();
        let network = self.venue.deposit_network;

        let address = match self.venue.deposit_address_api {
            DepositAddressApi::BinanceSapi => {
                let response: ApiDepositAddress = self
                    .signed_get(
                        "/sapi/v1/capital/deposit/address",
                        vec![("coin", coin.clone()), ("network", network.to_string())],
                        ExchangePermission::ViewDepositAddress,
                    )
                    .await?;
                Some(response.address)
            }
            DepositAddressApi::MexcCapital => {
                let response: Vec<ApiDepositAddress> = self
                    .signed_get(
                        "/api/v3/capital/deposit/address",
                        vec![("coin", coin.clone()), ("network", network.to_string())],
                        ExchangePermission::ViewDepositAddress,
                    )
                    .await?;
                response
                    .into_iter()
                    .find(|a| a.network.as_deref().map_or(true, |n| n.eq_ignore_ascii_case(network)))
                    .map(|a| a.address)
            }
        };

        // a missing address has to be created by the user first
        match address {
            Some(address) if !address.is_empty() => Ok(address),
            _ => Err(AppError::ExchangeAccess {
                exchange: self.venue.exchange.to_string(),
                permission: ExchangePermission::ViewDepositAddress,
                message: format!("No deposit address for {} on {}", coin, network),
            }),
        }
    }
}
