//! Exchange client registry

use crate::config::ExchangesConfig;
use crate::error::{AppError, Result};
use crate::exchanges::types::{ApiCredentials, ExchangeName};
use crate::exchanges::{bybit, spot_v3, ExchangeApiClient};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Everything a client constructor needs
#[derive(Clone)]
pub struct ClientContext {
    pub credentials: ApiCredentials,
    pub sandbox: bool,
    pub log_permission_errors: bool,
    /// Overrides the venue's REST base URL
    pub base_url: Option<String>,
    pub http: reqwest::Client,
}

pub type ClientConstructor =
    Arc<dyn Fn(ClientContext) -> Result<Arc<dyn ExchangeApiClient>> + Send + Sync>;

fn binance_client(ctx: ClientContext) -> Result<Arc<dyn ExchangeApiClient>> {
    Ok(Arc::new(spot_v3::SpotV3Client::binance(ctx)?))
}

fn mexc_client(ctx: ClientContext) -> Result<Arc<dyn ExchangeApiClient>> {
    Ok(Arc::new(spot_v3::SpotV3Client::mexc(ctx)?))
}

fn bybit_client(ctx: ClientContext) -> Result<Arc<dyn ExchangeApiClient>> {
    Ok(Arc::new(bybit::BybitClient::new(ctx)?))
}

/// Maps exchange names to client constructors
pub struct ExchangeApiClientFactory {
    constructors: HashMap<ExchangeName, ClientConstructor>,
    config: ExchangesConfig,
    http: reqwest::Client,
}

impl ExchangeApiClientFactory {
    /// Create the factory with every supported exchange registered
    pub fn new(config: ExchangesConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;

        let mut factory = Self {
            constructors: HashMap::new(),
            config,
            http,
        };

        factory.register(ExchangeName::Binance, Arc::new(binance_client));
        factory.register(ExchangeName::Mexc, Arc::new(mexc_client));
        factory.register(ExchangeName::Bybit, Arc::new(bybit_client));

        factory.validate()?;
        Ok(factory)
    }

    /// Register or replace the constructor for an exchange
    pub fn register(&mut self, exchange: ExchangeName, constructor: ClientConstructor) {
        self.constructors.insert(exchange, constructor);
    }

    /// Every exchange must have a constructor
    fn validate(&self) -> Result<()> {
        for exchange in ExchangeName::ALL {
            if !self.constructors.contains_key(&exchange) {
                return Err(AppError::Config(format!(
                    "No API client registered for exchange: {}",
                    exchange
                )));
            }
        }
        Ok(())
    }

    /// List all supported exchanges
    pub fn supported(&self) -> Vec<ExchangeName> {
        let mut names: Vec<ExchangeName> = self.constructors.keys().copied().collect();
        names.sort_by_key(|n| n.as_str());
        names
    }

    pub fn create(
        &self,
        exchange: ExchangeName,
        credentials: ApiCredentials,
    ) -> Result<Arc<dyn ExchangeApiClient>> {
        let constructor = self
            .constructors
            .get(&exchange)
            .ok_or_else(|| AppError::UnsupportedExchange(exchange.to_string()))?;

        debug!(
            %exchange,
            user_id = %credentials.user_id,
            sandbox = self.config.use_sandbox,
            "Creating exchange API client"
        );

        let client = constructor(ClientContext {
            credentials,
            sandbox: self.config.use_sandbox,
            log_permission_errors: self.config.log_permission_errors,
            base_url: self.config.base_urls.get(&exchange).cloned(),
            http: self.http.clone(),
        })?;

        if !client.check_required_credentials() {
            return Err(AppError::Validation(format!(
                "Incomplete credentials for {}",
                exchange
            )));
        }
        Ok(client)
    }
}
