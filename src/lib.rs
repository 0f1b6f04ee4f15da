//! HuFi Recording Oracle
//!
//! Measures how liquidity-providing campaign participants are doing on
//! centralized exchanges and keeps an interim progress snapshot of every
//! running campaign in the cache.

pub mod cache;
pub mod config;
pub mod error;
pub mod exchanges;
pub mod lock;
pub mod progress;
pub mod scheduler;
pub mod server;
pub mod state;
pub mod utils;

use config::{LogConfig, LogFormat};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize tracing. `RUST_LOG` wins over the configured level when set.
pub fn init_logging(config: &LogConfig) {
    let level: LevelFilter = config.level.into();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));

    let registry = tracing_subscriber::registry().with(filter);
    match config.format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(true))
            .init(),
        LogFormat::Compact => registry.with(tracing_subscriber::fmt::layer().compact()).init(),
    }
}
