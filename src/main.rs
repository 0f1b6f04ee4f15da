use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use hufi_recording_oracle::config::AppConfig;
use hufi_recording_oracle::exchanges::types::{ApiCredentials, ExchangeName};
use hufi_recording_oracle::progress::{MarketMakingChecker, ProgressCheckInput};
use hufi_recording_oracle::state::AppState;
use hufi_recording_oracle::{init_logging, server};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "hufi-recording-oracle", about = "HuFi Recording Oracle")]
struct Cli {
    #[arg(short, long, default_value = "config.toml")]
    config_path: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the API server and the progress check scheduler
    Serve,

    /// Run a single progress check tick over the configured campaigns
    Tick,

    /// Check market making progress of one account and print it as JSON
    Check {
        #[arg(long)]
        exchange: ExchangeName,

        /// Trading pair, e.g. HMT/USDT
        #[arg(long)]
        pair: String,

        #[arg(long)]
        start_date: DateTime<Utc>,

        #[arg(long)]
        end_date: DateTime<Utc>,

        #[arg(long, env = "HUFI_CHECK_API_KEY")]
        api_key: String,

        #[arg(long, env = "HUFI_CHECK_SECRET", hide_env_values = true)]
        secret: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load(&cli.config_path).context("could not load config")?;

    init_logging(&config.logger);

    match cli.command {
        Commands::Serve => {
            let api = config.api.clone();
            let state = AppState::new(config)
                .await
                .context("could not initialize application state")?
                .with_scheduler();

            let scheduler = state.scheduler.clone().map(|s| s.start());

            server::serve(&api, state, shutdown_signal())
                .await
                .context("could not start API server")?;

            if let Some(handle) = scheduler {
                handle.abort();
            }
        }
        Commands::Tick => {
            let state = AppState::new(config)
                .await
                .context("could not initialize application state")?
                .with_scheduler();

            if let Some(scheduler) = &state.scheduler {
                let summary = scheduler.run_once(Utc::now()).await?;
                println!("{}", serde_json::to_string_pretty(&summary)?);
            }
        }
        Commands::Check {
            exchange,
            pair,
            start_date,
            end_date,
            api_key,
            secret,
        } => {
            let state = AppState::new(config)
                .await
                .context("could not initialize application state")?;

            let input = ProgressCheckInput {
                exchange_name: exchange,
                credentials: ApiCredentials::new(api_key, secret),
                pair,
                start_date,
                end_date,
            };
            let result = MarketMakingChecker::new(state.pagination_limits())
                .check_input(&state.exchanges, &input)
                .await?;

            println!("{}", serde_json::to_string_pretty(&result)?);
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutdown signal received");
    }
}
