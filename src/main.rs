// Daily market data ingestion job.
mod alphavantage;
// HTTP client module.
mod http {
    // HTTP client implementation.
    pub mod client;
}
// Runtime configuration.
mod config;
// Fetch-and-store driver.
mod ingest;
// Data models.
mod model;
// Retry policy and backoff.
mod retry;
// Data storage module.
mod store;
// Symbol list handling.
mod symbols;

use std::process::ExitCode;

use clap::Parser;
use dotenv::dotenv;

use crate::{
    alphavantage::api_caller::{AlphaVantage, HttpTransport},
    config::{Args, Config},
    ingest::{IngestError, RunSummary},
    retry::TokioSleeper,
    store::{conn_string, postgres::PgStore, sqlite::SqliteStore, DatabaseTarget},
};

#[tokio::main(flavor = "current_thread")]
// Main function entry point.
async fn main() -> ExitCode {
    dotenv().ok();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = match Config::try_from(args) {
        Ok(config) => config,
        Err(err) => {
            log::error!("configuration error: {}", err);
            return ExitCode::from(2);
        }
    };

    match run(&config).await {
        Ok(summary) if config.fail_on_skip && !summary.skipped.is_empty() => {
            let skipped: Vec<_> = summary.skipped.iter().map(|s| s.symbol.as_str()).collect();
            log::error!("skipped symbols: {}", skipped.join(", "));
            ExitCode::from(3)
        }
        Ok(_) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("ingestion aborted: {}", err);
            ExitCode::FAILURE
        }
    }
}

async fn run(config: &Config) -> Result<RunSummary, IngestError> {
    let transport = HttpTransport::new(&config.fetch)?;
    let source = AlphaVantage::new(transport, TokioSleeper, config.fetch.clone());

    log::info!(
        "ingesting {} symbols: {}",
        config.symbols.len(),
        config.symbols.join(",")
    );

    match &config.database {
        DatabaseTarget::Postgres(url) => {
            let url = conn_string::normalize(url, config.database_project_id.as_deref());
            let mut store = PgStore::connect(&url, &config.database_schema, config.on_conflict)
                .await
                .map_err(IngestError::Connect)?;
            let summary = ingest::run(
                &config.symbols,
                config.symbol_delay,
                &mut store,
                &source,
                &TokioSleeper,
            )
            .await?;
            if let Err(err) = store.close().await {
                log::warn!("error closing database connection: {}", err);
            }
            Ok(summary)
        }
        DatabaseTarget::Sqlite(path) => {
            let mut store =
                SqliteStore::open(path, config.on_conflict).map_err(IngestError::Connect)?;
            ingest::run(
                &config.symbols,
                config.symbol_delay,
                &mut store,
                &source,
                &TokioSleeper,
            )
            .await
        }
    }
}
