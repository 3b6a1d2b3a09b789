use std::{future::Future, time::Duration};

use thiserror::Error;

use crate::{
    alphavantage::api_caller::FetchError,
    model::DailyBar,
    retry::Sleeper,
    store::{BarStore, StoreError},
};

/// Anything that can produce daily bars for a symbol.
pub trait DailySource {
    fn daily_bars(&self, symbol: &str) -> impl Future<Output = Result<Vec<DailyBar>, FetchError>>;
}

/// Failures that stop the whole run. Per-symbol problems never end up here.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("could not open database: {0}")]
    Connect(#[source] StoreError),
    #[error("could not build HTTP client: {0}")]
    Client(#[from] crate::http::client::RequestError),
    #[error("schema bootstrap failed: {0}")]
    Bootstrap(#[source] StoreError),
    #[error("symbol registration failed: {0}")]
    Register(#[source] StoreError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Skipped {
    pub symbol: String,
    pub reason: String,
}

/// Outcome of a completed run.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub succeeded: usize,
    pub rows_written: u64,
    pub skipped: Vec<Skipped>,
}

/// Bootstraps the schema, registers `symbols`, then fetches and stores each
/// symbol in order, pausing `symbol_delay` between symbols.
pub async fn run<St, Src, Sl>(
    symbols: &[String],
    symbol_delay: Duration,
    store: &mut St,
    source: &Src,
    sleeper: &Sl,
) -> Result<RunSummary, IngestError>
where
    St: BarStore,
    Src: DailySource,
    Sl: Sleeper,
{
    store.bootstrap().await.map_err(IngestError::Bootstrap)?;
    let registered = store
        .register_symbols(symbols)
        .await
        .map_err(IngestError::Register)?;
    log::debug!("registered {} symbols ({} rows touched)", symbols.len(), registered);

    let mut summary = RunSummary::default();
    for (i, symbol) in symbols.iter().enumerate() {
        log::info!("ingest {} ...", symbol);

        match ingest_symbol(symbol, store, source).await {
            Ok(rows) => {
                log::info!("done {}, rows={}", symbol, rows);
                summary.succeeded += 1;
                summary.rows_written += rows;
            }
            Err(reason) => {
                log::warn!("skip {}: {}", symbol, reason);
                summary.skipped.push(Skipped {
                    symbol: symbol.clone(),
                    reason,
                });
            }
        }

        if i + 1 < symbols.len() && !symbol_delay.is_zero() {
            sleeper.sleep(symbol_delay).await;
        }
    }

    log::info!(
        "finished: {} symbols ok, {} skipped, total rows={}",
        summary.succeeded,
        summary.skipped.len(),
        summary.rows_written
    );
    Ok(summary)
}

// Fetch then write one symbol; the error is the human readable skip reason.
async fn ingest_symbol<St, Src>(symbol: &str, store: &mut St, source: &Src) -> Result<u64, String>
where
    St: BarStore,
    Src: DailySource,
{
    let bars = source
        .daily_bars(symbol)
        .await
        .map_err(|e| e.to_string())?;
    if bars.is_empty() {
        log::info!("no bars returned for {}", symbol);
        return Ok(0);
    }

    store
        .upsert_bars(&bars)
        .await
        .map_err(|e| format!("write failed: {}", e))
}
