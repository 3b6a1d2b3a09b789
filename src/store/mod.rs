use std::{
    collections::{hash_map::Entry, HashMap},
    future::Future,
};

use clap::ValueEnum;
use thiserror::Error;

use crate::model::DailyBar;

/// Daily bar storage (SQLite).
pub mod daily_bar;
/// Connection string fix-ups for PostgreSQL.
pub mod conn_string;
/// PostgreSQL backend.
pub mod postgres;
/// SQLite connection and backend.
pub mod sqlite;
/// Symbol registry storage (SQLite).
pub mod symbol;

/// Rows per multi-row statement.
pub const CHUNK_SIZE: usize = 500;

/// What to do when a bar for an existing (symbol, timestamp) arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ConflictPolicy {
    /// Last write wins: prices, volume, source and ingestion time are replaced.
    #[default]
    Update,
    /// First write wins: the incoming row is dropped.
    Ignore,
}

impl ConflictPolicy {
    /// Conflict clause shared by both backends.
    pub fn bar_conflict_clause(&self) -> &'static str {
        match self {
            ConflictPolicy::Update => {
                " ON CONFLICT (symbol, ts) DO UPDATE SET \
                 open = excluded.open, \
                 high = excluded.high, \
                 low = excluded.low, \
                 close = excluded.close, \
                 adj_close = excluded.adj_close, \
                 volume = excluded.volume, \
                 source_text = excluded.source_text, \
                 ingested_at = excluded.ingested_at"
            }
            ConflictPolicy::Ignore => " ON CONFLICT (symbol, ts) DO NOTHING",
        }
    }
}

/// Collapses bars sharing a (symbol, timestamp) key the way writing them one
/// by one would: the last one wins under `Update`, the first under `Ignore`.
/// Input order is otherwise kept.
pub fn resolve_duplicates(bars: &[DailyBar], policy: ConflictPolicy) -> Vec<&DailyBar> {
    let mut slots = HashMap::with_capacity(bars.len());
    let mut resolved: Vec<&DailyBar> = Vec::with_capacity(bars.len());
    for bar in bars {
        match slots.entry((bar.symbol.as_str(), bar.timestamp)) {
            Entry::Occupied(slot) => {
                if policy == ConflictPolicy::Update {
                    resolved[*slot.get()] = bar;
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(resolved.len());
                resolved.push(bar);
            }
        }
    }
    resolved
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("postgres: {0}")]
    Postgres(#[from] sqlx::Error),
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Where the bars go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseTarget {
    Postgres(String),
    /// File path, or `:memory:`.
    Sqlite(String),
}

impl DatabaseTarget {
    /// Recognizes `postgres://`, `postgresql://` and `sqlite:` URLs.
    pub fn parse(url: &str) -> Option<Self> {
        let url = url.trim();
        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            return Some(DatabaseTarget::Postgres(url.to_string()));
        }
        let path = url.strip_prefix("sqlite:")?;
        let path = path.strip_prefix("//").unwrap_or(path);
        if path.is_empty() {
            return None;
        }
        Some(DatabaseTarget::Sqlite(path.to_string()))
    }
}

/// Persistence operations the ingestion run needs.
///
/// Every method runs in a single transaction: it either applies completely or
/// not at all.
pub trait BarStore {
    /// Creates schema objects that do not exist yet.
    fn bootstrap(&mut self) -> impl Future<Output = Result<(), StoreError>>;

    /// Inserts missing symbols and marks existing ones active. Descriptive
    /// columns of existing rows are left untouched.
    fn register_symbols(
        &mut self,
        symbols: &[String],
    ) -> impl Future<Output = Result<u64, StoreError>>;

    /// Writes bars keyed by (symbol, timestamp) and returns the rows affected.
    /// A batch may mix symbols and may repeat a key; repeats resolve as if
    /// written in order.
    fn upsert_bars(&mut self, bars: &[DailyBar]) -> impl Future<Output = Result<u64, StoreError>>;
}
