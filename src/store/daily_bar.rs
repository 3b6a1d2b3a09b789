use chrono::Utc;
use rusqlite::{params, Connection, Result};

use super::ConflictPolicy;
use crate::model::DailyBar;

/// Initializes the daily_bars table and its time index in the SQLite database.
pub fn create_table(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS daily_bars (
            symbol TEXT NOT NULL REFERENCES symbols (symbol),
            ts INTEGER NOT NULL,
            open REAL,
            high REAL,
            low REAL,
            close REAL,
            adj_close REAL,
            volume INTEGER,
            source_text TEXT NOT NULL,
            ingested_at INTEGER NOT NULL,
            PRIMARY KEY (symbol, ts)
        );",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_daily_bars_ts ON daily_bars (ts);",
        [],
    )?;
    Ok(())
}

/// Saves bars keyed by (symbol, ts) in one transaction. Any failing row rolls
/// the whole batch back.
pub fn save_bars(conn: &mut Connection, bars: &[DailyBar], policy: ConflictPolicy) -> Result<u64> {
    let ingested_at = Utc::now().timestamp();
    let transaction = conn.transaction()?;
    let mut affected = 0;
    {
        let sql = format!(
            "INSERT INTO daily_bars
                (symbol, ts, open, high, low, close, adj_close, volume, source_text, ingested_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10){}",
            policy.bar_conflict_clause()
        );
        let mut stmt = transaction.prepare(&sql)?;
        for bar in bars {
            affected += stmt.execute(params![
                bar.symbol,
                bar.timestamp.timestamp(),
                bar.open,
                bar.high,
                bar.low,
                bar.close,
                bar.adj_close,
                bar.volume,
                bar.source,
                ingested_at,
            ])? as u64;
        }
    }
    transaction.commit()?;
    Ok(affected)
}

/// Retrieves all bars of a symbol in ascending time order.
#[cfg(test)]
pub fn get_bars(conn: &Connection, symbol: &str) -> Result<Vec<DailyBar>> {
    use chrono::DateTime;

    let mut stmt = conn.prepare(
        "SELECT symbol, ts, open, high, low, close, adj_close, volume, source_text
         FROM daily_bars
         WHERE symbol = ?1 ORDER BY ts ASC",
    )?;
    let rows = stmt.query_map(params![symbol], |row| {
        let ts: i64 = row.get(1)?;
        Ok(DailyBar {
            symbol: row.get(0)?,
            timestamp: DateTime::from_timestamp(ts, 0).unwrap_or_default(),
            open: row.get(2)?,
            high: row.get(3)?,
            low: row.get(4)?,
            close: row.get(5)?,
            adj_close: row.get(6)?,
            volume: row.get(7)?,
            source: row.get(8)?,
        })
    })?;
    rows.collect()
}

#[cfg(test)]
pub fn count_bars(conn: &Connection, symbol: &str) -> Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM daily_bars WHERE symbol = ?1",
        params![symbol],
        |row| row.get(0),
    )
}
