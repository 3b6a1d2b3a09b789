use rusqlite::{Connection, OpenFlags};

use super::{daily_bar, symbol, BarStore, ConflictPolicy, StoreError};
use crate::model::DailyBar;

/// Opens the SQLite database at `path` (`:memory:` for a private in-memory
/// database) with foreign keys enforced.
pub fn init_connection(path: &str) -> rusqlite::Result<Connection> {
    let conn = if path == ":memory:" {
        Connection::open_in_memory()?
    } else {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
        )?;
        conn.query_row("PRAGMA journal_mode=WAL;", [], |_row| Ok(()))?;
        conn
    };
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    Ok(conn)
}

/// Bar store backed by a single SQLite connection.
pub struct SqliteStore {
    conn: Connection,
    policy: ConflictPolicy,
}

impl SqliteStore {
    pub fn open(path: &str, policy: ConflictPolicy) -> Result<Self, StoreError> {
        Ok(Self {
            conn: init_connection(path)?,
            policy,
        })
    }

    #[cfg(test)]
    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

impl BarStore for SqliteStore {
    async fn bootstrap(&mut self) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;
        symbol::create_table(&tx)?;
        daily_bar::create_table(&tx)?;
        tx.commit()?;
        Ok(())
    }

    async fn register_symbols(&mut self, symbols: &[String]) -> Result<u64, StoreError> {
        Ok(symbol::register_symbols(&mut self.conn, symbols)?)
    }

    async fn upsert_bars(&mut self, bars: &[DailyBar]) -> Result<u64, StoreError> {
        Ok(daily_bar::save_bars(&mut self.conn, bars, self.policy)?)
    }
}
