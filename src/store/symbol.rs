use chrono::Utc;
use rusqlite::{params, Connection, Result};

/// Initializes the symbols table in the SQLite database.
pub fn create_table(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS symbols (
            symbol TEXT PRIMARY KEY,
            name TEXT,
            exchange TEXT,
            sector TEXT,
            currency TEXT,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );",
        [],
    )?;
    Ok(())
}

/// Inserts missing symbols and refreshes `is_active`/`updated_at` on the
/// existing ones, all in one transaction.
pub fn register_symbols(conn: &mut Connection, symbols: &[String]) -> Result<u64> {
    let now = Utc::now().timestamp();
    let transaction = conn.transaction()?;
    let mut affected = 0;
    {
        let mut stmt = transaction.prepare(
            "INSERT INTO symbols (symbol, is_active, created_at, updated_at)
             VALUES (?1, 1, ?2, ?2)
             ON CONFLICT (symbol) DO UPDATE SET is_active = 1, updated_at = excluded.updated_at",
        )?;
        for symbol in symbols {
            affected += stmt.execute(params![symbol, now])? as u64;
        }
    }
    transaction.commit()?;
    Ok(affected)
}

#[cfg(test)]
pub struct SymbolRow {
    pub symbol: String,
    pub name: Option<String>,
    pub is_active: bool,
}

#[cfg(test)]
pub fn get_symbols(conn: &Connection) -> Result<Vec<SymbolRow>> {
    let mut stmt = conn.prepare("SELECT symbol, name, is_active FROM symbols ORDER BY symbol")?;
    let rows = stmt.query_map([], |row| {
        Ok(SymbolRow {
            symbol: row.get(0)?,
            name: row.get(1)?,
            is_active: row.get(2)?,
        })
    })?;
    rows.collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::sqlite::init_connection;

    fn symbols(codes: &[&str]) -> Vec<String> {
        codes.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn create_table_is_idempotent() {
        let conn = init_connection(":memory:").unwrap();
        create_table(&conn).unwrap();
        create_table(&conn).unwrap();
    }

    #[test]
    fn registration_inserts_once_and_keeps_metadata() {
        let mut conn = init_connection(":memory:").unwrap();
        create_table(&conn).unwrap();

        register_symbols(&mut conn, &symbols(&["AAPL", "MSFT"])).unwrap();
        conn.execute(
            "UPDATE symbols SET name = 'Apple Inc.', is_active = 0 WHERE symbol = 'AAPL'",
            [],
        )
        .unwrap();
        register_symbols(&mut conn, &symbols(&["AAPL", "MSFT", "GOOGL"])).unwrap();

        let rows = get_symbols(&conn).unwrap();
        let codes: Vec<_> = rows.iter().map(|r| r.symbol.as_str()).collect();
        assert_eq!(codes, vec!["AAPL", "GOOGL", "MSFT"]);

        let aapl = &rows[0];
        assert_eq!(aapl.name.as_deref(), Some("Apple Inc."));
        assert!(aapl.is_active);
    }
}
