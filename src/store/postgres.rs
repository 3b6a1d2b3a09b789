use sqlx::{postgres::PgConnection, Connection, Postgres, QueryBuilder};

use super::{resolve_duplicates, BarStore, ConflictPolicy, StoreError, CHUNK_SIZE};
use crate::model::DailyBar;

/// Bar store backed by one PostgreSQL connection held for the whole run.
pub struct PgStore {
    conn: PgConnection,
    schema: String,
    policy: ConflictPolicy,
}

impl PgStore {
    /// Connects to `url`. `schema` must already be a validated identifier.
    pub async fn connect(url: &str, schema: &str, policy: ConflictPolicy) -> Result<Self, StoreError> {
        let conn = PgConnection::connect(url).await?;
        Ok(Self {
            conn,
            schema: schema.to_string(),
            policy,
        })
    }

    pub async fn close(self) -> Result<(), StoreError> {
        self.conn.close().await?;
        Ok(())
    }
}

fn schema_ddl(schema: &str) -> String {
    format!(
        r#"
        CREATE SCHEMA IF NOT EXISTS {s};
        CREATE TABLE IF NOT EXISTS {s}.symbols (
            symbol      TEXT PRIMARY KEY,
            name        TEXT,
            exchange    TEXT,
            sector      TEXT,
            currency    TEXT,
            is_active   BOOLEAN NOT NULL DEFAULT TRUE,
            created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
        );
        CREATE TABLE IF NOT EXISTS {s}.daily_bars (
            symbol      TEXT NOT NULL REFERENCES {s}.symbols (symbol),
            ts          TIMESTAMPTZ NOT NULL,
            open        DOUBLE PRECISION,
            high        DOUBLE PRECISION,
            low         DOUBLE PRECISION,
            close       DOUBLE PRECISION,
            adj_close   DOUBLE PRECISION,
            volume      BIGINT,
            source_text TEXT NOT NULL,
            ingested_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            PRIMARY KEY (symbol, ts)
        );
        CREATE INDEX IF NOT EXISTS idx_daily_bars_ts ON {s}.daily_bars (ts);
        "#,
        s = schema
    )
}

// One multi-row symbol registration statement.
fn symbols_insert<'a>(schema: &str, chunk: &'a [String]) -> QueryBuilder<'a, Postgres> {
    let mut query = QueryBuilder::new(format!(
        "INSERT INTO {}.symbols (symbol, is_active, created_at, updated_at) ",
        schema
    ));
    query.push_values(chunk, |mut row, symbol| {
        row.push_bind(symbol.as_str())
            .push("TRUE")
            .push("NOW()")
            .push("NOW()");
    });
    query.push(" ON CONFLICT (symbol) DO UPDATE SET is_active = TRUE, updated_at = excluded.updated_at");
    query
}

// One multi-row bar upsert statement; `chunk` must not repeat a (symbol, ts) key.
fn bars_insert<'a>(
    schema: &str,
    chunk: &[&'a DailyBar],
    policy: ConflictPolicy,
) -> QueryBuilder<'a, Postgres> {
    let mut query = QueryBuilder::new(format!(
        "INSERT INTO {}.daily_bars \
         (symbol, ts, open, high, low, close, adj_close, volume, source_text, ingested_at) ",
        schema
    ));
    query.push_values(chunk.iter().copied(), |mut row, bar| {
        row.push_bind(bar.symbol.as_str())
            .push_bind(bar.timestamp)
            .push_bind(bar.open)
            .push_bind(bar.high)
            .push_bind(bar.low)
            .push_bind(bar.close)
            .push_bind(bar.adj_close)
            .push_bind(bar.volume)
            .push_bind(bar.source.as_str())
            .push("NOW()");
    });
    query.push(policy.bar_conflict_clause());
    query
}

fn bar_statements<'a>(
    schema: &str,
    bars: &'a [DailyBar],
    policy: ConflictPolicy,
) -> Vec<QueryBuilder<'a, Postgres>> {
    resolve_duplicates(bars, policy)
        .chunks(CHUNK_SIZE)
        .map(|chunk| bars_insert(schema, chunk, policy))
        .collect()
}

impl BarStore for PgStore {
    async fn bootstrap(&mut self) -> Result<(), StoreError> {
        let ddl = schema_ddl(&self.schema);
        let mut tx = self.conn.begin().await?;
        sqlx::raw_sql(&ddl).execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn register_symbols(&mut self, symbols: &[String]) -> Result<u64, StoreError> {
        let mut tx = self.conn.begin().await?;
        let mut affected = 0;
        for chunk in symbols.chunks(CHUNK_SIZE) {
            let mut query = symbols_insert(&self.schema, chunk);
            affected += query.build().execute(&mut *tx).await?.rows_affected();
        }
        tx.commit().await?;
        Ok(affected)
    }

    async fn upsert_bars(&mut self, bars: &[DailyBar]) -> Result<u64, StoreError> {
        let mut tx = self.conn.begin().await?;
        let mut affected = 0;
        for mut query in bar_statements(&self.schema, bars, self.policy) {
            affected += query.build().execute(&mut *tx).await?.rows_affected();
        }
        tx.commit().await?;
        Ok(affected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ddl_is_schema_qualified_and_idempotent() {
        let ddl = schema_ddl("tickervista");

        assert!(ddl.contains("CREATE SCHEMA IF NOT EXISTS tickervista;"));
        assert!(ddl.contains("CREATE TABLE IF NOT EXISTS tickervista.symbols"));
        assert!(ddl.contains("CREATE TABLE IF NOT EXISTS tickervista.daily_bars"));
        assert!(ddl.contains("REFERENCES tickervista.symbols (symbol)"));
        assert!(ddl.contains("CREATE INDEX IF NOT EXISTS idx_daily_bars_ts ON tickervista.daily_bars (ts)"));
        assert!(ddl.contains("PRIMARY KEY (symbol, ts)"));
    }

    fn bar(symbol: &str, day: u32, close: f64) -> DailyBar {
        use chrono::{TimeZone, Utc};

        DailyBar {
            symbol: symbol.into(),
            timestamp: Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap(),
            open: close,
            high: close,
            low: close,
            close,
            adj_close: close,
            volume: 1000,
            source: "alphavantage".into(),
        }
    }

    #[test]
    fn symbol_registration_statement() {
        let codes = vec!["AAPL".to_string(), "MSFT".to_string()];
        let query = symbols_insert("tickervista", &codes);

        assert_eq!(
            query.sql(),
            "INSERT INTO tickervista.symbols (symbol, is_active, created_at, updated_at) \
             VALUES ($1, TRUE, NOW(), NOW()), ($2, TRUE, NOW(), NOW()) \
             ON CONFLICT (symbol) DO UPDATE SET is_active = TRUE, updated_at = excluded.updated_at"
        );
    }

    #[test]
    fn bar_statement_row_shape_and_conflict_clause() {
        let bars = [bar("AAPL", 2, 185.0), bar("AAPL", 3, 184.0)];

        let update = bar_statements("tickervista", &bars, ConflictPolicy::Update);
        assert_eq!(update.len(), 1);
        let sql = update[0].sql();
        assert!(sql.starts_with(
            "INSERT INTO tickervista.daily_bars \
             (symbol, ts, open, high, low, close, adj_close, volume, source_text, ingested_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, NOW()), \
             ($10, $11, $12, $13, $14, $15, $16, $17, $18, NOW())"
        ));
        assert!(sql.ends_with(ConflictPolicy::Update.bar_conflict_clause()));
        assert!(sql.contains("DO UPDATE SET open = excluded.open"));

        let ignore = bar_statements("tickervista", &bars, ConflictPolicy::Ignore);
        assert!(ignore[0].sql().ends_with(" ON CONFLICT (symbol, ts) DO NOTHING"));
    }

    #[test]
    fn large_batches_split_into_chunks() {
        let bars: Vec<DailyBar> = (0..501)
            .map(|i| DailyBar {
                timestamp: bar("AAPL", 1, 10.0).timestamp + chrono::Duration::days(i),
                ..bar("AAPL", 1, 10.0)
            })
            .collect();

        let statements = bar_statements("tickervista", &bars, ConflictPolicy::Update);

        assert_eq!(statements.len(), 2);
        assert_eq!(statements[0].sql().matches("NOW()").count(), CHUNK_SIZE);
        assert_eq!(statements[1].sql().matches("NOW()").count(), 1);
    }

    #[test]
    fn repeated_keys_collapse_before_writing() {
        let bars = [bar("AAPL", 2, 185.0), bar("AAPL", 2, 186.0), bar("MSFT", 2, 370.0)];

        let statements = bar_statements("tickervista", &bars, ConflictPolicy::Update);

        assert_eq!(statements.len(), 1);
        assert_eq!(statements[0].sql().matches("NOW()").count(), 2);
    }
}
