use chrono::{DateTime, Utc};

/// One trading day of OHLCV data for one symbol.
#[derive(Debug, Clone, PartialEq)]
pub struct DailyBar {
    pub symbol: String,            // Symbol of the asset.
    pub timestamp: DateTime<Utc>,  // Trading date at UTC midnight.
    pub open: f64,                 // Opening price.
    pub high: f64,                 // Highest price.
    pub low: f64,                  // Lowest price.
    pub close: f64,                // Closing price.
    pub adj_close: f64,            // Split/dividend adjusted close; equals close when upstream omits it.
    pub volume: i64,               // Trading volume.
    pub source: String,            // Provider tag stored alongside the row.
}
