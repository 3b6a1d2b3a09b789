use std::collections::HashMap;

use serde::Deserialize;

/// Body returned by the daily time series functions.
///
/// Exactly one of the fields is expected to be present; which one decides how
/// the call is handled.
#[derive(Debug, Deserialize)]
pub struct DailySeriesResponse {
    #[serde(rename = "Error Message")]
    pub error_message: Option<String>,
    #[serde(rename = "Note")]
    pub note: Option<String>,
    #[serde(rename = "Information")]
    pub information: Option<String>,
    #[serde(rename = "Time Series (Daily)")]
    pub time_series: Option<HashMap<String, RawDailyBar>>,
}

/// One entry of the daily series. Every value arrives as a string.
#[derive(Debug, Deserialize)]
pub struct RawDailyBar {
    #[serde(rename = "1. open")]
    pub open: String,
    #[serde(rename = "2. high")]
    pub high: String,
    #[serde(rename = "3. low")]
    pub low: String,
    #[serde(rename = "4. close")]
    pub close: String,
    #[serde(rename = "5. adjusted close")]
    pub adjusted_close: Option<String>,
    // TIME_SERIES_DAILY has no adjusted close and numbers volume as field 5.
    #[serde(rename = "6. volume", alias = "5. volume")]
    pub volume: String,
}
