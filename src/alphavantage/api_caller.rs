use std::{collections::HashMap, future::Future, time::Duration};

use chrono::{NaiveDate, NaiveTime};
use clap::ValueEnum;
use thiserror::Error;

use super::response::{DailySeriesResponse, RawDailyBar};
use crate::{
    http::client::{self, RequestError},
    ingest::DailySource,
    model::DailyBar,
    retry::{self, ErrorCategory, ErrorClassification, RetryError, RetryPolicy, Sleeper},
};

// Base URL for the Alpha Vantage query endpoint.
pub const BASE_URL: &str = "https://www.alphavantage.co/query";

/// Which daily series function to call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SeriesFunction {
    #[value(name = "TIME_SERIES_DAILY_ADJUSTED")]
    DailyAdjusted,
    #[value(name = "TIME_SERIES_DAILY")]
    Daily,
}

impl SeriesFunction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SeriesFunction::DailyAdjusted => "TIME_SERIES_DAILY_ADJUSTED",
            SeriesFunction::Daily => "TIME_SERIES_DAILY",
        }
    }
}

/// `compact` returns the latest 100 sessions, `full` the whole history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputSize {
    Compact,
    Full,
}

impl OutputSize {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputSize::Compact => "compact",
            OutputSize::Full => "full",
        }
    }
}

/// Everything the fetcher needs to know about the upstream API.
#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub base_url: String,
    pub api_key: String,
    pub function: SeriesFunction,
    pub output_size: OutputSize,
    pub source_label: String,
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("API error: {0}")]
    HardError(String),
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("response carried no daily time series")]
    EmptyResponse,
    #[error("malformed bar on {date}: {reason}")]
    Malformed { date: String, reason: String },
    #[error(transparent)]
    Request(#[from] RequestError),
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        last: Box<FetchError>,
    },
}

impl ErrorClassification for FetchError {
    fn category(&self) -> ErrorCategory {
        match self {
            FetchError::RateLimited(_) => ErrorCategory::RateLimited,
            FetchError::Request(err) if err.is_transient() => ErrorCategory::Transient,
            FetchError::Request(_)
            | FetchError::HardError(_)
            | FetchError::EmptyResponse
            | FetchError::Malformed { .. }
            | FetchError::Exhausted { .. } => ErrorCategory::Permanent,
        }
    }
}

/// The only outcomes a daily series response can have.
#[derive(Debug)]
pub enum ApiResponse {
    HardError(String),
    RateLimited(String),
    Success(HashMap<String, RawDailyBar>),
    Missing,
}

/// Decides what a decoded response means. Error text wins over everything
/// else; `Information` is only a throttle when it talks about call limits,
/// otherwise it is an account or endpoint problem that retrying will not fix.
pub fn classify(resp: DailySeriesResponse) -> ApiResponse {
    if let Some(message) = resp.error_message {
        return ApiResponse::HardError(message);
    }
    if let Some(note) = resp.note {
        return ApiResponse::RateLimited(note);
    }
    if let Some(info) = resp.information {
        return if mentions_rate_limit(&info) {
            ApiResponse::RateLimited(info)
        } else {
            ApiResponse::HardError(info)
        };
    }
    match resp.time_series {
        Some(series) => ApiResponse::Success(series),
        None => ApiResponse::Missing,
    }
}

fn mentions_rate_limit(text: &str) -> bool {
    let text = text.to_lowercase();
    ["rate limit", "call frequency", "requests per", "calls per"]
        .iter()
        .any(|needle| text.contains(needle))
}

/// Converts the raw series into bars sorted by ascending timestamp.
pub fn parse_series(
    symbol: &str,
    series: HashMap<String, RawDailyBar>,
    source: &str,
) -> Result<Vec<DailyBar>, FetchError> {
    let mut bars = series
        .into_iter()
        .map(|(date, raw)| parse_bar(symbol, &date, &raw, source))
        .collect::<Result<Vec<_>, _>>()?;
    bars.sort_by_key(|bar| bar.timestamp);
    Ok(bars)
}

fn parse_bar(symbol: &str, date: &str, raw: &RawDailyBar, source: &str) -> Result<DailyBar, FetchError> {
    let day = NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d").map_err(|e| FetchError::Malformed {
        date: date.into(),
        reason: format!("bad date: {}", e),
    })?;
    let close = price(date, "close", &raw.close)?;
    let adj_close = match raw.adjusted_close.as_deref() {
        Some(value) => price(date, "adjusted close", value)?,
        None => close,
    };
    let volume = raw.volume.trim().parse::<i64>().map_err(|e| FetchError::Malformed {
        date: date.into(),
        reason: format!("bad volume '{}': {}", raw.volume, e),
    })?;

    Ok(DailyBar {
        symbol: symbol.into(),
        timestamp: day.and_time(NaiveTime::MIN).and_utc(),
        open: price(date, "open", &raw.open)?,
        high: price(date, "high", &raw.high)?,
        low: price(date, "low", &raw.low)?,
        close,
        adj_close,
        volume,
        source: source.into(),
    })
}

fn price(date: &str, field: &str, value: &str) -> Result<f64, FetchError> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| FetchError::Malformed {
            date: date.into(),
            reason: format!("bad {} '{}'", field, value),
        })
}

/// Performs one request against the query endpoint.
pub trait Transport {
    fn daily_series(
        &self,
        params: &[(&str, &str)],
    ) -> impl Future<Output = Result<DailySeriesResponse, RequestError>>;
}

impl<T: Transport + ?Sized> Transport for &T {
    fn daily_series(
        &self,
        params: &[(&str, &str)],
    ) -> impl Future<Output = Result<DailySeriesResponse, RequestError>> {
        (**self).daily_series(params)
    }
}

pub struct HttpTransport {
    client: client::Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(settings: &FetchSettings) -> Result<Self, RequestError> {
        Ok(Self {
            client: client::Client::new(settings.timeout)?,
            base_url: settings.base_url.clone(),
        })
    }
}

impl Transport for HttpTransport {
    async fn daily_series(&self, params: &[(&str, &str)]) -> Result<DailySeriesResponse, RequestError> {
        self.client.get_json(&self.base_url, params).await
    }
}

/// Alpha Vantage daily series fetcher.
pub struct AlphaVantage<T, S> {
    transport: T,
    sleeper: S,
    settings: FetchSettings,
}

impl<T: Transport, S: Sleeper> AlphaVantage<T, S> {
    pub fn new(transport: T, sleeper: S, settings: FetchSettings) -> Self {
        Self {
            transport,
            sleeper,
            settings,
        }
    }

    /// Fetches daily bars for a symbol, retrying throttled and transient
    /// failures according to the configured policy.
    pub async fn stock_daily(&self, symbol: &str) -> Result<Vec<DailyBar>, FetchError> {
        let params = [
            ("function", self.settings.function.as_str()),
            ("symbol", symbol),
            ("outputsize", self.settings.output_size.as_str()),
            ("datatype", "json"),
            ("apikey", self.settings.api_key.as_str()),
        ];
        let params = &params;

        let result = retry::retry_with_backoff(&self.settings.retry, &self.sleeper, |attempt| async move {
            log::debug!("requesting {} (attempt {})", symbol, attempt);
            let resp = self.transport.daily_series(params).await?;
            match classify(resp) {
                ApiResponse::HardError(message) => Err(FetchError::HardError(message)),
                ApiResponse::RateLimited(message) => Err(FetchError::RateLimited(message)),
                ApiResponse::Missing => Err(FetchError::EmptyResponse),
                ApiResponse::Success(series) => parse_series(symbol, series, &self.settings.source_label),
            }
        })
        .await;

        result.map_err(|err| match err {
            RetryError::Permanent(err) => err,
            RetryError::Exhausted { attempts, last } => FetchError::Exhausted {
                attempts,
                last: Box::new(last),
            },
        })
    }
}

impl<T: Transport, S: Sleeper> DailySource for AlphaVantage<T, S> {
    async fn daily_bars(&self, symbol: &str) -> Result<Vec<DailyBar>, FetchError> {
        self.stock_daily(symbol).await
    }
}


#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    use super::testing::{bar_json, settings, ScriptedTransport};
    use super::*;
    use crate::retry::testing::RecordingSleeper;

    fn decode(body: serde_json::Value) -> DailySeriesResponse {
        serde_json::from_value(body).unwrap()
    }

    #[test]
    fn classify_error_message_as_hard_error() {
        let resp = decode(json!({ "Error Message": "Invalid API call." }));
        assert!(matches!(classify(resp), ApiResponse::HardError(m) if m == "Invalid API call."));
    }

    #[test]
    fn classify_note_and_limit_information_as_rate_limited() {
        let note = decode(json!({
            "Note": "Thank you for using Alpha Vantage! Our standard API call frequency is 5 calls per minute."
        }));
        assert!(matches!(classify(note), ApiResponse::RateLimited(_)));

        let info = decode(json!({
            "Information": "Our standard API rate limit is 25 requests per day."
        }));
        assert!(matches!(classify(info), ApiResponse::RateLimited(_)));
    }

    #[test]
    fn classify_premium_information_as_hard_error() {
        let resp = decode(json!({
            "Information": "Thank you for using Alpha Vantage! This is a premium endpoint."
        }));
        assert!(matches!(classify(resp), ApiResponse::HardError(_)));
    }

    #[test]
    fn classify_missing_series() {
        let resp = decode(json!({ "Meta Data": { "2. Symbol": "AAPL" } }));
        assert!(matches!(classify(resp), ApiResponse::Missing));
    }

    #[test]
    fn parse_sorts_ascending_and_normalizes_to_utc_midnight() {
        let resp = decode(json!({
            "Time Series (Daily)": {
                "2024-01-03": bar_json("184.22", "184.25", Some("183.90"), "58414460"),
                "2024-01-02": bar_json("187.15", "185.64", Some("185.30"), "82488674"),
                "2023-12-29": bar_json("193.90", "192.53", Some("192.18"), "42628802"),
            }
        }));
        let ApiResponse::Success(series) = classify(resp) else {
            panic!("expected a series");
        };

        let bars = parse_series("AAPL", series, "alphavantage").unwrap();

        let dates: Vec<_> = bars.iter().map(|b| b.timestamp).collect();
        assert_eq!(
            dates,
            vec![
                Utc.with_ymd_and_hms(2023, 12, 29, 0, 0, 0).unwrap(),
                Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
                Utc.with_ymd_and_hms(2024, 1, 3, 0, 0, 0).unwrap(),
            ]
        );
        assert_eq!(bars[1].open, 187.15);
        assert_eq!(bars[1].close, 185.64);
        assert_eq!(bars[1].adj_close, 185.30);
        assert_eq!(bars[1].volume, 82488674);
        assert!(bars.iter().all(|b| b.symbol == "AAPL" && b.source == "alphavantage"));
    }

    #[test]
    fn missing_adjusted_close_falls_back_to_close() {
        let resp = decode(json!({
            "Time Series (Daily)": {
                "2024-01-02": {
                    "1. open": "187.15",
                    "2. high": "188.44",
                    "3. low": "183.89",
                    "4. close": "185.64",
                    "5. volume": "82488674"
                }
            }
        }));
        let ApiResponse::Success(series) = classify(resp) else {
            panic!("expected a series");
        };

        let bars = parse_series("AAPL", series, "alphavantage").unwrap();
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].adj_close, bars[0].close);
        assert_eq!(bars[0].volume, 82488674);
    }

    #[test]
    fn unparseable_number_is_malformed() {
        let resp = decode(json!({
            "Time Series (Daily)": {
                "2024-01-02": bar_json("n/a", "185.64", None, "100"),
            }
        }));
        let ApiResponse::Success(series) = classify(resp) else {
            panic!("expected a series");
        };

        let err = parse_series("AAPL", series, "alphavantage").unwrap_err();
        assert!(matches!(err, FetchError::Malformed { ref date, .. } if date == "2024-01-02"));
    }

    #[tokio::test]
    async fn sends_symbol_function_and_key() {
        let transport = ScriptedTransport::default();
        transport.push_json(json!({ "Time Series (Daily)": {} }));
        let sleeper = RecordingSleeper::default();
        let fetcher = AlphaVantage::new(&transport, &sleeper, settings());

        let bars = fetcher.stock_daily("MSFT").await.unwrap();

        assert!(bars.is_empty());
        let requests = transport.requests.borrow();
        let params: HashMap<_, _> = requests[0].iter().cloned().collect();
        assert_eq!(params["function"], "TIME_SERIES_DAILY_ADJUSTED");
        assert_eq!(params["symbol"], "MSFT");
        assert_eq!(params["outputsize"], "compact");
        assert_eq!(params["apikey"], "test-key");
    }

    #[tokio::test]
    async fn rate_limit_then_success_follows_backoff_schedule() {
        let transport = ScriptedTransport::default();
        transport
            .push_json(json!({ "Note": "API call frequency exceeded" }))
            .push_json(json!({ "Note": "API call frequency exceeded" }))
            .push_json(json!({
                "Time Series (Daily)": {
                    "2024-01-02": bar_json("187.15", "185.64", Some("185.30"), "82488674"),
                }
            }));
        let sleeper = RecordingSleeper::default();
        let fetcher = AlphaVantage::new(&transport, &sleeper, settings());

        let bars = fetcher.stock_daily("AAPL").await.unwrap();

        assert_eq!(bars.len(), 1);
        assert_eq!(transport.requests.borrow().len(), 3);
        assert_eq!(sleeper.secs(), vec![15, 25]);
    }

    #[tokio::test]
    async fn persistent_rate_limit_is_exhausted() {
        let transport = ScriptedTransport::default();
        for _ in 0..3 {
            transport.push_json(json!({ "Note": "API call frequency exceeded" }));
        }
        let sleeper = RecordingSleeper::default();
        let fetcher = AlphaVantage::new(&transport, &sleeper, settings());

        let err = fetcher.stock_daily("AAPL").await.unwrap_err();

        match err {
            FetchError::Exhausted { attempts, last } => {
                assert_eq!(attempts, 3);
                assert!(matches!(*last, FetchError::RateLimited(_)));
            }
            other => panic!("unexpected error: {}", other),
        }
        assert_eq!(sleeper.secs(), vec![15, 25]);
    }

    #[tokio::test]
    async fn hard_error_is_not_retried() {
        let transport = ScriptedTransport::default();
        transport.push_json(json!({ "Error Message": "Invalid API call." }));
        let sleeper = RecordingSleeper::default();
        let fetcher = AlphaVantage::new(&transport, &sleeper, settings());

        let err = fetcher.stock_daily("NOPE").await.unwrap_err();

        assert!(matches!(err, FetchError::HardError(_)));
        assert_eq!(transport.requests.borrow().len(), 1);
        assert!(sleeper.secs().is_empty());
    }

    #[tokio::test]
    async fn server_error_retries_with_exponential_backoff() {
        let transport = ScriptedTransport::default();
        transport
            .push_error(RequestError::HttpError(BASE_URL.into(), 503, "busy".into()))
            .push_error(RequestError::Timeout(BASE_URL.into()))
            .push_json(json!({ "Time Series (Daily)": {} }));
        let sleeper = RecordingSleeper::default();
        let fetcher = AlphaVantage::new(&transport, &sleeper, settings());

        let bars = fetcher.stock_daily("AAPL").await.unwrap();

        assert!(bars.is_empty());
        assert_eq!(sleeper.secs(), vec![5, 10]);
    }

    #[tokio::test]
    async fn client_error_is_permanent() {
        let transport = ScriptedTransport::default();
        transport.push_error(RequestError::HttpError(BASE_URL.into(), 403, "forbidden".into()));
        let sleeper = RecordingSleeper::default();
        let fetcher = AlphaVantage::new(&transport, &sleeper, settings());

        let err = fetcher.stock_daily("AAPL").await.unwrap_err();

        assert!(matches!(err, FetchError::Request(RequestError::HttpError(_, 403, _))));
        assert!(sleeper.secs().is_empty());
    }

    #[tokio::test]
    async fn missing_payload_is_empty_response() {
        let transport = ScriptedTransport::default();
        transport.push_json(json!({}));
        let sleeper = RecordingSleeper::default();
        let fetcher = AlphaVantage::new(&transport, &sleeper, settings());

        let err = fetcher.stock_daily("AAPL").await.unwrap_err();
        assert!(matches!(err, FetchError::EmptyResponse));
    }
}
