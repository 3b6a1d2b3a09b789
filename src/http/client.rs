use reqwest::{self, Url};
use serde::de::DeserializeOwned;
use std::time::Duration;
use thiserror::Error;

/// Custom error type for HTTP requests.
///
/// URLs carried by the variants never include the query string, so
/// credentials passed as query parameters stay out of logs.
#[derive(Error, Debug)]
pub enum RequestError {
    #[error("Request to {0} timed out")]
    Timeout(String),
    #[error("Could not connect to {0}: {1}")]
    Connect(String, String),
    #[error("Transport error talking to {0}: {1}")]
    Transport(String, String),
    #[error("HTTP error: {1} from {0}. Response body: {2}")]
    HttpError(String, u16, String),
    #[error("Error deserializing JSON: {0}")]
    JsonError(String),
    #[error("Other error: {0}")]
    Other(String),
}

impl RequestError {
    /// Whether the same request has a reasonable chance of succeeding later.
    pub fn is_transient(&self) -> bool {
        match self {
            RequestError::Timeout(_)
            | RequestError::Connect(..)
            | RequestError::Transport(..) => true,
            RequestError::HttpError(_, status, _) => *status == 429 || *status >= 500,
            RequestError::JsonError(_) | RequestError::Other(_) => false,
        }
    }

    fn from_reqwest(url: &Url, err: reqwest::Error) -> Self {
        let target = display_url(url);
        if err.is_timeout() {
            RequestError::Timeout(target)
        } else if err.is_connect() {
            RequestError::Connect(target, err.without_url().to_string())
        } else if err.is_decode() {
            RequestError::JsonError(err.without_url().to_string())
        } else if err.is_request() || err.is_body() {
            RequestError::Transport(target, err.without_url().to_string())
        } else {
            RequestError::Other(err.without_url().to_string())
        }
    }
}

// Scheme, host and path only.
fn display_url(url: &Url) -> String {
    let mut shown = url.clone();
    shown.set_query(None);
    shown.set_fragment(None);
    let _ = shown.set_password(None);
    shown.to_string()
}

/// Thin wrapper around a `reqwest::Client` that applies a per-request timeout
/// and decodes JSON bodies.
pub struct Client {
    inner: reqwest::Client,
}

impl Client {
    pub fn new(timeout: Duration) -> Result<Self, RequestError> {
        let inner = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RequestError::Other(e.to_string()))?;
        Ok(Self { inner })
    }

    /// Makes a GET request to `path` with the given query parameters and
    /// deserializes the JSON response.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,                // Absolute URL.
        params: &[(&str, &str)],   // Query parameters.
    ) -> Result<T, RequestError> {
        // Construct the URL.
        let url = if params.is_empty() {
            Url::parse(path).map_err(|e| RequestError::Other(e.to_string()))?
        } else {
            Url::parse_with_params(path, params).map_err(|e| RequestError::Other(e.to_string()))?
        };

        let response = self
            .inner
            .get(url.clone())
            .send()
            .await
            .map_err(|e| RequestError::from_reqwest(&url, e))?;

        // Handle non-success status codes.
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .map_err(|e| RequestError::from_reqwest(&url, e))?;
            return Err(RequestError::HttpError(
                display_url(&url),
                status.as_u16(),
                body,
            ));
        }

        // Deserialize the JSON response.
        response
            .json()
            .await
            .map_err(|e| RequestError::from_reqwest(&url, e))
    }
}
