//! # Page Fetch
//!
//! The scheduler's only view of the outside world: give it a URL, get back the
//! page markup or a [`FetchError`]. Failures are never retried here; the feed
//! scheduler treats them as an empty cycle and carries on.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::time::Duration;
use thiserror::Error;

/// Errors raised while acquiring the raw markup.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The HTTP client could not be constructed.
    #[error("Failed to build HTTP client: {0}")]
    Client(String),

    /// The request never produced a response.
    #[error("Request to {url} failed: {reason}")]
    Network {
        /// Requested URL.
        url: String,
        /// Transport diagnostic.
        reason: String,
    },

    /// The server answered with a non-success status.
    #[error("HTTP {status} from {url}")]
    Status {
        /// Requested URL.
        url: String,
        /// Status code returned.
        status: u16,
    },

    /// The response body could not be read as text.
    #[error("Failed to read body from {url}: {reason}")]
    Body {
        /// Requested URL.
        url: String,
        /// Decoder or transport diagnostic.
        reason: String,
    },
}

/// Acquires the raw markup of a page.
#[async_trait]
pub trait MarkupFetcher: Send + Sync {
    /// Fetches `url` and returns its markup.
    async fn fetch_raw_markup(&self, url: &str) -> Result<String, FetchError>;
}

/// Fetches pages over HTTP with browser-like headers.
pub struct HttpPageFetcher {
    client: reqwest::Client,
    settle: Duration,
}

impl HttpPageFetcher {
    /// Builds a fetcher with a per-request `timeout`.
    ///
    /// `settle` is an optional pause between receiving the response headers
    /// and reading the body; pages that stream their price updates in late
    /// tend to deliver fresher numbers with a short pause.
    pub fn new(timeout: Duration, settle: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(browser_headers())
            .build()
            .map_err(|e| FetchError::Client(e.to_string()))?;
        Ok(Self { client, settle })
    }
}

#[async_trait]
impl MarkupFetcher for HttpPageFetcher {
    async fn fetch_raw_markup(&self, url: &str) -> Result<String, FetchError> {
        log::debug!("Requesting gold page: {}", url);
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::Network {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        if !self.settle.is_zero() {
            log::debug!("Waiting {}ms for the page to settle", self.settle.as_millis());
            tokio::time::sleep(self.settle).await;
        }

        let body = response.text().await.map_err(|e| FetchError::Body {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        log::debug!("Received {} bytes from {}", body.len(), url);
        Ok(body)
    }
}

/// Headers of a desktop Chrome session, so the page serves its full table.
fn browser_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();

    let header_list = [
        ("accept", "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
        ("accept-language", "tr-TR,tr;q=0.9,en-US;q=0.8,en;q=0.7"),
        ("cache-control", "no-cache"),
        ("pragma", "no-cache"),
        ("user-agent", "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36"),
    ];

    for (name, value) in header_list {
        if let (Ok(h_name), Ok(h_value)) = (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value)) {
            headers.insert(h_name, h_value);
        }
    }

    headers
}
