//! JSON over HTTP.

use std::time::Duration;

use altrates_engine::{RatesError, RatesResult};
use reqwest::{Client, Url};
use serde::de::DeserializeOwned;
use tracing::debug;

/// Thin JSON client that turns every failure into an upstream error.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    /// Create a client with a per-request timeout.
    pub fn new(timeout: Duration) -> RatesResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RatesError::Configuration(format!("http client: {}", e)))?;
        Ok(Self { client })
    }

    /// GET `url` and decode the body as JSON.
    ///
    /// Non-success statuses and HTML error pages are reported against
    /// `service`.
    pub async fn get_json<T: DeserializeOwned>(&self, service: &str, url: Url) -> RatesResult<T> {
        debug!(service = service, path = url.path(), "GET");

        let response = self
            .client
            .get(url)
            .header("accept", "application/json")
            .send()
            .await
            .map_err(|e| RatesError::upstream(service, e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| RatesError::upstream(service, e.to_string()))?;

        decode_body(service, status.as_u16(), &body)
    }
}

/// Decode a response body, rejecting failed statuses and HTML pages.
pub fn decode_body<T: DeserializeOwned>(service: &str, status: u16, body: &str) -> RatesResult<T> {
    if !(200..400).contains(&status) {
        return Err(RatesError::upstream(service, format!("HTTP {}", status)));
    }

    let trimmed = body.trim_start();
    if trimmed.starts_with('<') {
        return Err(RatesError::upstream(service, "returned an HTML page"));
    }

    serde_json::from_str(trimmed).map_err(|e| RatesError::MalformedMessage(format!("{}: {}", service, e)))
}

/// Parse a configured API root, mapping failures to configuration errors.
pub fn parse_url(url: &str) -> RatesResult<Url> {
    Url::parse(url).map_err(|e| RatesError::Configuration(format!("invalid URL {}: {}", url, e)))
}
