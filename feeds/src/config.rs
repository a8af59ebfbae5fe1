//! Upstream feed configuration.

use std::time::Duration;

use altrates_common::constants;

/// Configuration for the live collaborators.
#[derive(Debug, Clone)]
pub struct FeedsConfig {
    /// Open Exchange Rates app id.
    pub oxr_app_id: Option<String>,
    /// Open Exchange Rates API root.
    pub oxr_url: String,
    /// How long a latest fiat quote is reused.
    pub oxr_cache_ttl: Duration,
    /// Binance REST API root.
    pub binance_rest_url: String,
    /// Binance websocket root.
    pub binance_stream_url: String,
    /// Coin Metrics community API root.
    pub coinmetrics_url: String,
    /// Timeout for a single HTTP request.
    pub request_timeout: Duration,
}

impl Default for FeedsConfig {
    fn default() -> Self {
        Self {
            oxr_app_id: None,
            oxr_url: "https://openexchangerates.org/api".to_string(),
            oxr_cache_ttl: constants::fiat_quote_ttl(),
            binance_rest_url: "https://api.binance.com".to_string(),
            binance_stream_url: "wss://stream.binance.com:9443".to_string(),
            coinmetrics_url: "https://community-api.coinmetrics.io".to_string(),
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl FeedsConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(app_id) = std::env::var("CURRENCY_OXR_API_ID") {
            config.oxr_app_id = Some(app_id);
        }

        if let Some(secs) = std::env::var("CURRENCY_OXR_CACHE_TTL_SECS")
            .ok()
            .and_then(|v| v.trim().parse::<u64>().ok())
        {
            config.oxr_cache_ttl = Duration::from_secs(secs);
        }

        if let Ok(url) = std::env::var("OXR_URL") {
            config.oxr_url = url;
        }

        if let Ok(url) = std::env::var("BINANCE_REST_URL") {
            config.binance_rest_url = url;
        }

        if let Ok(url) = std::env::var("BINANCE_STREAM_URL") {
            config.binance_stream_url = url;
        }

        if let Ok(url) = std::env::var("COINMETRICS_URL") {
            config.coinmetrics_url = url;
        }

        if let Some(secs) = std::env::var("FEEDS_REQUEST_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.trim().parse::<u64>().ok())
        {
            config.request_timeout = Duration::from_secs(secs);
        }

        config
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        match &self.oxr_app_id {
            Some(id) if !id.trim().is_empty() => {}
            _ => return Err("CURRENCY_OXR_API_ID must be set".to_string()),
        }

        for (name, url) in [
            ("OXR", &self.oxr_url),
            ("Binance REST", &self.binance_rest_url),
            ("Binance stream", &self.binance_stream_url),
            ("Coin Metrics", &self.coinmetrics_url),
        ] {
            if url.is_empty() {
                return Err(format!("{} URL cannot be empty", name));
            }
        }

        if self.request_timeout.is_zero() {
            return Err("Request timeout cannot be zero".to_string());
        }

        Ok(())
    }
}
