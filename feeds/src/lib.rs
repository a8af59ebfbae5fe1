//! AltRates Feeds
//!
//! Live upstream collaborators for the rate engine: Open Exchange Rates for
//! fiat, Binance for spot prices and trades, Coin Metrics for daily history.

pub mod binance;
pub mod cache;
pub mod coinmetrics;
pub mod config;
pub mod http;
pub mod oxr;

use std::sync::Arc;

use altrates_engine::{Collaborators, RatesError, RatesResult, TradeStream};

pub use binance::{BinanceTicker, BinanceTradeStream};
pub use cache::{CacheStats, ResponseCache};
pub use coinmetrics::CoinMetrics;
pub use config::FeedsConfig;
pub use http::HttpClient;
pub use oxr::OpenExchangeRates;

/// Build the engine's HTTP collaborators from configuration.
pub fn collaborators(config: &FeedsConfig) -> RatesResult<Collaborators> {
    let http = HttpClient::new(config.request_timeout)?;
    let app_id = config
        .oxr_app_id
        .clone()
        .ok_or_else(|| RatesError::Configuration("CURRENCY_OXR_API_ID must be set".to_string()))?;

    let rates = OpenExchangeRates::new(http.clone(), &config.oxr_url, app_id, config.oxr_cache_ttl)?;
    let ticker = BinanceTicker::new(http.clone(), &config.binance_rest_url)?;
    let history = CoinMetrics::new(http, &config.coinmetrics_url)?;

    Ok(Collaborators {
        rates: Arc::new(rates),
        ticker: Arc::new(ticker),
        history: Some(Arc::new(history)),
    })
}

/// The live trade stream.
pub fn trade_stream(config: &FeedsConfig) -> Arc<dyn TradeStream> {
    Arc::new(BinanceTradeStream::new(config.binance_stream_url.clone()))
}
