//! Binance ticker prices and trade stream.

use altrates_engine::{MessageStream, RatesError, RatesResult, TickerPrices, TickerProvider, TradeStream};
use async_trait::async_trait;
use futures_util::{future, StreamExt};
use reqwest::Url;
use serde::Deserialize;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, instrument};

use crate::http::{parse_url, HttpClient};

const TICKER_SERVICE: &str = "binance";
const STREAM_SERVICE: &str = "binance-stream";

#[derive(Debug, Deserialize)]
struct TickerEntry {
    symbol: String,
    price: String,
}

/// Spot prices of every Binance market.
pub struct BinanceTicker {
    http: HttpClient,
    root: Url,
}

impl BinanceTicker {
    pub fn new(http: HttpClient, root: &str) -> RatesResult<Self> {
        Ok(Self {
            http,
            root: parse_url(root)?,
        })
    }

    fn endpoint(&self) -> RatesResult<Url> {
        self.root
            .join("/api/v3/ticker/price")
            .map_err(|e| RatesError::Configuration(format!("binance URL: {}", e)))
    }
}

/// Keep entries with a positive numeric price.
fn into_prices(entries: Vec<TickerEntry>) -> TickerPrices {
    entries
        .into_iter()
        .filter_map(|entry| {
            let price = entry.price.trim().parse::<f64>().ok()?;
            (price.is_finite() && price > 0.0).then(|| (entry.symbol.to_uppercase(), price))
        })
        .collect()
}

#[async_trait]
impl TickerProvider for BinanceTicker {
    fn name(&self) -> &str {
        TICKER_SERVICE
    }

    #[instrument(skip(self))]
    async fn prices(&self) -> RatesResult<TickerPrices> {
        let entries: Vec<TickerEntry> = self.http.get_json(TICKER_SERVICE, self.endpoint()?).await?;
        let prices = into_prices(entries);
        debug!(markets = prices.len(), "Fetched ticker prices");
        Ok(prices)
    }
}

/// Combined `<market>@trade` websocket stream.
pub struct BinanceTradeStream {
    root: String,
}

impl BinanceTradeStream {
    pub fn new(root: impl Into<String>) -> Self {
        Self { root: root.into() }
    }

    /// `<root>/stream?streams=batbtc@trade/ethbtc@trade`.
    pub fn stream_url(&self, symbols: &[String]) -> RatesResult<String> {
        if symbols.is_empty() {
            return Err(RatesError::Configuration("no markets to stream".to_string()));
        }
        let streams: Vec<String> = symbols
            .iter()
            .map(|s| format!("{}@trade", s.to_lowercase()))
            .collect();
        Ok(format!("{}/stream?streams={}", self.root.trim_end_matches('/'), streams.join("/")))
    }
}

#[async_trait]
impl TradeStream for BinanceTradeStream {
    fn name(&self) -> &str {
        STREAM_SERVICE
    }

    async fn subscribe(&self, symbols: &[String]) -> RatesResult<MessageStream> {
        let url = self.stream_url(symbols)?;
        let (socket, _) = connect_async(url.as_str())
            .await
            .map_err(|e| RatesError::upstream(STREAM_SERVICE, e.to_string()))?;
        info!(markets = symbols.len(), "Connected to trade stream");

        let messages = socket
            .take_while(|message| future::ready(!matches!(message, Ok(Message::Close(_)))))
            .filter_map(|message| {
                future::ready(match message {
                    Ok(Message::Text(text)) => Some(Ok(text)),
                    Ok(_) => None,
                    Err(e) => Some(Err(RatesError::upstream(STREAM_SERVICE, e.to_string()))),
                })
            });

        Ok(messages.boxed())
    }
}
