//! Live trade stream ingestion.
//!
//! A [`TradeFeed`] keeps one connection to a [`TradeStream`] open, writes
//! every valid trade straight into the alt partition, and reconnects after a
//! fixed delay whenever the connection drops.

use std::sync::Arc;
use std::time::Duration;

use altrates_common::{split_pair, split_pair_with, Partition};
use futures::StreamExt;
use serde::Deserialize;
use tokio::sync::{watch, RwLock};
use tracing::{debug, info, instrument, warn};

use crate::config::Roster;
use crate::error::{RatesError, RatesResult};
use crate::metrics::EngineMetrics;
use crate::provider::TradeStream;
use crate::store::SharedRateStore;

/// Feed connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedState {
    /// Not connected, or waiting to reconnect.
    Disconnected,
    /// Connection requested, no valid trade seen yet.
    Connecting,
    /// At least one valid trade received on the current connection.
    Streaming,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PriceField {
    Number(f64),
    Text(String),
}

#[derive(Deserialize)]
struct RawTrade {
    e: String,
    s: String,
    p: PriceField,
}

/// A validated trade event.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeMessage {
    pub event: String,
    /// Concatenated market symbol, e.g. `BATBTC`.
    pub symbol: String,
    pub price: f64,
}

impl TradeMessage {
    /// Parse a raw stream message.
    ///
    /// Accepts both bare events and the `{"stream", "data"}` envelope of
    /// combined streams. The price may be a number or a numeric string.
    pub fn parse(text: &str) -> RatesResult<Self> {
        let value: serde_json::Value =
            serde_json::from_str(text).map_err(|e| RatesError::MalformedMessage(e.to_string()))?;
        let payload = match value.get("data") {
            Some(data) => data.clone(),
            None => value,
        };
        let raw: RawTrade =
            serde_json::from_value(payload).map_err(|e| RatesError::MalformedMessage(e.to_string()))?;

        let price = match raw.p {
            PriceField::Number(n) => n,
            PriceField::Text(s) => s
                .trim()
                .parse::<f64>()
                .map_err(|_| RatesError::MalformedMessage(format!("price is not numeric: {}", s)))?,
        };

        if raw.e.is_empty() {
            return Err(RatesError::MalformedMessage("missing event type".to_string()));
        }
        if split_pair(&raw.s).is_none() {
            return Err(RatesError::MalformedMessage(format!("not a market symbol: {}", raw.s)));
        }
        if !price.is_finite() || price <= 0.0 {
            return Err(RatesError::MalformedMessage(format!("price must be positive: {}", price)));
        }

        Ok(Self {
            event: raw.e,
            symbol: raw.s.to_uppercase(),
            price,
        })
    }
}

/// Streams trades into the shared rate store.
pub struct TradeFeed {
    stream: Arc<dyn TradeStream>,
    store: SharedRateStore,
    roster: Roster,
    symbols: Vec<String>,
    reconnect_delay: Duration,
    state: Arc<RwLock<FeedState>>,
    metrics: Arc<EngineMetrics>,
}

impl TradeFeed {
    pub fn new(
        stream: Arc<dyn TradeStream>,
        store: SharedRateStore,
        roster: Roster,
        symbols: Vec<String>,
        reconnect_delay: Duration,
        metrics: Arc<EngineMetrics>,
    ) -> Self {
        Self {
            stream,
            store,
            roster,
            symbols,
            reconnect_delay,
            state: Arc::new(RwLock::new(FeedState::Disconnected)),
            metrics,
        }
    }

    /// Get current connection state.
    pub async fn state(&self) -> FeedState {
        *self.state.read().await
    }

    /// Handle shared with observers of the connection state.
    pub fn state_handle(&self) -> Arc<RwLock<FeedState>> {
        Arc::clone(&self.state)
    }

    /// Markets this feed subscribes to.
    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    /// Write a trade into the alt partition.
    ///
    /// Self pairs and markets with an untracked leg are ignored. Returns
    /// whether the store changed.
    pub fn apply(&self, trade: &TradeMessage) -> bool {
        let Some((base, quote)) = split_pair_with(&trade.symbol, |code| self.roster.contains(code)) else {
            self.metrics.trade_skipped();
            return false;
        };
        if base == quote || !self.roster.contains(base.code()) || !self.roster.contains(quote.code()) {
            self.metrics.trade_skipped();
            return false;
        }

        match self.store.write().set(Partition::Alt, &base, &quote, trade.price) {
            Ok(()) => {
                self.metrics.trade_applied();
                true
            }
            Err(e) => {
                self.metrics.trade_skipped();
                warn!(symbol = %trade.symbol, error = %e, "Trade rejected");
                false
            }
        }
    }

    /// Keep the feed connected until `shutdown` flips to `true`.
    #[instrument(skip(self, shutdown), fields(stream = self.stream.name()))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(markets = self.symbols.len(), "Trade feed started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let outcome = tokio::select! {
                outcome = self.session() => outcome,
                _ = shutdown.changed() => break,
            };

            *self.state.write().await = FeedState::Disconnected;
            self.metrics.stream_disconnected();
            match outcome {
                Ok(()) => info!(
                    delay_secs = self.reconnect_delay.as_secs(),
                    "Trade stream closed, reconnecting"
                ),
                Err(e) => warn!(
                    error = %e,
                    delay_secs = self.reconnect_delay.as_secs(),
                    "Trade stream failed, reconnecting"
                ),
            }

            tokio::select! {
                _ = tokio::time::sleep(self.reconnect_delay) => {}
                _ = shutdown.changed() => break,
            }
        }

        *self.state.write().await = FeedState::Disconnected;
        info!("Trade feed stopped");
    }

    /// One connection: subscribe and ingest until the stream ends.
    ///
    /// A malformed message ends the session with an error.
    async fn session(&self) -> RatesResult<()> {
        *self.state.write().await = FeedState::Connecting;
        let mut messages = self.stream.subscribe(&self.symbols).await?;
        debug!("Trade stream connected");

        while let Some(message) = messages.next().await {
            let text = message?;
            let trade = TradeMessage::parse(&text).map_err(|e| {
                self.metrics.trade_skipped();
                e
            })?;

            {
                let mut state = self.state.write().await;
                if *state != FeedState::Streaming {
                    *state = FeedState::Streaming;
                    info!(symbol = %trade.symbol, "Trade stream live");
                }
            }
            self.apply(&trade);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::mock::MockTradeStream;
    use crate::store::RateStore;
    use altrates_common::Symbol;

    fn trade(symbol: &str, price: &str) -> String {
        format!(r#"{{"e":"trade","E":1,"s":"{}","p":"{}","q":"10"}}"#, symbol, price)
    }

    fn feed(stream: Arc<MockTradeStream>) -> (TradeFeed, SharedRateStore) {
        let store = RateStore::shared(Symbol::usd());
        let roster = Roster::new(
            vec![Symbol::usd()],
            vec![Symbol::btc(), Symbol::eth(), Symbol::new("BAT")],
        );
        let feed = TradeFeed::new(
            stream,
            Arc::clone(&store),
            roster,
            vec!["BATBTC".to_string(), "ETHBTC".to_string()],
            Duration::from_secs(15),
            Arc::new(EngineMetrics::new()),
        );
        (feed, store)
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[test]
    fn test_parse_trade() {
        let parsed = TradeMessage::parse(&trade("BATBTC", "0.00003")).unwrap();
        assert_eq!(parsed.symbol, "BATBTC");
        assert_eq!(parsed.price, 0.00003);

        let numeric = TradeMessage::parse(r#"{"e":"trade","s":"ETHBTC","p":0.05}"#).unwrap();
        assert_eq!(numeric.price, 0.05);

        let wrapped =
            TradeMessage::parse(r#"{"stream":"ethbtc@trade","data":{"e":"trade","s":"ETHBTC","p":"0.05"}}"#).unwrap();
        assert_eq!(wrapped.symbol, "ETHBTC");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(TradeMessage::parse("not json").is_err());
        assert!(TradeMessage::parse(&trade("BATBTC", "0")).is_err());
        assert!(TradeMessage::parse(&trade("BATBTC", "-1")).is_err());
        assert!(TradeMessage::parse(&trade("BTC", "1")).is_err());
        assert!(TradeMessage::parse(r#"{"e":"trade","s":"BATBTC"}"#).is_err());
    }

    #[test]
    fn test_apply_filters_untracked() {
        let (feed, store) = feed(Arc::new(MockTradeStream::new()));

        assert!(feed.apply(&TradeMessage::parse(&trade("BATBTC", "0.00003")).unwrap()));
        assert!(!feed.apply(&TradeMessage::parse(&trade("ZRXBTC", "0.00002")).unwrap()));

        let store = store.read();
        assert_eq!(store.get(Partition::Alt, "BAT", "BTC"), Some(0.00003));
        assert!(store.get(Partition::Alt, "BTC", "BAT").is_some());
        assert!(!store.contains("ZRX"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnects_after_delay() {
        let stream = Arc::new(MockTradeStream::new());
        let first = stream.add_session();
        let second = stream.add_session();

        let (feed, store) = feed(Arc::clone(&stream));
        let feed = Arc::new(feed);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let runner = {
            let feed = Arc::clone(&feed);
            tokio::spawn(async move { feed.run(shutdown_rx).await })
        };

        settle().await;
        first.unbounded_send(Ok(trade("BATBTC", "0.00003"))).unwrap();
        settle().await;
        assert_eq!(feed.state().await, FeedState::Streaming);
        assert_eq!(store.read().get(Partition::Alt, "BAT", "BTC"), Some(0.00003));

        drop(first);
        settle().await;
        assert_eq!(feed.state().await, FeedState::Disconnected);
        assert_eq!(stream.attempts().len(), 1);

        tokio::time::sleep(Duration::from_secs(14)).await;
        assert_eq!(stream.attempts().len(), 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        settle().await;
        let attempts = stream.attempts();
        assert_eq!(attempts.len(), 2);
        assert!(attempts[1] - attempts[0] >= Duration::from_secs(15));

        second.unbounded_send(Ok(trade("BATBTC", "0.00004"))).unwrap();
        settle().await;
        assert_eq!(store.read().get(Partition::Alt, "BAT", "BTC"), Some(0.00004));
        assert_eq!(stream.subscriptions()[1], vec!["BATBTC".to_string(), "ETHBTC".to_string()]);

        shutdown_tx.send(true).unwrap();
        runner.await.unwrap();
        assert_eq!(feed.state().await, FeedState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_message_reconnects() {
        let stream = Arc::new(MockTradeStream::new());
        let first = stream.add_session();
        let second = stream.add_session();

        let (feed, store) = feed(Arc::clone(&stream));
        let feed = Arc::new(feed);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let runner = {
            let feed = Arc::clone(&feed);
            tokio::spawn(async move { feed.run(shutdown_rx).await })
        };

        settle().await;
        first.unbounded_send(Ok("not json at all".to_string())).unwrap();
        settle().await;
        assert_eq!(feed.state().await, FeedState::Disconnected);
        assert_eq!(stream.attempts().len(), 1);

        // ignored once the session is torn down
        first.unbounded_send(Ok(trade("BATBTC", "0.00009"))).ok();
        settle().await;
        assert_eq!(store.read().get(Partition::Alt, "BAT", "BTC"), None);

        tokio::time::sleep(Duration::from_secs(16)).await;
        settle().await;
        assert_eq!(stream.attempts().len(), 2);

        second.unbounded_send(Ok(trade("BATBTC", "0.00004"))).unwrap();
        settle().await;
        assert_eq!(store.read().get(Partition::Alt, "BAT", "BTC"), Some(0.00004));

        shutdown_tx.send(true).unwrap();
        runner.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_untracked_trade_marks_streaming() {
        let stream = Arc::new(MockTradeStream::new());
        let session = stream.add_session();

        let (feed, store) = feed(Arc::clone(&stream));
        let feed = Arc::new(feed);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let runner = {
            let feed = Arc::clone(&feed);
            tokio::spawn(async move { feed.run(shutdown_rx).await })
        };

        settle().await;
        assert_eq!(feed.state().await, FeedState::Connecting);

        session.unbounded_send(Ok(trade("ZRXBTC", "0.00002"))).unwrap();
        settle().await;
        assert_eq!(feed.state().await, FeedState::Streaming);
        assert!(!store.read().contains("ZRX"));

        shutdown_tx.send(true).unwrap();
        runner.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_refused_connection_retries() {
        let stream = Arc::new(MockTradeStream::new());
        let (feed, _store) = feed(Arc::clone(&stream));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let feed = Arc::new(feed);
        let runner = {
            let feed = Arc::clone(&feed);
            tokio::spawn(async move { feed.run(shutdown_rx).await })
        };

        tokio::time::sleep(Duration::from_secs(31)).await;
        settle().await;
        assert_eq!(stream.attempts().len(), 3);

        shutdown_tx.send(true).unwrap();
        runner.await.unwrap();
    }
}
