//! Collaborator traits for rate sources.

use std::collections::BTreeMap;

use altrates_common::Symbol;
use async_trait::async_trait;
use chrono::NaiveDate;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::config::AssetProfile;
use crate::error::RatesResult;

/// Exchange prices keyed by concatenated pair symbol (`ETHBTC`).
pub type TickerPrices = BTreeMap<String, f64>;

/// Raw messages from a trade stream. The stream ending means the socket closed.
pub type MessageStream = BoxStream<'static, RatesResult<String>>;

/// Fiat rates quoted against a base currency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FiatQuote {
    /// Currency the rates are quoted from.
    pub base: Symbol,
    /// Units of each currency per base unit.
    pub rates: BTreeMap<Symbol, f64>,
}

impl FiatQuote {
    /// Create a quote from `(symbol, rate)` pairs.
    pub fn from_pairs(base: &str, pairs: &[(&str, f64)]) -> Self {
        Self {
            base: Symbol::new(base),
            rates: pairs
                .iter()
                .map(|(code, rate)| (Symbol::new(code), *rate))
                .collect(),
        }
    }
}

impl Default for FiatQuote {
    fn default() -> Self {
        Self {
            base: Symbol::usd(),
            rates: BTreeMap::new(),
        }
    }
}

/// Source of fiat exchange rates.
#[async_trait]
pub trait RateService: Send + Sync {
    /// Get the service name.
    fn name(&self) -> &str;

    /// Latest rates.
    async fn latest(&self) -> RatesResult<FiatQuote>;

    /// Rates at the close of a past day.
    async fn historical(&self, day: NaiveDate) -> RatesResult<FiatQuote>;
}

/// Source of spot exchange prices.
#[async_trait]
pub trait TickerProvider: Send + Sync {
    /// Get the provider name.
    fn name(&self) -> &str;

    /// Current price of every listed market.
    async fn prices(&self) -> RatesResult<TickerPrices>;
}

/// Source of daily USD prices for alts.
#[async_trait]
pub trait HistoricalPriceSource: Send + Sync {
    /// Get the source name.
    fn name(&self) -> &str;

    /// USD price of one unit of `asset` on `day`.
    async fn price_usd(&self, asset: &Symbol, profile: &AssetProfile, day: NaiveDate) -> RatesResult<f64>;
}

/// Live trade feed.
///
/// Subscribing opens one connection. Reconnecting after it drops is the
/// caller's job.
#[async_trait]
pub trait TradeStream: Send + Sync {
    /// Get the stream name.
    fn name(&self) -> &str;

    /// Open a connection streaming trades for the given markets.
    async fn subscribe(&self, symbols: &[String]) -> RatesResult<MessageStream>;
}

/// In-memory collaborators for tests.
#[cfg(any(test, feature = "test-utils"))]
pub mod mock {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use dashmap::DashMap;
    use futures::channel::mpsc;
    use futures::StreamExt;
    use parking_lot::Mutex;
    use tokio::time::Instant;

    use super::*;
    use crate::error::RatesError;

    async fn pause(delay: Duration) {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    /// Mock fiat rate service.
    pub struct MockRateService {
        latest: Mutex<RatesResult<FiatQuote>>,
        historical: DashMap<NaiveDate, FiatQuote>,
        delay: Mutex<Duration>,
        calls: AtomicUsize,
    }

    impl MockRateService {
        /// Create a service answering `latest` with `quote`.
        pub fn new(quote: FiatQuote) -> Self {
            Self {
                latest: Mutex::new(Ok(quote)),
                historical: DashMap::new(),
                delay: Mutex::new(Duration::ZERO),
                calls: AtomicUsize::new(0),
            }
        }

        /// Replace the latest quote.
        pub fn set_latest(&self, quote: FiatQuote) {
            *self.latest.lock() = Ok(quote);
        }

        /// Make `latest` fail.
        pub fn fail_latest(&self, error: RatesError) {
            *self.latest.lock() = Err(error);
        }

        /// Set the quote for a past day.
        pub fn set_historical(&self, day: NaiveDate, quote: FiatQuote) {
            self.historical.insert(day, quote);
        }

        /// Delay every answer.
        pub fn set_delay(&self, delay: Duration) {
            *self.delay.lock() = delay;
        }

        /// Number of calls made so far.
        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RateService for MockRateService {
        fn name(&self) -> &str {
            "mock-fiat"
        }

        async fn latest(&self) -> RatesResult<FiatQuote> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let delay = *self.delay.lock();
            pause(delay).await;
            self.latest.lock().clone()
        }

        async fn historical(&self, day: NaiveDate) -> RatesResult<FiatQuote> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let delay = *self.delay.lock();
            pause(delay).await;
            self.historical
                .get(&day)
                .map(|q| q.clone())
                .ok_or_else(|| RatesError::upstream("mock-fiat", format!("no rates for {}", day)))
        }
    }

    /// Mock exchange ticker.
    pub struct MockTickerProvider {
        prices: Mutex<RatesResult<TickerPrices>>,
        delay: Mutex<Duration>,
        calls: AtomicUsize,
    }

    impl MockTickerProvider {
        /// Create a ticker answering with the given `(market, price)` pairs.
        pub fn from_pairs(pairs: &[(&str, f64)]) -> Self {
            let provider = Self {
                prices: Mutex::new(Ok(TickerPrices::new())),
                delay: Mutex::new(Duration::ZERO),
                calls: AtomicUsize::new(0),
            };
            provider.set_prices(pairs);
            provider
        }

        /// Replace every price.
        pub fn set_prices(&self, pairs: &[(&str, f64)]) {
            let prices = pairs
                .iter()
                .map(|(market, price)| (market.to_string(), *price))
                .collect();
            *self.prices.lock() = Ok(prices);
        }

        /// Update a single market.
        pub fn set_price(&self, market: &str, price: f64) {
            let mut prices = self.prices.lock();
            match prices.as_mut() {
                Ok(map) => {
                    map.insert(market.to_string(), price);
                }
                Err(_) => *prices = Ok(TickerPrices::from([(market.to_string(), price)])),
            }
        }

        /// Make `prices` fail.
        pub fn fail(&self, error: RatesError) {
            *self.prices.lock() = Err(error);
        }

        /// Delay every answer.
        pub fn set_delay(&self, delay: Duration) {
            *self.delay.lock() = delay;
        }

        /// Number of calls made so far.
        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TickerProvider for MockTickerProvider {
        fn name(&self) -> &str {
            "mock-ticker"
        }

        async fn prices(&self) -> RatesResult<TickerPrices> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let delay = *self.delay.lock();
            pause(delay).await;
            self.prices.lock().clone()
        }
    }

    /// Mock price history.
    #[derive(Default)]
    pub struct MockHistoricalSource {
        prices: DashMap<(Symbol, NaiveDate), f64>,
    }

    impl MockHistoricalSource {
        pub fn new() -> Self {
            Self::default()
        }

        /// Set the USD price of an asset on a day.
        pub fn set_price(&self, asset: &str, day: NaiveDate, price: f64) {
            self.prices.insert((Symbol::new(asset), day), price);
        }
    }

    #[async_trait]
    impl HistoricalPriceSource for MockHistoricalSource {
        fn name(&self) -> &str {
            "mock-history"
        }

        async fn price_usd(&self, asset: &Symbol, _profile: &AssetProfile, day: NaiveDate) -> RatesResult<f64> {
            self.prices
                .get(&(asset.clone(), day))
                .map(|p| *p)
                .ok_or_else(|| RatesError::upstream("mock-history", format!("no price for {} on {}", asset, day)))
        }
    }

    /// Sender half of a scripted trade stream connection.
    pub type SessionSender = mpsc::UnboundedSender<RatesResult<String>>;

    /// Mock trade stream whose connections are scripted by the test.
    ///
    /// Each `subscribe` consumes one queued session; with none queued the
    /// connection is refused.
    #[derive(Default)]
    pub struct MockTradeStream {
        sessions: Mutex<VecDeque<mpsc::UnboundedReceiver<RatesResult<String>>>>,
        attempts: Mutex<Vec<Instant>>,
        subscriptions: Mutex<Vec<Vec<String>>>,
    }

    impl MockTradeStream {
        pub fn new() -> Self {
            Self::default()
        }

        /// Queue a connection and return the handle that feeds it.
        ///
        /// Dropping the handle closes the connection.
        pub fn add_session(&self) -> SessionSender {
            let (tx, rx) = mpsc::unbounded();
            self.sessions.lock().push_back(rx);
            tx
        }

        /// When each connection attempt happened.
        pub fn attempts(&self) -> Vec<Instant> {
            self.attempts.lock().clone()
        }

        /// Markets requested by each attempt.
        pub fn subscriptions(&self) -> Vec<Vec<String>> {
            self.subscriptions.lock().clone()
        }
    }

    #[async_trait]
    impl TradeStream for MockTradeStream {
        fn name(&self) -> &str {
            "mock-trades"
        }

        async fn subscribe(&self, symbols: &[String]) -> RatesResult<MessageStream> {
            self.attempts.lock().push(Instant::now());
            self.subscriptions.lock().push(symbols.to_vec());
            match self.sessions.lock().pop_front() {
                Some(rx) => Ok(rx.boxed()),
                None => Err(RatesError::upstream("mock-trades", "connection refused")),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::*;
    use super::*;
    use crate::error::RatesError;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_mock_rate_service() {
        let service = MockRateService::new(FiatQuote::from_pairs("USD", &[("EUR", 0.9)]));

        let quote = service.latest().await.unwrap();
        assert_eq!(quote.base, Symbol::usd());
        assert_eq!(quote.rates.get("EUR"), Some(&0.9));

        service.fail_latest(RatesError::upstream("mock-fiat", "down"));
        assert!(service.latest().await.is_err());
        assert_eq!(service.calls(), 2);
    }

    #[tokio::test]
    async fn test_mock_ticker_updates() {
        let ticker = MockTickerProvider::from_pairs(&[("ETHBTC", 0.05)]);
        ticker.set_price("BATBTC", 0.00003);

        let prices = ticker.prices().await.unwrap();
        assert_eq!(prices.len(), 2);
        assert_eq!(prices.get("BATBTC"), Some(&0.00003));
    }

    #[tokio::test]
    async fn test_mock_trade_stream_sessions() {
        let stream = MockTradeStream::new();
        let tx = stream.add_session();

        let mut messages = stream.subscribe(&["ETHBTC".to_string()]).await.unwrap();
        tx.unbounded_send(Ok("hello".to_string())).unwrap();
        drop(tx);

        assert_eq!(messages.next().await, Some(Ok("hello".to_string())));
        assert_eq!(messages.next().await, None);
        assert!(stream.subscribe(&[]).await.is_err());
        assert_eq!(stream.attempts().len(), 2);
    }
}
