//! AltRates Engine
//!
//! Exchange rate engine for fiat currencies and crypto alts.
//!
//! # Features
//!
//! - Bidirectional rate graph split into fiat and alt partitions
//! - Triangulation of unquoted alt rates through intermediate currencies
//! - Validation of derived rates against observed fiat prices
//! - Single-flight refreshes with bounded waits and last-good fallback
//! - Live trade stream ingestion with fixed-delay reconnects
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use altrates_engine::{Collaborators, EngineConfig, RatesEngine};
//!
//! let engine = Arc::new(RatesEngine::new(EngineConfig::from_env(), collaborators));
//!
//! // Wait for the first refresh
//! engine.ready().await?;
//!
//! // How many USD one BAT buys
//! let rate = engine.ratio("BAT", "USD");
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod feed;
pub mod fetch;
pub mod metrics;
pub mod provider;
pub mod single_flight;
pub mod snapshot;
pub mod store;
pub mod triangulate;
pub mod validator;
pub mod warning_gate;

pub use config::{AssetProfile, EngineConfig, Roster, ToleranceBand};
pub use engine::{Collaborators, HistoricalRates, Quotes, RatesEngine};
pub use error::{RatesError, RatesResult};
pub use feed::{FeedState, TradeFeed, TradeMessage};
pub use fetch::{Fetched, LastGood};
pub use metrics::{EngineMetrics, MetricsSnapshot};
pub use provider::{
    FiatQuote, HistoricalPriceSource, MessageStream, RateService, TickerPrices, TickerProvider, TradeStream,
};
pub use single_flight::SingleFlight;
pub use snapshot::TickerSnapshot;
pub use store::{RateStore, SharedRateStore};
pub use triangulate::Normalizer;
pub use validator::Validator;
pub use warning_gate::WarningGate;
