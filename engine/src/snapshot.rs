//! Per-cycle ticker observations.
//!
//! A snapshot is the graph of prices seen during one refresh: exchange
//! markets plus the fiat rates from the rate service. It is the reference
//! that derived rates are composed from and validated against.

use std::collections::{BTreeMap, BTreeSet};

use altrates_common::{split_pair_with, Symbol};
use serde::Serialize;
use tracing::debug;

use crate::config::Roster;
use crate::error::{RatesError, RatesResult};
use crate::provider::{FiatQuote, TickerPrices};

/// Observed prices, `base -> quote -> price`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TickerSnapshot {
    observations: BTreeMap<Symbol, BTreeMap<Symbol, f64>>,
}

impl TickerSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one observation. Self pairs and non-positive prices are rejected.
    pub fn observe(&mut self, base: &Symbol, quote: &Symbol, price: f64) -> RatesResult<()> {
        if base == quote || !price.is_finite() || price <= 0.0 {
            return Err(RatesError::InvalidRate {
                base: base.clone(),
                quote: quote.clone(),
                rate: price,
            });
        }

        self.observations
            .entry(base.clone())
            .or_default()
            .insert(quote.clone(), price);
        Ok(())
    }

    /// Record exchange prices for markets whose legs are both tracked.
    ///
    /// Returns the markets that carried an invalid price.
    pub fn observe_prices(&mut self, prices: &TickerPrices, roster: &Roster) -> Vec<RatesError> {
        let mut rejected = Vec::new();

        for (market, price) in prices {
            let Some((base, quote)) = split_pair_with(market, |code| roster.contains(code)) else {
                continue;
            };
            if !roster.contains(base.code()) || !roster.contains(quote.code()) {
                continue;
            }
            if let Err(e) = self.observe(&base, &quote, *price) {
                debug!(market = %market, price = price, "Rejected exchange price");
                rejected.push(e);
            }
        }

        rejected
    }

    /// Record fiat rates in both directions for every tracked currency.
    pub fn observe_fiat_quote(&mut self, quote: &FiatQuote, roster: &Roster) {
        for (symbol, rate) in &quote.rates {
            if symbol == &quote.base || !roster.contains(symbol.code()) {
                continue;
            }
            if self.observe(&quote.base, symbol, *rate).is_ok() {
                // observe() accepted the rate, so its inverse is finite and positive
                let _ = self.observe(symbol, &quote.base, 1.0 / rate);
            }
        }
    }

    /// The price of `base` in `quote` exactly as observed.
    pub fn get(&self, base: &str, quote: &str) -> Option<f64> {
        self.observations.get(base).and_then(|row| row.get(quote)).copied()
    }

    /// The price of `base` in `quote`, inverting the reverse observation when
    /// only that one was seen.
    pub fn observed(&self, base: &str, quote: &str) -> Option<f64> {
        self.get(base, quote)
            .or_else(|| self.get(quote, base).map(|p| 1.0 / p))
    }

    /// Every observed `(base, quote, price)` in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&Symbol, &Symbol, f64)> {
        self.observations
            .iter()
            .flat_map(|(base, row)| row.iter().map(move |(quote, price)| (base, quote, *price)))
    }

    /// Every currency appearing on either side of an observation.
    pub fn currencies(&self) -> BTreeSet<Symbol> {
        let mut currencies = BTreeSet::new();
        for (base, row) in &self.observations {
            currencies.insert(base.clone());
            currencies.extend(row.keys().cloned());
        }
        currencies
    }

    /// Number of observations.
    pub fn len(&self) -> usize {
        self.observations.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }
}
