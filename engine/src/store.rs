//! The in-memory rate graph.
//!
//! Rates live in two partitions (fiat and alt), each a mapping of
//! `base -> quote -> rate` where `rate(a, b)` is how many `b` one `a` buys.
//! Every write stores both directions, so `rate(a, b) * rate(b, a) == 1`
//! holds for every populated pair.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use altrates_common::{Partition, Symbol};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{RatesError, RatesResult};

/// Rates quoted from one base currency.
pub type Row = BTreeMap<Symbol, f64>;

/// One partition of the rate graph.
pub type Table = BTreeMap<Symbol, Row>;

/// The rate graph shared between the refresh pipeline, the trade feed and readers.
pub type SharedRateStore = Arc<RwLock<RateStore>>;

/// Bidirectional rate graph split into fiat and alt partitions.
///
/// Ordered maps keep iteration and serialization deterministic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateStore {
    baseline: Symbol,
    fiat: Table,
    alt: Table,
}

impl RateStore {
    /// Create an empty store that converts across partitions through `baseline`.
    pub fn new(baseline: Symbol) -> Self {
        Self {
            baseline,
            fiat: Table::new(),
            alt: Table::new(),
        }
    }

    /// Create an empty store behind a shared lock.
    pub fn shared(baseline: Symbol) -> SharedRateStore {
        Arc::new(RwLock::new(Self::new(baseline)))
    }

    /// The currency cross-partition conversions are expressed in.
    pub fn baseline(&self) -> &Symbol {
        &self.baseline
    }

    fn table(&self, partition: Partition) -> &Table {
        match partition {
            Partition::Fiat => &self.fiat,
            Partition::Alt => &self.alt,
        }
    }

    fn table_mut(&mut self, partition: Partition) -> &mut Table {
        match partition {
            Partition::Fiat => &mut self.fiat,
            Partition::Alt => &mut self.alt,
        }
    }

    /// Get the directed rate `a -> b` in a partition.
    pub fn get(&self, partition: Partition, a: &str, b: &str) -> Option<f64> {
        self.table(partition).get(a).and_then(|row| row.get(b)).copied()
    }

    /// Set `rate(a, b)` and `rate(b, a) = 1 / rate` together.
    ///
    /// Zero, negative and non-finite rates are rejected, as is a self pair
    /// with any rate other than one.
    pub fn set(&mut self, partition: Partition, a: &Symbol, b: &Symbol, rate: f64) -> RatesResult<()> {
        let inverse = 1.0 / rate;
        let invalid = !rate.is_finite() || rate <= 0.0 || !inverse.is_finite() || (a == b && rate != 1.0);
        if invalid {
            return Err(RatesError::InvalidRate {
                base: a.clone(),
                quote: b.clone(),
                rate,
            });
        }

        let table = self.table_mut(partition);
        table.entry(a.clone()).or_default().insert(b.clone(), rate);
        table.entry(b.clone()).or_default().insert(a.clone(), inverse);
        Ok(())
    }

    /// Remove both directions of a pair.
    pub fn remove_pair(&mut self, partition: Partition, a: &str, b: &str) {
        let table = self.table_mut(partition);
        if let Some(row) = table.get_mut(a) {
            row.remove(b);
        }
        if let Some(row) = table.get_mut(b) {
            row.remove(a);
        }
    }

    /// Make sure a (possibly empty) row exists for `symbol`.
    pub fn ensure_row(&mut self, partition: Partition, symbol: &Symbol) {
        self.table_mut(partition).entry(symbol.clone()).or_default();
    }

    /// The row of rates quoted from `symbol`.
    pub fn row(&self, partition: Partition, symbol: &str) -> Option<&Row> {
        self.table(partition).get(symbol)
    }

    /// Whether `symbol` has at least one rate in the partition.
    pub fn has_rates(&self, partition: Partition, symbol: &str) -> bool {
        self.row(partition, symbol).is_some_and(|row| !row.is_empty())
    }

    /// Whether `symbol` has rates in either partition.
    pub fn contains(&self, symbol: &str) -> bool {
        Partition::LOOKUP_ORDER
            .iter()
            .any(|partition| self.has_rates(*partition, symbol))
    }

    /// Resolve a candidate code to a known symbol, uppercasing it first.
    pub fn key(&self, candidate: &str) -> Option<Symbol> {
        let symbol = Symbol::new(candidate);
        self.contains(symbol.code()).then_some(symbol)
    }

    /// Units of `symbol` per baseline unit in the fiat partition.
    pub fn fiat(&self, symbol: &str) -> Option<f64> {
        self.baseline_rate_in(Partition::Fiat, symbol)
    }

    /// Units of `symbol` per baseline unit in the alt partition.
    pub fn alt(&self, symbol: &str) -> Option<f64> {
        self.baseline_rate_in(Partition::Alt, symbol)
    }

    fn baseline_rate_in(&self, partition: Partition, symbol: &str) -> Option<f64> {
        if symbol == self.baseline.code() {
            return self.has_rates(partition, symbol).then_some(1.0);
        }
        self.get(partition, self.baseline.code(), symbol)
    }

    fn baseline_rate(&self, symbol: &str) -> Option<f64> {
        self.alt(symbol).or_else(|| self.fiat(symbol))
    }

    /// How many `b` one `a` buys.
    ///
    /// A direct rate is used when a partition holds the pair; otherwise both
    /// sides are converted through the baseline. Returns `0.0` when either
    /// symbol is unknown or no conversion exists.
    pub fn ratio(&self, a: &str, b: &str) -> f64 {
        let (Some(a), Some(b)) = (self.key(a), self.key(b)) else {
            return 0.0;
        };
        if a == b {
            return 1.0;
        }

        for partition in Partition::LOOKUP_ORDER {
            if let Some(rate) = self.get(partition, a.code(), b.code()) {
                return rate;
            }
        }

        match (self.baseline_rate(a.code()), self.baseline_rate(b.code())) {
            (Some(from), Some(to)) => to / from,
            _ => 0.0,
        }
    }

    /// All symbols with rates in either partition.
    pub fn symbols(&self) -> BTreeSet<Symbol> {
        Partition::LOOKUP_ORDER
            .iter()
            .flat_map(|partition| self.table(*partition).iter())
            .filter(|(_, row)| !row.is_empty())
            .map(|(symbol, _)| symbol.clone())
            .collect()
    }

    /// Every known symbol's rate from `base`, or `None` if `base` is unknown.
    pub fn rates(&self, base: &str) -> Option<BTreeMap<Symbol, f64>> {
        let base = self.key(base)?;
        let rates = self
            .symbols()
            .into_iter()
            .filter_map(|symbol| {
                let rate = self.ratio(base.code(), symbol.code());
                (rate > 0.0).then_some((symbol, rate))
            })
            .collect();
        Some(rates)
    }

    /// Iterate over every directed entry of a partition.
    pub fn pairs(&self, partition: Partition) -> impl Iterator<Item = (&Symbol, &Symbol, f64)> {
        self.table(partition)
            .iter()
            .flat_map(|(base, row)| row.iter().map(move |(quote, rate)| (base, quote, *rate)))
    }

    /// Number of directed entries in a partition.
    pub fn len(&self, partition: Partition) -> usize {
        self.table(partition).values().map(Row::len).sum()
    }

    /// Whether both partitions are free of rates.
    pub fn is_empty(&self) -> bool {
        self.symbols().is_empty()
    }

    /// Copy every entry of `other` that differs from this store.
    ///
    /// Entries absent from `other` are kept. Returns the base symbols whose
    /// rows changed.
    pub fn merge_from(&mut self, other: &RateStore) -> BTreeSet<Symbol> {
        let mut changed = BTreeSet::new();

        for partition in Partition::LOOKUP_ORDER {
            for (base, quote, rate) in other.pairs(partition) {
                if self.get(partition, base.code(), quote.code()) == Some(rate) {
                    continue;
                }
                self.table_mut(partition)
                    .entry(base.clone())
                    .or_default()
                    .insert(quote.clone(), rate);
                changed.insert(base.clone());
            }
        }

        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sym(code: &str) -> Symbol {
        Symbol::new(code)
    }

    fn seeded() -> RateStore {
        let mut store = RateStore::new(Symbol::usd());
        store.set(Partition::Fiat, &sym("USD"), &sym("EUR"), 0.9).unwrap();
        store.set(Partition::Fiat, &sym("USD"), &sym("ZAR"), 18.0).unwrap();
        store.set(Partition::Alt, &sym("USD"), &sym("BAT"), 4.0).unwrap();
        store.set(Partition::Alt, &sym("USD"), &sym("ETH"), 0.0005).unwrap();
        store
    }

    #[test]
    fn test_set_writes_inverse() {
        let mut store = RateStore::new(Symbol::usd());
        store.set(Partition::Alt, &sym("ETH"), &sym("BTC"), 0.05).unwrap();

        assert_eq!(store.get(Partition::Alt, "ETH", "BTC"), Some(0.05));
        assert_eq!(store.get(Partition::Alt, "BTC", "ETH"), Some(1.0 / 0.05));
        assert_eq!(store.get(Partition::Fiat, "ETH", "BTC"), None);
    }

    #[test]
    fn test_set_rejects_invalid_rates() {
        let mut store = RateStore::new(Symbol::usd());
        for rate in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let result = store.set(Partition::Alt, &sym("ETH"), &sym("BTC"), rate);
            assert!(matches!(result, Err(RatesError::InvalidRate { .. })));
        }
        assert!(store.is_empty());
    }

    #[test]
    fn test_self_pair_only_at_one() {
        let mut store = RateStore::new(Symbol::usd());
        assert!(store.set(Partition::Fiat, &sym("USD"), &sym("USD"), 1.0).is_ok());
        assert!(store.set(Partition::Fiat, &sym("USD"), &sym("USD"), 2.0).is_err());
        assert_eq!(store.get(Partition::Fiat, "USD", "USD"), Some(1.0));
    }

    #[test]
    fn test_key_resolution() {
        let store = seeded();
        assert_eq!(store.key("bat"), Some(sym("BAT")));
        assert_eq!(store.key("EUR"), Some(sym("EUR")));
        assert_eq!(store.key("unk"), None);
        assert_eq!(store.key(""), None);
    }

    #[test]
    fn test_empty_row_is_not_known() {
        let mut store = RateStore::new(Symbol::usd());
        store.ensure_row(Partition::Alt, &sym("ZRX"));
        assert!(!store.contains("ZRX"));
        assert_eq!(store.key("ZRX"), None);
    }

    #[test]
    fn test_ratio_direct_and_converted() {
        let store = seeded();

        // direct
        assert_eq!(store.ratio("USD", "EUR"), 0.9);
        assert_eq!(store.ratio("BAT", "USD"), 0.25);

        // fiat to alt through the baseline
        let eur_bat = store.ratio("EUR", "BAT");
        assert!((eur_bat - 4.0 / 0.9).abs() < 1e-12);

        let eth_bat = store.ratio("ETH", "BAT");
        assert!((eth_bat - 8000.0).abs() < 1e-9);

        let eur_zar = store.ratio("eur", "zar");
        assert!((eur_zar - 20.0).abs() < 1e-12);
    }

    #[test]
    fn test_ratio_unresolved_is_zero() {
        let store = seeded();
        assert_eq!(store.ratio("BAT", "UNK"), 0.0);
        assert_eq!(store.ratio("", "BAT"), 0.0);
        assert_eq!(store.ratio("", ""), 0.0);
        assert_eq!(store.ratio("BAT", "BAT"), 1.0);
    }

    #[test]
    fn test_fiat_and_alt_accessors() {
        let store = seeded();
        assert_eq!(store.fiat("EUR"), Some(0.9));
        assert_eq!(store.fiat("BAT"), None);
        assert_eq!(store.alt("BAT"), Some(4.0));
        assert_eq!(store.alt("EUR"), None);
        assert_eq!(store.fiat("USD"), Some(1.0));
    }

    #[test]
    fn test_rates_relative_to_base() {
        let store = seeded();

        let rates = store.rates("EUR").unwrap();
        assert_eq!(rates.get("EUR"), Some(&1.0));
        assert!((rates["USD"] - 1.0 / 0.9).abs() < 1e-12);
        assert!((rates["BAT"] - 4.0 / 0.9).abs() < 1e-12);

        assert!(store.rates("unk").is_none());
    }

    #[test]
    fn test_remove_pair_drops_both_directions() {
        let mut store = seeded();
        store.remove_pair(Partition::Fiat, "EUR", "USD");
        assert_eq!(store.get(Partition::Fiat, "USD", "EUR"), None);
        assert_eq!(store.get(Partition::Fiat, "EUR", "USD"), None);
        assert!(!store.contains("EUR"));
    }

    #[test]
    fn test_merge_reports_changed_rows() {
        let mut live = seeded();
        let mut candidate = seeded();
        candidate.set(Partition::Alt, &sym("USD"), &sym("BAT"), 5.0).unwrap();

        let changed = live.merge_from(&candidate);

        assert_eq!(changed, BTreeSet::from([sym("BAT"), sym("USD")]));
        assert_eq!(live.alt("BAT"), Some(5.0));
        assert_eq!(live.merge_from(&candidate), BTreeSet::new());
    }

    #[test]
    fn test_serialization_is_order_independent() {
        let mut first = RateStore::new(Symbol::usd());
        first.set(Partition::Alt, &sym("ETH"), &sym("BTC"), 0.05).unwrap();
        first.set(Partition::Alt, &sym("BAT"), &sym("BTC"), 0.00003).unwrap();

        let mut second = RateStore::new(Symbol::usd());
        second.set(Partition::Alt, &sym("BAT"), &sym("BTC"), 0.00003).unwrap();
        second.set(Partition::Alt, &sym("ETH"), &sym("BTC"), 0.05).unwrap();

        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }

    proptest! {
        #[test]
        fn prop_inverse_invariant(rate in 1e-8f64..1e8f64) {
            let mut store = RateStore::new(Symbol::usd());
            store.set(Partition::Alt, &sym("BAT"), &sym("ETH"), rate).unwrap();

            let forward = store.get(Partition::Alt, "BAT", "ETH").unwrap();
            let backward = store.get(Partition::Alt, "ETH", "BAT").unwrap();
            prop_assert!((forward * backward - 1.0).abs() < 1e-12);
        }
    }
}
