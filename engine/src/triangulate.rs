//! Normalization of the alt partition.
//!
//! Fills in the alt rates exchanges do not quote directly by composing two
//! known legs through an intermediate currency:
//!
//! 1. every tracked currency gets a row;
//! 2. each alt with rates gets a rate to every observed currency;
//! 3. every tracked pair is filled until a pass adds nothing;
//! 4. fiat-to-fiat pairs are dropped, those belong to the fiat partition.

use altrates_common::{Partition, Symbol};
use tracing::debug;

use crate::config::Roster;
use crate::error::RatesResult;
use crate::snapshot::TickerSnapshot;
use crate::store::RateStore;

/// Counters describing one normalization run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NormalizeReport {
    /// Pairs written by composition or inversion.
    pub derived: usize,
    /// Fiat-to-fiat pairs removed from the alt partition.
    pub stripped: usize,
    /// Fixed-point passes over the tracked pairs.
    pub passes: usize,
}

/// Derives missing alt rates from a snapshot.
pub struct Normalizer<'a> {
    roster: &'a Roster,
    baseline: &'a Symbol,
}

impl<'a> Normalizer<'a> {
    pub fn new(roster: &'a Roster, baseline: &'a Symbol) -> Self {
        Self { roster, baseline }
    }

    /// Intermediates in the order they are tried: baseline, tracked
    /// currencies, then anything else the snapshot saw.
    fn intermediates(&self, snapshot: &TickerSnapshot) -> Vec<Symbol> {
        let observed = snapshot.currencies();
        let mut order: Vec<Symbol> = Vec::with_capacity(observed.len());

        let tracked = std::iter::once(self.baseline.clone()).chain(self.roster.all());
        for symbol in tracked.chain(observed.iter().cloned()) {
            if observed.contains(&symbol) && !order.contains(&symbol) {
                order.push(symbol);
            }
        }
        order
    }

    /// Fill the alt partition of `store` from `snapshot`.
    pub fn normalize(&self, store: &mut RateStore, snapshot: &TickerSnapshot) -> RatesResult<NormalizeReport> {
        let mut report = NormalizeReport::default();

        for symbol in self.roster.all() {
            store.ensure_row(Partition::Alt, &symbol);
        }

        let order = self.intermediates(snapshot);

        for src in self.roster.alts() {
            if !store.has_rates(Partition::Alt, src.code()) {
                continue;
            }
            for dst in &order {
                if dst != src && fill(store, snapshot, src, dst, &order)? {
                    report.derived += 1;
                }
            }
        }

        let tracked = self.roster.all();
        for _ in 0..tracked.len().max(1) {
            let mut added = 0;
            for src in &tracked {
                for dst in &tracked {
                    if src != dst && fill(store, snapshot, src, dst, &order)? {
                        added += 1;
                    }
                }
            }
            report.passes += 1;
            report.derived += added;
            if added == 0 {
                break;
            }
        }

        let fiats: Vec<&Symbol> = self
            .roster
            .fiats()
            .iter()
            .filter(|s| self.roster.is_fiat(s.code()))
            .collect();
        for (i, a) in fiats.iter().enumerate() {
            for b in &fiats[i + 1..] {
                if store.get(Partition::Alt, a.code(), b.code()).is_some() {
                    store.remove_pair(Partition::Alt, a.code(), b.code());
                    report.stripped += 1;
                }
            }
        }

        debug!(
            derived = report.derived,
            stripped = report.stripped,
            passes = report.passes,
            "Alt partition normalized"
        );
        Ok(report)
    }
}

/// Ensure `rate(src, dst)` is set. Returns whether anything was written.
///
/// Composes through the first intermediate `m` with both `rate(src, m)` in
/// the store and `dst` per `m` in the snapshot. The store writes and removes
/// both directions together, so a known `rate(dst, src)` means `rate(src, dst)`
/// is known too.
fn fill(
    store: &mut RateStore,
    snapshot: &TickerSnapshot,
    src: &Symbol,
    dst: &Symbol,
    order: &[Symbol],
) -> RatesResult<bool> {
    if store.get(Partition::Alt, src.code(), dst.code()).is_some() {
        return Ok(false);
    }

    for m in order {
        if m == src || m == dst {
            continue;
        }
        let Some(first) = store.get(Partition::Alt, src.code(), m.code()) else {
            continue;
        };
        let Some(second) = snapshot.observed(m.code(), dst.code()) else {
            continue;
        };
        store.set(Partition::Alt, src, dst, first * second)?;
        return Ok(true);
    }

    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sym(code: &str) -> Symbol {
        Symbol::new(code)
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() <= 1e-9 * b.abs().max(1.0)
    }

    #[test]
    fn test_composes_through_bridge() {
        let roster = Roster::new(vec![sym("USD")], vec![sym("BTC"), sym("ETH")]);
        let baseline = sym("USD");

        let mut snapshot = TickerSnapshot::new();
        snapshot.observe(&sym("BTC"), &sym("USD"), 2.0).unwrap();
        snapshot.observe(&sym("ETH"), &sym("BTC"), 0.5).unwrap();

        let mut store = RateStore::new(baseline.clone());
        store.set(Partition::Fiat, &baseline, &baseline, 1.0).unwrap();
        store.set(Partition::Alt, &sym("ETH"), &sym("BTC"), 0.5).unwrap();

        let report = Normalizer::new(&roster, &baseline)
            .normalize(&mut store, &snapshot)
            .unwrap();

        assert!(report.derived >= 1);
        assert_eq!(store.ratio("ETH", "USD"), 1.0);
        assert_eq!(store.ratio("USD", "ETH"), 1.0);
    }

    #[test]
    fn test_fixed_point_reaches_fiat_rows() {
        let roster = Roster::new(
            vec![sym("USD"), sym("EUR")],
            vec![sym("BTC"), sym("BAT")],
        );
        let baseline = sym("USD");

        let mut snapshot = TickerSnapshot::new();
        snapshot.observe(&sym("USD"), &sym("EUR"), 0.8).unwrap();
        snapshot.observe(&sym("EUR"), &sym("USD"), 1.25).unwrap();
        snapshot.observe(&sym("BTC"), &sym("USD"), 10_000.0).unwrap();
        snapshot.observe(&sym("BAT"), &sym("BTC"), 0.00003).unwrap();

        let mut store = RateStore::new(baseline.clone());
        store.set(Partition::Alt, &sym("BAT"), &sym("BTC"), 0.00003).unwrap();
        store.set(Partition::Alt, &sym("USD"), &sym("BTC"), 0.0001).unwrap();

        Normalizer::new(&roster, &baseline)
            .normalize(&mut store, &snapshot)
            .unwrap();

        assert!(approx(store.get(Partition::Alt, "BAT", "USD").unwrap(), 0.3));
        assert!(approx(store.get(Partition::Alt, "BAT", "EUR").unwrap(), 0.24));
        assert!(approx(store.get(Partition::Alt, "EUR", "BAT").unwrap(), 1.0 / 0.24));
        assert!(approx(store.get(Partition::Alt, "BTC", "EUR").unwrap(), 8_000.0));
    }

    #[test]
    fn test_strips_fiat_pairs() {
        let roster = Roster::new(vec![sym("USD"), sym("EUR")], vec![sym("BTC")]);
        let baseline = sym("USD");

        let mut snapshot = TickerSnapshot::new();
        snapshot.observe(&sym("USD"), &sym("EUR"), 0.8).unwrap();
        snapshot.observe(&sym("BTC"), &sym("USD"), 10_000.0).unwrap();

        let mut store = RateStore::new(baseline.clone());
        store.set(Partition::Alt, &sym("USD"), &sym("BTC"), 0.0001).unwrap();

        let report = Normalizer::new(&roster, &baseline)
            .normalize(&mut store, &snapshot)
            .unwrap();

        assert!(report.stripped >= 1);
        assert_eq!(store.get(Partition::Alt, "USD", "EUR"), None);
        assert_eq!(store.get(Partition::Alt, "EUR", "USD"), None);
        assert!(store.get(Partition::Alt, "BTC", "EUR").is_some());
    }

    #[test]
    fn test_unreachable_pairs_stay_missing() {
        let roster = Roster::new(vec![sym("USD")], vec![sym("BTC"), sym("XRP")]);
        let baseline = sym("USD");

        let mut snapshot = TickerSnapshot::new();
        snapshot.observe(&sym("BTC"), &sym("USD"), 10_000.0).unwrap();

        let mut store = RateStore::new(baseline.clone());
        store.set(Partition::Alt, &sym("USD"), &sym("BTC"), 0.0001).unwrap();

        Normalizer::new(&roster, &baseline)
            .normalize(&mut store, &snapshot)
            .unwrap();

        assert_eq!(store.get(Partition::Alt, "XRP", "USD"), None);
        assert_eq!(store.ratio("XRP", "USD"), 0.0);
    }

    #[test]
    fn test_deterministic_output() {
        let roster = Roster::default();
        let baseline = sym("USD");

        let mut snapshot = TickerSnapshot::new();
        for (base, quote, price) in [
            ("BTC", "USDT", 9_500.0),
            ("ETH", "BTC", 0.02),
            ("BAT", "BTC", 0.00002),
            ("XRP", "BTC", 0.00003),
            ("USD", "EUR", 0.9),
            ("USD", "BTC", 0.0001),
        ] {
            snapshot.observe(&sym(base), &sym(quote), price).unwrap();
        }

        let run = || {
            let mut store = RateStore::new(baseline.clone());
            for (base, quote, price) in snapshot.iter() {
                if roster.is_alt(base.code()) && roster.is_alt(quote.code()) {
                    store.set(Partition::Alt, base, quote, price).unwrap();
                }
            }
            store.set(Partition::Alt, &sym("USD"), &sym("BTC"), 0.0001).unwrap();
            Normalizer::new(&roster, &baseline)
                .normalize(&mut store, &snapshot)
                .unwrap();
            serde_json::to_string(&store).unwrap()
        };

        assert_eq!(run(), run());
    }
}
