//! Cross-checks derived alt rates against observed fiat prices.

use altrates_common::{Partition, Symbol};
use tracing::{debug, warn};

use crate::config::{Roster, ToleranceBand};
use crate::error::{RatesError, RatesResult};
use crate::snapshot::TickerSnapshot;
use crate::store::RateStore;

/// Outcome of a passing validation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ValidationReport {
    /// Pairs that had both a derived and an observed rate.
    pub checked: usize,
    /// Pairs skipped because one side was missing.
    pub skipped: usize,
}

/// Rejects a candidate store whose derived rates stray from the snapshot.
pub struct Validator<'a> {
    roster: &'a Roster,
    band: ToleranceBand,
}

impl<'a> Validator<'a> {
    pub fn new(roster: &'a Roster, band: ToleranceBand) -> Self {
        Self { roster, band }
    }

    /// Compare every `(alt, fiat)` pair present on both sides.
    ///
    /// Fails on the first pair whose derived/observed ratio is outside the
    /// band, bounds included as passing.
    pub fn check(&self, store: &RateStore, snapshot: &TickerSnapshot) -> RatesResult<ValidationReport> {
        let mut report = ValidationReport::default();
        let fiats: Vec<&Symbol> = self
            .roster
            .fiats()
            .iter()
            .filter(|s| self.roster.is_fiat(s.code()))
            .collect();

        for alt in self.roster.alts() {
            for fiat in &fiats {
                let derived = store.get(Partition::Alt, alt.code(), fiat.code());
                let observed = snapshot.observed(alt.code(), fiat.code());
                let (Some(derived), Some(observed)) = (derived, observed) else {
                    report.skipped += 1;
                    continue;
                };

                if !self.band.contains(derived / observed) {
                    warn!(
                        asset = %alt,
                        fiat = %fiat,
                        derived = derived,
                        observed = observed,
                        "Derived rate outside tolerance"
                    );
                    return Err(RatesError::ValidationDivergence {
                        asset: alt.clone(),
                        fiat: (*fiat).clone(),
                        derived,
                        observed,
                    });
                }
                report.checked += 1;
            }
        }

        debug!(checked = report.checked, skipped = report.skipped, "Validation passed");
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sym(code: &str) -> Symbol {
        Symbol::new(code)
    }

    fn roster() -> Roster {
        Roster::new(vec![sym("USD"), sym("EUR")], vec![sym("BAT")])
    }

    fn check(derived: f64) -> RatesResult<ValidationReport> {
        let roster = roster();
        let mut store = RateStore::new(sym("USD"));
        store.set(Partition::Alt, &sym("BAT"), &sym("USD"), derived).unwrap();

        let mut snapshot = TickerSnapshot::new();
        snapshot.observe(&sym("BAT"), &sym("USD"), 1.0).unwrap();

        Validator::new(&roster, ToleranceBand::default()).check(&store, &snapshot)
    }

    #[test]
    fn test_bounds_pass() {
        assert_eq!(check(0.9).unwrap().checked, 1);
        assert_eq!(check(1.1).unwrap().checked, 1);
        assert!(check(1.0).is_ok());
    }

    #[test]
    fn test_outside_band_fails() {
        let err = check(0.89).unwrap_err();
        assert!(matches!(
            err,
            RatesError::ValidationDivergence { ref asset, ref fiat, .. }
                if asset.code() == "BAT" && fiat.code() == "USD"
        ));
        assert!(check(1.11).is_err());
    }

    #[test]
    fn test_observed_reverse_direction() {
        let roster = roster();
        let mut store = RateStore::new(sym("USD"));
        store.set(Partition::Alt, &sym("BAT"), &sym("USD"), 0.25).unwrap();

        let mut snapshot = TickerSnapshot::new();
        snapshot.observe(&sym("USD"), &sym("BAT"), 4.0).unwrap();

        let report = Validator::new(&roster, ToleranceBand::default())
            .check(&store, &snapshot)
            .unwrap();
        assert_eq!(report.checked, 1);
        assert_eq!(report.skipped, 1);
    }

    #[test]
    fn test_missing_pairs_skipped() {
        let roster = roster();
        let store = RateStore::new(sym("USD"));
        let snapshot = TickerSnapshot::new();

        let report = Validator::new(&roster, ToleranceBand::default())
            .check(&store, &snapshot)
            .unwrap();
        assert_eq!(report, ValidationReport { checked: 0, skipped: 2 });
    }
}
