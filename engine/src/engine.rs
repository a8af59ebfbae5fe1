//! The rate engine.
//!
//! Owns the shared rate store and runs the refresh pipeline: fetch fiat and
//! exchange quotes, build a candidate store, normalize it, validate it, and
//! merge it into the live store. Readers always see the last published rates.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use altrates_common::{
    amount, by_day, day_key, now, rate_to_decimal, split_pair_with, Partition, Symbol, Timestamp,
};
use chrono::NaiveDate;
use futures::future::join_all;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::{RatesError, RatesResult};
use crate::feed::TradeFeed;
use crate::fetch::{fetch_within, Fetched, LastGood};
use crate::metrics::EngineMetrics;
use crate::provider::{FiatQuote, HistoricalPriceSource, RateService, TickerPrices, TickerProvider, TradeStream};
use crate::single_flight::SingleFlight;
use crate::snapshot::TickerSnapshot;
use crate::store::{RateStore, SharedRateStore};
use crate::triangulate::Normalizer;
use crate::validator::Validator;
use crate::warning_gate::WarningGate;

const READY: &str = "ready";
const FIAT_SERVICE: &str = "fiat";
const ALT_SERVICE: &str = "alt";

/// External services the engine pulls from.
#[derive(Clone)]
pub struct Collaborators {
    pub rates: Arc<dyn RateService>,
    pub ticker: Arc<dyn TickerProvider>,
    /// Daily alt prices, needed only for historical queries.
    pub history: Option<Arc<dyn HistoricalPriceSource>>,
}

/// Fiat and exchange answers gathered for one refresh.
#[derive(Debug, Clone)]
pub struct Quotes {
    pub fiat: Fetched<FiatQuote>,
    pub alt: Fetched<TickerPrices>,
}

impl Quotes {
    /// Both answers are fresh and error free.
    pub fn is_usable(&self) -> bool {
        self.fiat.is_usable() && self.alt.is_usable()
    }

    pub fn errors(&self) -> Vec<RatesError> {
        self.fiat
            .errors
            .iter()
            .chain(self.alt.errors.iter())
            .cloned()
            .collect()
    }
}

/// Rates for one past day.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoricalRates {
    pub day: NaiveDate,
    /// Fiat rates per USD at the close of the day.
    pub fiat: FiatQuote,
    /// Alt units per USD at the close of the day.
    pub alt: BTreeMap<Symbol, f64>,
    /// Lookups that failed. Missing entries are absent from the maps.
    pub errors: Vec<RatesError>,
}

impl HistoricalRates {
    /// A rate store holding this day's rates, for cross-rate queries.
    pub fn to_store(&self) -> RatesResult<RateStore> {
        let baseline = Symbol::usd();
        let mut store = RateStore::new(baseline.clone());

        store.set(Partition::Fiat, &baseline, &baseline, 1.0)?;
        for (symbol, rate) in &self.fiat.rates {
            if symbol != &baseline {
                store.set(Partition::Fiat, &baseline, symbol, *rate)?;
            }
        }
        for (symbol, units) in &self.alt {
            store.set(Partition::Alt, &baseline, symbol, *units)?;
        }

        Ok(store)
    }

    /// How many `b` one `a` bought on this day, `0.0` when unknown.
    pub fn ratio(&self, a: &str, b: &str) -> f64 {
        self.to_store().map(|store| store.ratio(a, b)).unwrap_or(0.0)
    }
}

/// Rate engine.
pub struct RatesEngine {
    config: EngineConfig,
    collaborators: Collaborators,
    store: SharedRateStore,
    flights: SingleFlight<&'static str, bool>,
    days: SingleFlight<String, HistoricalRates>,
    last_fiat: LastGood<FiatQuote>,
    last_prices: LastGood<TickerPrices>,
    last_updated: RwLock<Option<Timestamp>>,
    errors: RwLock<Vec<RatesError>>,
    error_gate: WarningGate,
    inform_gate: WarningGate,
    metrics: Arc<EngineMetrics>,
}

impl RatesEngine {
    /// Create a new engine with an empty store.
    pub fn new(config: EngineConfig, collaborators: Collaborators) -> Self {
        let store = RateStore::shared(config.baseline.clone());
        let error_gate = WarningGate::new(config.warning_window);
        let inform_gate = WarningGate::new(config.inform_window);

        Self {
            config,
            collaborators,
            store,
            flights: SingleFlight::new(),
            days: SingleFlight::new(),
            last_fiat: LastGood::new(),
            last_prices: LastGood::new(),
            last_updated: RwLock::new(None),
            errors: RwLock::new(Vec::new()),
            error_gate,
            inform_gate,
            metrics: Arc::new(EngineMetrics::new()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn metrics(&self) -> Arc<EngineMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Handle to the live store.
    pub fn store(&self) -> SharedRateStore {
        Arc::clone(&self.store)
    }

    /// Wait for the first refresh to settle.
    ///
    /// All callers share one refresh. `Ok(false)` means upstream data was
    /// stale or missing and the previous rates are still being served; that
    /// outcome is kept until [`update`](Self::update) runs. A failed refresh
    /// is forgotten, so the next call retries.
    pub async fn ready(self: &Arc<Self>) -> RatesResult<bool> {
        let engine = Arc::clone(self);
        self.flights
            .run_once(READY, move || async move { engine.refresh_cycle().await })
            .await
    }

    /// Start a new refresh, replacing the recorded one.
    pub async fn update(self: &Arc<Self>) -> RatesResult<bool> {
        let engine = Arc::clone(self);
        self.flights
            .refresh(READY, move || async move { engine.refresh_cycle().await })
            .await
    }

    #[instrument(skip(self), fields(cycle_id = %Uuid::now_v7()))]
    async fn refresh_cycle(self: Arc<Self>) -> RatesResult<bool> {
        self.metrics.cycle_started();
        let quotes = self.quotes(None).await;

        if !quotes.is_usable() {
            let errors = quotes.errors();
            self.metrics.cycle_stale();
            debug!(errors = errors.len(), "Upstream data stale, keeping current rates");
            *self.errors.write() = errors;
            return Ok(false);
        }

        let (candidate, snapshot) = match self.build_candidate(&quotes.fiat.value, &quotes.alt.value) {
            Ok(built) => built,
            Err(e) => {
                *self.errors.write() = vec![e.clone()];
                return Err(e);
            }
        };

        if let Err(e) = Validator::new(&self.config.roster, self.config.tolerance).check(&candidate, &snapshot) {
            self.metrics.cycle_diverged();
            *self.errors.write() = vec![e.clone()];
            return Err(e);
        }

        self.publish(&candidate);
        Ok(true)
    }

    /// Fetch fiat and exchange quotes concurrently, each within the wait budget.
    ///
    /// With `day` set the fiat rates of that day are requested instead of the
    /// latest ones; those answers never feed the last-good caches.
    pub async fn quotes(&self, day: Option<NaiveDate>) -> Quotes {
        let max_wait = self.config.max_wait;

        let rates = Arc::clone(&self.collaborators.rates);
        let fiat_call = async move {
            match day {
                Some(day) => rates.historical(day).await,
                None => rates.latest().await,
            }
        };
        let ticker = Arc::clone(&self.collaborators.ticker);
        let alt_call = async move { ticker.prices().await };

        let scratch = LastGood::new();
        let fiat_cache = if day.is_some() { &scratch } else { &self.last_fiat };

        let (fiat, alt) = tokio::join!(
            fetch_within(FIAT_SERVICE, max_wait, fiat_cache, fiat_call),
            fetch_within(ALT_SERVICE, max_wait, &self.last_prices, alt_call),
        );

        Quotes { fiat, alt }
    }

    /// Build a normalized store from one round of quotes.
    pub fn build_candidate(&self, fiat: &FiatQuote, prices: &TickerPrices) -> RatesResult<(RateStore, TickerSnapshot)> {
        let roster = &self.config.roster;
        let baseline = &self.config.baseline;

        let mut snapshot = TickerSnapshot::new();
        let rejected = snapshot.observe_prices(prices, roster);
        if !rejected.is_empty() {
            debug!(rejected = rejected.len(), "Ignored invalid exchange prices");
        }
        snapshot.observe_fiat_quote(fiat, roster);

        let mut store = RateStore::new(baseline.clone());
        self.ingest(&mut store, fiat, &snapshot)?;
        Normalizer::new(roster, baseline).normalize(&mut store, &snapshot)?;
        self.apply_aliases(&mut store)?;

        Ok((store, snapshot))
    }

    /// Seed the fiat partition, the bridge assets and exchange-quoted alt pairs.
    fn ingest(&self, store: &mut RateStore, fiat: &FiatQuote, snapshot: &TickerSnapshot) -> RatesResult<()> {
        let roster = &self.config.roster;
        let baseline = &self.config.baseline;

        if &fiat.base != baseline {
            return Err(RatesError::Configuration(format!(
                "Fiat rates quoted from {}, expected {}",
                fiat.base, baseline
            )));
        }

        store.set(Partition::Fiat, baseline, baseline, 1.0)?;
        for (symbol, rate) in &fiat.rates {
            if symbol == baseline {
                continue;
            }
            if let Err(e) = store.set(Partition::Fiat, baseline, symbol, *rate) {
                debug!(symbol = %symbol, error = %e, "Skipping fiat rate");
                continue;
            }
            if roster.is_alt(symbol.code()) {
                store.set(Partition::Alt, baseline, symbol, *rate)?;
            }
        }

        for (base, quote, price) in snapshot.iter() {
            if roster.is_alt(base.code()) && roster.is_alt(quote.code()) {
                store.set(Partition::Alt, base, quote, price)?;
            }
        }

        Ok(())
    }

    /// Publish each aliased alt's rates under its extra names too.
    fn apply_aliases(&self, store: &mut RateStore) -> RatesResult<()> {
        for (canonical, aliases) in &self.config.aliases {
            if !store.has_rates(Partition::Alt, canonical.code()) {
                continue;
            }
            for alias in aliases {
                let row = store.row(Partition::Alt, canonical.code()).cloned().unwrap_or_default();
                for (quote, rate) in row {
                    if &quote != alias {
                        store.set(Partition::Alt, alias, &quote, rate)?;
                    }
                }
                store.set(Partition::Alt, alias, canonical, 1.0)?;
            }
        }
        Ok(())
    }

    fn publish(&self, candidate: &RateStore) {
        let changed = self.store.write().merge_from(candidate);
        *self.last_updated.write() = Some(now());
        self.errors.write().clear();
        self.metrics.cycle_published();

        if !changed.is_empty() && self.inform_gate.try_enter() {
            let names: Vec<&str> = changed.iter().map(Symbol::code).collect();
            info!(count = changed.len(), currencies = %names.join(","), "Rates updated");
        }
    }

    /// When rates were last published.
    pub fn last_updated(&self) -> Option<Timestamp> {
        *self.last_updated.read()
    }

    /// Errors of the most recent refresh, empty after a successful one.
    pub fn errors(&self) -> Vec<RatesError> {
        self.errors.read().clone()
    }

    /// Every rate from `base`, or from the baseline when `None`.
    pub fn rates(&self, base: Option<&str>) -> Option<BTreeMap<Symbol, f64>> {
        let base = base.unwrap_or(self.config.baseline.code());
        self.store.read().rates(base)
    }

    /// How many `b` one `a` buys, `0.0` when unknown.
    pub fn ratio(&self, a: &str, b: &str) -> f64 {
        self.store.read().ratio(a, b)
    }

    pub fn has(&self, symbol: &str) -> bool {
        self.key(symbol).is_some()
    }

    /// Resolve a code to a known symbol.
    pub fn key(&self, symbol: &str) -> Option<Symbol> {
        self.store.read().key(symbol)
    }

    /// Units of `symbol` per baseline unit from the fiat partition.
    pub fn fiat(&self, symbol: &str) -> Option<f64> {
        self.store.read().fiat(&symbol.to_uppercase())
    }

    /// Units of `symbol` per baseline unit from the alt partition.
    pub fn alt(&self, symbol: &str) -> Option<f64> {
        self.store.read().alt(&symbol.to_uppercase())
    }

    /// Whether a concatenated market like `BATUSD` can be priced.
    pub fn watching(&self, pair: &str) -> bool {
        if !(6..=8).contains(&pair.len()) {
            return false;
        }
        let split = {
            let store = self.store.read();
            split_pair_with(pair, |code| store.contains(code))
        };
        split.is_some_and(|(base, quote)| self.ratio(quote.code(), base.code()) > 0.0)
    }

    /// Whether a rate from `a` to `b` is known. Both codes are at most four
    /// characters.
    pub fn watching_pair(&self, a: &str, b: &str) -> bool {
        if a.is_empty() || b.is_empty() || a.len() > 4 || b.len() > 4 {
            return false;
        }
        self.ratio(a, b) > 0.0
    }

    /// `YYYY-MM-DD` of `date`, or of today when `None`.
    pub fn by_day(&self, date: Option<Timestamp>) -> String {
        by_day(date)
    }

    fn resolve(&self, code: &str) -> RatesResult<Symbol> {
        self.key(code)
            .ok_or_else(|| RatesError::UnresolvedSymbol(code.to_string()))
    }

    /// Value of `probi` base units of `alt` in `fiat`, rounded to the fiat's
    /// minor unit.
    pub fn alt_to_fiat(&self, alt: &str, probi: Decimal, fiat: &str) -> RatesResult<Decimal> {
        let alt = self.resolve(alt)?;
        let fiat = self.resolve(fiat)?;
        let rate = self.ratio(alt.code(), fiat.code());
        let price = rate_to_decimal(rate)
            .ok_or_else(|| RatesError::UnresolvedSymbol(format!("{}/{}", alt, fiat)))?;
        let decimals = self.config.asset(&alt).decimals;

        amount::alt_to_fiat(probi, decimals, &fiat, price).ok_or(RatesError::InvalidRate {
            base: alt,
            quote: fiat,
            rate,
        })
    }

    /// Base units of `alt` that `value` of `fiat` buys, rounded down.
    pub fn fiat_to_alt(&self, fiat: &str, value: Decimal, alt: &str) -> RatesResult<Decimal> {
        let fiat = self.resolve(fiat)?;
        let alt = self.resolve(alt)?;
        let rate = self.ratio(alt.code(), fiat.code());
        let price = rate_to_decimal(rate)
            .ok_or_else(|| RatesError::UnresolvedSymbol(format!("{}/{}", alt, fiat)))?;
        let decimals = self.config.asset(&alt).decimals;

        amount::fiat_to_alt(value, decimals, price).ok_or(RatesError::InvalidRate {
            base: alt,
            quote: fiat,
            rate,
        })
    }

    /// Rates for a past day, fetched once and kept while complete.
    ///
    /// `assets` selects the alts to price; `None` or an empty list means every
    /// tracked alt. A result with lookup errors is returned but not kept, so
    /// asking again retries the failed lookups.
    pub async fn historical(
        self: &Arc<Self>,
        day: NaiveDate,
        assets: Option<&[Symbol]>,
    ) -> RatesResult<HistoricalRates> {
        let assets = self.history_assets(assets);
        let key = history_key(day, &assets);
        let engine = Arc::clone(self);
        self.days
            .run_once_keeping(
                key,
                move || async move { engine.fetch_day(day, assets).await },
                |result: &HistoricalRates| result.errors.is_empty(),
            )
            .await
    }

    /// A kept, complete historical result for the same `assets` selection.
    pub fn day_snapshot(&self, day: NaiveDate, assets: Option<&[Symbol]>) -> Option<HistoricalRates> {
        let assets = self.history_assets(assets);
        self.days.peek(&history_key(day, &assets)).and_then(Result::ok)
    }

    fn history_assets(&self, assets: Option<&[Symbol]>) -> Vec<Symbol> {
        let selected = match assets {
            Some(assets) if !assets.is_empty() => assets.to_vec(),
            _ => self.config.roster.alts().to_vec(),
        };
        let unique: BTreeSet<Symbol> = selected.into_iter().collect();
        unique.into_iter().collect()
    }

    #[instrument(skip(self), fields(assets = assets.len()))]
    async fn fetch_day(self: Arc<Self>, day: NaiveDate, assets: Vec<Symbol>) -> RatesResult<HistoricalRates> {
        let source = self
            .collaborators
            .history
            .clone()
            .ok_or_else(|| RatesError::Configuration("No historical price source".to_string()))?;
        let max_wait = self.config.max_wait;
        let mut errors = Vec::new();

        let rates = Arc::clone(&self.collaborators.rates);
        let fiat = fetch_within(FIAT_SERVICE, max_wait, &LastGood::new(), async move {
            rates.historical(day).await
        })
        .await;
        errors.extend(fiat.errors.iter().cloned());
        let mut fiat = fiat.value;
        if fiat.base != Symbol::usd() && !fiat.rates.is_empty() {
            errors.push(RatesError::Configuration(format!(
                "Historical fiat rates quoted from {}, expected USD",
                fiat.base
            )));
            fiat = FiatQuote::default();
        }

        let lookups = assets.iter().map(|alt| {
            let source = Arc::clone(&source);
            let profile = self.config.asset(alt);
            let alt = alt.clone();
            async move {
                let price = match tokio::time::timeout(max_wait, source.price_usd(&alt, &profile, day)).await {
                    Ok(price) => price,
                    Err(_) => Err(RatesError::service_unavailable(source.name())),
                };
                (alt, price)
            }
        });

        let mut alt = BTreeMap::new();
        for (symbol, price) in join_all(lookups).await {
            match price {
                Ok(usd) if usd.is_finite() && usd > 0.0 => {
                    alt.insert(symbol, 1.0 / usd);
                }
                Ok(usd) => errors.push(RatesError::InvalidRate {
                    base: symbol,
                    quote: Symbol::usd(),
                    rate: usd,
                }),
                Err(e) => errors.push(e),
            }
        }

        debug!(alts = alt.len(), errors = errors.len(), "Historical rates fetched");
        Ok(HistoricalRates { day, fiat, alt, errors })
    }

    /// Build a trade feed writing into this engine's store.
    pub fn trade_feed(&self, stream: Arc<dyn TradeStream>) -> TradeFeed {
        TradeFeed::new(
            stream,
            self.store(),
            self.config.roster.clone(),
            self.config.trade_symbols(),
            self.config.reconnect_delay,
            self.metrics(),
        )
    }

    /// Run one maintenance refresh. Returns whether new rates were published.
    pub async fn maintain(self: &Arc<Self>) -> bool {
        match self.update().await {
            Ok(published) => {
                if !published {
                    self.report(&self.errors());
                }
                published
            }
            Err(e) => {
                self.report(std::slice::from_ref(&e));
                false
            }
        }
    }

    fn report(&self, errors: &[RatesError]) {
        if errors.is_empty() {
            return;
        }
        if self.error_gate.try_enter() {
            for e in errors {
                error!(code = e.error_code(), error = %e, "Rate refresh failed");
            }
        } else {
            self.metrics.warning_suppressed();
            debug!(errors = errors.len(), "Rate refresh failure suppressed");
        }
    }

    /// Refresh on the maintenance interval until `shutdown` flips to `true`.
    pub fn spawn_maintenance(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        let period = self.config.maintenance_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        engine.maintain().await;
                    }
                    _ = shutdown.changed() => break,
                }
            }
            debug!("Maintenance stopped");
        })
    }

    /// Drop every rate and recorded refresh.
    pub fn reset(&self) {
        *self.store.write() = RateStore::new(self.config.baseline.clone());
        self.flights.clear();
        self.days.clear();
        self.last_fiat.clear();
        self.last_prices.clear();
        *self.last_updated.write() = None;
        self.errors.write().clear();
        self.error_gate.reset();
        self.inform_gate.reset();
    }
}

/// Flight key for one day and asset selection: `2019-03-07:BAT,ETH`.
fn history_key(day: NaiveDate, assets: &[Symbol]) -> String {
    let codes: Vec<&str> = assets.iter().map(Symbol::code).collect();
    format!("{}:{}", day_key(day), codes.join(","))
}
