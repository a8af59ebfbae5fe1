//! Engine configuration.

use std::collections::BTreeMap;
use std::time::Duration;

use altrates_common::{constants, Symbol};

/// The currencies the engine tracks, in iteration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Roster {
    fiats: Vec<Symbol>,
    alts: Vec<Symbol>,
}

impl Roster {
    /// Create a roster, dropping duplicates while keeping first occurrences.
    pub fn new(fiats: Vec<Symbol>, alts: Vec<Symbol>) -> Self {
        Self {
            fiats: dedup(fiats),
            alts: dedup(alts),
        }
    }

    pub fn fiats(&self) -> &[Symbol] {
        &self.fiats
    }

    pub fn alts(&self) -> &[Symbol] {
        &self.alts
    }

    /// A fiat that is not also tracked as an alt.
    pub fn is_fiat(&self, symbol: &str) -> bool {
        self.fiats.iter().any(|s| s.code() == symbol) && !self.is_alt(symbol)
    }

    /// Whether `symbol` is tracked as an alt, bridge assets included.
    pub fn is_alt(&self, symbol: &str) -> bool {
        self.alts.iter().any(|s| s.code() == symbol)
    }

    /// Whether `symbol` is tracked at all.
    pub fn contains(&self, symbol: &str) -> bool {
        self.is_alt(symbol) || self.fiats.iter().any(|s| s.code() == symbol)
    }

    /// Every tracked symbol, fiats first.
    pub fn all(&self) -> Vec<Symbol> {
        dedup(self.fiats.iter().chain(self.alts.iter()).cloned().collect())
    }
}

impl Default for Roster {
    fn default() -> Self {
        let fiats = ["USD", "EUR", "GBP", "JPY", "CAD", "AUD", "CHF", "ZAR"];
        let alts = ["BTC", "ETH", "USDT", "BNB", "BAT", "LTC", "XRP", "BCHABC"];
        Self::new(
            fiats.iter().map(Symbol::new).collect(),
            alts.iter().map(Symbol::new).collect(),
        )
    }
}

fn dedup(symbols: Vec<Symbol>) -> Vec<Symbol> {
    let mut seen = Vec::with_capacity(symbols.len());
    for symbol in symbols {
        if !seen.contains(&symbol) {
            seen.push(symbol);
        }
    }
    seen
}

/// Inclusive band a derived/observed ratio must fall in.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ToleranceBand {
    pub lower: f64,
    pub upper: f64,
}

impl ToleranceBand {
    /// Whether `ratio` lies within the band, bounds included.
    pub fn contains(&self, ratio: f64) -> bool {
        ratio >= self.lower && ratio <= self.upper
    }
}

impl Default for ToleranceBand {
    fn default() -> Self {
        Self {
            lower: 0.9,
            upper: 1.1,
        }
    }
}

/// Per-asset settings, keyed by symbol in [`EngineConfig::assets`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetProfile {
    /// Asset identifier at the price-history service.
    pub id: String,
    /// Base-unit decimals of the asset.
    pub decimals: u32,
    /// Exchange markets streamed for this asset.
    pub trade_symbols: Vec<String>,
}

impl AssetProfile {
    /// Create a profile with the default markets for `symbol`.
    pub fn new(symbol: &Symbol, id: impl Into<String>, decimals: u32) -> Self {
        Self {
            id: id.into(),
            decimals,
            trade_symbols: default_trade_symbols(symbol),
        }
    }

    /// Profile used for assets without an explicit entry.
    pub fn fallback(symbol: &Symbol) -> Self {
        Self::new(symbol, symbol.code().to_lowercase(), 18)
    }
}

/// Markets that anchor an alt to the exchange root: BTC and ETH against
/// USDT, everything else against BTC.
fn default_trade_symbols(symbol: &Symbol) -> Vec<String> {
    match symbol.code() {
        "BTC" => vec!["BTCUSDT".to_string()],
        "ETH" => vec!["ETHUSDT".to_string(), "ETHBTC".to_string()],
        "USDT" => Vec::new(),
        code => vec![format!("{}BTC", code.replace('-', ""))],
    }
}

fn default_assets() -> BTreeMap<Symbol, AssetProfile> {
    [
        ("BAT", "bat", 18),
        ("BTC", "btc", 8),
        ("ETH", "eth", 18),
        ("LTC", "ltc", 8),
        ("BNB", "bnb", 8),
        ("XRP", "xrp", 6),
        ("BCHABC", "bch", 8),
        ("USDT", "usdt", 6),
    ]
    .into_iter()
    .map(|(code, id, decimals)| {
        let symbol = Symbol::new(code);
        let profile = AssetProfile::new(&symbol, id, decimals);
        (symbol, profile)
    })
    .collect()
}

/// Configuration for the rate engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Currency every cross-partition conversion goes through.
    pub baseline: Symbol,
    /// Tracked currencies.
    pub roster: Roster,
    /// Extra names an alt is also published under.
    pub aliases: BTreeMap<Symbol, Vec<Symbol>>,
    /// Accepted derived/observed ratio band.
    pub tolerance: ToleranceBand,
    /// Per-asset settings.
    pub assets: BTreeMap<Symbol, AssetProfile>,
    /// Wait budget for a single collaborator call.
    pub max_wait: Duration,
    /// Interval between maintenance refreshes.
    pub maintenance_interval: Duration,
    /// Delay before reconnecting the trade stream.
    pub reconnect_delay: Duration,
    /// Window for reporting refresh errors.
    pub warning_window: Duration,
    /// Window for rate change notices.
    pub inform_window: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            baseline: Symbol::usd(),
            roster: Roster::default(),
            aliases: BTreeMap::from([(
                Symbol::new("BCHABC"),
                vec![Symbol::new("BCH"), Symbol::new("BCC")],
            )]),
            tolerance: ToleranceBand::default(),
            assets: default_assets(),
            max_wait: constants::max_wait(),
            maintenance_interval: constants::maintenance_interval(),
            reconnect_delay: constants::reconnect_delay(),
            warning_window: constants::warning_window(),
            inform_window: constants::inform_window(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(baseline) = std::env::var("RATES_BASELINE") {
            config.baseline = Symbol::new(baseline);
        }

        let fiats = std::env::var("RATES_FIATS").ok().map(|v| parse_symbols(&v));
        let alts = std::env::var("RATES_ALTS").ok().map(|v| parse_symbols(&v));
        if fiats.is_some() || alts.is_some() {
            config.roster = Roster::new(
                fiats.unwrap_or_else(|| config.roster.fiats().to_vec()),
                alts.unwrap_or_else(|| config.roster.alts().to_vec()),
            );
        }

        if let Some(lower) = env_parse::<f64>("RATES_TOLERANCE_LOWER") {
            config.tolerance.lower = lower;
        }

        if let Some(upper) = env_parse::<f64>("RATES_TOLERANCE_UPPER") {
            config.tolerance.upper = upper;
        }

        if let Some(ms) = env_parse::<u64>("RATES_MAX_WAIT_MS") {
            config.max_wait = Duration::from_millis(ms);
        }

        if let Some(secs) = env_parse::<u64>("RATES_MAINTENANCE_INTERVAL_SECS") {
            config.maintenance_interval = Duration::from_secs(secs);
        }

        config
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if !self.baseline.is_valid() {
            return Err(format!("Invalid baseline currency: {}", self.baseline));
        }

        if !self.roster.is_fiat(self.baseline.code()) {
            return Err(format!("Baseline {} must be a tracked fiat", self.baseline));
        }

        if self.roster.alts().is_empty() {
            return Err("At least one alt must be tracked".to_string());
        }

        let band = self.tolerance;
        if !(band.lower > 0.0 && band.lower <= 1.0 && band.upper >= 1.0 && band.upper.is_finite()) {
            return Err(format!(
                "Tolerance band [{}, {}] must contain 1 and be positive",
                band.lower, band.upper
            ));
        }

        if self.max_wait.is_zero() {
            return Err("Max wait cannot be zero".to_string());
        }

        if self.maintenance_interval.is_zero() {
            return Err("Maintenance interval cannot be zero".to_string());
        }

        Ok(())
    }

    /// Settings for an asset, falling back to defaults derived from its symbol.
    pub fn asset(&self, symbol: &Symbol) -> AssetProfile {
        self.assets
            .get(symbol)
            .cloned()
            .unwrap_or_else(|| AssetProfile::fallback(symbol))
    }

    /// Exchange markets to stream for every tracked alt.
    pub fn trade_symbols(&self) -> Vec<String> {
        let mut symbols = Vec::new();
        for alt in self.roster.alts() {
            for market in self.asset(alt).trade_symbols {
                if !symbols.contains(&market) {
                    symbols.push(market);
                }
            }
        }
        symbols
    }
}

fn parse_symbols(value: &str) -> Vec<Symbol> {
    value
        .split(',')
        .filter_map(|code| Symbol::parse(code).ok())
        .collect()
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}
