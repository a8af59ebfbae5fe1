//! Open Exchange Rates client.

use std::collections::BTreeMap;
use std::time::Duration;

use altrates_common::{day_key, Symbol};
use altrates_engine::{FiatQuote, RateService, RatesError, RatesResult};
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Url;
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::cache::ResponseCache;
use crate::http::{parse_url, HttpClient};

const SERVICE: &str = "oxr";
const LATEST_KEY: &str = "latest";

#[derive(Debug, Deserialize)]
struct OxrResponse {
    base: String,
    rates: BTreeMap<String, f64>,
}

/// Fiat rates from openexchangerates.org.
///
/// Latest rates are cached for the configured TTL; a past day's rates never
/// change and are cached until the process exits.
pub struct OpenExchangeRates {
    http: HttpClient,
    root: Url,
    app_id: String,
    cache: ResponseCache<FiatQuote>,
}

impl OpenExchangeRates {
    pub fn new(http: HttpClient, root: &str, app_id: impl Into<String>, cache_ttl: Duration) -> RatesResult<Self> {
        let ttl = chrono::Duration::from_std(cache_ttl)
            .map_err(|e| RatesError::Configuration(format!("oxr cache ttl: {}", e)))?;
        Ok(Self {
            http,
            root: parse_url(root)?,
            app_id: app_id.into(),
            cache: ResponseCache::new(ttl),
        })
    }

    /// Build `<root>/<path>?app_id=<id>`.
    pub fn endpoint(&self, path: &str) -> RatesResult<Url> {
        let mut url = self.root.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| RatesError::Configuration(format!("oxr URL cannot be a base: {}", self.root)))?;
            segments.pop_if_empty().extend(path.split('/'));
        }
        url.query_pairs_mut().append_pair("app_id", &self.app_id);
        Ok(url)
    }

    async fn fetch(&self, key: &str, path: &str, permanent: bool) -> RatesResult<FiatQuote> {
        if let Some(quote) = self.cache.get(key) {
            return Ok(quote);
        }

        let response: OxrResponse = self.http.get_json(SERVICE, self.endpoint(path)?).await?;
        let quote = into_quote(response)?;
        debug!(key = key, rates = quote.rates.len(), "Fetched fiat rates");

        self.cache.evict_expired();
        if permanent {
            self.cache.insert_with_ttl(key, quote.clone(), None);
        } else {
            self.cache.insert(key, quote.clone());
        }
        let stats = self.cache.stats();
        debug!(cached = stats.valid_entries, "Fiat quote cached");
        Ok(quote)
    }
}

fn into_quote(response: OxrResponse) -> RatesResult<FiatQuote> {
    let base = Symbol::parse(&response.base)
        .map_err(|e| RatesError::MalformedMessage(format!("oxr base: {}", e)))?;

    let rates: BTreeMap<Symbol, f64> = response
        .rates
        .into_iter()
        .filter(|(_, rate)| rate.is_finite() && *rate > 0.0)
        .filter_map(|(code, rate)| Symbol::parse(&code).ok().map(|symbol| (symbol, rate)))
        .collect();

    if rates.is_empty() {
        return Err(RatesError::MalformedMessage("oxr returned no rates".to_string()));
    }

    Ok(FiatQuote { base, rates })
}

#[async_trait]
impl RateService for OpenExchangeRates {
    fn name(&self) -> &str {
        SERVICE
    }

    #[instrument(skip(self))]
    async fn latest(&self) -> RatesResult<FiatQuote> {
        self.fetch(LATEST_KEY, "latest.json", false).await
    }

    #[instrument(skip(self))]
    async fn historical(&self, day: NaiveDate) -> RatesResult<FiatQuote> {
        let key = day_key(day);
        let path = format!("historical/{}.json", key);
        self.fetch(&key, &path, true).await
    }
}
