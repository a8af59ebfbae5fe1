//! Coin Metrics daily price history.

use altrates_common::{day_start, Symbol};
use altrates_engine::{AssetProfile, HistoricalPriceSource, RatesError, RatesResult};
use async_trait::async_trait;
use chrono::{NaiveDate, SecondsFormat};
use reqwest::Url;
use serde::Deserialize;
use tracing::instrument;

use crate::http::{parse_url, HttpClient};

const SERVICE: &str = "coinmetrics";

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum MetricValue {
    Number(f64),
    Text(String),
}

#[derive(Debug, Deserialize)]
struct Series {
    values: Vec<MetricValue>,
}

#[derive(Debug, Deserialize)]
struct MetricData {
    series: Vec<Series>,
}

#[derive(Debug, Deserialize)]
struct MetricResponse {
    #[serde(rename = "metricData")]
    metric_data: MetricData,
}

/// Daily `PriceUSD` from the Coin Metrics community API.
pub struct CoinMetrics {
    http: HttpClient,
    root: Url,
}

impl CoinMetrics {
    pub fn new(http: HttpClient, root: &str) -> RatesResult<Self> {
        Ok(Self {
            http,
            root: parse_url(root)?,
        })
    }

    /// Metric query for one asset over a single day.
    pub fn endpoint(&self, asset_id: &str, day: NaiveDate) -> RatesResult<Url> {
        let mut url = self
            .root
            .join(&format!("/v2/assets/{}/metricdata", asset_id.to_lowercase()))
            .map_err(|e| RatesError::Configuration(format!("coinmetrics URL: {}", e)))?;
        let start = day_start(day).to_rfc3339_opts(SecondsFormat::Millis, true);
        url.query_pairs_mut()
            .append_pair("time_interval", "day")
            .append_pair("metrics", "PriceUSD")
            .append_pair("start", &start)
            .append_pair("end", &start);
        Ok(url)
    }
}

/// The first value of the first series, which must be a positive number.
fn first_price(response: MetricResponse) -> RatesResult<f64> {
    let value = response
        .metric_data
        .series
        .into_iter()
        .next()
        .and_then(|series| series.values.into_iter().next())
        .ok_or_else(|| RatesError::MalformedMessage("coinmetrics returned no values".to_string()))?;

    let price = match value {
        MetricValue::Number(n) => n,
        MetricValue::Text(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| RatesError::MalformedMessage(format!("coinmetrics value is not numeric: {}", s)))?,
    };

    if !price.is_finite() || price <= 0.0 {
        return Err(RatesError::MalformedMessage(format!("coinmetrics price must be positive: {}", price)));
    }
    Ok(price)
}

#[async_trait]
impl HistoricalPriceSource for CoinMetrics {
    fn name(&self) -> &str {
        SERVICE
    }

    #[instrument(skip(self, profile))]
    async fn price_usd(&self, asset: &Symbol, profile: &AssetProfile, day: NaiveDate) -> RatesResult<f64> {
        let response: MetricResponse = self.http.get_json(SERVICE, self.endpoint(&profile.id, day)?).await?;
        first_price(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_endpoint() {
        let http = HttpClient::new(Duration::from_secs(5)).unwrap();
        let source = CoinMetrics::new(http, "https://community-api.coinmetrics.io").unwrap();
        let day = NaiveDate::from_ymd_opt(2019, 3, 7).unwrap();

        let url = source.endpoint("BAT", day).unwrap();
        assert_eq!(url.path(), "/v2/assets/bat/metricdata");
        let query: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(query.contains(&("metrics".to_string(), "PriceUSD".to_string())));
        assert!(query.contains(&("start".to_string(), "2019-03-07T00:00:00.000Z".to_string())));
        assert!(query.contains(&("end".to_string(), "2019-03-07T00:00:00.000Z".to_string())));
    }

    #[test]
    fn test_first_price() {
        let response: MetricResponse = serde_json::from_str(
            r#"{"metricData":{"metrics":["PriceUSD"],"series":[{"time":"2019-03-07T00:00:00.000Z","values":["0.2134"]}]}}"#,
        )
        .unwrap();
        assert_eq!(first_price(response).unwrap(), 0.2134);
    }

    #[test]
    fn test_first_price_rejects_empty() {
        let response: MetricResponse =
            serde_json::from_str(r#"{"metricData":{"metrics":["PriceUSD"],"series":[]}}"#).unwrap();
        assert!(first_price(response).is_err());

        let zero: MetricResponse =
            serde_json::from_str(r#"{"metricData":{"series":[{"values":[0]}]}}"#).unwrap();
        assert!(first_price(zero).is_err());
    }
}
