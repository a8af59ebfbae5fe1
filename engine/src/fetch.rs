//! Bounded-wait collaborator calls with last-good fallback.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::error::{RatesError, RatesResult};
use crate::provider::{FiatQuote, TickerPrices};

/// Values that can be empty, in which case they do not count as fresh data.
pub trait Payload: Clone + Default + Send + Sync + 'static {
    fn is_empty(&self) -> bool;
}

impl Payload for FiatQuote {
    fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }
}

impl Payload for TickerPrices {
    fn is_empty(&self) -> bool {
        TickerPrices::is_empty(self)
    }
}

/// A collaborator answer, possibly substituted by the last good one.
#[derive(Debug, Clone, PartialEq)]
pub struct Fetched<T> {
    pub value: T,
    /// The value is not a fresh answer from this call.
    pub stale: bool,
    pub errors: Vec<RatesError>,
}

impl<T: Payload> Fetched<T> {
    /// A fresh answer. An empty payload still counts as stale.
    pub fn fresh(value: T) -> Self {
        let stale = value.is_empty();
        Self {
            value,
            stale,
            errors: Vec::new(),
        }
    }

    /// A substituted answer with the error that caused it.
    pub fn degraded(value: T, error: RatesError) -> Self {
        Self {
            value,
            stale: true,
            errors: vec![error],
        }
    }

    /// Whether the value can seed a new refresh.
    pub fn is_usable(&self) -> bool {
        !self.stale && self.errors.is_empty()
    }
}

/// The most recent non-empty answer from a collaborator.
#[derive(Debug, Default)]
pub struct LastGood<T> {
    value: Arc<RwLock<Option<T>>>,
}

impl<T> Clone for LastGood<T> {
    fn clone(&self) -> Self {
        Self {
            value: Arc::clone(&self.value),
        }
    }
}

impl<T: Payload> LastGood<T> {
    pub fn new() -> Self {
        Self {
            value: Arc::new(RwLock::new(None)),
        }
    }

    /// The stored value, or an empty one.
    pub fn get(&self) -> T {
        self.value.read().clone().unwrap_or_default()
    }

    /// Store a value unless it is empty.
    pub fn store(&self, value: T) {
        if !value.is_empty() {
            *self.value.write() = Some(value);
        }
    }

    pub fn clear(&self) {
        *self.value.write() = None;
    }
}

/// Await `call` for at most `max_wait`.
///
/// On failure or timeout the last good value is returned, marked stale, with
/// the error attached. A call that times out keeps running and stores its
/// answer for later reads when it eventually succeeds.
pub async fn fetch_within<T, F>(service: &str, max_wait: Duration, last_good: &LastGood<T>, call: F) -> Fetched<T>
where
    T: Payload,
    F: Future<Output = RatesResult<T>> + Send + 'static,
{
    let mut handle = tokio::spawn(call);

    match tokio::time::timeout(max_wait, &mut handle).await {
        Ok(Ok(Ok(value))) => {
            last_good.store(value.clone());
            Fetched::fresh(value)
        }
        Ok(Ok(Err(error))) => {
            warn!(service = service, error = %error, "Collaborator call failed");
            Fetched::degraded(last_good.get(), error)
        }
        Ok(Err(join_error)) => {
            let error = RatesError::upstream(service, join_error.to_string());
            warn!(service = service, error = %error, "Collaborator task aborted");
            Fetched::degraded(last_good.get(), error)
        }
        Err(_) => {
            debug!(service = service, max_wait_ms = max_wait.as_millis() as u64, "Collaborator call timed out");
            let late = last_good.clone();
            let name = service.to_string();
            tokio::spawn(async move {
                if let Ok(Ok(value)) = handle.await {
                    debug!(service = %name, "Stored late collaborator answer");
                    late.store(value);
                }
            });
            Fetched::degraded(last_good.get(), RatesError::service_unavailable(service))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quote(eur: f64) -> FiatQuote {
        FiatQuote::from_pairs("USD", &[("EUR", eur)])
    }

    #[tokio::test]
    async fn test_fresh_answer_is_stored() {
        let last_good = LastGood::new();
        let fetched = fetch_within("fiat", Duration::from_secs(1), &last_good, async { Ok(quote(0.9)) }).await;

        assert!(fetched.is_usable());
        assert_eq!(last_good.get(), quote(0.9));
    }

    #[tokio::test]
    async fn test_failure_uses_last_good() {
        let last_good = LastGood::new();
        last_good.store(quote(0.8));

        let fetched = fetch_within("fiat", Duration::from_secs(1), &last_good, async {
            Err::<FiatQuote, _>(RatesError::upstream("fiat", "500"))
        })
        .await;

        assert!(fetched.stale);
        assert_eq!(fetched.value, quote(0.8));
        assert_eq!(fetched.errors, vec![RatesError::upstream("fiat", "500")]);
    }

    #[tokio::test]
    async fn test_empty_answer_is_stale() {
        let last_good = LastGood::<TickerPrices>::new();
        let fetched = fetch_within("alt", Duration::from_secs(1), &last_good, async { Ok(TickerPrices::new()) }).await;

        assert!(fetched.stale);
        assert!(fetched.errors.is_empty());
        assert!(!fetched.is_usable());
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_answer_updates_cache() {
        let last_good = LastGood::new();
        let slow = async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(quote(0.7))
        };

        let fetched = fetch_within("fiat", Duration::from_millis(100), &last_good, slow).await;
        assert!(fetched.stale);
        assert_eq!(fetched.errors, vec![RatesError::service_unavailable("fiat")]);
        assert!(fetched.value.rates.is_empty());

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(last_good.get(), quote(0.7));
    }
}
