//! Single-flight sharing of asynchronous refresh tasks.
//!
//! Every caller asking for the same key while a task is pending receives a
//! handle to that one task. Successful tasks stay recorded until they are
//! invalidated; failed tasks remove themselves so the next call retries.

use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use tracing::debug;

use crate::error::RatesResult;

/// A shareable handle to a recorded task.
pub type Task<T> = Shared<BoxFuture<'static, RatesResult<T>>>;

struct Flight<T: Clone> {
    id: u64,
    task: Task<T>,
}

/// Keyed table of shared tasks.
pub struct SingleFlight<K, T: Clone> {
    flights: Arc<DashMap<K, Flight<T>>>,
    next_id: AtomicU64,
}

impl<K, T> SingleFlight<K, T>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            flights: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Return the recorded task for `key`, or record a new one built by `factory`.
    ///
    /// `factory` runs while the key's shard is locked, so it must only build
    /// the future and never call back into this table.
    pub fn run_once<F, Fut>(&self, key: K, factory: F) -> Task<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = RatesResult<T>> + Send + 'static,
    {
        self.run_once_keeping(key, factory, |_| true)
    }

    /// Like [`run_once`](Self::run_once), but a successful value for which
    /// `keep` is false is dropped from the table when the task settles.
    pub fn run_once_keeping<F, Fut, P>(&self, key: K, factory: F, keep: P) -> Task<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = RatesResult<T>> + Send + 'static,
        P: Fn(&T) -> bool + Send + 'static,
    {
        match self.flights.entry(key) {
            Entry::Occupied(entry) => {
                debug!(key = ?entry.key(), "Joining recorded task");
                entry.get().task.clone()
            }
            Entry::Vacant(entry) => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let flights = Arc::clone(&self.flights);
                let key = entry.key().clone();
                let pending = factory();

                let task = async move {
                    let result = pending.await;
                    let kept = result.as_ref().is_ok_and(|value| keep(value));
                    if !kept {
                        // Only drop our own record; a refresh may have replaced it.
                        flights.remove_if(&key, |_, flight| flight.id == id);
                    }
                    result
                }
                .boxed()
                .shared();

                entry.insert(Flight {
                    id,
                    task: task.clone(),
                });
                task
            }
        }
    }

    /// Forget the task recorded for `key`. Returns whether one existed.
    pub fn invalidate(&self, key: &K) -> bool {
        self.flights.remove(key).is_some()
    }

    /// Forget the recorded task and immediately record a fresh one.
    pub fn refresh<F, Fut>(&self, key: K, factory: F) -> Task<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = RatesResult<T>> + Send + 'static,
    {
        self.invalidate(&key);
        self.run_once(key, factory)
    }

    /// The settled outcome of the task recorded for `key`, if it has finished.
    pub fn peek(&self, key: &K) -> Option<RatesResult<T>> {
        self.flights
            .get(key)
            .and_then(|flight| flight.task.peek().cloned())
    }

    /// Whether a task is recorded for `key`.
    pub fn contains(&self, key: &K) -> bool {
        self.flights.contains_key(key)
    }

    /// Forget every recorded task.
    pub fn clear(&self) {
        self.flights.clear();
    }

    /// Number of recorded tasks.
    pub fn len(&self) -> usize {
        self.flights.len()
    }

    /// Whether no task is recorded.
    pub fn is_empty(&self) -> bool {
        self.flights.is_empty()
    }
}

impl<K, T> Default for SingleFlight<K, T>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
