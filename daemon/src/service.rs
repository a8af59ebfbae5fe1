//! Rates service lifecycle.

use std::sync::Arc;
use std::time::Duration;

use altrates_engine::{FeedState, RatesEngine, RatesError, RatesResult, TradeStream};
use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::state::ServiceState;

const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

type FeedStateHandle = Arc<tokio::sync::RwLock<FeedState>>;

/// Owns the background tasks that keep an engine's rates fresh.
pub struct RatesService {
    engine: Arc<RatesEngine>,
    trade_stream: Option<Arc<dyn TradeStream>>,
    state: Arc<RwLock<ServiceState>>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    feed_state: RwLock<Option<FeedStateHandle>>,
}

impl RatesService {
    /// Create a service. Without a trade stream only periodic refreshes run.
    pub fn new(engine: Arc<RatesEngine>, trade_stream: Option<Arc<dyn TradeStream>>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            engine,
            trade_stream,
            state: Arc::new(RwLock::new(ServiceState::Starting)),
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
            feed_state: RwLock::new(None),
        }
    }

    /// Run the first refresh and spawn the background tasks.
    ///
    /// A failed first refresh is logged and left to the maintenance loop.
    #[instrument(skip(self))]
    pub async fn start(&self) -> RatesResult<()> {
        if self.state() != ServiceState::Starting {
            return Err(RatesError::Configuration(format!(
                "service cannot start from {:?}",
                self.state()
            )));
        }

        match self.engine.ready().await {
            Ok(true) => info!(symbols = self.engine.store().read().symbols().len(), "Initial rates published"),
            Ok(false) => {
                for e in self.engine.errors() {
                    warn!(code = e.error_code(), error = %e, "Initial refresh degraded");
                }
            }
            Err(e) => warn!(code = e.error_code(), error = %e, "Initial refresh failed"),
        }

        let mut tasks = self.tasks.lock();
        tasks.push(self.engine.spawn_maintenance(self.shutdown_tx.subscribe()));

        if let Some(stream) = &self.trade_stream {
            let feed = self.engine.trade_feed(Arc::clone(stream));
            *self.feed_state.write() = Some(feed.state_handle());
            info!(stream = stream.name(), markets = feed.symbols().len(), "Starting trade feed");

            let shutdown = self.shutdown_tx.subscribe();
            tasks.push(tokio::spawn(async move {
                feed.run(shutdown).await;
            }));
        }
        drop(tasks);

        *self.state.write() = ServiceState::Running;
        info!("Rates service running");
        Ok(())
    }

    /// Signal every task to stop and wait for them.
    #[instrument(skip(self))]
    pub async fn stop(&self) -> RatesResult<()> {
        *self.state.write() = ServiceState::ShuttingDown;
        let _ = self.shutdown_tx.send(true);

        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            if tokio::time::timeout(DRAIN_TIMEOUT, task).await.is_err() {
                warn!("Background task did not stop in time");
            }
        }

        *self.state.write() = ServiceState::Stopped;
        let metrics = self.engine.metrics();
        info!(
            metrics = %serde_json::to_string(&metrics.snapshot()).unwrap_or_default(),
            "Rates service stopped"
        );
        debug!(exposition = %metrics.to_prometheus(), "Final metrics");
        Ok(())
    }

    pub fn state(&self) -> ServiceState {
        *self.state.read()
    }

    pub fn is_running(&self) -> bool {
        self.state().is_running()
    }

    pub fn engine(&self) -> &Arc<RatesEngine> {
        &self.engine
    }

    /// Trade feed connection state, if a feed was started.
    pub async fn feed_state(&self) -> Option<FeedState> {
        let handle = self.feed_state.read().clone();
        match handle {
            Some(state) => Some(*state.read().await),
            None => None,
        }
    }
}
