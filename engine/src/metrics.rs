//! Counters for refresh and trade stream activity.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Engine metrics.
#[derive(Debug, Default)]
pub struct EngineMetrics {
    /// Refresh cycles started.
    pub cycles_started: AtomicU64,
    /// Refresh cycles whose rates were published.
    pub cycles_published: AtomicU64,
    /// Refresh cycles abandoned because upstream data was stale or missing.
    pub cycles_stale: AtomicU64,
    /// Refresh cycles rejected by validation.
    pub divergences: AtomicU64,
    /// Trades written into the alt partition.
    pub trades_applied: AtomicU64,
    /// Trades ignored or rejected.
    pub trades_skipped: AtomicU64,
    /// Trade stream connections that dropped.
    pub stream_disconnects: AtomicU64,
    /// Error reports held back by the warning window.
    pub warnings_suppressed: AtomicU64,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cycle_started(&self) {
        self.cycles_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn cycle_published(&self) {
        self.cycles_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn cycle_stale(&self) {
        self.cycles_stale.fetch_add(1, Ordering::Relaxed);
    }

    pub fn cycle_diverged(&self) {
        self.divergences.fetch_add(1, Ordering::Relaxed);
    }

    pub fn trade_applied(&self) {
        self.trades_applied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn trade_skipped(&self) {
        self.trades_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stream_disconnected(&self) {
        self.stream_disconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn warning_suppressed(&self) {
        self.warnings_suppressed.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            cycles_started: self.cycles_started.load(Ordering::Relaxed),
            cycles_published: self.cycles_published.load(Ordering::Relaxed),
            cycles_stale: self.cycles_stale.load(Ordering::Relaxed),
            divergences: self.divergences.load(Ordering::Relaxed),
            trades_applied: self.trades_applied.load(Ordering::Relaxed),
            trades_skipped: self.trades_skipped.load(Ordering::Relaxed),
            stream_disconnects: self.stream_disconnects.load(Ordering::Relaxed),
            warnings_suppressed: self.warnings_suppressed.load(Ordering::Relaxed),
        }
    }

    /// Export metrics in Prometheus text format.
    pub fn to_prometheus(&self) -> String {
        let snapshot = self.snapshot();
        let counters = [
            ("cycles_started", "Refresh cycles started", snapshot.cycles_started),
            ("cycles_published", "Refresh cycles published", snapshot.cycles_published),
            ("cycles_stale", "Refresh cycles abandoned on stale data", snapshot.cycles_stale),
            ("divergences", "Refresh cycles rejected by validation", snapshot.divergences),
            ("trades_applied", "Trades applied to the alt partition", snapshot.trades_applied),
            ("trades_skipped", "Trades ignored or rejected", snapshot.trades_skipped),
            ("stream_disconnects", "Trade stream disconnects", snapshot.stream_disconnects),
            ("warnings_suppressed", "Error reports suppressed", snapshot.warnings_suppressed),
        ];

        counters
            .iter()
            .map(|(name, help, value)| {
                format!(
                    "# HELP altrates_{name} {help}\n# TYPE altrates_{name} counter\naltrates_{name} {value}\n"
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub cycles_started: u64,
    pub cycles_published: u64,
    pub cycles_stale: u64,
    pub divergences: u64,
    pub trades_applied: u64,
    pub trades_skipped: u64,
    pub stream_disconnects: u64,
    pub warnings_suppressed: u64,
}
