//! Time-window gate for repeated reports.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

/// Lets a side effect fire at most once per window.
///
/// The gate holds a single "next allowed" instant and is only written when a
/// window is entered.
#[derive(Debug)]
pub struct WarningGate {
    window: Duration,
    next_allowed_at: Mutex<Option<Instant>>,
}

impl WarningGate {
    /// Create an open gate with the given window.
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            next_allowed_at: Mutex::new(None),
        }
    }

    /// Length of one window.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Returns `true` and starts a new window if the previous one has passed.
    pub fn try_enter(&self) -> bool {
        let now = Instant::now();
        let mut next = self.next_allowed_at.lock();
        match *next {
            Some(at) if now < at => false,
            _ => {
                *next = Some(now + self.window);
                true
            }
        }
    }

    /// When the gate opens again, if a window is running.
    pub fn next_allowed_at(&self) -> Option<Instant> {
        *self.next_allowed_at.lock()
    }

    /// Reopen the gate immediately.
    pub fn reset(&self) {
        *self.next_allowed_at.lock() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_fires_once_per_window() {
        let gate = WarningGate::new(Duration::from_secs(15 * 60));

        assert!(gate.try_enter());
        assert!(!gate.try_enter());

        tokio::time::advance(Duration::from_secs(14 * 60)).await;
        assert!(!gate.try_enter());

        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(gate.try_enter());
        assert!(!gate.try_enter());
    }

    #[tokio::test(start_paused = true)]
    async fn test_suppressed_attempts_do_not_extend_window() {
        let gate = WarningGate::new(Duration::from_secs(60));
        assert!(gate.try_enter());
        let opens_at = gate.next_allowed_at().unwrap();

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(!gate.try_enter());
        assert_eq!(gate.next_allowed_at(), Some(opens_at));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_reopens() {
        let gate = WarningGate::new(Duration::from_secs(60));
        assert!(gate.try_enter());
        gate.reset();
        assert!(gate.try_enter());
    }
}
