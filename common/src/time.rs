//! Time utilities and refresh timing constants.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use std::time::Duration;

/// Refresh timing constants.
pub mod constants {
    use super::Duration;

    /// Interval between maintenance refreshes (1 minute).
    pub fn maintenance_interval() -> Duration {
        Duration::from_secs(60)
    }

    /// Fixed delay before reconnecting a dropped trade stream (15 seconds).
    pub fn reconnect_delay() -> Duration {
        Duration::from_secs(15)
    }

    /// Minimum spacing between reported refresh errors (15 minutes).
    pub fn warning_window() -> Duration {
        Duration::from_secs(15 * 60)
    }

    /// Minimum spacing between rate change notices (1 minute).
    pub fn inform_window() -> Duration {
        Duration::from_secs(60)
    }

    /// How long a collaborator call may take before stale data is used (3 seconds).
    pub fn max_wait() -> Duration {
        Duration::from_millis(3000)
    }

    /// How long a fiat quote is reused before it is fetched again (1 hour).
    pub fn fiat_quote_ttl() -> Duration {
        Duration::from_secs(60 * 60)
    }
}

/// A timestamp, always UTC.
pub type Timestamp = DateTime<Utc>;

/// Get the current timestamp.
pub fn now() -> Timestamp {
    Utc::now()
}

/// Calendar day of a timestamp as `YYYY-MM-DD`, today when `None`.
pub fn by_day(date: Option<Timestamp>) -> String {
    date.unwrap_or_else(now).date_naive().format("%Y-%m-%d").to_string()
}

/// Format a day as a `YYYY-MM-DD` key.
pub fn day_key(day: NaiveDate) -> String {
    day.format("%Y-%m-%d").to_string()
}

/// Midnight UTC at the start of a day.
pub fn day_start(day: NaiveDate) -> Timestamp {
    day.and_time(NaiveTime::MIN).and_utc()
}
