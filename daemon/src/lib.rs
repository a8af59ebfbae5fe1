//! AltRates Daemon
//!
//! Keeps a rate engine fresh: an initial refresh, a periodic maintenance
//! loop, and an optional live trade feed, all stopped together on shutdown.

pub mod config;
pub mod service;
pub mod state;

pub use config::DaemonConfig;
pub use service::RatesService;
pub use state::ServiceState;
