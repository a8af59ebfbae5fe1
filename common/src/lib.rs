//! AltRates Common Types
//!
//! Shared types used across the altrates workspace: currency symbols, rate
//! partitions, pair parsing, amount conversion and time helpers.

pub mod amount;
pub mod split;
pub mod symbol;
pub mod time;

pub use amount::*;
pub use split::*;
pub use symbol::*;
pub use time::*;
