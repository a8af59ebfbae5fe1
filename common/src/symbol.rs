//! Currency symbols and rate partitions.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use thiserror::Error;

/// Shortest accepted symbol length.
pub const MIN_SYMBOL_LEN: usize = 2;

/// Longest accepted symbol length (covers aliases such as `BCHABC`).
pub const MAX_SYMBOL_LEN: usize = 10;

/// Errors raised when a string cannot be used as a symbol.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SymbolError {
    /// The input was empty after trimming.
    #[error("Symbol is empty")]
    Empty,

    /// The input contains characters or a length a symbol cannot have.
    #[error("Invalid symbol: {0}")]
    Invalid(String),
}

/// An uppercase currency code, fiat (`USD`) or alt (`BAT`).
///
/// Symbols are opaque keys. Construction always uppercases, so `bat` and
/// `BAT` name the same currency.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(String);

impl Symbol {
    /// Create a symbol from a code, normalizing it to uppercase.
    pub fn new(code: impl AsRef<str>) -> Self {
        Self(code.as_ref().trim().to_uppercase())
    }

    /// Parse and validate a symbol.
    pub fn parse(code: &str) -> Result<Self, SymbolError> {
        let symbol = Self::new(code);
        if symbol.0.is_empty() {
            return Err(SymbolError::Empty);
        }
        if !symbol.is_valid() {
            return Err(SymbolError::Invalid(code.to_string()));
        }
        Ok(symbol)
    }

    /// Get the symbol code.
    pub fn code(&self) -> &str {
        &self.0
    }

    /// Check the code is 2 to 10 ASCII alphanumerics.
    pub fn is_valid(&self) -> bool {
        (MIN_SYMBOL_LEN..=MAX_SYMBOL_LEN).contains(&self.0.len())
            && self.0.chars().all(|c| c.is_ascii_alphanumeric())
    }

    pub fn usd() -> Self {
        Self::new("USD")
    }

    pub fn eur() -> Self {
        Self::new("EUR")
    }

    pub fn btc() -> Self {
        Self::new("BTC")
    }

    pub fn eth() -> Self {
        Self::new("ETH")
    }

    pub fn usdt() -> Self {
        Self::new("USDT")
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Symbol {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl AsRef<str> for Symbol {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for Symbol {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// The two logical halves of the rate table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Partition {
    /// Rates quoted by the fiat rate service.
    Fiat,
    /// Rates observed on exchanges or derived from them.
    Alt,
}

impl Partition {
    /// Both partitions, alt first, in lookup order.
    pub const LOOKUP_ORDER: [Partition; 2] = [Partition::Alt, Partition::Fiat];

    /// Lowercase partition name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Partition::Fiat => "fiat",
            Partition::Alt => "alt",
        }
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
