//! Rate engine error types.

use altrates_common::Symbol;
use thiserror::Error;

/// Errors that can occur while refreshing or querying rates.
///
/// Errors are `Clone` because the outcome of a shared refresh is handed to
/// every caller awaiting it.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RatesError {
    /// A collaborator failed, returned garbage, or did not answer in time.
    #[error("{service} service is unavailable: {reason}")]
    UpstreamUnavailable { service: String, reason: String },

    /// A derived rate disagrees with an independently observed one.
    #[error("{asset}/{fiat} diverged: derived {derived}, observed {observed}")]
    ValidationDivergence {
        asset: Symbol,
        fiat: Symbol,
        derived: f64,
        observed: f64,
    },

    /// A rate write was rejected.
    #[error("Invalid rate {rate} for {base}/{quote}")]
    InvalidRate { base: Symbol, quote: Symbol, rate: f64 },

    /// A symbol is not present in either partition.
    #[error("Unresolved symbol: {0}")]
    UnresolvedSymbol(String),

    /// A message or response did not have the expected shape.
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    /// Configuration is invalid or a collaborator is missing.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl RatesError {
    /// Build an upstream failure for a named service.
    pub fn upstream(service: impl Into<String>, reason: impl Into<String>) -> Self {
        RatesError::UpstreamUnavailable {
            service: service.into(),
            reason: reason.into(),
        }
    }

    /// The error substituted when a collaborator exceeds its wait budget.
    pub fn service_unavailable(service: impl Into<String>) -> Self {
        Self::upstream(service, "timed out")
    }

    /// Check if the next refresh cycle may succeed without intervention.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RatesError::UpstreamUnavailable { .. }
                | RatesError::ValidationDivergence { .. }
                | RatesError::MalformedMessage(_)
        )
    }

    /// Short machine-readable code.
    pub fn error_code(&self) -> &'static str {
        match self {
            RatesError::UpstreamUnavailable { .. } => "UPSTREAM_UNAVAILABLE",
            RatesError::ValidationDivergence { .. } => "VALIDATION_DIVERGENCE",
            RatesError::InvalidRate { .. } => "INVALID_RATE",
            RatesError::UnresolvedSymbol(_) => "UNRESOLVED_SYMBOL",
            RatesError::MalformedMessage(_) => "MALFORMED_MESSAGE",
            RatesError::Configuration(_) => "CONFIGURATION",
        }
    }
}

/// Result type for rate operations.
pub type RatesResult<T> = Result<T, RatesError>;
