//! Error types for market data fetching.

use thiserror::Error;

use crate::models::ProviderId;

/// How a failed fetch should be handled by the orchestration layer.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RetryClass {
    /// Permanent data error; retrying will not help and the entry should be
    /// marked skipped. Must not count toward any circuit breaker.
    Never,
    /// Transient fault; retry after bounded backoff, counts toward the
    /// breaker of the provider that failed.
    WithBackoff,
    /// This provider cannot serve the request; try the next provider in the
    /// chain without penalizing this one.
    NextProvider,
    /// Rejected locally by an open circuit; no network call was made and the
    /// item remains due.
    CircuitOpen,
}

/// Errors produced by provider adapters and the fetch chain.
#[derive(Debug, Error)]
pub enum MarketDataError {
    #[error("Symbol not found: {0}")]
    SymbolNotFound(String),

    #[error("No data returned for {symbol} from {provider}")]
    NoData { provider: ProviderId, symbol: String },

    #[error("Malformed payload from {provider}: {message}")]
    InvalidPayload { provider: ProviderId, message: String },

    #[error("Rate limited by provider {provider}")]
    RateLimited { provider: ProviderId },

    #[error("Request to {provider} timed out")]
    Timeout { provider: ProviderId },

    #[error("Provider {provider} error: {message}")]
    ProviderError { provider: ProviderId, message: String },

    #[error("Capability not supported by {provider}")]
    NotSupported { provider: ProviderId },

    #[error("Circuit open for provider {provider}")]
    CircuitOpen { provider: ProviderId },

    #[error("All providers failed for {symbol}: {message}")]
    AllProvidersFailed { symbol: String, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl MarketDataError {
    /// Map an error to its retry semantics.
    pub fn retry_class(&self) -> RetryClass {
        match self {
            Self::SymbolNotFound(_) | Self::InvalidPayload { .. } => RetryClass::Never,
            Self::NoData { .. } | Self::NotSupported { .. } => RetryClass::NextProvider,
            Self::RateLimited { .. }
            | Self::Timeout { .. }
            | Self::ProviderError { .. }
            | Self::Network(_) => RetryClass::WithBackoff,
            Self::CircuitOpen { .. } => RetryClass::CircuitOpen,
            Self::AllProvidersFailed { .. } | Self::Serde(_) => RetryClass::WithBackoff,
        }
    }

    /// Provider the error originated from, when attributable.
    pub fn provider(&self) -> Option<&ProviderId> {
        match self {
            Self::NoData { provider, .. }
            | Self::InvalidPayload { provider, .. }
            | Self::RateLimited { provider }
            | Self::Timeout { provider }
            | Self::ProviderError { provider, .. }
            | Self::NotSupported { provider }
            | Self::CircuitOpen { provider } => Some(provider),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, MarketDataError>;
