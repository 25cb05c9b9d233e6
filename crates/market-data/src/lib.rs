//! Quotewatch Market Data Crate
//!
//! Provider adapters and the upstream-call orchestration primitives for the
//! quotewatch freshness engine.
//!
//! # Overview
//!
//! - Two provider adapters for Vietnamese equities: FireAnt (primary) and
//!   CafeF (fallback), behind one [`MarketDataProvider`] trait.
//! - A process-wide token-bucket [`RateLimiter`] capping aggregate outbound
//!   rate across all workers.
//! - A per-provider [`CircuitBreaker`] isolating failing providers.
//! - [`ProviderRegistry`], the ordered chain gating every call through both.
//!
//! # Architecture
//!
//! ```text
//! +-----------+     +------------------+     +----------------+
//! | Collector | --> | ProviderRegistry | --> | RateLimiter    |
//! +-----------+     |  (ordered chain) |     +----------------+
//!                   |                  | --> | CircuitBreaker |
//!                   +------------------+     +----------------+
//!                           |
//!                           v
//!                +---------------------+
//!                | MarketDataProvider  |  (FireAnt, CafeF)
//!                +---------------------+
//! ```

pub mod digest;
pub mod errors;
pub mod models;
pub mod provider;
pub mod registry;

pub use digest::content_digest;
pub use errors::{MarketDataError, RetryClass};
pub use models::{DividendEvent, FinancialReport, ListingEntry, PricePoint, ProviderId};
pub use provider::{CafefProvider, FireAntProvider, MarketDataProvider};
pub use registry::{
    CircuitBreaker, CircuitBreakerConfig, CircuitSnapshot, CircuitState, CircuitStats,
    ProviderRegistry, RateLimiter, RateLimiterStats,
};
