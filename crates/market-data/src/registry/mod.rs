//! Orchestration primitives for upstream calls: rate limiting, circuit
//! breaking and the provider chain.

mod circuit_breaker;
mod rate_limiter;
mod registry;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitSnapshot, CircuitState, CircuitStats,
};
pub use rate_limiter::{RateLimiter, RateLimiterStats};
pub use registry::ProviderRegistry;
