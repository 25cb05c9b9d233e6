//! Provider chain orchestration.
//!
//! `ProviderRegistry` owns the ordered provider chain and gates every call
//! through the shared rate limiter and the per-provider circuit breaker.
//! Fallback attempts count toward the fallback provider's own breaker
//! tally, never the primary's.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use tracing::{debug, warn};

use crate::errors::{MarketDataError, Result, RetryClass};
use crate::models::{DividendEvent, FinancialReport, ListingEntry, PricePoint};
use crate::provider::MarketDataProvider;
use crate::registry::circuit_breaker::CircuitBreaker;
use crate::registry::rate_limiter::RateLimiter;

/// Default per-call timeout for upstream requests.
const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Ordered provider chain with rate limiting and circuit breaking.
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn MarketDataProvider>>,
    rate_limiter: Arc<RateLimiter>,
    circuit_breaker: Arc<CircuitBreaker>,
    call_timeout: Duration,
    /// Response-time accounting for the observability window.
    response_count: AtomicU64,
    response_sum_ms: AtomicU64,
}

impl ProviderRegistry {
    pub fn new(
        mut providers: Vec<Arc<dyn MarketDataProvider>>,
        rate_limiter: Arc<RateLimiter>,
        circuit_breaker: Arc<CircuitBreaker>,
    ) -> Self {
        providers.sort_by_key(|p| p.priority());
        Self {
            providers,
            rate_limiter,
            circuit_breaker,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            response_count: AtomicU64::new(0),
            response_sum_ms: AtomicU64::new(0),
        }
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    pub fn circuit_breaker(&self) -> &Arc<CircuitBreaker> {
        &self.circuit_breaker
    }

    /// (calls completed, summed response time in ms) since startup.
    pub fn response_time_totals(&self) -> (u64, u64) {
        (
            self.response_count.load(Ordering::Relaxed),
            self.response_sum_ms.load(Ordering::Relaxed),
        )
    }

    /// Fetch daily price history through the chain.
    pub async fn fetch_price(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<PricePoint>> {
        self.fetch_chain(symbol, |provider| {
            let symbol = symbol.to_string();
            async move { provider.fetch_price(&symbol, start, end).await }
        })
        .await
    }

    /// Fetch dividend events through the chain.
    pub async fn fetch_dividends(&self, symbol: &str) -> Result<Vec<DividendEvent>> {
        self.fetch_chain(symbol, |provider| {
            let symbol = symbol.to_string();
            async move { provider.fetch_dividends(&symbol).await }
        })
        .await
    }

    /// Fetch fundamental reports through the chain.
    pub async fn fetch_financials(&self, symbol: &str) -> Result<Vec<FinancialReport>> {
        self.fetch_chain(symbol, |provider| {
            let symbol = symbol.to_string();
            async move { provider.fetch_financials(&symbol).await }
        })
        .await
    }

    /// Fetch the full exchange listing through the chain.
    pub async fn fetch_listing(&self) -> Result<Vec<ListingEntry>> {
        self.fetch_chain("<listing>", |provider| async move {
            provider.fetch_listing().await
        })
        .await
    }

    /// Walk the chain: breaker gate, limiter, bounded call, outcome dispatch.
    async fn fetch_chain<T, F, Fut>(&self, subject: &str, call: F) -> Result<T>
    where
        F: Fn(Arc<dyn MarketDataProvider>) -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut last_err: Option<MarketDataError> = None;

        for provider in &self.providers {
            let provider_id = provider.provider_id();

            if !self.circuit_breaker.is_allowed(&provider_id) {
                debug!(provider = %provider_id, subject, "circuit open, skipping provider");
                last_err = Some(MarketDataError::CircuitOpen {
                    provider: provider_id,
                });
                continue;
            }

            // One token per upstream attempt, shared across all workers.
            self.rate_limiter.acquire().await;

            let started = Instant::now();
            let outcome = tokio::time::timeout(self.call_timeout, call(provider.clone())).await;
            self.record_response_time(started.elapsed());

            let result = match outcome {
                Ok(result) => result,
                Err(_) => Err(MarketDataError::Timeout {
                    provider: provider_id.clone(),
                }),
            };

            match result {
                Ok(data) => {
                    self.circuit_breaker.record_success(&provider_id);
                    return Ok(data);
                }
                Err(err) => match err.retry_class() {
                    RetryClass::Never => {
                        // Permanent data error: no fallback, no breaker penalty.
                        debug!(provider = %provider_id, subject, error = %err, "permanent error");
                        return Err(err);
                    }
                    RetryClass::NextProvider => {
                        debug!(provider = %provider_id, subject, error = %err, "trying next provider");
                        last_err = Some(err);
                    }
                    RetryClass::WithBackoff => {
                        warn!(provider = %provider_id, subject, error = %err, "provider call failed");
                        self.circuit_breaker.record_failure(&provider_id);
                        last_err = Some(err);
                    }
                    RetryClass::CircuitOpen => {
                        last_err = Some(err);
                    }
                },
            }
        }

        Err(last_err.unwrap_or_else(|| MarketDataError::AllProvidersFailed {
            symbol: subject.to_string(),
            message: "no providers registered".to_string(),
        }))
    }

    fn record_response_time(&self, elapsed: Duration) {
        self.response_count.fetch_add(1, Ordering::Relaxed);
        self.response_sum_ms
            .fetch_add(elapsed.as_millis() as u64, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::circuit_breaker::CircuitBreakerConfig;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    struct MockProvider {
        id: &'static str,
        priority: u8,
        fail: bool,
        calls: AtomicUsize,
    }

    impl MockProvider {
        fn healthy(id: &'static str, priority: u8) -> Arc<Self> {
            Arc::new(Self {
                id,
                priority,
                fail: false,
                calls: AtomicUsize::new(0),
            })
        }

        fn failing(id: &'static str, priority: u8) -> Arc<Self> {
            Arc::new(Self {
                id,
                priority,
                fail: true,
                calls: AtomicUsize::new(0),
            })
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl MarketDataProvider for MockProvider {
        fn id(&self) -> &'static str {
            self.id
        }

        fn priority(&self) -> u8 {
            self.priority
        }

        async fn fetch_price(
            &self,
            symbol: &str,
            _start: NaiveDate,
            _end: NaiveDate,
        ) -> Result<Vec<PricePoint>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(MarketDataError::ProviderError {
                    provider: self.provider_id(),
                    message: "boom".into(),
                });
            }
            Ok(vec![PricePoint {
                symbol: symbol.to_string(),
                date: NaiveDate::from_ymd_opt(2025, 8, 20).unwrap(),
                open: 1.into(),
                high: 2.into(),
                low: 1.into(),
                close: 2.into(),
                volume: 100,
            }])
        }
    }

    fn registry_with(providers: Vec<Arc<dyn MarketDataProvider>>) -> ProviderRegistry {
        ProviderRegistry::new(
            providers,
            Arc::new(RateLimiter::with_requests_per_minute(60_000)),
            Arc::new(CircuitBreaker::with_config(CircuitBreakerConfig {
                failure_threshold: 5,
                open_timeout: Duration::from_secs(300),
                half_open_max_calls: 1,
            })),
        )
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 8, d).unwrap()
    }

    #[tokio::test]
    async fn test_primary_serves_when_healthy() {
        let primary = MockProvider::healthy("PRIMARY", 1);
        let fallback = MockProvider::healthy("FALLBACK", 2);
        let registry = registry_with(vec![primary.clone(), fallback.clone()]);

        let points = registry.fetch_price("VNM", day(1), day(20)).await.unwrap();
        assert_eq!(points.len(), 1);
        assert_eq!(primary.call_count(), 1);
        assert_eq!(fallback.call_count(), 0);
    }

    #[tokio::test]
    async fn test_fallback_on_primary_failure() {
        let primary = MockProvider::failing("PRIMARY", 1);
        let fallback = MockProvider::healthy("FALLBACK", 2);
        let registry = registry_with(vec![primary.clone(), fallback.clone()]);

        let points = registry.fetch_price("FPT", day(1), day(20)).await.unwrap();
        assert_eq!(points.len(), 1);
        assert_eq!(primary.call_count(), 1);
        assert_eq!(fallback.call_count(), 1);
        // The failure landed on the primary's breaker only.
        assert_eq!(
            registry.circuit_breaker().consecutive_failures(&"PRIMARY".into()),
            1
        );
        assert_eq!(
            registry.circuit_breaker().consecutive_failures(&"FALLBACK".into()),
            0
        );
    }

    #[tokio::test]
    async fn test_open_primary_is_skipped_without_calling() {
        let primary = MockProvider::failing("PRIMARY", 1);
        let fallback = MockProvider::healthy("FALLBACK", 2);
        let registry = registry_with(vec![primary.clone(), fallback.clone()]);

        // Trip the primary's breaker.
        for _ in 0..5 {
            let _ = registry.fetch_price("HPG", day(1), day(20)).await;
        }
        assert_eq!(primary.call_count(), 5);

        // Sixth batch call: primary rejected locally, fallback serves.
        let result = registry.fetch_price("HPG", day(1), day(20)).await;
        assert!(result.is_ok());
        assert_eq!(primary.call_count(), 5);
    }

    #[tokio::test]
    async fn test_all_providers_open_returns_circuit_open() {
        let primary = MockProvider::failing("PRIMARY", 1);
        let registry = registry_with(vec![primary.clone() as Arc<dyn MarketDataProvider>]);

        for _ in 0..5 {
            let _ = registry.fetch_price("SSI", day(1), day(20)).await;
        }

        let err = registry.fetch_price("SSI", day(1), day(20)).await.unwrap_err();
        assert_eq!(err.retry_class(), RetryClass::CircuitOpen);
        assert_eq!(primary.call_count(), 5);
    }

    #[tokio::test]
    async fn test_permanent_error_skips_fallback() {
        struct NotFoundProvider {
            calls: AtomicUsize,
        }

        #[async_trait]
        impl MarketDataProvider for NotFoundProvider {
            fn id(&self) -> &'static str {
                "NOT_FOUND"
            }
            fn priority(&self) -> u8 {
                1
            }
            async fn fetch_price(
                &self,
                symbol: &str,
                _start: NaiveDate,
                _end: NaiveDate,
            ) -> Result<Vec<PricePoint>> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                Err(MarketDataError::SymbolNotFound(symbol.to_string()))
            }
        }

        let fallback = MockProvider::healthy("FALLBACK", 2);
        let registry = registry_with(vec![
            Arc::new(NotFoundProvider {
                calls: AtomicUsize::new(0),
            }),
            fallback.clone(),
        ]);

        let err = registry.fetch_price("DEAD", day(1), day(20)).await.unwrap_err();
        assert_eq!(err.retry_class(), RetryClass::Never);
        assert_eq!(fallback.call_count(), 0);
        // Permanent data errors never count toward the breaker.
        assert_eq!(
            registry.circuit_breaker().consecutive_failures(&"NOT_FOUND".into()),
            0
        );
    }

    #[tokio::test]
    async fn test_providers_ordered_by_priority() {
        let fallback = MockProvider::healthy("FALLBACK", 2);
        let primary = MockProvider::healthy("PRIMARY", 1);
        // Registered out of order on purpose.
        let registry = registry_with(vec![fallback.clone(), primary.clone()]);

        registry.fetch_price("VCB", day(1), day(20)).await.unwrap();
        assert_eq!(primary.call_count(), 1);
        assert_eq!(fallback.call_count(), 0);
    }
}
