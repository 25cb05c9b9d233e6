//! Token bucket rate limiter for upstream market data calls.
//!
//! A single bucket caps the aggregate outbound rate across all workers and
//! tasks. Capacity `C` refills continuously at `C/60` tokens per second, so
//! the configured requests-per-minute figure is both the burst ceiling and
//! the sustained rate.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, warn};

/// Default cap: 6 requests per minute (one token every 10 seconds).
const DEFAULT_REQUESTS_PER_MINUTE: u32 = 6;

/// Token bucket state behind the limiter's mutex.
#[derive(Debug)]
struct TokenBucket {
    /// Current number of available tokens.
    tokens: f64,
    /// Last time the bucket was refilled.
    last_update: Instant,
    /// Token refill rate (tokens per second).
    rate: f64,
    /// Maximum bucket capacity.
    capacity: f64,
}

impl TokenBucket {
    fn new(requests_per_minute: u32) -> Self {
        let capacity = requests_per_minute.max(1) as f64;
        Self {
            tokens: capacity,
            last_update: Instant::now(),
            rate: capacity / 60.0,
            capacity,
        }
    }

    /// Refill tokens based on elapsed time.
    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_update).as_secs_f64();
        let new_tokens = elapsed * self.rate;

        self.tokens = (self.tokens + new_tokens).min(self.capacity);
        self.last_update = now;
    }

    /// Try to consume a token immediately.
    fn try_acquire(&mut self) -> bool {
        self.refill();

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Wait time until at least one token becomes available.
    fn time_until_available(&mut self) -> Duration {
        self.refill();

        if self.tokens >= 1.0 {
            Duration::ZERO
        } else {
            let tokens_needed = 1.0 - self.tokens;
            let seconds_needed = tokens_needed / self.rate;
            Duration::from_secs_f64(seconds_needed)
        }
    }
}

/// Snapshot of limiter counters for the status surface.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimiterStats {
    pub total_requests: u64,
    pub throttled_requests: u64,
    pub total_wait_ms: u64,
    pub available_tokens: f64,
}

/// Process-wide token bucket rate limiter.
///
/// Shared by reference across every worker; waiting is the expected
/// mechanism and is never reported as an error.
pub struct RateLimiter {
    bucket: Mutex<TokenBucket>,
    total_requests: AtomicU64,
    throttled_requests: AtomicU64,
    total_wait_ms: AtomicU64,
}

impl RateLimiter {
    /// Create a limiter with the default 6 req/min cap.
    pub fn new() -> Self {
        Self::with_requests_per_minute(DEFAULT_REQUESTS_PER_MINUTE)
    }

    /// Create a limiter capped at `requests_per_minute`.
    pub fn with_requests_per_minute(requests_per_minute: u32) -> Self {
        Self {
            bucket: Mutex::new(TokenBucket::new(requests_per_minute)),
            total_requests: AtomicU64::new(0),
            throttled_requests: AtomicU64::new(0),
            total_wait_ms: AtomicU64::new(0),
        }
    }

    /// Create a limiter with an explicit burst capacity; the refill rate is
    /// still `requests_per_minute / 60` per second.
    pub fn with_config(requests_per_minute: u32, burst_capacity: f64) -> Self {
        Self {
            bucket: Mutex::new(TokenBucket {
                tokens: burst_capacity,
                last_update: Instant::now(),
                rate: requests_per_minute.max(1) as f64 / 60.0,
                capacity: burst_capacity,
            }),
            total_requests: AtomicU64::new(0),
            throttled_requests: AtomicU64::new(0),
            total_wait_ms: AtomicU64::new(0),
        }
    }

    /// Lock the bucket mutex, recovering from poison if necessary.
    ///
    /// For rate limiting it is safe to recover from a poisoned mutex since
    /// the worst case is slightly incorrect pacing, which is better than
    /// panicking.
    fn lock_bucket(&self) -> MutexGuard<'_, TokenBucket> {
        self.bucket.lock().unwrap_or_else(|poisoned| {
            warn!("rate limiter mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Acquire a token, waiting asynchronously until one is available.
    pub async fn acquire(&self) {
        let mut waited = false;
        loop {
            let wait_time = {
                let mut bucket = self.lock_bucket();
                if bucket.try_acquire() {
                    self.finish_acquire(waited);
                    return;
                }
                bucket.time_until_available()
            };

            if !waited {
                waited = true;
                self.throttled_requests.fetch_add(1, Ordering::Relaxed);
            }
            if wait_time > Duration::ZERO {
                debug!(wait = ?wait_time, "rate limiter: throttled, waiting");
                self.total_wait_ms
                    .fetch_add(wait_time.as_millis() as u64, Ordering::Relaxed);
                tokio::time::sleep(wait_time).await;
            }
        }
    }

    /// Try to acquire a token without waiting.
    pub fn try_acquire(&self) -> bool {
        let acquired = self.lock_bucket().try_acquire();
        if acquired {
            self.total_requests.fetch_add(1, Ordering::Relaxed);
        }
        acquired
    }

    /// Remaining tokens, after refill.
    pub fn available_tokens(&self) -> f64 {
        let mut bucket = self.lock_bucket();
        bucket.refill();
        bucket.tokens
    }

    /// Counter snapshot for the status surface.
    pub fn stats(&self) -> RateLimiterStats {
        RateLimiterStats {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            throttled_requests: self.throttled_requests.load(Ordering::Relaxed),
            total_wait_ms: self.total_wait_ms.load(Ordering::Relaxed),
            available_tokens: self.available_tokens(),
        }
    }

    /// Throttled-wait count since startup.
    pub fn throttled_requests(&self) -> u64 {
        self.throttled_requests.load(Ordering::Relaxed)
    }

    /// Requests granted since startup.
    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    fn finish_acquire(&self, waited: bool) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        if waited {
            debug!("rate limiter: token acquired after wait");
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
