//! Rate Limiter
//!
//! Token bucket admission gate for outbound requests to one endpoint.

use parking_lot::Mutex;
use std::time::{Duration, Instant};

/// Rate limiter configuration.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Maximum requests per window
    pub max_requests: u64,
    /// Time window for rate limiting
    pub window: Duration,
    /// Maximum burst size (token bucket capacity)
    pub burst_size: u64,
}

impl RateLimitConfig {
    /// `rps` requests per second with a burst of the same size.
    pub fn per_second(rps: u64) -> Self {
        Self {
            max_requests: rps,
            window: Duration::from_secs(1),
            burst_size: rps.max(1),
        }
    }
}

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket rate limiter.
///
/// Shared by all workers of one endpoint client, so it throttles the
/// endpoint as a whole rather than individual requests.
pub struct RateLimiter {
    config: RateLimitConfig,
    bucket: Mutex<Bucket>,
    /// Tokens added per millisecond
    refill_rate_per_ms: f64,
}

impl RateLimiter {
    /// Create a new rate limiter.
    pub fn new(config: RateLimitConfig) -> Self {
        let window_ms = config.window.as_millis().max(1) as f64;
        let refill_rate_per_ms = config.max_requests.max(1) as f64 / window_ms;
        Self {
            bucket: Mutex::new(Bucket {
                tokens: config.burst_size as f64,
                last_refill: Instant::now(),
            }),
            config,
            refill_rate_per_ms,
        }
    }

    fn refill(&self, bucket: &mut Bucket, now: Instant) {
        let elapsed_ms = now.saturating_duration_since(bucket.last_refill).as_secs_f64() * 1000.0;
        if elapsed_ms > 0.0 {
            bucket.tokens =
                (bucket.tokens + elapsed_ms * self.refill_rate_per_ms).min(self.config.burst_size as f64);
            bucket.last_refill = now;
        }
    }

    /// Try to take one token without waiting.
    pub fn try_acquire(&self) -> RateLimitResult {
        let mut bucket = self.bucket.lock();
        self.refill(&mut bucket, Instant::now());

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            return RateLimitResult::Allowed {
                remaining: bucket.tokens as u64,
            };
        }

        let missing = 1.0 - bucket.tokens;
        let retry_after_ms = (missing / self.refill_rate_per_ms).ceil() as u64;
        RateLimitResult::Limited {
            retry_after_ms: retry_after_ms.max(1),
        }
    }

    /// Wait until a token is available and take it.
    ///
    /// Waiting is throttled, never rejected. Callers bound the wait by
    /// racing this future against their own cancellation.
    pub async fn acquire(&self) {
        loop {
            match self.try_acquire() {
                RateLimitResult::Allowed { .. } => return,
                RateLimitResult::Limited { retry_after_ms } => {
                    tokio::time::sleep(Duration::from_millis(retry_after_ms)).await;
                }
            }
        }
    }
}

/// Result of a rate limit check.
#[derive(Debug, Clone, PartialEq)]
pub enum RateLimitResult {
    /// Request is allowed
    Allowed { remaining: u64 },
    /// Request is rate limited
    Limited { retry_after_ms: u64 },
}
