//! Visitor-facing rate limiters
//!
//! Three flavors behind one trait: a continuous-refill token bucket for
//! requests and e-mails, a fixed counter for concurrent subscriptions, and a
//! rolling-window byte budget for attachment bandwidth. All calls are
//! non-blocking; `allow` either takes the tokens or refuses.

use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Non-blocking limiter. `allow(n)` with a negative `n` returns tokens
/// (used by the subscription counter when a connection closes).
pub trait Limiter: Send + Sync {
    fn allow(&self, n: i64) -> bool;
    /// Current value, for diagnostics
    fn value(&self) -> i64;
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket with continuous-time refill
pub struct TokenBucket {
    rate_per_sec: f64,
    burst: i64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// One token per `replenish` interval, up to `burst` tokens
    pub fn new(replenish: Duration, burst: i64) -> Self {
        let secs = replenish.as_secs_f64().max(f64::MIN_POSITIVE);
        Self::with_rate(1.0 / secs, burst)
    }

    /// `rate_per_sec` tokens per second, up to `burst` tokens
    pub fn with_rate(rate_per_sec: f64, burst: i64) -> Self {
        Self {
            rate_per_sec,
            burst,
            state: Mutex::new(BucketState {
                tokens: burst as f64,
                last_refill: Instant::now(),
            }),
        }
    }

    pub fn burst(&self) -> i64 {
        self.burst
    }

    /// Time for an empty bucket to fill back to burst
    pub fn refill_interval(&self) -> Duration {
        Duration::from_secs_f64(self.burst as f64 / self.rate_per_sec.max(f64::MIN_POSITIVE))
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.rate_per_sec).min(self.burst as f64);
        state.last_refill = now;
    }
}

impl Limiter for TokenBucket {
    fn allow(&self, n: i64) -> bool {
        let mut state = self.state.lock();
        self.refill(&mut state);
        if n <= 0 {
            state.tokens = (state.tokens - n as f64).min(self.burst as f64);
            return true;
        }
        if state.tokens >= n as f64 {
            state.tokens -= n as f64;
            true
        } else {
            false
        }
    }

    fn value(&self) -> i64 {
        let mut state = self.state.lock();
        self.refill(&mut state);
        state.tokens as i64
    }
}

/// Counts up to a fixed limit; `allow(-1)` releases
pub struct FixedLimiter {
    limit: i64,
    value: Mutex<i64>,
}

impl FixedLimiter {
    pub fn new(limit: i64) -> Self {
        Self::with_value(limit, 0)
    }

    pub fn with_value(limit: i64, value: i64) -> Self {
        Self {
            limit,
            value: Mutex::new(value),
        }
    }

    pub fn limit(&self) -> i64 {
        self.limit
    }
}

impl Limiter for FixedLimiter {
    fn allow(&self, n: i64) -> bool {
        let mut value = self.value.lock();
        if n < 0 {
            *value = (*value + n).max(0);
            return true;
        }
        if *value + n <= self.limit {
            *value += n;
            true
        } else {
            false
        }
    }

    fn value(&self) -> i64 {
        *self.value.lock()
    }
}

/// Byte budget over a rolling window: a token bucket holding `limit` bytes
/// that refills at `limit / window` bytes per second
pub struct BytesLimiter {
    limit: u64,
    bucket: TokenBucket,
}

impl BytesLimiter {
    pub fn new(limit: u64, window: Duration) -> Self {
        let secs = window.as_secs_f64().max(f64::MIN_POSITIVE);
        Self {
            limit,
            bucket: TokenBucket::with_rate(limit as f64 / secs, limit as i64),
        }
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Bytes currently available in the window
    pub fn remaining(&self) -> u64 {
        self.bucket.value().max(0) as u64
    }
}

impl Limiter for BytesLimiter {
    fn allow(&self, n: i64) -> bool {
        self.bucket.allow(n)
    }

    fn value(&self) -> i64 {
        self.bucket.value()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_bucket_burst_then_refused() {
        let bucket = TokenBucket::new(Duration::from_secs(3600), 3);
        assert!(bucket.allow(1));
        assert!(bucket.allow(1));
        assert!(bucket.allow(1));
        assert!(!bucket.allow(1));
    }

    #[test]
    fn test_token_bucket_refills_over_time() {
        let bucket = TokenBucket::new(Duration::from_millis(10), 2);
        assert!(bucket.allow(2));
        assert!(!bucket.allow(1));
        std::thread::sleep(Duration::from_millis(30));
        assert!(bucket.allow(1));
    }

    #[test]
    fn test_token_bucket_never_exceeds_burst() {
        let bucket = TokenBucket::new(Duration::from_millis(1), 5);
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(bucket.value(), 5);
    }

    #[test]
    fn test_token_bucket_refill_interval() {
        let bucket = TokenBucket::new(Duration::from_secs(5), 60);
        assert_eq!(bucket.refill_interval(), Duration::from_secs(300));
    }

    #[test]
    fn test_fixed_limiter_counts_and_releases() {
        let limiter = FixedLimiter::new(2);
        assert!(limiter.allow(1));
        assert!(limiter.allow(1));
        assert!(!limiter.allow(1));
        assert!(limiter.allow(-1));
        assert_eq!(limiter.value(), 1);
        assert!(limiter.allow(1));
    }

    #[test]
    fn test_fixed_limiter_floor_at_zero() {
        let limiter = FixedLimiter::new(5);
        assert!(limiter.allow(-1));
        assert_eq!(limiter.value(), 0);
    }

    #[test]
    fn test_bytes_limiter_budget() {
        let limiter = BytesLimiter::new(1000, Duration::from_secs(86_400));
        assert_eq!(limiter.limit(), 1000);
        assert!(limiter.allow(600));
        assert!(limiter.allow(400));
        assert!(!limiter.allow(1));
        assert_eq!(limiter.remaining(), 0);
    }
}
