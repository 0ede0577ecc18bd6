//! Token-bucket pacing for transactional streams.

use std::time::{Duration, Instant};

/// Token bucket with capacity equal to the rate (one second of burst).
///
/// The bucket refills continuously from the monotonic clock, so wall-clock
/// jumps cannot produce negative waits. `reserve` always takes a token and
/// tells the caller how long to sleep before acting on it; the bucket may go
/// into debt, which keeps the long-run average exactly at the configured
/// rate.
#[derive(Debug)]
pub struct RateLimiter {
    rate: f64,
    capacity: f64,
    tokens: f64,
    last_refill: Instant,
}

impl RateLimiter {
    /// Create a limiter for `rate` tokens per second. A rate of zero
    /// disables pacing entirely.
    pub fn new(rate: f64) -> Self {
        Self {
            rate,
            capacity: rate,
            tokens: rate,
            last_refill: Instant::now(),
        }
    }

    /// Whether pacing is disabled.
    pub fn is_unbounded(&self) -> bool {
        self.rate <= 0.0
    }

    /// Take one token and return how long to wait before emitting.
    /// Zero when a token was immediately available.
    pub fn reserve(&mut self) -> Duration {
        if self.is_unbounded() {
            return Duration::ZERO;
        }

        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate).min(self.capacity);
        self.last_refill = now;

        self.tokens -= 1.0;
        if self.tokens >= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(-self.tokens / self.rate)
        }
    }
}
