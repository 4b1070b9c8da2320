//! Token-bucket admission gate, one per upstream service.
//!
//! Tokens refill continuously at `rate / period`; `acquire` waits until a
//! whole token is available instead of rejecting, so callers queue rather
//! than fail.

use crate::clock::{Clock, MonotonicClock};
use crate::sleeper::{Sleeper, TokioSleeper};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const DEFAULT_RATE: u32 = 5;
pub const DEFAULT_PERIOD: Duration = Duration::from_secs(1);

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill_millis: u64,
}

/// Token bucket with asynchronous blocking acquisition.
#[derive(Debug)]
pub struct RateLimiter {
    bucket: Mutex<Bucket>,
    capacity: f64,
    tokens_per_milli: f64,
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn Sleeper>,
}

impl RateLimiter {
    /// `rate` tokens per `period`. The bucket starts full.
    pub fn new(rate: u32, period: Duration) -> Self {
        let capacity = f64::from(rate.max(1));
        let period_millis = (period.as_millis() as f64).max(1.0);
        Self {
            bucket: Mutex::new(Bucket { tokens: capacity, last_refill_millis: 0 }),
            capacity,
            tokens_per_milli: capacity / period_millis,
            clock: Arc::new(MonotonicClock::default()),
            sleeper: Arc::new(TokioSleeper),
        }
    }

    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn with_sleeper<S: Sleeper + 'static>(mut self, sleeper: S) -> Self {
        self.sleeper = Arc::new(sleeper);
        self
    }

    /// Wait until a token is available, then consume it.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut bucket =
                    self.bucket.lock().expect("RateLimiter.acquire: mutex poisoned");
                let now = self.clock.now_millis();
                let elapsed = now.saturating_sub(bucket.last_refill_millis) as f64;
                bucket.tokens = (bucket.tokens + elapsed * self.tokens_per_milli)
                    .min(self.capacity);
                bucket.last_refill_millis = now;

                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    return;
                }
                let missing = 1.0 - bucket.tokens;
                Duration::from_millis((missing / self.tokens_per_milli).ceil() as u64)
            };
            tracing::debug!(?wait, "rate limiter saturated, waiting for token");
            self.sleeper.sleep(wait).await;
        }
    }
}
