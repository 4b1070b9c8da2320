//! Bounded retry with exponential backoff and uniform jitter.
//!
//! `max_attempts` counts total attempts, not additional retries: with the
//! default of 3, a persistently failing call sleeps twice before surfacing
//! [`FailoverError::RetriesExhausted`]. Only errors classified retriable by
//! [`ServiceError::is_retriable`] drive another attempt.

use crate::error::{FailoverError, ServiceError};
use crate::sleeper::{Sleeper, TokioSleeper};
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_MAX_ATTEMPTS: usize = 3;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);
pub const DEFAULT_JITTER: Duration = Duration::from_millis(500);

#[derive(Clone)]
pub struct RetryPolicy {
    max_attempts: usize,
    base_delay: Duration,
    jitter: Duration,
    sleeper: Arc<dyn Sleeper>,
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("base_delay", &self.base_delay)
            .field("jitter", &self.jitter)
            .finish()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicyBuilder::new().build()
    }
}

impl RetryPolicy {
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder::new()
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// Invoke `operation` up to `max_attempts` times.
    ///
    /// Non-retriable errors surface immediately as
    /// [`FailoverError::Service`]; a retriable error on the final attempt
    /// becomes [`FailoverError::RetriesExhausted`] carrying that error.
    pub async fn execute<T, Fut, Op>(&self, mut operation: Op) -> Result<T, FailoverError>
    where
        T: Send,
        Fut: Future<Output = Result<T, ServiceError>> + Send,
        Op: FnMut() -> Fut + Send,
    {
        for attempt in 0..self.max_attempts {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retriable() => {
                    if attempt + 1 >= self.max_attempts {
                        tracing::error!(
                            attempts = self.max_attempts,
                            error = %e,
                            "retries exhausted"
                        );
                        return Err(FailoverError::RetriesExhausted {
                            attempts: self.max_attempts,
                            last: e,
                        });
                    }
                    let delay = self.delay_for(attempt);
                    tracing::warn!(
                        attempt = attempt + 1,
                        error = %e,
                        ?delay,
                        "attempt failed, backing off"
                    );
                    self.sleeper.sleep(delay).await;
                }
                Err(e) => return Err(FailoverError::Service(e)),
            }
        }

        unreachable!("retry loop returns on success, exhaustion, or non-retriable error")
    }

    /// `base_delay * 2^attempt + U(0, jitter)`, attempt 0-indexed.
    fn delay_for(&self, attempt: usize) -> Duration {
        let multiplier = 2u32.saturating_pow(attempt as u32);
        let backoff = self
            .base_delay
            .checked_mul(multiplier)
            .unwrap_or(Duration::from_secs(u64::MAX));
        backoff.saturating_add(self.sample_jitter())
    }

    fn sample_jitter(&self) -> Duration {
        if self.jitter.is_zero() {
            return Duration::ZERO;
        }
        let secs = rand::rng().random_range(0.0..=self.jitter.as_secs_f64());
        Duration::from_secs_f64(secs)
    }
}

#[derive(Debug)]
pub struct RetryPolicyBuilder {
    max_attempts: usize,
    base_delay: Duration,
    jitter: Duration,
    sleeper: Arc<dyn Sleeper>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum BuildError {
    InvalidMaxAttempts(usize),
}

impl std::fmt::Display for BuildError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BuildError::InvalidMaxAttempts(n) => {
                write!(f, "max_attempts must be > 0 (got {})", n)
            }
        }
    }
}

impl std::error::Error for BuildError {}

impl RetryPolicyBuilder {
    pub fn new() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            jitter: DEFAULT_JITTER,
            sleeper: Arc::new(TokioSleeper),
        }
    }

    pub fn max_attempts(mut self, attempts: usize) -> Result<Self, BuildError> {
        if attempts == 0 {
            return Err(BuildError::InvalidMaxAttempts(attempts));
        }
        self.max_attempts = attempts;
        Ok(self)
    }

    pub fn base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_sleeper<S: Sleeper + 'static>(mut self, sleeper: S) -> Self {
        self.sleeper = Arc::new(sleeper);
        self
    }

    pub fn build(self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: self.base_delay,
            jitter: self.jitter,
            sleeper: self.sleeper,
        }
    }
}

impl Default for RetryPolicyBuilder {
    fn default() -> Self {
        Self::new()
    }
}
