//! Per-service circuit breaker.
//!
//! Each registered service gets its own record in the {CLOSED, OPEN,
//! HALF_OPEN} state machine, keyed by [`ServiceId`] so two adapters pointing
//! at the same URL trip independently. Admission is non-blocking: an OPEN
//! record flips to HALF_OPEN on read once the recovery window has elapsed.

use crate::clock::{Clock, MonotonicClock};
use crate::error::{FailoverError, ServiceError};
use crate::service::ServiceId;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;
pub const DEFAULT_RECOVERY_TIME: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
struct BreakerRecord {
    state: CircuitState,
    failure_count: u32,
    last_failure_millis: u64,
}

impl Default for BreakerRecord {
    fn default() -> Self {
        Self { state: CircuitState::Closed, failure_count: 0, last_failure_millis: 0 }
    }
}

/// State machine guarding admission to each registered service.
#[derive(Debug)]
pub struct CircuitBreaker {
    records: Mutex<HashMap<ServiceId, BreakerRecord>>,
    failure_threshold: u32,
    recovery_time: Duration,
    clock: Arc<dyn Clock>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, recovery_time: Duration) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            failure_threshold: failure_threshold.max(1),
            recovery_time,
            clock: Arc::new(MonotonicClock::default()),
        }
    }

    /// Override the clock (useful for deterministic recovery tests).
    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Non-blocking admission check. Performs the OPEN → HALF_OPEN
    /// transition when the recovery window has elapsed.
    pub fn allow_request(&self, id: ServiceId) -> bool {
        let now = self.clock.now_millis();
        let mut records =
            self.records.lock().expect("CircuitBreaker.allow_request: mutex poisoned");
        let record = records.entry(id).or_default();
        match record.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let since_failure = now.saturating_sub(record.last_failure_millis);
                if since_failure > self.recovery_time.as_millis() as u64 {
                    record.state = CircuitState::HalfOpen;
                    tracing::info!(service = %id, "circuit breaker half-open");
                    true
                } else {
                    tracing::debug!(service = %id, "circuit breaker open, skipping");
                    false
                }
            }
        }
    }

    /// Record a successful call: the circuit closes and the count resets.
    pub fn record_success(&self, id: ServiceId) {
        let mut records =
            self.records.lock().expect("CircuitBreaker.record_success: mutex poisoned");
        let record = records.entry(id).or_default();
        if record.state != CircuitState::Closed {
            tracing::info!(service = %id, "circuit breaker closed");
        }
        record.state = CircuitState::Closed;
        record.failure_count = 0;
    }

    /// Record a failed call: HALF_OPEN reopens immediately; CLOSED counts
    /// toward the threshold and trips to OPEN on reaching it.
    pub fn record_failure(&self, id: ServiceId) {
        let now = self.clock.now_millis();
        let mut records =
            self.records.lock().expect("CircuitBreaker.record_failure: mutex poisoned");
        let record = records.entry(id).or_default();
        record.last_failure_millis = now;
        match record.state {
            CircuitState::HalfOpen => {
                record.state = CircuitState::Open;
                tracing::warn!(service = %id, "circuit breaker reopened after failed probe");
            }
            _ => {
                record.failure_count += 1;
                if record.failure_count >= self.failure_threshold
                    && record.state == CircuitState::Closed
                {
                    record.state = CircuitState::Open;
                    tracing::warn!(
                        service = %id,
                        failures = record.failure_count,
                        threshold = self.failure_threshold,
                        "circuit breaker opened"
                    );
                } else {
                    tracing::debug!(
                        service = %id,
                        failures = record.failure_count,
                        "circuit breaker failure recorded"
                    );
                }
            }
        }
    }

    pub fn state(&self, id: ServiceId) -> CircuitState {
        self.records
            .lock()
            .expect("CircuitBreaker.state: mutex poisoned")
            .get(&id)
            .map(|r| r.state)
            .unwrap_or(CircuitState::Closed)
    }

    pub fn failure_count(&self, id: ServiceId) -> u32 {
        self.records
            .lock()
            .expect("CircuitBreaker.failure_count: mutex poisoned")
            .get(&id)
            .map(|r| r.failure_count)
            .unwrap_or(0)
    }

    pub fn last_failure_millis(&self, id: ServiceId) -> u64 {
        self.records
            .lock()
            .expect("CircuitBreaker.last_failure_millis: mutex poisoned")
            .get(&id)
            .map(|r| r.last_failure_millis)
            .unwrap_or(0)
    }

    /// Run one operation under this breaker's admission and accounting.
    /// Refused admission yields [`FailoverError::CircuitOpen`].
    pub async fn call<T, Fut, Op>(&self, id: ServiceId, operation: Op) -> Result<T, FailoverError>
    where
        T: Send,
        Fut: Future<Output = Result<T, ServiceError>> + Send,
        Op: FnOnce() -> Fut + Send,
    {
        if !self.allow_request(id) {
            let now = self.clock.now_millis();
            let (failure_count, open_for) = {
                let records =
                    self.records.lock().expect("CircuitBreaker.call: mutex poisoned");
                let record = records.get(&id).cloned().unwrap_or_default();
                (
                    record.failure_count,
                    Duration::from_millis(now.saturating_sub(record.last_failure_millis)),
                )
            };
            return Err(FailoverError::CircuitOpen { failure_count, open_for });
        }

        match operation().await {
            Ok(value) => {
                self.record_success(id);
                Ok(value)
            }
            Err(e) => {
                self.record_failure(id);
                Err(FailoverError::Service(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn id() -> ServiceId {
        ServiceId::next()
    }

    #[test]
    fn fresh_service_starts_closed_and_admitted() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(60));
        let svc = id();

        assert!(breaker.allow_request(svc));
        assert_eq!(breaker.state(svc), CircuitState::Closed);
        assert_eq!(breaker.failure_count(svc), 0);
    }

    #[test]
    fn trips_open_on_reaching_the_threshold() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(60));
        let svc = id();

        breaker.record_failure(svc);
        breaker.record_failure(svc);
        assert_eq!(breaker.state(svc), CircuitState::Closed);
        assert!(breaker.allow_request(svc));

        breaker.record_failure(svc);
        assert_eq!(breaker.state(svc), CircuitState::Open);
        assert!(!breaker.allow_request(svc));
        assert_eq!(breaker.failure_count(svc), 3);
    }

    #[test]
    fn success_resets_count_and_closes() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(60));
        let svc = id();

        breaker.record_failure(svc);
        breaker.record_failure(svc);
        breaker.record_success(svc);
        assert_eq!(breaker.failure_count(svc), 0);

        // Two more failures must not trip since the count was reset.
        breaker.record_failure(svc);
        breaker.record_failure(svc);
        assert_eq!(breaker.state(svc), CircuitState::Closed);
    }

    #[test]
    fn half_open_after_recovery_window() {
        let clock = ManualClock::new();
        let breaker = CircuitBreaker::new(1, Duration::from_secs(60)).with_clock(clock.clone());
        let svc = id();

        breaker.record_failure(svc);
        assert!(!breaker.allow_request(svc));

        // Exactly at the window boundary the circuit stays open.
        clock.advance(60_000);
        assert!(!breaker.allow_request(svc));

        clock.advance(1);
        assert!(breaker.allow_request(svc));
        assert_eq!(breaker.state(svc), CircuitState::HalfOpen);
    }

    #[test]
    fn half_open_success_closes_the_circuit() {
        let clock = ManualClock::new();
        let breaker = CircuitBreaker::new(1, Duration::from_secs(1)).with_clock(clock.clone());
        let svc = id();

        breaker.record_failure(svc);
        clock.advance(1_001);
        assert!(breaker.allow_request(svc));

        breaker.record_success(svc);
        assert_eq!(breaker.state(svc), CircuitState::Closed);
        assert_eq!(breaker.failure_count(svc), 0);
    }

    #[test]
    fn half_open_failure_reopens_without_counting() {
        let clock = ManualClock::new();
        let breaker = CircuitBreaker::new(2, Duration::from_secs(1)).with_clock(clock.clone());
        let svc = id();

        breaker.record_failure(svc);
        breaker.record_failure(svc);
        assert_eq!(breaker.state(svc), CircuitState::Open);
        let count_when_tripped = breaker.failure_count(svc);

        clock.advance(1_001);
        assert!(breaker.allow_request(svc));
        breaker.record_failure(svc);

        assert_eq!(breaker.state(svc), CircuitState::Open);
        assert_eq!(breaker.failure_count(svc), count_when_tripped);
        assert_eq!(breaker.last_failure_millis(svc), clock.now_millis());
    }

    #[test]
    fn services_trip_independently() {
        let breaker = CircuitBreaker::new(1, Duration::from_secs(60));
        let a = id();
        let b = id();

        breaker.record_failure(a);
        assert!(!breaker.allow_request(a));
        assert!(breaker.allow_request(b));
    }

    #[tokio::test]
    async fn call_refuses_when_open() {
        let breaker = CircuitBreaker::new(1, Duration::from_secs(60));
        let svc = id();

        let failing = breaker
            .call(svc, || async {
                Err::<(), _>(ServiceError::Transport("down".to_string()))
            })
            .await;
        assert!(matches!(failing, Err(FailoverError::Service(_))));

        let refused = breaker.call(svc, || async { Ok::<_, ServiceError>(42) }).await;
        match refused {
            Err(FailoverError::CircuitOpen { failure_count, .. }) => {
                assert_eq!(failure_count, 1)
            }
            other => panic!("expected CircuitOpen, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn call_records_success() {
        let clock = ManualClock::new();
        let breaker = CircuitBreaker::new(1, Duration::from_secs(1)).with_clock(clock.clone());
        let svc = id();

        breaker.record_failure(svc);
        clock.advance(1_001);

        let result = breaker.call(svc, || async { Ok::<_, ServiceError>("ok") }).await;
        assert_eq!(result.unwrap(), "ok");
        assert_eq!(breaker.state(svc), CircuitState::Closed);
        assert_eq!(breaker.failure_count(svc), 0);
    }
}
