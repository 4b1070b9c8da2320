#![forbid(unsafe_code)]

//! # failover
//!
//! Client-side resilience for an ordered set of interchangeable upstream HTTP
//! services: pick the first upstream that answers, and wrap every attempt in
//! retries, circuit breaking, rate limiting, connection pooling, response
//! caching, and a proactive health probe.
//!
//! ## Features
//!
//! - **Failover manager** trying registered services strictly in priority order
//! - **Retry policy** with exponential backoff and uniform jitter
//! - **Per-service circuit breaker** with half-open recovery
//! - **Token-bucket rate limiting** and a **bounded connection pool** per service
//! - **TTL response cache** keyed by a deterministic request fingerprint
//! - **DNS + reachability health probe** gating every dispatch
//! - **Prometheus metrics** injected everywhere, scrape-ready registry exposed
//!
//! ## Quick Start
//!
//! ```no_run
//! use failover::{
//!     CircuitBreaker, FailoverManager, InternalService, Request, RetryPolicy,
//! };
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), failover::FailoverError> {
//!     let retry = RetryPolicy::builder()
//!         .max_attempts(3)
//!         .expect("max_attempts > 0")
//!         .base_delay(Duration::from_secs(1))
//!         .jitter(Duration::from_millis(500))
//!         .build();
//!     let breaker = CircuitBreaker::new(3, Duration::from_secs(60));
//!
//!     let mut manager = FailoverManager::new(retry, breaker);
//!     manager.register(Arc::new(InternalService::new("https://primary.example.com")));
//!     manager.register(Arc::new(InternalService::new("https://backup.example.com")));
//!
//!     let body = manager.execute(&Request::get("/status").param("verbose", "1")).await?;
//!     println!("{body}");
//!     Ok(())
//! }
//! ```

mod cache;
mod circuit_breaker;
mod clock;
mod config;
mod error;
mod health;
mod manager;
mod metrics;
mod pool;
mod rate;
mod request;
mod retry;
mod service;
mod sleeper;

// Re-exports
pub use cache::{ResponseCache, DEFAULT_CAPACITY, DEFAULT_TTL};
pub use circuit_breaker::{
    CircuitBreaker, CircuitState, DEFAULT_FAILURE_THRESHOLD, DEFAULT_RECOVERY_TIME,
};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::FailoverConfig;
pub use error::{FailoverError, ServiceError};
pub use health::{
    CheckResult, HealthProbe, HealthStatus, DEFAULT_DELAY_THRESHOLD, DEFAULT_PROBE_TIMEOUT,
};
pub use manager::FailoverManager;
pub use metrics::MetricsSink;
pub use pool::{ConnectionPool, PoolPermit, DEFAULT_MAX_SIZE};
pub use rate::{RateLimiter, DEFAULT_PERIOD, DEFAULT_RATE};
pub use request::{Method, Request};
pub use retry::{
    BuildError, RetryPolicy, RetryPolicyBuilder, DEFAULT_BASE_DELAY, DEFAULT_JITTER,
    DEFAULT_MAX_ATTEMPTS,
};
pub use service::{
    ExternalApiService, ExternalApiServiceBuilder, InternalService, Service, ServiceId,
    HEALTH_HISTORY_LIMIT,
};
pub use sleeper::{InstantSleeper, Sleeper, TokioSleeper, TrackingSleeper};

pub mod prelude;
