//! Convenience re-exports for typical wiring code.

pub use crate::{
    CircuitBreaker, CircuitState, ExternalApiService, FailoverConfig, FailoverError,
    FailoverManager, HealthProbe, HealthStatus, InternalService, Method, MetricsSink, Request,
    RetryPolicy, Service, ServiceError, ServiceId,
};
