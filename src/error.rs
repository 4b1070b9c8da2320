//! Error taxonomy for the dispatch engine.
//!
//! [`ServiceError`] covers a single adapter attempt; [`FailoverError`] covers
//! the orchestration layers (retry, breaker, manager) on top of it. Retries
//! only ever re-run attempts whose error [`ServiceError::is_retriable`].

use std::time::Duration;
use thiserror::Error;

/// Failure of a single request attempt against one upstream adapter.
#[derive(Debug, Clone, Error)]
pub enum ServiceError {
    /// The caller asked for something the adapter cannot express (bad HTTP verb).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The pre-flight health probe reported the upstream unreachable.
    #[error("service unhealthy: {message}")]
    Unhealthy { message: String },

    /// The HTTP request exceeded its overall deadline.
    #[error("request timed out after {elapsed:?} (limit: {timeout:?})")]
    Timeout { elapsed: Duration, timeout: Duration },

    /// Connection-level failure before a response was received.
    #[error("transport error: {0}")]
    Transport(String),

    /// The upstream answered with a non-429 error status.
    #[error("upstream returned {status}: {message}")]
    ResponseError { status: u16, message: String },
}

impl ServiceError {
    /// Whether a recurrence of this error may succeed. Semantic failures
    /// (bad arguments, 4xx/5xx responses) are not retried.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            ServiceError::Unhealthy { .. }
                | ServiceError::Timeout { .. }
                | ServiceError::Transport(_)
        )
    }

    /// Label under which this error is counted in the error metric, if any.
    pub fn metric_label(&self) -> Option<&'static str> {
        match self {
            ServiceError::Timeout { .. } => Some("timeout"),
            ServiceError::Transport(_) => Some("client_error"),
            ServiceError::ResponseError { .. } => Some("response_error"),
            ServiceError::Unhealthy { .. } => Some("health_check"),
            ServiceError::InvalidArgument(_) => None,
        }
    }
}

/// Failure of the orchestration layers wrapped around adapter attempts.
#[derive(Debug, Error)]
pub enum FailoverError {
    /// Every attempt the retry policy was willing to make has failed.
    #[error("retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: usize,
        #[source]
        last: ServiceError,
    },

    /// The circuit breaker refused admission for this service.
    #[error("circuit open ({failure_count} failures, open for {open_for:?})")]
    CircuitOpen { failure_count: u32, open_for: Duration },

    /// `execute` was called before any service was registered.
    #[error("no services registered")]
    NoServicesRegistered,

    /// Every registered service was skipped or failed terminally.
    #[error("all services failed")]
    AllServicesFailed {
        #[source]
        last: Option<Box<FailoverError>>,
    },

    /// A non-retriable adapter error, surfaced without further attempts.
    #[error(transparent)]
    Service(#[from] ServiceError),
}

impl FailoverError {
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, FailoverError::CircuitOpen { .. })
    }

    pub fn is_retries_exhausted(&self) -> bool {
        matches!(self, FailoverError::RetriesExhausted { .. })
    }

    /// The adapter error closest to the wire, walking through wrappers.
    pub fn service_error(&self) -> Option<&ServiceError> {
        match self {
            FailoverError::Service(e) => Some(e),
            FailoverError::RetriesExhausted { last, .. } => Some(last),
            FailoverError::AllServicesFailed { last } => {
                last.as_deref().and_then(FailoverError::service_error)
            }
            _ => None,
        }
    }
}
