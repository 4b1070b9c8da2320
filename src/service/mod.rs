//! Upstream adapter contract.
//!
//! An adapter owns everything needed to talk to one upstream: base URL,
//! credential, HTTP client, cache, rate limiter, connection pool, and its
//! rolling health history. Adapters are registered once with the
//! [`FailoverManager`](crate::FailoverManager) and live until process end.

use crate::error::ServiceError;
use crate::health::HealthStatus;
use crate::request::Request;
use async_trait::async_trait;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

mod external;
mod internal;

pub use external::{ExternalApiService, ExternalApiServiceBuilder};
pub use internal::InternalService;

/// Maximum number of health probe results retained per service.
pub const HEALTH_HISTORY_LIMIT: usize = 100;

static NEXT_SERVICE_ID: AtomicU64 = AtomicU64::new(1);

/// Stable per-instance handle identifying a registered service.
///
/// Identity, not equality of configuration: two adapters constructed against
/// the same URL get distinct ids and independent breaker records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceId(u64);

impl ServiceId {
    /// Allocate the next process-unique id.
    pub fn next() -> Self {
        Self(NEXT_SERVICE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "service#{}", self.0)
    }
}

/// Contract every upstream adapter satisfies.
#[async_trait]
pub trait Service: Send + Sync {
    /// Identity handle; allocated at construction and never reused.
    fn id(&self) -> ServiceId;

    /// Class tag used as the `service` label on all metrics.
    fn class_tag(&self) -> &str;

    fn base_url(&self) -> &str;

    /// Dispatch one logical request and return the response body text.
    async fn request(&self, request: &Request) -> Result<String, ServiceError>;

    /// Probe the upstream and append the result to the health history.
    async fn health_check(&self) -> HealthStatus;

    /// Most recent probe result, if any probe has run.
    fn last_health_status(&self) -> Option<HealthStatus>;
}
