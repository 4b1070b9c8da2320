//! Synthetic adapter used in demos and wiring tests.
//!
//! Satisfies the same contract as the HTTP adapter without touching the
//! network: requests echo a canned response and the health probe always
//! passes. The `discontinued` flag turns every request into a transport
//! failure, which is handy for exercising failover paths.

use crate::error::ServiceError;
use crate::health::HealthStatus;
use crate::request::Request;
use crate::service::{Service, ServiceId, HEALTH_HISTORY_LIMIT};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

pub struct InternalService {
    id: ServiceId,
    base_url: String,
    class_tag: String,
    discontinued: bool,
    history: Mutex<VecDeque<HealthStatus>>,
}

impl InternalService {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            id: ServiceId::next(),
            base_url: base_url.into(),
            class_tag: "InternalService".to_string(),
            discontinued: false,
            history: Mutex::new(VecDeque::with_capacity(HEALTH_HISTORY_LIMIT)),
        }
    }

    /// Mark the service as retired; every request fails with a transport
    /// error from then on.
    pub fn discontinued(mut self) -> Self {
        self.discontinued = true;
        self
    }
}

#[async_trait]
impl Service for InternalService {
    fn id(&self) -> ServiceId {
        self.id
    }

    fn class_tag(&self) -> &str {
        &self.class_tag
    }

    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn request(&self, request: &Request) -> Result<String, ServiceError> {
        if self.discontinued {
            return Err(ServiceError::Transport(
                "InternalService is discontinued".to_string(),
            ));
        }
        Ok(format!(
            "Response from {}{} with method {}",
            self.base_url, request.endpoint, request.method
        ))
    }

    async fn health_check(&self) -> HealthStatus {
        let status = HealthStatus::healthy();
        let mut history =
            self.history.lock().expect("InternalService.history: mutex poisoned");
        if history.len() == HEALTH_HISTORY_LIMIT {
            history.pop_front();
        }
        history.push_back(status.clone());
        status
    }

    fn last_health_status(&self) -> Option<HealthStatus> {
        self.history
            .lock()
            .expect("InternalService.history: mutex poisoned")
            .back()
            .cloned()
    }
}
