//! Priority-ordered failover across registered services.
//!
//! Services are tried strictly in registration order; there is no hedging.
//! Each candidate runs under the retry policy, and its terminal outcome is
//! reported to the circuit breaker. A single service's failure is swallowed
//! and the next service is tried; only full exhaustion surfaces an error.

use crate::circuit_breaker::CircuitBreaker;
use crate::error::FailoverError;
use crate::request::{Method, Request};
use crate::retry::RetryPolicy;
use crate::service::Service;
use serde_json::Value;
use std::sync::Arc;

pub struct FailoverManager {
    services: Vec<Arc<dyn Service>>,
    retry_policy: RetryPolicy,
    circuit_breaker: CircuitBreaker,
}

impl FailoverManager {
    pub fn new(retry_policy: RetryPolicy, circuit_breaker: CircuitBreaker) -> Self {
        tracing::info!("failover manager initialized");
        Self { services: Vec::new(), retry_policy, circuit_breaker }
    }

    /// Register a service. Priority is registration order.
    pub fn register(&mut self, service: Arc<dyn Service>) {
        tracing::info!(
            service = %service.id(),
            class_tag = service.class_tag(),
            base_url = service.base_url(),
            "service registered"
        );
        self.services.push(service);
    }

    pub fn service_count(&self) -> usize {
        self.services.len()
    }

    /// Breaker state shared by every dispatch; exposed for introspection.
    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.circuit_breaker
    }

    /// Dispatch `request` to the first service that answers.
    pub async fn execute(&self, request: &Request) -> Result<String, FailoverError> {
        if self.services.is_empty() {
            tracing::error!("execute called with no services registered");
            return Err(FailoverError::NoServicesRegistered);
        }

        let mut last_error: Option<FailoverError> = None;
        for service in &self.services {
            if !self.circuit_breaker.allow_request(service.id()) {
                continue;
            }
            match self.retry_policy.execute(|| service.request(request)).await {
                Ok(body) => {
                    self.circuit_breaker.record_success(service.id());
                    tracing::info!(
                        service = %service.id(),
                        endpoint = %request.endpoint,
                        "service responded successfully"
                    );
                    return Ok(body);
                }
                Err(e) => {
                    self.circuit_breaker.record_failure(service.id());
                    tracing::error!(
                        service = %service.id(),
                        endpoint = %request.endpoint,
                        error = %e,
                        "service failed, trying next"
                    );
                    last_error = Some(e);
                }
            }
        }

        tracing::error!(endpoint = %request.endpoint, "all services failed");
        Err(FailoverError::AllServicesFailed { last: last_error.map(Box::new) })
    }

    /// Positional convenience mirroring the wire-level call shape.
    pub async fn execute_parts(
        &self,
        endpoint: &str,
        method: &str,
        params: Vec<(String, String)>,
        body: Option<Value>,
    ) -> Result<String, FailoverError> {
        let method = Method::parse(method)?;
        let mut request = Request::new(method, endpoint);
        request.params = params;
        request.body = body;
        self.execute(&request).await
    }
}
