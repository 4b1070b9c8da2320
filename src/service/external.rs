//! HTTP adapter for one real upstream.
//!
//! Composes the per-service cache, rate limiter, and connection pool around a
//! `reqwest` client. The request path is: health gate, cache lookup, pool
//! slot, latency timer, rate token, HTTP, response handling. A 429 releases
//! every held resource, waits out `Retry-After`, and reissues the original
//! request through the same path.

use crate::cache::{ResponseCache, DEFAULT_TTL};
use crate::error::ServiceError;
use crate::health::{
    HealthProbe, HealthStatus, DEFAULT_DELAY_THRESHOLD, DEFAULT_PROBE_TIMEOUT,
};
use crate::metrics::MetricsSink;
use crate::pool::{ConnectionPool, DEFAULT_MAX_SIZE};
use crate::rate::{RateLimiter, DEFAULT_PERIOD, DEFAULT_RATE};
use crate::request::{Method, Request};
use crate::service::{Service, ServiceId, HEALTH_HISTORY_LIMIT};
use crate::sleeper::{Sleeper, TokioSleeper};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(60);
const USER_AGENT: &str = "ExternalAPIService/1.0";
const DEFAULT_CLASS_TAG: &str = "ExternalAPIService";

/// Adapter for a real HTTP upstream.
pub struct ExternalApiService {
    id: ServiceId,
    base_url: String,
    api_key: String,
    class_tag: String,
    client: reqwest::Client,
    cache: ResponseCache,
    rate_limiter: RateLimiter,
    pool: ConnectionPool,
    metrics: Arc<MetricsSink>,
    probe: HealthProbe,
    history: Mutex<VecDeque<HealthStatus>>,
    timeout: Duration,
    default_retry_after: Duration,
    sleeper: Arc<dyn Sleeper>,
}

/// Outcome of a single wire attempt inside the 429 loop.
enum Attempt {
    Body(String),
    RateLimited(Duration),
}

impl ExternalApiService {
    pub fn builder(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        metrics: Arc<MetricsSink>,
    ) -> ExternalApiServiceBuilder {
        ExternalApiServiceBuilder::new(base_url, api_key, metrics)
    }

    /// One pass through pool, limiter, and the wire. All held resources are
    /// released when this returns, so a 429 wait never pins a pool slot.
    async fn issue(&self, request: &Request, key: &str) -> Result<Attempt, ServiceError> {
        let _slot = self.pool.acquire().await;
        let _timer = self.metrics.request_timer(&self.class_tag, &request.endpoint);
        self.rate_limiter.acquire().await;

        let url = format!("{}{}", self.base_url, request.endpoint);
        let mut builder = match request.method {
            Method::Get => self.client.get(&url).query(&request.params),
            Method::Post => self.client.post(&url),
            Method::Put => self.client.put(&url),
            Method::Delete => self.client.delete(&url),
        };
        if matches!(request.method, Method::Post | Method::Put) {
            builder = builder.json(request.body.as_ref().unwrap_or(&Value::Null));
        }

        let started = Instant::now();
        let response = builder
            .bearer_auth(&self.api_key)
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .send()
            .await
            .map_err(|e| self.classify_send_error(e, request, started))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let wait = Self::retry_after(&response).unwrap_or(self.default_retry_after);
            self.metrics.record_error(
                "rate_limit",
                &format!("upstream rate limited, retry after {}s", wait.as_secs()),
                &self.class_tag,
            );
            return Ok(Attempt::RateLimited(wait));
        }

        if status.is_success() {
            let body = response
                .text()
                .await
                .map_err(|e| self.classify_send_error(e, request, started))?;
            self.cache.set(key, body.clone());
            self.metrics.record_request(&self.class_tag, &request.endpoint, "success");
            return Ok(Attempt::Body(body));
        }

        let err = ServiceError::ResponseError {
            status: status.as_u16(),
            message: status.canonical_reason().unwrap_or("HTTP error").to_string(),
        };
        self.metrics.record_error("response_error", &err.to_string(), &self.class_tag);
        self.metrics.record_request(&self.class_tag, &request.endpoint, "failure");
        Err(err)
    }

    fn classify_send_error(
        &self,
        error: reqwest::Error,
        request: &Request,
        started: Instant,
    ) -> ServiceError {
        let err = if error.is_timeout() {
            ServiceError::Timeout { elapsed: started.elapsed(), timeout: self.timeout }
        } else {
            ServiceError::Transport(error.to_string())
        };
        if let Some(label) = err.metric_label() {
            self.metrics.record_error(label, &err.to_string(), &self.class_tag);
        }
        self.metrics.record_request(&self.class_tag, &request.endpoint, "failure");
        err
    }

    fn retry_after(response: &reqwest::Response) -> Option<Duration> {
        response
            .headers()
            .get(reqwest::header::RETRY_AFTER)?
            .to_str()
            .ok()?
            .trim()
            .parse::<u64>()
            .ok()
            .map(Duration::from_secs)
    }

    fn push_history(&self, status: HealthStatus) {
        let mut history =
            self.history.lock().expect("ExternalApiService.history: mutex poisoned");
        if history.len() == HEALTH_HISTORY_LIMIT {
            history.pop_front();
        }
        history.push_back(status);
    }

    #[cfg(test)]
    fn history_len(&self) -> usize {
        self.history.lock().expect("history: mutex poisoned").len()
    }
}

#[async_trait]
impl Service for ExternalApiService {
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
        let health = self.health_check().await;
        if !health.overall_status {
            return Err(ServiceError::Unhealthy { message: health.problem() });
        }

        let key = request.fingerprint();
        loop {
            // Cache hits return before any pool, limiter, or network work.
            if let Some(hit) = self.cache.get(&key) {
                return Ok(hit);
            }
            match self.issue(request, &key).await? {
                Attempt::Body(body) => return Ok(body),
                Attempt::RateLimited(wait) => {
                    tracing::warn!(
                        service = %self.id,
                        endpoint = %request.endpoint,
                        wait_secs = wait.as_secs(),
                        "rate limited by upstream, waiting before reissue"
                    );
                    self.sleeper.sleep(wait).await;
                }
            }
        }
    }

    async fn health_check(&self) -> HealthStatus {
        let status = self.probe.probe(&self.base_url).await;
        self.metrics.record_health_check(&self.class_tag, status.overall_status);
        if status.dns_check.ran() {
            self.metrics.record_dns_latency(&self.class_tag, status.dns_check.duration);
        }
        if status.ping_check.ran() {
            self.metrics.record_ping_latency(&self.class_tag, status.ping_check.duration);
        }
        if !status.overall_status {
            self.metrics.record_error("health_check", &status.problem(), &self.class_tag);
        }
        self.push_history(status.clone());
        status
    }

    fn last_health_status(&self) -> Option<HealthStatus> {
        self.history
            .lock()
            .expect("ExternalApiService.history: mutex poisoned")
            .back()
            .cloned()
    }
}

/// Builder wiring the adapter's resources; defaults match the configuration
/// table's defaults.
pub struct ExternalApiServiceBuilder {
    base_url: String,
    api_key: String,
    class_tag: String,
    metrics: Arc<MetricsSink>,
    timeout: Duration,
    default_retry_after: Duration,
    cache_ttl: Duration,
    rate: u32,
    rate_period: Duration,
    pool_size: usize,
    probe_timeout: Duration,
    delay_threshold: Duration,
    sleeper: Arc<dyn Sleeper>,
}

impl ExternalApiServiceBuilder {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        metrics: Arc<MetricsSink>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            class_tag: DEFAULT_CLASS_TAG.to_string(),
            metrics,
            timeout: DEFAULT_REQUEST_TIMEOUT,
            default_retry_after: DEFAULT_RETRY_AFTER,
            cache_ttl: DEFAULT_TTL,
            rate: DEFAULT_RATE,
            rate_period: DEFAULT_PERIOD,
            pool_size: DEFAULT_MAX_SIZE,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            delay_threshold: DEFAULT_DELAY_THRESHOLD,
            sleeper: Arc::new(TokioSleeper),
        }
    }

    /// Apply the flat configuration record to every tunable.
    pub fn from_config(mut self, config: &crate::config::FailoverConfig) -> Self {
        self.timeout = config.timeout_duration();
        self.default_retry_after = config.retry_after_duration();
        self.cache_ttl = config.cache_ttl_duration();
        self.rate = config.rate_limit;
        self.rate_period = config.rate_limit_period_duration();
        self.pool_size = config.pool_max_size;
        self.probe_timeout = config.timeout_duration();
        self.delay_threshold = config.delay_threshold_duration();
        self
    }

    /// Class tag used as the `service` metric label.
    pub fn class_tag(mut self, tag: impl Into<String>) -> Self {
        self.class_tag = tag.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn default_retry_after(mut self, wait: Duration) -> Self {
        self.default_retry_after = wait;
        self
    }

    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn rate_limit(mut self, rate: u32, period: Duration) -> Self {
        self.rate = rate;
        self.rate_period = period;
        self
    }

    pub fn pool_size(mut self, size: usize) -> Self {
        self.pool_size = size;
        self
    }

    pub fn probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn delay_threshold(mut self, threshold: Duration) -> Self {
        self.delay_threshold = threshold;
        self
    }

    pub fn with_sleeper<S: Sleeper + 'static>(mut self, sleeper: S) -> Self {
        self.sleeper = Arc::new(sleeper);
        self
    }

    pub fn build(self) -> Result<ExternalApiService, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| ServiceError::Transport(format!("failed to build HTTP client: {e}")))?;

        let service = ExternalApiService {
            id: ServiceId::next(),
            base_url: self.base_url,
            api_key: self.api_key,
            class_tag: self.class_tag,
            client,
            cache: ResponseCache::new(self.cache_ttl),
            rate_limiter: RateLimiter::new(self.rate, self.rate_period),
            pool: ConnectionPool::new(self.pool_size),
            metrics: self.metrics,
            probe: HealthProbe::new(self.probe_timeout, self.delay_threshold),
            history: Mutex::new(VecDeque::with_capacity(HEALTH_HISTORY_LIMIT)),
            timeout: self.timeout,
            default_retry_after: self.default_retry_after,
            sleeper: self.sleeper,
        };
        tracing::info!(
            service = %service.id,
            base_url = %service.base_url,
            class_tag = %service.class_tag,
            "external service initialized"
        );
        Ok(service)
    }
}
