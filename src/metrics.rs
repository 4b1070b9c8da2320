//! Prometheus metrics for the dispatch engine.
//!
//! One [`MetricsSink`] is built per process and shared by every component via
//! `Arc`; the "singleton" is a property of the wiring, not the type. The
//! registry is exposed so an external scrape endpoint can serve it.

use prometheus::{
    HistogramTimer, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry,
};
use std::time::Duration;

/// Counters, gauges, and histograms for upstream traffic and health.
#[derive(Clone)]
pub struct MetricsSink {
    registry: Registry,
    requests: IntCounterVec,
    latency: HistogramVec,
    health_checks: IntCounterVec,
    health_status: IntGaugeVec,
    errors: IntCounterVec,
    dns_latency: HistogramVec,
    ping_latency: HistogramVec,
}

impl std::fmt::Debug for MetricsSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsSink").finish_non_exhaustive()
    }
}

impl MetricsSink {
    /// Build a sink with its own private registry.
    pub fn new() -> Result<Self, prometheus::Error> {
        Self::with_registry(Registry::new())
    }

    /// Build a sink registering into an existing registry.
    pub fn with_registry(registry: Registry) -> Result<Self, prometheus::Error> {
        let requests = IntCounterVec::new(
            Opts::new("external_service_requests_total", "Total number of API requests"),
            &["service", "endpoint", "status"],
        )?;
        let latency = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "external_service_request_latency_seconds",
                "Request latency in seconds",
            ),
            &["service", "endpoint"],
        )?;
        let health_checks = IntCounterVec::new(
            Opts::new(
                "external_service_health_checks_total",
                "Total number of health checks performed",
            ),
            &["service", "status"],
        )?;
        let health_status = IntGaugeVec::new(
            Opts::new(
                "external_service_health_status",
                "Current health status of the service (1 = healthy, 0 = unhealthy)",
            ),
            &["service"],
        )?;
        let errors = IntCounterVec::new(
            Opts::new("external_service_errors_total", "Total number of errors by type"),
            &["service", "error_type"],
        )?;
        let dns_latency = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "external_service_dns_resolution_seconds",
                "DNS resolution time in seconds",
            ),
            &["service"],
        )?;
        let ping_latency = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "external_service_ping_latency_seconds",
                "Ping latency in seconds",
            ),
            &["service"],
        )?;

        registry.register(Box::new(requests.clone()))?;
        registry.register(Box::new(latency.clone()))?;
        registry.register(Box::new(health_checks.clone()))?;
        registry.register(Box::new(health_status.clone()))?;
        registry.register(Box::new(errors.clone()))?;
        registry.register(Box::new(dns_latency.clone()))?;
        registry.register(Box::new(ping_latency.clone()))?;

        Ok(Self {
            registry,
            requests,
            latency,
            health_checks,
            health_status,
            errors,
            dns_latency,
            ping_latency,
        })
    }

    /// Registry backing this sink, for HTTP scraping.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_request(&self, service: &str, endpoint: &str, status: &str) {
        self.requests.with_label_values(&[service, endpoint, status]).inc();
    }

    /// Start a latency timer; the observation lands when the timer is dropped
    /// or `observe_duration` is called.
    pub fn request_timer(&self, service: &str, endpoint: &str) -> HistogramTimer {
        self.latency.with_label_values(&[service, endpoint]).start_timer()
    }

    pub fn record_health_check(&self, service: &str, healthy: bool) {
        let status = if healthy { "healthy" } else { "unhealthy" };
        self.health_checks.with_label_values(&[service, status]).inc();
        self.health_status
            .with_label_values(&[service])
            .set(if healthy { 1 } else { 0 });
    }

    pub fn record_error(&self, error_type: &str, message: &str, service: &str) {
        self.errors.with_label_values(&[service, error_type]).inc();
        tracing::error!(service, error_type, message, "upstream error recorded");
    }

    pub fn record_dns_latency(&self, service: &str, duration: Duration) {
        self.dns_latency
            .with_label_values(&[service])
            .observe(duration.as_secs_f64());
    }

    pub fn record_ping_latency(&self, service: &str, duration: Duration) {
        self.ping_latency
            .with_label_values(&[service])
            .observe(duration.as_secs_f64());
    }

    // Introspection used by assertions and operational checks.

    pub fn request_count(&self, service: &str, endpoint: &str, status: &str) -> u64 {
        self.requests.with_label_values(&[service, endpoint, status]).get()
    }

    pub fn error_count(&self, service: &str, error_type: &str) -> u64 {
        self.errors.with_label_values(&[service, error_type]).get()
    }

    pub fn health_check_count(&self, service: &str, healthy: bool) -> u64 {
        let status = if healthy { "healthy" } else { "unhealthy" };
        self.health_checks.with_label_values(&[service, status]).get()
    }

    pub fn health_status_value(&self, service: &str) -> i64 {
        self.health_status.with_label_values(&[service]).get()
    }
}
