//! Proactive health probing: DNS resolution plus a reachability check.
//!
//! The probe never propagates errors; every failure mode collapses into the
//! returned [`HealthStatus`] so callers can gate on `overall_status` alone.

use std::time::{Duration, Instant, SystemTime};
use tokio::net::{lookup_host, TcpStream};
use url::Url;

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_DELAY_THRESHOLD: Duration = Duration::from_secs(1);

/// Outcome of one probe step.
#[derive(Debug, Clone, Default)]
pub struct CheckResult {
    pub status: bool,
    pub message: String,
    pub duration: Duration,
}

impl CheckResult {
    fn ok(duration: Duration) -> Self {
        Self { status: true, message: String::new(), duration }
    }

    fn failed(message: String, duration: Duration) -> Self {
        Self { status: false, message, duration }
    }

    /// Whether this step actually executed (a skipped step stays default).
    pub fn ran(&self) -> bool {
        self.status || !self.message.is_empty()
    }
}

/// Immutable snapshot of one health probe.
///
/// Invariant: `overall_status` holds exactly when both checks passed.
#[derive(Debug, Clone)]
pub struct HealthStatus {
    pub timestamp: SystemTime,
    pub dns_check: CheckResult,
    pub ping_check: CheckResult,
    pub overall_status: bool,
    pub error_message: String,
}

impl HealthStatus {
    fn new(dns_check: CheckResult, ping_check: CheckResult) -> Self {
        let overall_status = dns_check.status && ping_check.status;
        Self {
            timestamp: SystemTime::now(),
            dns_check,
            ping_check,
            overall_status,
            error_message: String::new(),
        }
    }

    /// A probe that failed before any check could run.
    pub fn failed(error_message: impl Into<String>) -> Self {
        Self {
            timestamp: SystemTime::now(),
            dns_check: CheckResult::default(),
            ping_check: CheckResult::default(),
            overall_status: false,
            error_message: error_message.into(),
        }
    }

    /// Synthetic all-green status for adapters without a real probe.
    pub fn healthy() -> Self {
        Self::new(CheckResult::ok(Duration::ZERO), CheckResult::ok(Duration::ZERO))
    }

    /// The most specific failure message, for error reporting.
    pub fn problem(&self) -> String {
        if !self.error_message.is_empty() {
            self.error_message.clone()
        } else if !self.dns_check.status {
            self.dns_check.message.clone()
        } else {
            self.ping_check.message.clone()
        }
    }
}

/// DNS + reachability probe against a service base URL.
#[derive(Debug, Clone)]
pub struct HealthProbe {
    timeout: Duration,
    delay_threshold: Duration,
}

impl Default for HealthProbe {
    fn default() -> Self {
        Self { timeout: DEFAULT_PROBE_TIMEOUT, delay_threshold: DEFAULT_DELAY_THRESHOLD }
    }
}

impl HealthProbe {
    pub fn new(timeout: Duration, delay_threshold: Duration) -> Self {
        Self { timeout, delay_threshold }
    }

    /// Run both checks against the host of `base_url`.
    pub async fn probe(&self, base_url: &str) -> HealthStatus {
        let (host, port) = match Self::host_of(base_url) {
            Ok(pair) => pair,
            Err(message) => {
                tracing::warn!(base_url, message = %message, "health probe aborted");
                return HealthStatus::failed(message);
            }
        };

        let dns_check = self.check_dns(&host).await;
        let ping_check = if dns_check.status {
            self.check_ping(&host, port).await
        } else {
            CheckResult::default()
        };

        let status = HealthStatus::new(dns_check, ping_check);
        if !status.overall_status {
            tracing::warn!(base_url, problem = %status.problem(), "health probe unhealthy");
        }
        status
    }

    fn host_of(base_url: &str) -> Result<(String, u16), String> {
        let url = Url::parse(base_url)
            .map_err(|e| format!("invalid base URL: {e}"))?;
        let host = url
            .host_str()
            .ok_or_else(|| "invalid base URL: missing hostname".to_string())?
            .to_string();
        let port = url.port_or_known_default().unwrap_or(80);
        Ok((host, port))
    }

    async fn check_dns(&self, host: &str) -> CheckResult {
        let start = Instant::now();
        match tokio::time::timeout(self.timeout, lookup_host((host, 0u16))).await {
            Ok(Ok(mut addrs)) => {
                let duration = start.elapsed();
                if addrs.next().is_some() {
                    CheckResult::ok(duration)
                } else {
                    CheckResult::failed(
                        "DNS resolution failed: no addresses returned".to_string(),
                        duration,
                    )
                }
            }
            Ok(Err(e)) => {
                CheckResult::failed(format!("DNS resolution failed: {e}"), start.elapsed())
            }
            Err(_) => {
                CheckResult::failed("DNS resolution timed out".to_string(), start.elapsed())
            }
        }
    }

    /// Reachability via a TCP round trip to the service port; the connect
    /// latency stands in for an ICMP echo.
    async fn check_ping(&self, host: &str, port: u16) -> CheckResult {
        let start = Instant::now();
        match tokio::time::timeout(self.timeout, TcpStream::connect((host, port))).await {
            Ok(Ok(_stream)) => {
                let duration = start.elapsed();
                if duration >= self.delay_threshold {
                    CheckResult::failed(
                        format!("High latency detected: {:.2}s", duration.as_secs_f64()),
                        duration,
                    )
                } else {
                    CheckResult::ok(duration)
                }
            }
            Ok(Err(e)) => {
                CheckResult::failed(format!("Network error during ping: {e}"), start.elapsed())
            }
            Err(_) => CheckResult::failed("Ping timed out".to_string(), start.elapsed()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn probe_passes_against_a_live_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        // Keep the listener alive so connects succeed.
        let _accepting = tokio::spawn(async move {
            loop {
                let _ = listener.accept().await;
            }
        });

        let probe = HealthProbe::default();
        let status = probe.probe(&format!("http://127.0.0.1:{port}")).await;

        assert!(status.dns_check.status, "dns: {}", status.dns_check.message);
        assert!(status.ping_check.status, "ping: {}", status.ping_check.message);
        assert!(status.overall_status);
        assert!(status.error_message.is_empty());
    }

    #[tokio::test]
    async fn probe_fails_ping_against_a_closed_port() {
        // Bind then drop to find a port that refuses connections.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let probe = HealthProbe::default();
        let status = probe.probe(&format!("http://127.0.0.1:{port}")).await;

        assert!(status.dns_check.status);
        assert!(!status.ping_check.status);
        assert!(status.ping_check.message.contains("Network error"));
        assert!(!status.overall_status);
        assert_eq!(status.problem(), status.ping_check.message);
    }

    #[tokio::test]
    async fn probe_fails_dns_for_unresolvable_host() {
        let probe = HealthProbe::default();
        let status = probe.probe("http://host.invalid").await;

        assert!(!status.dns_check.status);
        assert!(status.dns_check.message.contains("DNS resolution"));
        assert!(!status.ping_check.ran(), "ping must be skipped after DNS failure");
        assert!(!status.overall_status);
    }

    #[tokio::test]
    async fn probe_reports_malformed_urls_via_error_message() {
        let probe = HealthProbe::default();
        let status = probe.probe("not a url").await;

        assert!(!status.overall_status);
        assert!(status.error_message.contains("invalid base URL"));
        assert_eq!(status.problem(), status.error_message);
    }

    #[test]
    fn overall_status_follows_both_checks() {
        let both = HealthStatus::new(
            CheckResult::ok(Duration::ZERO),
            CheckResult::ok(Duration::ZERO),
        );
        assert!(both.overall_status);

        let dns_only = HealthStatus::new(
            CheckResult::ok(Duration::ZERO),
            CheckResult::failed("down".into(), Duration::ZERO),
        );
        assert!(!dns_only.overall_status);
    }
}
