//! Flat configuration for the dispatch engine.
//!
//! Values come from any serde source (a config file deserialized by the
//! driver) and can be overlaid with environment variables named after the
//! upper-snake keys. Every component also has explicit constructors, so this
//! layer stays at the edge of the system.

use crate::circuit_breaker::CircuitBreaker;
use crate::retry::RetryPolicy;
use serde::Deserialize;
use std::time::Duration;

fn default_api_key() -> String {
    "your_api_key".to_string()
}
fn default_max_attempts() -> usize {
    3
}
fn default_base_delay() -> f64 {
    1.0
}
fn default_jitter() -> f64 {
    0.5
}
fn default_failure_threshold() -> u32 {
    3
}
fn default_recovery_time() -> u64 {
    60
}
fn default_timeout() -> u64 {
    5
}
fn default_retry_after() -> u64 {
    60
}
fn default_cache_ttl() -> u64 {
    300
}
fn default_pool_max_size() -> usize {
    10
}
fn default_rate_limit() -> u32 {
    5
}
fn default_rate_limit_period() -> f64 {
    1.0
}
fn default_delay_threshold() -> f64 {
    1.0
}

#[derive(Debug, Clone, Deserialize)]
pub struct FailoverConfig {
    #[serde(default = "default_api_key")]
    pub api_key: String,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
    /// Seconds; base of the exponential retry backoff.
    #[serde(default = "default_base_delay")]
    pub base_delay: f64,
    /// Seconds; upper bound of the uniform jitter added per retry.
    #[serde(default = "default_jitter")]
    pub jitter: f64,
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Seconds the breaker stays open before a half-open probe.
    #[serde(default = "default_recovery_time")]
    pub recovery_time: u64,
    /// Seconds; overall HTTP request timeout, also used by the health probe.
    #[serde(default = "default_timeout")]
    pub default_timeout: u64,
    /// Seconds to wait on a 429 without a Retry-After header.
    #[serde(default = "default_retry_after")]
    pub default_retry_after: u64,
    /// Seconds a cached response stays live.
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl: u64,
    #[serde(default = "default_pool_max_size")]
    pub pool_max_size: usize,
    /// Tokens per rate-limit period.
    #[serde(default = "default_rate_limit")]
    pub rate_limit: u32,
    /// Seconds per rate-limit period.
    #[serde(default = "default_rate_limit_period")]
    pub rate_limit_period: f64,
    /// Seconds of ping latency above which a host counts as unhealthy.
    #[serde(default = "default_delay_threshold")]
    pub delay_threshold: f64,
    /// Upstream base URLs in priority order (SERVICE1_BASE_URL, ...).
    #[serde(default)]
    pub service_base_urls: Vec<String>,
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            api_key: default_api_key(),
            max_attempts: default_max_attempts(),
            base_delay: default_base_delay(),
            jitter: default_jitter(),
            failure_threshold: default_failure_threshold(),
            recovery_time: default_recovery_time(),
            default_timeout: default_timeout(),
            default_retry_after: default_retry_after(),
            cache_ttl: default_cache_ttl(),
            pool_max_size: default_pool_max_size(),
            rate_limit: default_rate_limit(),
            rate_limit_period: default_rate_limit_period(),
            delay_threshold: default_delay_threshold(),
            service_base_urls: Vec::new(),
        }
    }
}

impl FailoverConfig {
    /// Defaults overlaid with any environment variables that are set.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        overlay_string("API_KEY", &mut config.api_key);
        overlay_parsed("MAX_ATTEMPTS", &mut config.max_attempts);
        overlay_parsed("BASE_DELAY", &mut config.base_delay);
        overlay_parsed("JITTER", &mut config.jitter);
        overlay_parsed("FAILURE_THRESHOLD", &mut config.failure_threshold);
        overlay_parsed("RECOVERY_TIME", &mut config.recovery_time);
        overlay_parsed("DEFAULT_TIMEOUT", &mut config.default_timeout);
        overlay_parsed("DEFAULT_RETRY_AFTER", &mut config.default_retry_after);
        overlay_parsed("DEFAULT_TTL", &mut config.cache_ttl);
        overlay_parsed("DEFAULT_MAX_SIZE", &mut config.pool_max_size);
        overlay_parsed("RATE_LIMIT", &mut config.rate_limit);
        overlay_parsed("RATE_LIMIT_PERIOD", &mut config.rate_limit_period);
        overlay_parsed("DELAY_THRESHOLD", &mut config.delay_threshold);

        let mut index = 1;
        while let Ok(url) = std::env::var(format!("SERVICE{index}_BASE_URL")) {
            config.service_base_urls.push(url);
            index += 1;
        }
        config
    }

    pub fn base_delay_duration(&self) -> Duration {
        Duration::from_secs_f64(self.base_delay.max(0.0))
    }

    pub fn jitter_duration(&self) -> Duration {
        Duration::from_secs_f64(self.jitter.max(0.0))
    }

    pub fn recovery_time_duration(&self) -> Duration {
        Duration::from_secs(self.recovery_time)
    }

    pub fn timeout_duration(&self) -> Duration {
        Duration::from_secs(self.default_timeout)
    }

    pub fn retry_after_duration(&self) -> Duration {
        Duration::from_secs(self.default_retry_after)
    }

    pub fn cache_ttl_duration(&self) -> Duration {
        Duration::from_secs(self.cache_ttl)
    }

    pub fn rate_limit_period_duration(&self) -> Duration {
        Duration::from_secs_f64(self.rate_limit_period.max(0.001))
    }

    pub fn delay_threshold_duration(&self) -> Duration {
        Duration::from_secs_f64(self.delay_threshold.max(0.0))
    }

    /// Retry policy configured from this record.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::builder()
            .max_attempts(self.max_attempts.max(1))
            .expect("max_attempts clamped to >= 1")
            .base_delay(self.base_delay_duration())
            .jitter(self.jitter_duration())
            .build()
    }

    /// Circuit breaker configured from this record.
    pub fn circuit_breaker(&self) -> CircuitBreaker {
        CircuitBreaker::new(self.failure_threshold, self.recovery_time_duration())
    }
}

fn overlay_string(key: &str, field: &mut String) {
    if let Ok(value) = std::env::var(key) {
        *field = value;
    }
}

fn overlay_parsed<T: std::str::FromStr>(key: &str, field: &mut T) {
    if let Ok(raw) = std::env::var(key) {
        match raw.parse() {
            Ok(value) => *field = value,
            Err(_) => {
                tracing::warn!(key, raw = %raw, "ignoring unparsable configuration override")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_configuration_table() {
        let config = FailoverConfig::default();
        assert_eq!(config.api_key, "your_api_key");
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.base_delay, 1.0);
        assert_eq!(config.jitter, 0.5);
        assert_eq!(config.failure_threshold, 3);
        assert_eq!(config.recovery_time, 60);
        assert_eq!(config.default_timeout, 5);
        assert_eq!(config.default_retry_after, 60);
        assert_eq!(config.cache_ttl, 300);
        assert_eq!(config.pool_max_size, 10);
        assert_eq!(config.rate_limit, 5);
        assert_eq!(config.rate_limit_period, 1.0);
        assert_eq!(config.delay_threshold, 1.0);
        assert!(config.service_base_urls.is_empty());
    }

    #[test]
    fn deserializes_with_partial_keys() {
        let config: FailoverConfig = serde_json::from_str(
            r#"{"max_attempts": 5, "rate_limit": 20, "service_base_urls": ["http://a", "http://b"]}"#,
        )
        .unwrap();
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.rate_limit, 20);
        assert_eq!(config.service_base_urls, vec!["http://a", "http://b"]);
        // Untouched keys keep their defaults.
        assert_eq!(config.failure_threshold, 3);
    }

    #[test]
    fn duration_helpers_convert_seconds() {
        let config = FailoverConfig::default();
        assert_eq!(config.timeout_duration(), Duration::from_secs(5));
        assert_eq!(config.cache_ttl_duration(), Duration::from_secs(300));
        assert_eq!(config.jitter_duration(), Duration::from_millis(500));
    }

    #[test]
    fn factories_build_configured_components() {
        let config = FailoverConfig {
            max_attempts: 4,
            failure_threshold: 7,
            ..FailoverConfig::default()
        };
        assert_eq!(config.retry_policy().max_attempts(), 4);
        // The breaker tolerates failure_threshold - 1 failures.
        let breaker = config.circuit_breaker();
        let id = crate::service::ServiceId::next();
        for _ in 0..6 {
            breaker.record_failure(id);
        }
        assert_eq!(breaker.state(id), crate::circuit_breaker::CircuitState::Closed);
        breaker.record_failure(id);
        assert_eq!(breaker.state(id), crate::circuit_breaker::CircuitState::Open);
    }
}
