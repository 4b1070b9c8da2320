//! End-to-end dispatch scenarios against live mock upstreams.
//!
//! Each test wires a real `FailoverManager` with `ExternalApiService`
//! adapters pointed at wiremock servers, so the full path runs: health
//! probe, cache, pool, rate limiter, HTTP, retry, breaker accounting.

use failover::{
    CircuitBreaker, CircuitState, ExternalApiService, FailoverError, FailoverManager,
    InstantSleeper, InternalService, ManualClock, MetricsSink, Request, RetryPolicy, Service,
    ServiceError,
};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn metrics() -> Arc<MetricsSink> {
    Arc::new(MetricsSink::new().expect("fresh registry"))
}

fn fast_retry(max_attempts: usize) -> RetryPolicy {
    RetryPolicy::builder()
        .max_attempts(max_attempts)
        .expect("max_attempts > 0")
        .base_delay(Duration::from_millis(1))
        .jitter(Duration::ZERO)
        .with_sleeper(InstantSleeper)
        .build()
}

fn upstream(server: &MockServer, tag: &str, sink: Arc<MetricsSink>) -> Arc<ExternalApiService> {
    Arc::new(
        ExternalApiService::builder(server.uri(), "test-key", sink)
            .class_tag(tag)
            .timeout(Duration::from_millis(250))
            .with_sleeper(InstantSleeper)
            .build()
            .expect("client builds"),
    )
}

#[tokio::test]
async fn all_healthy_first_service_wins() {
    init_tracing();
    let s1_server = MockServer::start().await;
    let s2_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/x"))
        .and(query_param("q", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .expect(1)
        .mount(&s1_server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("never"))
        .expect(0)
        .mount(&s2_server)
        .await;

    let sink = metrics();
    let s1 = upstream(&s1_server, "s1", sink.clone());
    let s2 = upstream(&s2_server, "s2", sink.clone());
    let mut manager =
        FailoverManager::new(fast_retry(3), CircuitBreaker::new(3, Duration::from_secs(60)));
    manager.register(s1);
    manager.register(s2);

    let body = manager.execute(&Request::get("/x").param("q", "1")).await.unwrap();
    assert_eq!(body, "ok");
    assert_eq!(sink.request_count("s1", "/x", "success"), 1);
    assert_eq!(sink.request_count("s2", "/x", "success"), 0);
}

#[tokio::test]
async fn first_fails_retriably_second_succeeds() {
    let s1_server = MockServer::start().await;
    let s2_server = MockServer::start().await;
    // Slower than the client timeout: every attempt against s1 times out.
    Mock::given(method("GET"))
        .and(path("/x"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("too late")
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&s1_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/x"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok2"))
        .expect(1)
        .mount(&s2_server)
        .await;

    let sink = metrics();
    let s1 = upstream(&s1_server, "s1", sink.clone());
    let s2 = upstream(&s2_server, "s2", sink.clone());
    let s1_id = s1.id();
    let mut manager =
        FailoverManager::new(fast_retry(3), CircuitBreaker::new(3, Duration::from_secs(60)));
    manager.register(s1);
    manager.register(s2);

    let body = manager.execute(&Request::get("/x")).await.unwrap();
    assert_eq!(body, "ok2");

    // Three timed-out attempts count as one terminal failure for the breaker.
    assert_eq!(manager.circuit_breaker().failure_count(s1_id), 1);
    assert_eq!(manager.circuit_breaker().state(s1_id), CircuitState::Closed);
    assert!(sink.error_count("s1", "timeout") >= 3);
}

#[tokio::test]
async fn breaker_trips_then_recovers_half_open() {
    init_tracing();
    let s1_server = MockServer::start().await;
    let s2_server = MockServer::start().await;
    // First two hits on s1 fail with 500, then it recovers.
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(2)
        .mount(&s1_server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("s1-back"))
        .mount(&s1_server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok2"))
        .mount(&s2_server)
        .await;

    let sink = metrics();
    let s1 = upstream(&s1_server, "s1", sink.clone());
    let s2 = upstream(&s2_server, "s2", sink.clone());
    let s1_id = s1.id();

    let clock = ManualClock::new();
    let breaker = CircuitBreaker::new(2, Duration::from_secs(1)).with_clock(clock.clone());
    let mut manager = FailoverManager::new(fast_retry(1), breaker);
    manager.register(s1);
    manager.register(s2);

    // Two failing calls trip s1's breaker at threshold 2.
    assert_eq!(manager.execute(&Request::get("/a")).await.unwrap(), "ok2");
    assert_eq!(manager.execute(&Request::get("/b")).await.unwrap(), "ok2");
    assert_eq!(manager.circuit_breaker().state(s1_id), CircuitState::Open);

    // While open, s1 is skipped outright.
    assert_eq!(manager.execute(&Request::get("/c")).await.unwrap(), "ok2");
    assert_eq!(manager.circuit_breaker().state(s1_id), CircuitState::Open);

    // After the recovery window, s1 is admitted half-open and succeeds.
    clock.advance(1_100);
    assert_eq!(manager.execute(&Request::get("/d")).await.unwrap(), "s1-back");
    assert_eq!(manager.circuit_breaker().state(s1_id), CircuitState::Closed);
    assert_eq!(manager.circuit_breaker().failure_count(s1_id), 0);
}

#[tokio::test]
async fn rate_limited_upstream_is_retried_after_the_hinted_wait() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/x"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "0"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/x"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .expect(1)
        .mount(&server)
        .await;

    let sink = metrics();
    let s1 = upstream(&server, "s1", sink.clone());
    let mut manager =
        FailoverManager::new(fast_retry(3), CircuitBreaker::new(3, Duration::from_secs(60)));
    manager.register(s1);

    let body = manager.execute(&Request::get("/x")).await.unwrap();
    assert_eq!(body, "ok");
    assert!(sink.error_count("s1", "rate_limit") >= 1);
}

#[tokio::test]
async fn cache_hit_skips_the_network_entirely() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .and(query_param("q", "phone"))
        .respond_with(ResponseTemplate::new(200).set_body_string("R"))
        .expect(1)
        .mount(&server)
        .await;

    let sink = metrics();
    let s1 = upstream(&server, "s1", sink.clone());
    let mut manager =
        FailoverManager::new(fast_retry(3), CircuitBreaker::new(3, Duration::from_secs(60)));
    manager.register(s1);

    let request = Request::get("/search").param("q", "phone");
    assert_eq!(manager.execute(&request).await.unwrap(), "R");
    assert_eq!(manager.execute(&request).await.unwrap(), "R");
    assert_eq!(sink.request_count("s1", "/search", "success"), 1);
}

#[tokio::test]
async fn exhausting_every_service_surfaces_the_last_error() {
    let s1_server = MockServer::start().await;
    let s2_server = MockServer::start().await;
    for server in [&s1_server, &s2_server] {
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("too late")
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(server)
            .await;
    }

    let sink = metrics();
    let s1 = upstream(&s1_server, "s1", sink.clone());
    let s2 = upstream(&s2_server, "s2", sink.clone());
    let (s1_id, s2_id) = (s1.id(), s2.id());
    let mut manager =
        FailoverManager::new(fast_retry(2), CircuitBreaker::new(3, Duration::from_secs(60)));
    manager.register(s1);
    manager.register(s2);

    let err = manager.execute(&Request::get("/x")).await.unwrap_err();
    match &err {
        FailoverError::AllServicesFailed { last: Some(last) } => {
            assert!(last.is_retries_exhausted());
            assert!(matches!(
                last.service_error(),
                Some(ServiceError::Timeout { .. })
            ));
        }
        other => panic!("expected AllServicesFailed, got {other:?}"),
    }
    assert!(manager.circuit_breaker().failure_count(s1_id) >= 1);
    assert!(manager.circuit_breaker().failure_count(s2_id) >= 1);
}

#[tokio::test]
async fn post_and_delete_follow_the_wire_format() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/items"))
        .and(wiremock::matchers::body_json(serde_json::json!({"name": "widget"})))
        .respond_with(ResponseTemplate::new(200).set_body_string("created"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/items/1"))
        .respond_with(ResponseTemplate::new(200).set_body_string("deleted"))
        .expect(1)
        .mount(&server)
        .await;

    let sink = metrics();
    let s1 = upstream(&server, "s1", sink.clone());
    let mut manager =
        FailoverManager::new(fast_retry(3), CircuitBreaker::new(3, Duration::from_secs(60)));
    manager.register(s1);

    let created = manager
        .execute(&Request::post("/items").body(serde_json::json!({"name": "widget"})))
        .await
        .unwrap();
    assert_eq!(created, "created");

    let deleted = manager.execute(&Request::delete("/items/1")).await.unwrap();
    assert_eq!(deleted, "deleted");
}

#[tokio::test]
async fn mixed_fleet_falls_back_to_the_internal_adapter() {
    // A dead HTTP upstream backed by a synthetic in-process fallback.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let sink = metrics();
    let dead = Arc::new(
        ExternalApiService::builder(format!("http://127.0.0.1:{port}"), "test-key", sink)
            .class_tag("dead")
            .with_sleeper(InstantSleeper)
            .build()
            .unwrap(),
    );
    let fallback = Arc::new(InternalService::new("https://fallback.internal"));

    let mut manager =
        FailoverManager::new(fast_retry(2), CircuitBreaker::new(3, Duration::from_secs(60)));
    manager.register(dead.clone());
    manager.register(fallback);

    let body = manager.execute(&Request::get("/status")).await.unwrap();
    assert_eq!(
        body,
        "Response from https://fallback.internal/status with method GET"
    );
    assert_eq!(manager.circuit_breaker().failure_count(dead.id()), 1);
}
