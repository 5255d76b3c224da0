use async_trait::async_trait;
use axum::{
    body::Body,
    extract::{ConnectInfo, Request},
    http::{header::RETRY_AFTER, request::Parts, StatusCode},
    response::Response,
    routing::get,
    Router,
};
use http_body_util::BodyExt;
use redis_ratelimit::{
    create_app, Config, CounterStore, FailurePolicy, MemoryStore, RateLimit, RateLimitError,
    RejectionHandler, WindowMode,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_test::assert_ok;
use tower::ServiceExt;

async fn ok() -> &'static str {
    "ok"
}

fn request(path: &str, addr: &str) -> Request {
    let mut request = Request::builder().uri(path).body(Body::empty()).unwrap();
    let addr: SocketAddr = addr.parse().unwrap();
    request.extensions_mut().insert(ConnectInfo(addr));
    request
}

fn app(rate_limit: RateLimit) -> Router {
    let layer = assert_ok!(rate_limit.build());
    Router::new()
        .route("/a", get(ok))
        .route("/b", get(ok))
        .route_layer(layer)
}

/// Demo config built from explicit values, independent of the process
/// environment.
fn config(max_requests: u64, window_secs: u64) -> Config {
    Config {
        max_requests,
        window_secs,
        ..Config::default()
    }
}

async fn send(app: &Router, request: Request) -> Response {
    app.clone().oneshot(request).await.unwrap()
}

/// Store that is never reachable.
struct DownStore;

#[async_trait]
impl CounterStore for DownStore {
    async fn increment(
        &self,
        _key: &str,
        _window_secs: u64,
        _mode: WindowMode,
    ) -> redis_ratelimit::Result<u64> {
        Err(RateLimitError::Store("connection refused".into()))
    }

    async fn ping(&self) -> redis_ratelimit::Result<()> {
        Err(RateLimitError::Store("connection refused".into()))
    }
}

/// Store holding a value that is not a counter.
struct GarbageStore;

#[async_trait]
impl CounterStore for GarbageStore {
    async fn increment(
        &self,
        key: &str,
        _window_secs: u64,
        _mode: WindowMode,
    ) -> redis_ratelimit::Result<u64> {
        Err(RateLimitError::MalformedCount {
            key: key.to_string(),
            value: "bulk(\"abc\")".into(),
        })
    }

    async fn ping(&self) -> redis_ratelimit::Result<()> {
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn test_example_scenario() {
    let app = app(RateLimit::builder()
        .store(MemoryStore::new())
        .max_requests(2)
        .window_secs(10));

    assert_eq!(send(&app, request("/a", "203.0.113.1:1000")).await.status(), StatusCode::OK);
    assert_eq!(send(&app, request("/a", "203.0.113.1:1001")).await.status(), StatusCode::OK);

    let limited = send(&app, request("/a", "203.0.113.1:1002")).await;
    assert_eq!(limited.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(limited.headers()[RETRY_AFTER], "10");
    let body = limited.into_body().collect().await.unwrap().to_bytes();
    assert!(body.is_empty());

    tokio::time::advance(Duration::from_secs(10)).await;

    assert_eq!(send(&app, request("/a", "203.0.113.1:1003")).await.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_requests_past_limit_stay_rejected() {
    let app = app(RateLimit::builder()
        .store(MemoryStore::new())
        .max_requests(3)
        .window_secs(60));

    for i in 0..8 {
        let response = send(&app, request("/a", "198.51.100.4:80")).await;
        if i < 3 {
            assert_eq!(response.status(), StatusCode::OK);
            assert!(response.headers().get(RETRY_AFTER).is_none());
        } else {
            assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
            assert_eq!(response.headers()[RETRY_AFTER], "60");
        }
    }
}

#[tokio::test]
async fn test_identities_and_paths_have_separate_counters() {
    let app = app(RateLimit::builder()
        .store(MemoryStore::new())
        .max_requests(1)
        .window_secs(60));

    assert_eq!(send(&app, request("/a", "198.51.100.1:80")).await.status(), StatusCode::OK);
    assert_eq!(
        send(&app, request("/a", "198.51.100.1:80")).await.status(),
        StatusCode::TOO_MANY_REQUESTS
    );

    assert_eq!(send(&app, request("/a", "198.51.100.2:80")).await.status(), StatusCode::OK);
    assert_eq!(send(&app, request("/b", "198.51.100.1:80")).await.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_clients_behind_trusted_proxy_are_counted_separately() {
    let store = Arc::new(MemoryStore::new());
    let app = app(RateLimit::builder()
        .shared_store(store.clone())
        .max_requests(1)
        .window_secs(60));

    let mut first = request("/a", "172.18.0.2:5000");
    first
        .headers_mut()
        .insert("cf-connecting-ip", "203.0.113.10".parse().unwrap());
    let mut second = request("/a", "172.18.0.2:5000");
    second
        .headers_mut()
        .insert("cf-connecting-ip", "203.0.113.11".parse().unwrap());

    assert_eq!(send(&app, first).await.status(), StatusCode::OK);
    assert_eq!(send(&app, second).await.status(), StatusCode::OK);
    assert_eq!(store.count("ratelimit:/a:203.0.113.10").unwrap(), Some(1));
    assert_eq!(store.count("ratelimit:/a:203.0.113.11").unwrap(), Some(1));
    assert_eq!(store.count("ratelimit:/a:172.18.0.2").unwrap(), None);
}

#[tokio::test]
async fn test_spoofed_headers_from_public_address_are_ignored() {
    let store = Arc::new(MemoryStore::new());
    let app = app(RateLimit::builder()
        .shared_store(store.clone())
        .max_requests(1)
        .window_secs(60));

    for spoofed in ["1.1.1.1", "8.8.8.8"] {
        let mut request = request("/a", "203.0.113.99:4000");
        request
            .headers_mut()
            .insert("cf-connecting-ip", spoofed.parse().unwrap());
        send(&app, request).await;
    }

    assert_eq!(store.count("ratelimit:/a:203.0.113.99").unwrap(), Some(2));
}

#[tokio::test]
async fn test_custom_selector_and_rejection_handler() {
    let app = app(RateLimit::builder()
        .store(MemoryStore::new())
        .max_requests(1)
        .window_secs(30)
        .key_selector(|request: &Request| {
            request
                .headers()
                .get("x-api-key")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("anonymous")
                .to_string()
        })
        .on_rate_limited(|_request: &Parts, response: &mut Response| {
            *response.status_mut() = StatusCode::SERVICE_UNAVAILABLE;
            *response.body_mut() = Body::from("slow down");
        }));

    let keyed = |key: &'static str| {
        let mut request = request("/a", "203.0.113.5:1");
        request.headers_mut().insert("x-api-key", key.parse().unwrap());
        request
    };

    assert_eq!(send(&app, keyed("alpha")).await.status(), StatusCode::OK);
    assert_eq!(send(&app, keyed("beta")).await.status(), StatusCode::OK);

    let rejected = send(&app, keyed("alpha")).await;
    assert_eq!(rejected.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(rejected.headers()[RETRY_AFTER], "30");
    let body = rejected.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"slow down");
}

/// Rejection handler that awaits before answering.
struct RecordingHandler {
    rejected: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl RejectionHandler for RecordingHandler {
    async fn on_rate_limited(&self, request: &Parts, response: &mut Response) {
        self.rejected.lock().await.push(request.uri.path().to_string());
        *response.body_mut() = Body::from("rejected");
    }
}

#[tokio::test]
async fn test_async_rejection_handler() {
    let rejected_paths = Arc::new(Mutex::new(Vec::new()));
    let app = app(RateLimit::builder()
        .store(MemoryStore::new())
        .max_requests(1)
        .window_secs(30)
        .on_rate_limited(RecordingHandler {
            rejected: rejected_paths.clone(),
        }));

    assert_eq!(send(&app, request("/a", "203.0.113.6:1")).await.status(), StatusCode::OK);
    let rejected = send(&app, request("/a", "203.0.113.6:1")).await;
    assert_eq!(rejected.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(rejected.headers()[RETRY_AFTER], "30");
    let body = rejected.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"rejected");

    assert_eq!(*rejected_paths.lock().await, vec!["/a".to_string()]);
}

#[tokio::test]
async fn test_nested_scopes_count_full_paths() {
    let store = Arc::new(MemoryStore::new());
    let scope = || {
        let layer = assert_ok!(RateLimit::builder()
            .shared_store(store.clone())
            .max_requests(1)
            .window_secs(60)
            .build());
        Router::new().route("/items", get(ok)).route_layer(layer)
    };
    let app = Router::new().nest("/v1", scope()).nest("/v2", scope());

    assert_eq!(send(&app, request("/v1/items", "198.51.100.9:1")).await.status(), StatusCode::OK);
    assert_eq!(send(&app, request("/v2/items", "198.51.100.9:1")).await.status(), StatusCode::OK);
    assert_eq!(
        send(&app, request("/v1/items", "198.51.100.9:1")).await.status(),
        StatusCode::TOO_MANY_REQUESTS
    );

    assert_eq!(store.count("ratelimit:/v1/items:198.51.100.9").unwrap(), Some(2));
    assert_eq!(store.count("ratelimit:/v2/items:198.51.100.9").unwrap(), Some(1));
    assert_eq!(store.count("ratelimit:/items:198.51.100.9").unwrap(), None);
}

#[tokio::test]
async fn test_fail_closed_rejects_when_store_is_down() {
    let app = app(RateLimit::builder().store(DownStore));

    let response = send(&app, request("/a", "203.0.113.1:1")).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["error"], "service_unavailable");
    assert_eq!(json["code"], 503);
}

#[tokio::test]
async fn test_fail_open_allows_when_store_is_down() {
    let app = app(RateLimit::builder()
        .store(DownStore)
        .failure_policy(FailurePolicy::FailOpen));

    for _ in 0..20 {
        let response = send(&app, request("/a", "203.0.113.1:1")).await;
        assert_eq!(response.status(), StatusCode::OK);
    }
}

#[tokio::test]
async fn test_malformed_count_fails_loudly_even_when_fail_open() {
    let app = app(RateLimit::builder()
        .store(GarbageStore)
        .failure_policy(FailurePolicy::FailOpen));

    let response = send(&app, request("/a", "203.0.113.1:1")).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_concurrent_requests_admit_exactly_the_limit() {
    let app = app(RateLimit::builder()
        .store(MemoryStore::new())
        .max_requests(10)
        .window_secs(60));

    let handles: Vec<_> = (0..40)
        .map(|_| {
            let app = app.clone();
            tokio::spawn(async move { send(&app, request("/a", "198.51.100.7:9")).await.status() })
        })
        .collect();

    let mut admitted = 0;
    let mut rejected = 0;
    for handle in handles {
        match handle.await.unwrap() {
            StatusCode::OK => admitted += 1,
            StatusCode::TOO_MANY_REQUESTS => rejected += 1,
            other => panic!("unexpected status {}", other),
        }
    }
    assert_eq!(admitted, 10);
    assert_eq!(rejected, 30);
}

#[test]
fn test_missing_store_is_a_configuration_error() {
    let result = RateLimit::builder().max_requests(5).window_secs(5).build();
    assert!(matches!(result, Err(RateLimitError::Configuration(_))));
}

#[tokio::test]
async fn test_demo_app_limits_hello_but_not_health() {
    let config = config(1, 5);
    let app = create_app(Arc::new(MemoryStore::new()), &config).unwrap();

    assert_eq!(send(&app, request("/hello", "203.0.113.8:1")).await.status(), StatusCode::OK);
    let limited = send(&app, request("/hello", "203.0.113.8:1")).await;
    assert_eq!(limited.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(limited.headers()[RETRY_AFTER], "5");

    for _ in 0..3 {
        let health = send(&app, request("/health", "203.0.113.8:1")).await;
        assert_eq!(health.status(), StatusCode::OK);
        let body = health.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "healthy");
    }
}

#[tokio::test]
async fn test_demo_app_health_reports_unreachable_store() {
    let config = config(10, 60);
    let app = create_app(Arc::new(DownStore), &config).unwrap();

    let health = send(&app, request("/health", "203.0.113.8:1")).await;
    assert_eq!(health.status(), StatusCode::SERVICE_UNAVAILABLE);
}
