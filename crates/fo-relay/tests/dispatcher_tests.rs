//! Dispatcher Integration Tests
//!
//! End-to-end broadcasts against mocked backends:
//! - Single endpoint, racing endpoints, refused connections
//! - Exactly one call per endpoint
//! - Selection strategies
//! - Per-call timeout and empty endpoint sets
//! - Dropping a broadcast cancels its in-flight calls

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Method;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use wiremock::matchers::{body_string, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use fo_common::{BroadcastRequest, DispatchJob, SelectionPolicy, ServiceEndpoint};
use fo_relay::{DispatchError, Dispatcher, HttpRelay, HttpRelayConfig, Relay, RelayError, RelayResponse};

fn endpoint_of(server: &MockServer) -> ServiceEndpoint {
    let addr = server.address();
    ServiceEndpoint::new(addr.ip().to_string(), addr.port())
}

fn refused_endpoint() -> ServiceEndpoint {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    ServiceEndpoint::new("127.0.0.1", port)
}

fn dispatcher() -> Dispatcher {
    Dispatcher::new(Arc::new(HttpRelay::new().unwrap()))
}

fn post(path: &str, body: &'static str) -> BroadcastRequest {
    BroadcastRequest::new(Method::POST, path, Bytes::from_static(body.as_bytes()))
}

async fn backend(body: &str, delay: Duration) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(body)
                .set_delay(delay),
        )
        .expect(1)
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn test_single_endpoint() {
    let server = backend("OK", Duration::ZERO).await;

    let outcome = dispatcher()
        .dispatch(post("/hook", "ping"), vec![endpoint_of(&server)])
        .await
        .unwrap();

    assert_eq!(outcome.body, "OK");
    assert_eq!(outcome.status, Some(200));
    assert_eq!(outcome.total, 1);
    assert_eq!(outcome.failed, 0);
}

#[tokio::test]
async fn test_last_completed_wins() {
    let fast = backend("A", Duration::from_millis(10)).await;
    let slow = backend("B", Duration::from_millis(50)).await;

    let outcome = dispatcher()
        .dispatch(post("/hook", "ping"), vec![endpoint_of(&slow), endpoint_of(&fast)])
        .await
        .unwrap();

    assert_eq!(outcome.body, "B");
    assert_eq!(outcome.selected, 0);
    assert_eq!(outcome.total, 2);
}

#[tokio::test]
async fn test_refused_endpoint_is_not_an_error() {
    let server = backend("A", Duration::ZERO).await;

    let outcome = dispatcher()
        .dispatch(post("/hook", "ping"), vec![refused_endpoint(), endpoint_of(&server)])
        .await
        .unwrap();

    assert!(outcome.body == "A" || outcome.body.is_empty());
    assert_eq!(outcome.total, 2);
    assert_eq!(outcome.failed, 1);
}

#[tokio::test]
async fn test_all_endpoints_failing_yields_empty_body() {
    let outcome = dispatcher()
        .dispatch(
            post("/hook", "ping"),
            vec![refused_endpoint(), refused_endpoint(), refused_endpoint()],
        )
        .await
        .unwrap();

    assert!(outcome.body.is_empty());
    assert_eq!(outcome.failed, 3);
    assert_eq!(outcome.status, None);
}

#[tokio::test]
async fn test_one_call_per_endpoint() {
    let mut servers = Vec::new();
    for i in 0..12 {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/events"))
            .and(body_string("payload"))
            .respond_with(ResponseTemplate::new(200).set_body_string(format!("r{}", i)))
            .expect(1)
            .mount(&server)
            .await;
        servers.push(server);
    }

    let endpoints = servers.iter().map(endpoint_of).collect();
    let outcome = dispatcher()
        .with_pool_size(4)
        .dispatch(post("/events", "payload"), endpoints)
        .await
        .unwrap();

    assert_eq!(outcome.total, 12);
    assert_eq!(outcome.body, format!("r{}", outcome.selected));
    // MockServer verifies `.expect(1)` on drop
}

#[tokio::test]
async fn test_no_endpoints() {
    let result = dispatcher().dispatch(post("/hook", "ping"), Vec::new()).await;
    assert!(matches!(result, Err(DispatchError::NoEndpoints)));
}

#[tokio::test]
async fn test_first_success_strategy() {
    let failing = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("broken"))
        .mount(&failing)
        .await;
    let healthy = backend("healthy", Duration::from_millis(20)).await;

    let outcome = dispatcher()
        .with_selection(SelectionPolicy::FirstSuccess)
        .dispatch(
            post("/hook", "ping"),
            vec![endpoint_of(&healthy), endpoint_of(&failing), refused_endpoint()],
        )
        .await
        .unwrap();

    assert_eq!(outcome.body, "healthy");
    assert_eq!(outcome.selected, 0);
}

#[tokio::test]
async fn test_all_strategy() {
    let a = backend("A", Duration::ZERO).await;
    let b = backend("B", Duration::ZERO).await;

    let outcome = dispatcher()
        .with_selection(SelectionPolicy::All)
        .dispatch(post("/hook", "ping"), vec![endpoint_of(&a), endpoint_of(&b)])
        .await
        .unwrap();
    assert!(outcome.body == "A" || outcome.body == "B");

    let c = backend("C", Duration::ZERO).await;
    let result = dispatcher()
        .with_selection(SelectionPolicy::All)
        .dispatch(post("/hook", "ping"), vec![endpoint_of(&c), refused_endpoint()])
        .await;
    assert!(matches!(
        result,
        Err(DispatchError::PartialFailure { failed: 1, total: 2 })
    ));
}

#[tokio::test]
async fn test_call_timeout_bounds_broadcast() {
    let hung = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(10)))
        .mount(&hung)
        .await;
    let quick = backend("quick", Duration::ZERO).await;

    let relay = HttpRelay::with_config(HttpRelayConfig {
        call_timeout: Some(Duration::from_millis(200)),
        ..Default::default()
    })
    .unwrap();

    let started = Instant::now();
    let outcome = Dispatcher::new(Arc::new(relay))
        .with_selection(SelectionPolicy::FirstSuccess)
        .dispatch(post("/hook", "ping"), vec![endpoint_of(&hung), endpoint_of(&quick)])
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(outcome.body, "quick");
    assert_eq!(outcome.failed, 1);
}

/// Relay whose calls never finish; counts calls started and call futures dropped.
#[derive(Default)]
struct HangingRelay {
    started: Arc<AtomicUsize>,
    dropped: Arc<AtomicUsize>,
}

struct DropCounter(Arc<AtomicUsize>);

impl Drop for DropCounter {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Relay for HangingRelay {
    async fn relay(&self, _job: &DispatchJob) -> Result<RelayResponse, RelayError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        let _in_flight = DropCounter(self.dropped.clone());
        std::future::pending::<Result<RelayResponse, RelayError>>().await
    }
}

#[tokio::test]
async fn test_dropped_broadcast_cancels_in_flight_calls() {
    let relay = HangingRelay::default();
    let started = relay.started.clone();
    let dropped = relay.dropped.clone();

    let dispatcher = Dispatcher::new(Arc::new(relay)).with_pool_size(2);
    let endpoints = vec![
        ServiceEndpoint::new("10.0.0.1", 80),
        ServiceEndpoint::new("10.0.0.2", 80),
        ServiceEndpoint::new("10.0.0.3", 80),
    ];

    // Caller gives up while both workers are stuck downstream
    let result = tokio::time::timeout(
        Duration::from_millis(100),
        dispatcher.dispatch(post("/hook", "ping"), endpoints),
    )
    .await;
    assert!(result.is_err(), "broadcast should still be waiting");

    tokio::time::timeout(Duration::from_secs(2), async {
        while dropped.load(Ordering::SeqCst) < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("in-flight calls were not cancelled");

    // The queued third job is never started once the broadcast is gone
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(started.load(Ordering::SeqCst), 2);
    assert_eq!(dropped.load(Ordering::SeqCst), 2);
}

#[test]
fn test_zero_pool_size_is_clamped() {
    let dispatcher = dispatcher().with_pool_size(0);
    assert_eq!(dispatcher.pool_size(), 1);
    assert_eq!(dispatcher.selection(), SelectionPolicy::LastCompleted);
}
