//! Fetch retry behavior against a loopback stub of the source API.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;

use cdim_fetch::{BackoffPolicy, FetchConfig, FetchError, Fetcher};

const COUNTRIES_BODY: &str =
    r#"[{"cca2":"FR","name":{"common":"France"}},{"cca2":"DE","name":{"common":"Germany"}}]"#;

#[derive(Clone)]
struct StubSource {
    hits: Arc<AtomicUsize>,
    failures_before_success: usize,
    failure_status: StatusCode,
    success_body: &'static str,
}

async fn stub_handler(State(state): State<StubSource>) -> Response {
    let hit = state.hits.fetch_add(1, Ordering::SeqCst);
    if hit < state.failures_before_success {
        (state.failure_status, "upstream unavailable").into_response()
    } else {
        (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/json")],
            state.success_body,
        )
            .into_response()
    }
}

async fn spawn_stub(state: StubSource) -> SocketAddr {
    let app = Router::new()
        .route("/v3.1/all", get(stub_handler))
        .with_state(state);
    let listener = TcpListener::bind(("127.0.0.1", 0)).await.expect("bind stub");
    let addr = listener.local_addr().expect("stub addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve stub");
    });
    addr
}

fn fetcher_for(addr: SocketAddr) -> Fetcher {
    Fetcher::new(FetchConfig {
        endpoint: format!("http://{addr}/v3.1/all"),
        timeout: Duration::from_secs(5),
        backoff: BackoffPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
        },
        ..Default::default()
    })
    .expect("building fetcher")
}

#[tokio::test]
async fn recovers_after_transient_statuses() {
    let hits = Arc::new(AtomicUsize::new(0));
    let addr = spawn_stub(StubSource {
        hits: hits.clone(),
        failures_before_success: 3,
        failure_status: StatusCode::SERVICE_UNAVAILABLE,
        success_body: COUNTRIES_BODY,
    })
    .await;

    let payload = fetcher_for(addr).fetch().await.expect("fetch succeeds");
    assert_eq!(payload.data.len(), 2);
    assert_eq!(hits.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn non_retryable_status_fails_on_first_attempt() {
    let hits = Arc::new(AtomicUsize::new(0));
    let addr = spawn_stub(StubSource {
        hits: hits.clone(),
        failures_before_success: usize::MAX,
        failure_status: StatusCode::NOT_FOUND,
        success_body: COUNTRIES_BODY,
    })
    .await;

    let err = fetcher_for(addr).fetch().await.expect_err("404 is fatal");
    assert!(matches!(err, FetchError::Http { status: 404, .. }), "{err}");
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn exhaustion_reports_last_status_and_excerpt() {
    let hits = Arc::new(AtomicUsize::new(0));
    let addr = spawn_stub(StubSource {
        hits: hits.clone(),
        failures_before_success: usize::MAX,
        failure_status: StatusCode::SERVICE_UNAVAILABLE,
        success_body: COUNTRIES_BODY,
    })
    .await;

    let err = fetcher_for(addr).fetch().await.expect_err("retries run out");
    match err {
        FetchError::Exhausted {
            attempts,
            last_status,
            excerpt,
        } => {
            assert_eq!(attempts, 5);
            assert_eq!(last_status, Some(503));
            assert!(excerpt.contains("unavailable"));
        }
        other => panic!("expected Exhausted, got {other}"),
    }
    assert_eq!(hits.load(Ordering::SeqCst), 5);
}

#[tokio::test]
async fn object_body_is_malformed_not_retried() {
    let hits = Arc::new(AtomicUsize::new(0));
    let addr = spawn_stub(StubSource {
        hits: hits.clone(),
        failures_before_success: 0,
        failure_status: StatusCode::OK,
        success_body: r#"{"status":"maintenance"}"#,
    })
    .await;

    let err = fetcher_for(addr).fetch().await.expect_err("object body is fatal");
    assert!(matches!(err, FetchError::MalformedResponse(_)), "{err}");
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}
