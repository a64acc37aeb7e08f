//! AttributionClient against a local fake attribution API.

mod common;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use common::{at, spawn};
use flowlens_core::config::AttributionConfig;
use flowlens_core::{AttributionClient, FetchError, QueryWindow, RetryPolicy};
use flowlens_models::ApiKey;
use serde_json::{Value, json};

const KEY: &str = "el-test-key";

/// Request log shared with handlers
#[derive(Clone, Default)]
struct Hits {
    times: Arc<Mutex<Vec<Instant>>>,
    queries: Arc<Mutex<Vec<HashMap<String, String>>>>,
}

impl Hits {
    fn hit(&self, query: HashMap<String, String>) -> usize {
        self.queries.lock().unwrap().push(query);
        let mut times = self.times.lock().unwrap();
        times.push(Instant::now());
        times.len()
    }

    fn count(&self) -> usize {
        self.times.lock().unwrap().len()
    }

    fn gaps(&self) -> Vec<Duration> {
        let times = self.times.lock().unwrap();
        times.windows(2).map(|w| w[1] - w[0]).collect()
    }
}

fn window() -> QueryWindow {
    QueryWindow::new(at(11, 0), at(12, 0)).unwrap()
}

fn api_record(id: &str, timestamp: &str) -> Value {
    json!({
        "id": id,
        "timestamp": timestamp,
        "entity": "binance",
        "value": 120.5,
        "tags": ["exchange"],
        "is_ofac_sanctioned": 0
    })
}

fn client(addr: SocketAddr, retry: RetryPolicy) -> AttributionClient {
    AttributionClient::new(&AttributionConfig {
        base_url: format!("http://{addr}"),
        page_size: 2,
        retry,
        ..AttributionConfig::new(ApiKey::new(KEY))
    })
    .unwrap()
}

fn fast_retry(base_ms: u64) -> RetryPolicy {
    RetryPolicy {
        max_attempts: 5,
        base_delay: Duration::from_millis(base_ms),
        max_delay: Duration::from_secs(2),
        jitter: true,
    }
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == KEY)
}

async fn rate_limited_three_times(
    State(hits): State<Hits>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    if hits.hit(query) <= 3 {
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({"message": "rate limit exceeded"})),
        )
            .into_response();
    }
    Json(json!({
        "data": [api_record("tx-1", "2024-03-01T11:15:00Z")],
        "next_cursor": null
    }))
    .into_response()
}

#[tokio::test]
async fn rate_limited_requests_back_off_then_succeed() {
    let hits = Hits::default();
    let router = Router::new()
        .route("/attributions", get(rate_limited_three_times))
        .with_state(hits.clone());
    let addr = spawn(router).await;

    let records = client(addr, fast_retry(50))
        .fetch(window())
        .collect_all()
        .await
        .unwrap();

    assert_eq!(records.len(), 1);
    assert_eq!(records[0].id, "tx-1");
    assert_eq!(hits.count(), 4);

    let gaps = hits.gaps();
    assert!(gaps[0] >= Duration::from_millis(50), "{gaps:?}");
    assert!(gaps[1] >= Duration::from_millis(100), "{gaps:?}");
    assert!(gaps[2] >= Duration::from_millis(200), "{gaps:?}");
    assert!(gaps[2] > gaps[0], "{gaps:?}");

    // Every retry asked for the same window and page.
    let queries = hits.queries.lock().unwrap();
    assert!(queries.iter().all(|q| q == &queries[0]));
    assert_eq!(queries[0]["start"], "2024-03-01T11:00:00+00:00");
    assert_eq!(queries[0]["end"], "2024-03-01T12:00:00+00:00");
    assert_eq!(queries[0]["limit"], "2");
    assert!(!queries[0].contains_key("cursor"));
}

#[tokio::test]
async fn retry_budget_is_bounded() {
    let hits = Hits::default();
    let router = Router::new()
        .route(
            "/attributions",
            get(|State(hits): State<Hits>| async move {
                hits.hit(HashMap::new());
                StatusCode::SERVICE_UNAVAILABLE
            }),
        )
        .with_state(hits.clone());
    let addr = spawn(router).await;

    let err = client(addr, fast_retry(5))
        .fetch(window())
        .collect_all()
        .await
        .unwrap_err();

    assert!(matches!(err, FetchError::RetriesExhausted { attempts: 5, .. }));
    assert_eq!(err.kind(), "UpstreamError");
    assert_eq!(hits.count(), 5);
}

#[tokio::test]
async fn unauthorized_is_not_retried() {
    let hits = Hits::default();
    let router = Router::new()
        .route(
            "/attributions",
            get(|State(hits): State<Hits>| async move {
                hits.hit(HashMap::new());
                (StatusCode::UNAUTHORIZED, Json(json!({"message": "Invalid API key"})))
            }),
        )
        .with_state(hits.clone());
    let addr = spawn(router).await;

    let err = client(addr, fast_retry(5))
        .fetch(window())
        .collect_all()
        .await
        .unwrap_err();

    match &err {
        FetchError::Auth { status, message } => {
            assert_eq!(*status, 401);
            assert_eq!(message, "Invalid API key");
        }
        other => panic!("expected auth error, got {other:?}"),
    }
    assert_eq!(err.kind(), "AuthError");
    assert_eq!(hits.count(), 1);
}

#[tokio::test]
async fn bad_request_is_a_configuration_error() {
    let hits = Hits::default();
    let router = Router::new()
        .route(
            "/attributions",
            get(|State(hits): State<Hits>| async move {
                hits.hit(HashMap::new());
                (StatusCode::BAD_REQUEST, "limit must be <= 1000")
            }),
        )
        .with_state(hits.clone());
    let addr = spawn(router).await;

    let err = client(addr, fast_retry(5))
        .fetch(window())
        .collect_all()
        .await
        .unwrap_err();

    assert!(matches!(err, FetchError::Configuration { status: 400, .. }));
    assert_eq!(err.kind(), "ConfigurationError");
    assert_eq!(hits.count(), 1);
}

#[tokio::test]
async fn malformed_body_is_not_retried() {
    let hits = Hits::default();
    let router = Router::new()
        .route(
            "/attributions",
            get(|State(hits): State<Hits>| async move {
                hits.hit(HashMap::new());
                "<html>maintenance</html>"
            }),
        )
        .with_state(hits.clone());
    let addr = spawn(router).await;

    let err = client(addr, fast_retry(5))
        .fetch(window())
        .collect_all()
        .await
        .unwrap_err();

    assert!(matches!(err, FetchError::Decode(_)));
    assert_eq!(hits.count(), 1);
}

#[tokio::test]
async fn retry_after_header_raises_the_delay() {
    let hits = Hits::default();
    let router = Router::new()
        .route(
            "/attributions",
            get(|State(hits): State<Hits>| async move {
                if hits.hit(HashMap::new()) == 1 {
                    return (StatusCode::TOO_MANY_REQUESTS, [("retry-after", "1")], "slow down")
                        .into_response();
                }
                Json(json!({"data": [], "next_cursor": null})).into_response()
            }),
        )
        .with_state(hits.clone());
    let addr = spawn(router).await;

    client(addr, fast_retry(10))
        .fetch(window())
        .collect_all()
        .await
        .unwrap();

    assert_eq!(hits.count(), 2);
    assert!(hits.gaps()[0] >= Duration::from_secs(1));
}

async fn paged(
    State(hits): State<Hits>,
    Query(query): Query<HashMap<String, String>>,
) -> Json<Value> {
    let cursor = query.get("cursor").cloned();
    hits.hit(query);
    match cursor.as_deref() {
        None => Json(json!({
            "data": [
                api_record("tx-1", "2024-03-01T11:01:00Z"),
                api_record("tx-2", "2024-03-01T11:02:00Z")
            ],
            "next_cursor": "page-2"
        })),
        Some("page-2") => Json(json!({
            "data": [
                api_record("tx-3", "2024-03-01T11:03:00Z"),
                // Outside the window; the client drops it.
                api_record("tx-late", "2024-03-01T12:00:00Z")
            ],
            "next_cursor": null
        })),
        Some(other) => panic!("unexpected cursor {other}"),
    }
}

#[tokio::test]
async fn pages_are_followed_until_the_cursor_ends() {
    let hits = Hits::default();
    let router = Router::new()
        .route("/attributions", get(paged))
        .with_state(hits.clone());
    let addr = spawn(router).await;
    let client = client(addr, fast_retry(5));

    let mut pages = client.fetch(window());
    let first = pages.next_page().await.unwrap().unwrap();
    assert_eq!(first.len(), 2);
    assert_eq!(pages.cursor(), Some("page-2"));

    let second = pages.next_page().await.unwrap().unwrap();
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].id, "tx-3");
    assert!(pages.next_page().await.unwrap().is_none());
    assert_eq!(pages.pages_fetched(), 2);
    assert_eq!(hits.count(), 2);
}

#[tokio::test]
async fn resume_starts_from_saved_cursor() {
    let hits = Hits::default();
    let router = Router::new()
        .route("/attributions", get(paged))
        .with_state(hits.clone());
    let addr = spawn(router).await;

    let records = client(addr, fast_retry(5))
        .resume(window(), "page-2".to_string())
        .collect_all()
        .await
        .unwrap();

    assert_eq!(records.len(), 1);
    assert_eq!(hits.queries.lock().unwrap()[0]["cursor"], "page-2");
}

#[tokio::test]
async fn address_lookup_posts_addresses() {
    let seen = Arc::new(Mutex::new(Vec::<Value>::new()));
    let router = Router::new()
        .route(
            "/address-attributions",
            post(
                |State(seen): State<Arc<Mutex<Vec<Value>>>>, headers: HeaderMap, Json(body): Json<Value>| async move {
                    if authorized(&headers) {
                        seen.lock().unwrap().push(body);
                    }
                    Json(json!({
                        "data": {
                            "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa": {
                                "entity": "satoshi",
                                "custodian": null,
                                "is_ofac_sanctioned": 0,
                                "wallet_id": "w-1"
                            },
                            "bc1qsanctioned": {
                                "entity": "garantex",
                                "is_ofac_sanctioned": 1,
                                "sdn_name": "GARANTEX EUROPE OU"
                            }
                        }
                    }))
                },
            ),
        )
        .with_state(seen.clone());
    let addr = spawn(router).await;

    let addresses = vec![
        "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa".to_string(),
        "bc1qsanctioned".to_string(),
    ];
    let result = client(addr, fast_retry(5))
        .address_attributions(&addresses)
        .await
        .unwrap();

    assert_eq!(seen.lock().unwrap().len(), 1);
    assert_eq!(result.len(), 2);
    assert!(result["bc1qsanctioned"].is_sanctioned());
    assert!(!result["1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa"].is_sanctioned());
    assert_eq!(
        seen.lock().unwrap()[0]["addresses"],
        json!(["1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa", "bc1qsanctioned"])
    );
}

#[tokio::test]
async fn health_probe() {
    let router = Router::new().route("/health", get(|| async { StatusCode::OK }));
    let addr = spawn(router).await;
    client(addr, fast_retry(5)).check_health().await.unwrap();

    let router = Router::new().route("/health", get(|| async { StatusCode::BAD_GATEWAY }));
    let addr = spawn(router).await;
    let err = client(addr, RetryPolicy::none())
        .check_health()
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "UpstreamError");
}
