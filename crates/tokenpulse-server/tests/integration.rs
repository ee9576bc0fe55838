use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::StatusCode;
use http_body_util::BodyExt;
use pulse_scheduler::{Scheduler, SchedulerConfig};
use tokenpulse_core::alert::{BroadcastAlertSink, GrowthAlert};
use tokenpulse_core::cache::TtlCache;
use tokenpulse_core::config::{CacheConfig, CategoryTable, FetchConfig, LoopConfig};
use tokenpulse_core::fetch::BatchFetchClient;
use tokenpulse_core::monitor::{MonitorLoop, MONITOR_JOB_ID};
use tokenpulse_core::source::{DataSource, PairData, TokenRef};
use tokenpulse_core::store::MemoryTokenStore;
use tokenpulse_core::strategy::MonitorStrategy;
use tokenpulse_core::types::{Category, TokenState};
use tokenpulse_core::FetchError;
use tokenpulse_server::{build_router, AppState};
use tower::ServiceExt;

const MINT: &str = "So11111111111111111111111111111111111111112";

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

struct EmptySource;

#[async_trait]
impl DataSource for EmptySource {
    async fn fetch(&self, _ids: &[String]) -> Result<Vec<PairData>, FetchError> {
        Ok(Vec::new())
    }
}

/// Lists one pair at a 1.25M valuation for every requested id.
struct ListedSource;

#[async_trait]
impl DataSource for ListedSource {
    async fn fetch(&self, ids: &[String]) -> Result<Vec<PairData>, FetchError> {
        Ok(ids
            .iter()
            .map(|id| PairData {
                base_token: TokenRef {
                    address: id.clone(),
                    name: Some("Wrapped SOL".into()),
                    symbol: Some("SOL".into()),
                },
                price_usd: Some(150.0),
                fdv: Some(1_250_000.0),
                ..Default::default()
            })
            .collect())
    }
}

/// Engine wired with in-memory collaborators; the scheduler is not started.
fn test_state() -> AppState {
    state_with_source(Arc::new(EmptySource))
}

fn state_with_source(source: Arc<dyn DataSource>) -> AppState {
    let cache = Arc::new(TtlCache::new(Duration::from_secs(120)));
    let fetcher = Arc::new(
        BatchFetchClient::new(
            source,
            cache,
            &CacheConfig::default(),
            FetchConfig::default(),
        )
        .unwrap(),
    );
    let alerts = BroadcastAlertSink::new(16);
    let monitor = Arc::new(MonitorLoop::new(
        Arc::new(MemoryTokenStore::new()),
        fetcher,
        Arc::new(MonitorStrategy::new(CategoryTable::default())),
        Arc::new(alerts.clone()),
        LoopConfig::default(),
    ));
    let scheduler = Scheduler::new(SchedulerConfig::default()).unwrap();
    monitor.register(&scheduler).unwrap();
    AppState::new(scheduler, monitor, alerts.sender())
}

/// Send a request via `oneshot` and return (status, parsed JSON body).
async fn send(
    app: axum::Router,
    method: &str,
    uri: &str,
    body: Option<serde_json::Value>,
) -> (StatusCode, serde_json::Value) {
    let builder = axum::http::Request::builder().method(method).uri(uri);
    let req = match body {
        Some(b) => builder
            .header("content-type", "application/json")
            .body(axum::body::Body::from(serde_json::to_vec(&b).unwrap()))
            .unwrap(),
        None => builder.body(axum::body::Body::empty()).unwrap(),
    };
    let response = app.oneshot(req).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
    (status, json)
}

async fn get(app: axum::Router, uri: &str) -> (StatusCode, serde_json::Value) {
    send(app, "GET", uri, None).await
}

async fn post_json(
    app: axum::Router,
    uri: &str,
    body: serde_json::Value,
) -> (StatusCode, serde_json::Value) {
    send(app, "POST", uri, Some(body)).await
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_reports_scheduler_state() {
    let app = build_router(test_state());
    let (status, json) = get(app, "/api/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["scheduler_running"], false);
    assert_eq!(json["pending_jobs"], 1);
    assert_eq!(json["running_jobs"], 0);
}

#[tokio::test]
async fn jobs_lists_monitor_cycle() {
    let app = build_router(test_state());
    let (status, json) = get(app, "/api/jobs").await;
    assert_eq!(status, StatusCode::OK);
    let jobs = json.as_array().unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0]["id"], MONITOR_JOB_ID);
    assert_eq!(jobs[0]["priority"], "high");
    assert_eq!(jobs[0]["interval"], 10_000);
}

#[tokio::test]
async fn cache_stats_start_empty() {
    let app = build_router(test_state());
    let (status, json) = get(app, "/api/cache").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["hits"], 0);
    assert_eq!(json["entries"], 0);
    assert_eq!(json["ttl_secs"], 120);
}

// ---------------------------------------------------------------------------
// Tokens
// ---------------------------------------------------------------------------

#[tokio::test]
async fn track_get_list_untrack() {
    let state = test_state();

    let (status, json) = post_json(
        build_router(state.clone()),
        "/api/tokens",
        serde_json::json!({ "id": MINT, "symbol": "SOL" }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["id"], MINT);
    assert_eq!(json["alert_watermark"], 1);

    let (status, json) = get(build_router(state.clone()), "/api/tokens").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json.as_array().unwrap().len(), 1);

    let (status, json) = get(build_router(state.clone()), &format!("/api/tokens/{MINT}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["symbol"], "SOL");

    let (status, json) = send(
        build_router(state.clone()),
        "DELETE",
        &format!("/api/tokens/{MINT}"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["active"], false);

    let (_, json) = get(build_router(state), "/api/tokens").await;
    assert!(json.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn invalid_identifier_is_400() {
    let app = build_router(test_state());
    let (status, json) = post_json(app, "/api/tokens", serde_json::json!({ "id": "bad id" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().contains("invalid identifier"));
}

#[tokio::test]
async fn empty_identifier_is_400() {
    let app = build_router(test_state());
    let (status, _) = post_json(app, "/api/tokens", serde_json::json!({ "id": "  " })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_token_is_404() {
    let state = test_state();
    let (status, _) = get(build_router(state.clone()), "/api/tokens/nobody").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = send(build_router(state), "DELETE", "/api/tokens/nobody", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn market_lookup_reads_through_the_fetch_client() {
    let state = state_with_source(Arc::new(ListedSource));
    let (status, json) = get(build_router(state.clone()), &format!("/api/tokens/{MINT}/market")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["id"], MINT);
    assert_eq!(json["market"]["symbol"], "SOL");
    assert_eq!(json["market"]["market_cap"], 1_250_000.0);
    assert_eq!(json["market_cap_label"], "$1.25M");

    // The lookup filled the shared cache; a repeat is a hit.
    let (_, json) = get(build_router(state.clone()), &format!("/api/tokens/{MINT}/market")).await;
    assert_eq!(json["market_cap_label"], "$1.25M");
    let (_, stats) = get(build_router(state), "/api/cache").await;
    assert_eq!(stats["entries"], 1);
    assert_eq!(stats["hits"], 1);
}

#[tokio::test]
async fn market_lookup_without_pair_is_null() {
    let app = build_router(test_state());
    let (status, json) = get(app, &format!("/api/tokens/{MINT}/market")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(json["market"].is_null());
    assert_eq!(json["market_cap_label"], "N/A");
}

#[tokio::test]
async fn market_lookup_rejects_invalid_identifier() {
    let app = build_router(test_state());
    let (status, json) = get(app, "/api/tokens/short/market").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().contains("invalid identifier"));
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[tokio::test]
async fn events_stream_growth_alerts() {
    let state = test_state();
    let req = axum::http::Request::builder()
        .uri("/api/events")
        .body(axum::body::Body::empty())
        .unwrap();
    let response = build_router(state.clone()).oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let ct = response
        .headers()
        .get(axum::http::header::CONTENT_TYPE)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(ct.starts_with("text/event-stream"));

    let token = TokenState::new(MINT, chrono::Utc::now());
    let alert = GrowthAlert::new(&token, 2.5, 2, Category::Hot, chrono::Utc::now());
    state.alert_tx.send(alert).unwrap();

    let mut body = response.into_body();
    let frame = tokio::time::timeout(Duration::from_secs(5), body.frame())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let bytes = frame.into_data().unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("event: growth"));
    assert!(text.contains(MINT));
}
