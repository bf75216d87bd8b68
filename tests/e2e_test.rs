//! End-to-end tests for complete request workflows.
//!
//! Exercises the full system from HTTP submission through background work,
//! callback delivery with retries, and retention cleanup, all against a
//! SQLite-backed store.

use std::{sync::Arc, time::Duration};

use anyhow::Result;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use courier_api::{create_router, AppState};
use courier_core::{
    HashWorkExecutor, RequestId, RequestStatus, SqliteStatusStore, StatusStore, TestClock,
};
use courier_delivery::{DeliveryConfig, RetryPolicy, SsrfPolicy, WorkerPool};
use serde_json::{json, Value};
use tower::ServiceExt;
use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

struct Env {
    router: Router,
    store: Arc<SqliteStatusStore>,
    pool: Arc<WorkerPool>,
    clock: TestClock,
}

impl Env {
    async fn new() -> Result<Self> {
        let store = Arc::new(SqliteStatusStore::in_memory().await?);
        let clock = TestClock::new();
        let config = DeliveryConfig {
            worker_count: 2,
            queue_capacity: 8,
            poll_interval: Duration::from_millis(20),
            shutdown_timeout: Duration::from_secs(5),
            retry_policy: RetryPolicy {
                max_retries: 3,
                base_delay: Duration::from_secs(1),
                max_delay: Duration::from_secs(30),
            },
            ssrf_policy: SsrfPolicy::permissive(),
            ..DeliveryConfig::default()
        };
        let executor = Arc::new(HashWorkExecutor);
        let pool = Arc::new(WorkerPool::new(
            config,
            store.clone(),
            executor.clone(),
            Arc::new(clock.clone()),
        )?);
        pool.start();

        let state = AppState::new(store.clone(), pool.clone(), executor, Arc::new(clock.clone()))
            .with_retention(Duration::from_secs(24 * 3600));

        Ok(Self { router: create_router(state), store, pool, clock })
    }

    async fn call(&self, request: Request<Body>) -> Result<(StatusCode, Value)> {
        let response = self.router.clone().oneshot(request).await?;
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
        Ok((status, serde_json::from_slice(&bytes)?))
    }

    async fn post(&self, uri: &str, body: Value) -> Result<(StatusCode, Value)> {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))?;
        self.call(request).await
    }

    async fn wait_for_terminal(&self, id: &RequestId) -> Result<courier_core::RequestRecord> {
        for _ in 0..500 {
            if let Some(record) = self.store.get(id).await? {
                if record.status.is_terminal() {
                    return Ok(record);
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        anyhow::bail!("request {id} never reached a terminal status")
    }
}

fn request_id(body: &Value) -> RequestId {
    RequestId::from(body["request_id"].as_str().expect("response carries request_id"))
}

/// The golden path: async submission, two failed callbacks, then success.
#[tokio::test]
async fn async_request_delivered_after_retries() -> Result<()> {
    let env = Env::new().await?;
    let receiver = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .expect(2)
        .mount(&receiver)
        .await;
    Mock::given(matchers::method("POST"))
        .and(matchers::header("X-Attempt", "3"))
        .and(matchers::body_partial_json(json!({ "status": "success" })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&receiver)
        .await;

    let (status, body) = env
        .post(
            "/async",
            json!({ "data": "invoice-42", "iterations": 50, "callback_url": receiver.uri() }),
        )
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "accepted");

    let record = env.wait_for_terminal(&request_id(&body)).await?;
    assert_eq!(record.status, RequestStatus::CallbackSuccess);
    assert_eq!(record.callback_attempts, 2);
    assert_eq!(record.callback_last_error.as_deref(), Some("HTTP 503"));
    assert_eq!(record.result.as_ref().map(|r| r.iterations), Some(50));
    assert_eq!(env.clock.recorded_sleeps().len(), 2);

    env.pool.shutdown().await?;
    Ok(())
}

/// A receiver that never succeeds exhausts the retry budget.
#[tokio::test]
async fn async_request_fails_after_retry_budget() -> Result<()> {
    let env = Env::new().await?;
    let receiver = MockServer::start().await;
    Mock::given(matchers::any())
        .respond_with(ResponseTemplate::new(500))
        .expect(4)
        .mount(&receiver)
        .await;

    let (_, body) = env
        .post("/async", json!({ "data": "doomed", "callback_url": receiver.uri() }))
        .await?;

    let record = env.wait_for_terminal(&request_id(&body)).await?;
    assert_eq!(record.status, RequestStatus::CallbackFailed);
    assert_eq!(record.callback_attempts, 4);
    assert_eq!(record.callback_last_error.as_deref(), Some("Max retries exceeded: HTTP 500"));
    assert!(record.result.is_some());

    env.pool.shutdown().await?;
    Ok(())
}

/// Sync and async records share one store and are listed together.
#[tokio::test]
async fn sync_and_async_records_are_listed_together() -> Result<()> {
    let env = Env::new().await?;
    let receiver = MockServer::start().await;
    Mock::given(matchers::any()).respond_with(ResponseTemplate::new(204)).mount(&receiver).await;

    let (status, sync_body) = env.post("/sync", json!({ "data": "inline", "iterations": 5 })).await?;
    assert_eq!(status, StatusCode::OK);

    let (_, async_body) = env
        .post("/async", json!({ "data": "queued", "iterations": 5, "callback_url": receiver.uri() }))
        .await?;
    env.wait_for_terminal(&request_id(&async_body)).await?;

    let list = Request::builder().uri("/requests").body(Body::empty())?;
    let (status, body) = env.call(list).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 2);

    let sync_only = Request::builder().uri("/requests?mode=sync").body(Body::empty())?;
    let (_, body) = env.call(sync_only).await?;
    assert_eq!(body["total"], 1);
    assert_eq!(body["requests"][0]["id"], sync_body["result"]["request_id"]);
    assert_eq!(body["requests"][0]["status"], "completed");

    env.pool.shutdown().await?;
    Ok(())
}

/// Cleanup removes records once they age past the retention window.
#[tokio::test]
async fn cleanup_reaps_records_after_retention() -> Result<()> {
    let env = Env::new().await?;

    env.post("/sync", json!({ "data": "old news" })).await?;
    env.clock.advance(Duration::from_secs(25 * 3600));
    env.post("/sync", json!({ "data": "fresh" })).await?;

    let (status, body) = env.post("/admin/cleanup", json!({})).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deleted"], 1);

    let list = Request::builder().uri("/requests").body(Body::empty())?;
    let (_, body) = env.call(list).await?;
    assert_eq!(body["total"], 1);

    env.pool.shutdown().await?;
    Ok(())
}

/// Health reflects store reachability end to end.
#[tokio::test]
async fn health_turns_unhealthy_when_store_closes() -> Result<()> {
    let env = Env::new().await?;

    let healthz = || Request::builder().uri("/healthz").body(Body::empty());
    let (status, body) = env.call(healthz()?).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["database_ok"], true);

    env.pool.shutdown().await?;
    env.store.close().await;

    let (status, body) = env.call(healthz()?).await?;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "unhealthy");
    Ok(())
}
