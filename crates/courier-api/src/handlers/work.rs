//! Work submission handlers.
//!
//! `/sync` computes inline and answers with the result. `/async` persists a
//! pending record, enqueues the job, and acknowledges immediately; the
//! result is later POSTed to the caller's callback URL.

use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use courier_core::{
    AsyncWorkPayload, Job, RequestId, RequestMode, RequestRecord, RequestStatus, WorkPayload,
    WorkResult,
};
use serde::Serialize;
use tracing::{error, info, instrument, warn};

use crate::{error::ApiError, server::AppState};

const OVERLOADED_RECORD_ERROR: &str = "Server overloaded - queue full";
const ACCEPTED_MESSAGE: &str = "Request accepted and queued for processing";

/// Response for a completed `/sync` request.
#[derive(Debug, Serialize)]
pub struct SyncResponse {
    /// Always `"success"`.
    pub status: &'static str,
    /// Computed result.
    pub result: WorkResult,
}

/// Acknowledgement for an accepted `/async` request.
#[derive(Debug, Serialize)]
pub struct AsyncAckResponse {
    /// Always `"accepted"`.
    pub status: &'static str,
    /// Id to poll via `/requests/{request_id}`.
    pub request_id: RequestId,
    /// Human-readable note.
    pub message: &'static str,
}

/// Runs the work inline and returns the result.
///
/// # Errors
///
/// - 422: payload failed validation
/// - 500: the executor or the store failed; the record ends `failed`
#[instrument(name = "process_sync", skip_all)]
pub async fn process_sync(
    State(state): State<AppState>,
    payload: Result<Json<WorkPayload>, JsonRejection>,
) -> Result<Json<SyncResponse>, ApiError> {
    let Json(payload) = payload.map_err(|rejection| ApiError::Validation(rejection.body_text()))?;
    payload.validate()?;

    let request_id = RequestId::new();
    let mut record = RequestRecord::new(
        request_id.clone(),
        RequestMode::Sync,
        RequestStatus::Processing,
        &payload.data,
        state.clock.now_utc(),
    );
    state.store.save(&record).await?;

    info!(request_id = %request_id, iterations = payload.iterations, "processing sync request");

    let executor = state.executor.clone();
    let id = request_id.clone();
    let outcome = tokio::task::spawn_blocking(move || executor.execute(&id, &payload)).await;

    let failure = match outcome {
        Ok(Ok(result)) => {
            record.status = RequestStatus::Completed;
            record.completed_at = Some(state.clock.now_utc());
            record.result = Some(result.clone());
            state.store.save(&record).await.map_err(|e| ApiError::Internal {
                message: e.to_string(),
                request_id: Some(request_id.clone()),
            })?;
            return Ok(Json(SyncResponse { status: "success", result }));
        },
        Ok(Err(e)) => e.to_string(),
        Err(join_error) if join_error.is_panic() => "work executor panicked".to_string(),
        Err(join_error) => join_error.to_string(),
    };

    error!(request_id = %request_id, error = %failure, "sync request failed");
    record.fail(RequestStatus::Failed, failure.clone());
    if let Err(e) = state.store.save(&record).await {
        error!(request_id = %request_id, error = %e, "failed to record sync failure");
    }

    Err(ApiError::Internal { message: failure, request_id: Some(request_id) })
}

/// Accepts work for background processing and callback delivery.
///
/// # Errors
///
/// - 422: payload failed validation
/// - 503: the job queue is full; the record ends `failed`
/// - 500: the store failed
#[instrument(name = "process_async", skip_all)]
pub async fn process_async(
    State(state): State<AppState>,
    payload: Result<Json<AsyncWorkPayload>, JsonRejection>,
) -> Result<Json<AsyncAckResponse>, ApiError> {
    let Json(payload) = payload.map_err(|rejection| ApiError::Validation(rejection.body_text()))?;
    payload.validate()?;

    let request_id = RequestId::new();
    let mut record = RequestRecord::new(
        request_id.clone(),
        RequestMode::Async,
        RequestStatus::Pending,
        &payload.data,
        state.clock.now_utc(),
    )
    .with_callback_url(payload.callback_url.clone());
    state.store.save(&record).await?;

    if !state.pool.enqueue(Job::from_async(request_id.clone(), &payload)) {
        warn!(request_id = %request_id, "rejecting async request, queue full");
        record.fail(RequestStatus::Failed, OVERLOADED_RECORD_ERROR);
        if let Err(e) = state.store.save(&record).await {
            error!(request_id = %request_id, error = %e, "failed to record queue rejection");
        }
        return Err(ApiError::Overloaded { request_id });
    }

    info!(request_id = %request_id, "async request queued");

    Ok(Json(AsyncAckResponse { status: "accepted", request_id, message: ACCEPTED_MESSAGE }))
}
