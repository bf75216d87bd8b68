//! Request record lookup and listing.

use axum::{
    extract::{
        rejection::{PathRejection, QueryRejection},
        Path, Query, State,
    },
    Json,
};
use courier_core::{storage::ListQuery, RequestId, RequestMode, RequestRecord};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::{error::ApiError, server::AppState};

const MAX_LIMIT: u32 = 1000;
const DEFAULT_LIMIT: u32 = 100;

/// Query parameters for `GET /requests`.
#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    /// Only return records submitted in this mode.
    pub mode: Option<RequestMode>,
    /// Page size, 1 to 1000.
    pub limit: Option<u32>,
    /// Records to skip.
    pub offset: Option<u32>,
}

/// Response for `GET /requests`.
#[derive(Debug, Serialize)]
pub struct RequestListResponse {
    /// Records matching the filter, ignoring pagination.
    pub total: u64,
    /// Newest first.
    pub requests: Vec<RequestRecord>,
}

/// Lists records newest first.
///
/// # Errors
///
/// - 422: unknown mode, or limit outside 1..=1000
/// - 500: store failure
#[instrument(name = "list_requests", skip_all)]
pub async fn list_requests(
    State(state): State<AppState>,
    params: Result<Query<ListParams>, QueryRejection>,
) -> Result<Json<RequestListResponse>, ApiError> {
    let Query(params) = params.map_err(|rejection| ApiError::Validation(rejection.body_text()))?;

    let limit = params.limit.unwrap_or(DEFAULT_LIMIT);
    if !(1..=MAX_LIMIT).contains(&limit) {
        return Err(ApiError::Validation(format!("limit must be between 1 and {MAX_LIMIT}")));
    }

    let query = ListQuery { mode: params.mode, limit, offset: params.offset.unwrap_or(0) };
    let page = state.store.list(query).await?;

    debug!(total = page.total, returned = page.records.len(), "listed requests");

    Ok(Json(RequestListResponse { total: page.total, requests: page.records }))
}

/// Returns one record, including result and callback progress.
///
/// # Errors
///
/// - 404: unknown id
/// - 500: store failure
#[instrument(name = "get_request", skip_all)]
pub async fn get_request(
    State(state): State<AppState>,
    request_id: Result<Path<String>, PathRejection>,
) -> Result<Json<RequestRecord>, ApiError> {
    let Path(request_id) =
        request_id.map_err(|rejection| ApiError::Validation(rejection.body_text()))?;
    let request_id = RequestId::from(request_id);

    state.store.get(&request_id).await?.map(Json).ok_or(ApiError::NotFound)
}
