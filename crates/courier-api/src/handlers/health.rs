//! Health and maintenance endpoints.

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, instrument};

use crate::{error::ApiError, retention, server::AppState};

/// Queue fill ratio above which the service reports `degraded`.
const DEGRADED_QUEUE_RATIO: f64 = 0.9;

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// All systems operational.
    Healthy,
    /// Serving, but the queue is nearly full.
    Degraded,
    /// The store is unreachable.
    Unhealthy,
}

impl HealthStatus {
    /// Derives the status from store reachability and queue fill.
    pub fn evaluate(database_ok: bool, queue_size: usize, queue_capacity: usize) -> Self {
        if !database_ok {
            Self::Unhealthy
        } else if queue_size as f64 > queue_capacity as f64 * DEGRADED_QUEUE_RATIO {
            Self::Degraded
        } else {
            Self::Healthy
        }
    }
}

/// Response for `GET /healthz`.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Overall status.
    pub status: HealthStatus,
    /// Service version.
    pub version: &'static str,
    /// Jobs waiting in the queue.
    pub queue_size: usize,
    /// Queue capacity.
    pub queue_capacity: usize,
    /// Workers currently processing a job.
    pub active_workers: usize,
    /// Whether the store answered a ping.
    pub database_ok: bool,
    /// When the check ran.
    pub timestamp: DateTime<Utc>,
}

/// Reports store reachability and queue occupancy.
///
/// Answers 503 when the store is unreachable so orchestrators stop routing
/// traffic; `degraded` still answers 200.
#[instrument(name = "health_check", skip_all)]
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let database_ok = match state.store.ping().await {
        Ok(()) => true,
        Err(e) => {
            error!(error = %e, "store health check failed");
            false
        },
    };
    let stats = state.pool.stats();
    let status = HealthStatus::evaluate(database_ok, stats.queue_size, stats.queue_capacity);

    debug!(status = ?status, queue_size = stats.queue_size, "health check completed");

    let code = match status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    let response = HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        queue_size: stats.queue_size,
        queue_capacity: stats.queue_capacity,
        active_workers: stats.active_workers,
        database_ok,
        timestamp: state.clock.now_utc(),
    };

    (code, Json(response))
}

/// Response for `POST /admin/cleanup`.
#[derive(Debug, Serialize)]
pub struct CleanupResponse {
    /// Records removed.
    pub deleted: u64,
}

/// Deletes records older than the retention window immediately.
///
/// # Errors
///
/// - 500: store failure
#[instrument(name = "cleanup_requests", skip_all)]
pub async fn cleanup_requests(
    State(state): State<AppState>,
) -> Result<Json<CleanupResponse>, ApiError> {
    let deleted =
        retention::sweep_expired(state.store.as_ref(), state.clock.as_ref(), state.retention)
            .await?;
    info!(deleted, "manual cleanup completed");
    Ok(Json(CleanupResponse { deleted }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unreachable_store_is_unhealthy_regardless_of_queue() {
        assert_eq!(HealthStatus::evaluate(false, 0, 100), HealthStatus::Unhealthy);
        assert_eq!(HealthStatus::evaluate(false, 100, 100), HealthStatus::Unhealthy);
    }

    #[test]
    fn degraded_only_strictly_above_ninety_percent() {
        assert_eq!(HealthStatus::evaluate(true, 90, 100), HealthStatus::Healthy);
        assert_eq!(HealthStatus::evaluate(true, 91, 100), HealthStatus::Degraded);
        assert_eq!(HealthStatus::evaluate(true, 0, 1), HealthStatus::Healthy);
        assert_eq!(HealthStatus::evaluate(true, 1, 1), HealthStatus::Degraded);
    }

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&HealthStatus::Degraded).unwrap(), "\"degraded\"");
    }
}
