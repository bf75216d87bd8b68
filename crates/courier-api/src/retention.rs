//! Periodic deletion of old request records.
//!
//! Records are removed by `created_at` regardless of status, so records left
//! in an intermediate status by a crash are eventually reaped too.

use std::{sync::Arc, time::Duration};

use courier_core::{Clock, CoreError, StatusStore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Deletes records created more than `retention` before now.
///
/// # Errors
///
/// Returns `CoreError::InvalidInput` if `retention` is out of range, or the
/// store's error if the delete fails.
pub async fn sweep_expired(
    store: &dyn StatusStore,
    clock: &dyn Clock,
    retention: Duration,
) -> courier_core::Result<u64> {
    let retention = chrono::Duration::from_std(retention)
        .map_err(|e| CoreError::InvalidInput(format!("retention out of range: {e}")))?;
    let cutoff = clock.now_utc() - retention;
    store.delete_created_before(cutoff).await
}

/// Runs `sweep_expired` every `interval` until `cancellation_token` fires.
///
/// The first sweep happens one full interval after start. Failures are
/// logged and the loop continues.
pub async fn run_retention_sweep(
    store: Arc<dyn StatusStore>,
    clock: Arc<dyn Clock>,
    retention: Duration,
    interval: Duration,
    cancellation_token: CancellationToken,
) {
    info!(
        retention_secs = retention.as_secs(),
        interval_secs = interval.as_secs(),
        "retention sweep starting"
    );

    loop {
        tokio::select! {
            biased;
            () = cancellation_token.cancelled() => break,
            () = clock.sleep(interval) => {},
        }

        match sweep_expired(store.as_ref(), clock.as_ref(), retention).await {
            Ok(0) => debug!("retention sweep found nothing to delete"),
            Ok(deleted) => info!(deleted, "retention sweep deleted old requests"),
            Err(e) => error!(error = %e, "retention sweep failed"),
        }
    }

    info!("retention sweep stopped");
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use courier_core::{
        InMemoryStatusStore, RequestId, RequestMode, RequestRecord, RequestStatus, TestClock,
    };

    use super::*;

    async fn seed(
        store: &InMemoryStatusStore,
        id: &str,
        hours_ago: i64,
        now: chrono::DateTime<Utc>,
    ) {
        let record = RequestRecord::new(
            RequestId::from(id),
            RequestMode::Async,
            RequestStatus::Processing,
            "data",
            now - chrono::Duration::hours(hours_ago),
        );
        store.save(&record).await.unwrap();
    }

    #[tokio::test]
    async fn sweep_removes_only_expired_records() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let clock = TestClock::with_start_time(now);
        let store = InMemoryStatusStore::new();
        seed(&store, "old", 30, now).await;
        seed(&store, "fresh", 2, now).await;

        let deleted = sweep_expired(&store, &clock, Duration::from_secs(24 * 3600)).await.unwrap();

        assert_eq!(deleted, 1);
        assert!(store.get(&RequestId::from("old")).await.unwrap().is_none());
        assert!(store.get(&RequestId::from("fresh")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn sweep_loop_stops_on_cancellation() {
        let store: Arc<dyn StatusStore> = Arc::new(InMemoryStatusStore::new());
        let clock: Arc<dyn Clock> = Arc::new(TestClock::new());
        let token = CancellationToken::new();
        token.cancel();

        let minute = Duration::from_secs(60);
        tokio::time::timeout(
            Duration::from_secs(1),
            run_retention_sweep(store, clock, minute, minute, token),
        )
        .await
        .expect("cancelled sweep should return promptly");
    }
}
