//! Worker loop that drains the job queue.
//!
//! Each worker claims one job at a time, runs the executor on the blocking
//! pool, records the result, and runs callback delivery inline. Failures are
//! written to the job's record; the loop itself only ends on cancellation.

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use courier_core::{Clock, Job, RequestStatus, StatusStore, WorkExecutor, WorkResult};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    client::ClientConfig,
    dispatcher::{update_record, CallbackDispatcher},
    error::DeliveryError,
    queue::JobQueue,
    retry::RetryPolicy,
    ssrf::SsrfPolicy,
};

/// Configuration for the job pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Number of concurrent workers.
    pub worker_count: usize,

    /// Maximum number of queued jobs.
    pub queue_capacity: usize,

    /// How long a worker waits for a job before re-checking for shutdown.
    pub poll_interval: Duration,

    /// Maximum time to wait for workers on shutdown.
    pub shutdown_timeout: Duration,

    /// Callback HTTP client configuration.
    pub client_config: ClientConfig,

    /// Callback retry schedule.
    pub retry_policy: RetryPolicy,

    /// Callback URL restrictions.
    pub ssrf_policy: SsrfPolicy,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            worker_count: crate::DEFAULT_WORKER_COUNT,
            queue_capacity: crate::DEFAULT_QUEUE_CAPACITY,
            poll_interval: Duration::from_secs(1),
            shutdown_timeout: Duration::from_secs(30),
            client_config: ClientConfig::default(),
            retry_policy: RetryPolicy::default(),
            ssrf_policy: SsrfPolicy::default(),
        }
    }
}

/// Decrements the active-worker gauge when a job finishes, even on panic.
struct ActiveGuard<'a>(&'a AtomicUsize);

impl<'a> ActiveGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(counter)
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// One queue-draining loop.
pub(crate) struct CallbackWorker {
    id: usize,
    queue: Arc<JobQueue>,
    store: Arc<dyn StatusStore>,
    executor: Arc<dyn WorkExecutor>,
    dispatcher: Arc<CallbackDispatcher>,
    active: Arc<AtomicUsize>,
    poll_interval: Duration,
    cancellation_token: CancellationToken,
    clock: Arc<dyn Clock>,
}

impl CallbackWorker {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: usize,
        queue: Arc<JobQueue>,
        store: Arc<dyn StatusStore>,
        executor: Arc<dyn WorkExecutor>,
        dispatcher: Arc<CallbackDispatcher>,
        active: Arc<AtomicUsize>,
        poll_interval: Duration,
        cancellation_token: CancellationToken,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            id,
            queue,
            store,
            executor,
            dispatcher,
            active,
            poll_interval,
            cancellation_token,
            clock,
        }
    }

    /// Claims and processes jobs until cancelled or the queue is drained
    /// after close.
    pub(crate) async fn run(&self) {
        info!(worker_id = self.id, "worker starting");

        loop {
            if self.cancellation_token.is_cancelled() {
                break;
            }

            let dequeue = self.queue.dequeue(&self.cancellation_token);
            let next = tokio::time::timeout(self.poll_interval, dequeue).await;

            match next {
                Ok(Some(job)) => self.process_job(job).await,
                Ok(None) => break,
                Err(_elapsed) => {},
            }
        }

        info!(worker_id = self.id, "worker stopped");
    }

    async fn process_job(&self, job: Job) {
        let _active = ActiveGuard::enter(&self.active);
        let request_id = job.request_id.clone();

        debug!(worker_id = self.id, request_id = %request_id, "processing job");

        update_record(self.store.as_ref(), &request_id, |record| {
            record.status = RequestStatus::Processing;
        })
        .await;

        let result = match self.execute(&job).await {
            Ok(result) => result,
            Err(failure) => {
                error!(
                    worker_id = self.id,
                    request_id = %request_id,
                    error = %failure,
                    "work execution failed"
                );
                let message = failure.to_string();
                update_record(self.store.as_ref(), &request_id, |record| {
                    record.fail(RequestStatus::Failed, message);
                })
                .await;
                return;
            },
        };

        let completed_at = self.clock.now_utc();
        let Some(callback_url) = job.callback_url else {
            update_record(self.store.as_ref(), &request_id, |record| {
                record.status = RequestStatus::Completed;
                record.completed_at = Some(completed_at);
                record.result = Some(result);
            })
            .await;
            debug!(worker_id = self.id, request_id = %request_id, "job completed");
            return;
        };

        let stored_result = result.clone();
        update_record(self.store.as_ref(), &request_id, |record| {
            record.status = RequestStatus::CallbackPending;
            record.completed_at = Some(completed_at);
            record.result = Some(stored_result);
        })
        .await;

        self.dispatcher.deliver(&request_id, &callback_url, result).await;
    }

    /// Runs the executor on the blocking pool, folding panics into errors.
    async fn execute(&self, job: &Job) -> Result<WorkResult, DeliveryError> {
        let executor = self.executor.clone();
        let request_id = job.request_id.clone();
        let payload = job.payload();

        match tokio::task::spawn_blocking(move || executor.execute(&request_id, &payload)).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(e)) => Err(DeliveryError::work_execution(e.to_string())),
            Err(join_error) if join_error.is_panic() => {
                warn!(worker_id = self.id, "work executor panicked");
                Err(DeliveryError::work_execution("work executor panicked"))
            },
            Err(join_error) => Err(DeliveryError::work_execution(join_error.to_string())),
        }
    }
}
