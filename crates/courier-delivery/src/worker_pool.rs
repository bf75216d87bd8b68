//! Worker pool lifecycle: construction, start, occupancy, and shutdown.
//!
//! The pool is an explicit value owned by the application state. Nothing is
//! global: build it with `new`, call `start` once, and `shutdown` before
//! dropping it.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

use courier_core::{Clock, Job, StatusStore, WorkExecutor};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    client::CallbackClient,
    dispatcher::CallbackDispatcher,
    error::{DeliveryError, Result},
    queue::JobQueue,
    ssrf::SsrfValidator,
    worker::{CallbackWorker, DeliveryConfig},
};

/// Point-in-time occupancy of the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Jobs waiting in the queue.
    pub queue_size: usize,
    /// Queue capacity.
    pub queue_capacity: usize,
    /// Workers currently processing a job.
    pub active_workers: usize,
    /// Workers spawned.
    pub total_workers: usize,
}

impl PoolStats {
    /// Fraction of the queue in use, from 0.0 to 1.0.
    pub fn queue_utilization(&self) -> f64 {
        if self.queue_capacity == 0 {
            return 0.0;
        }
        self.queue_size as f64 / self.queue_capacity as f64
    }
}

/// Fixed-size pool of workers sharing one bounded queue.
pub struct WorkerPool {
    config: DeliveryConfig,
    queue: Arc<JobQueue>,
    store: Arc<dyn StatusStore>,
    executor: Arc<dyn WorkExecutor>,
    client: Arc<CallbackClient>,
    dispatcher: Arc<CallbackDispatcher>,
    active: Arc<AtomicUsize>,
    cancellation_token: CancellationToken,
    worker_handles: Mutex<Vec<JoinHandle<()>>>,
    clock: Arc<dyn Clock>,
}

impl WorkerPool {
    /// Builds a pool without starting any workers.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Configuration` if the worker count or queue
    /// capacity is zero, or the callback client cannot be built.
    pub fn new(
        config: DeliveryConfig,
        store: Arc<dyn StatusStore>,
        executor: Arc<dyn WorkExecutor>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        if config.worker_count == 0 {
            return Err(DeliveryError::configuration("worker_count must be at least 1"));
        }
        if config.queue_capacity == 0 {
            return Err(DeliveryError::configuration("queue_capacity must be at least 1"));
        }

        let client = Arc::new(CallbackClient::for_policy(
            config.client_config.clone(),
            &config.ssrf_policy,
        )?);
        let cancellation_token = CancellationToken::new();
        let dispatcher = Arc::new(
            CallbackDispatcher::new(
                store.clone(),
                client.clone(),
                SsrfValidator::new(config.ssrf_policy.clone()),
                config.retry_policy.clone(),
                clock.clone(),
            )
            .with_cancellation_token(cancellation_token.clone()),
        );

        Ok(Self {
            queue: Arc::new(JobQueue::new(config.queue_capacity)),
            config,
            store,
            executor,
            client,
            dispatcher,
            active: Arc::new(AtomicUsize::new(0)),
            cancellation_token,
            worker_handles: Mutex::new(Vec::new()),
            clock,
        })
    }

    /// Spawns the configured number of workers.
    ///
    /// Calling `start` on a running or shut-down pool does nothing.
    pub fn start(&self) {
        let Ok(mut handles) = self.worker_handles.lock() else {
            error!("worker handle lock poisoned, workers not started");
            return;
        };
        if !handles.is_empty() || self.cancellation_token.is_cancelled() {
            warn!("worker pool already started or shut down");
            return;
        }

        info!(
            worker_count = self.config.worker_count,
            queue_capacity = self.queue.capacity(),
            "starting worker pool"
        );

        for worker_id in 0..self.config.worker_count {
            let worker = CallbackWorker::new(
                worker_id,
                self.queue.clone(),
                self.store.clone(),
                self.executor.clone(),
                self.dispatcher.clone(),
                self.active.clone(),
                self.config.poll_interval,
                self.cancellation_token.clone(),
                self.clock.clone(),
            );
            handles.push(tokio::spawn(async move { worker.run().await }));
        }

        info!(spawned_workers = handles.len(), "worker pool started");
    }

    /// Offers a job to the queue without waiting.
    ///
    /// Returns `false` if the queue is full or the pool is shutting down.
    pub fn enqueue(&self, job: Job) -> bool {
        if self.cancellation_token.is_cancelled() {
            warn!(request_id = %job.request_id, "worker pool shut down, rejecting job");
            return false;
        }
        self.queue.enqueue(job)
    }

    /// Current queue and worker occupancy.
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            queue_size: self.queue.len(),
            queue_capacity: self.queue.capacity(),
            active_workers: self.active.load(Ordering::Acquire),
            total_workers: self.worker_handles.lock().map(|h| h.len()).unwrap_or(0),
        }
    }

    /// Returns the pipeline configuration.
    pub fn config(&self) -> &DeliveryConfig {
        &self.config
    }

    /// Returns the shared job queue.
    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.queue
    }

    /// Whether any worker task is still running.
    pub fn has_running_workers(&self) -> bool {
        self.worker_handles.lock().map(|h| h.iter().any(|h| !h.is_finished())).unwrap_or(false)
    }

    /// Stops the pool.
    ///
    /// Rejects new jobs, cancels every worker, waits up to the configured
    /// shutdown timeout for in-flight jobs, then closes the callback client.
    /// Jobs still queued are dropped. Workers still running when the timeout
    /// fires are aborted, leaving their records in place for the retention
    /// sweep.
    ///
    /// # Errors
    ///
    /// Returns `ShutdownTimeout` if workers outlive the grace period, or
    /// `WorkerPanic` if a worker task panicked.
    pub async fn shutdown(&self) -> Result<()> {
        let timeout = self.config.shutdown_timeout;
        let handles = self
            .worker_handles
            .lock()
            .map(|mut handles| std::mem::take(&mut *handles))
            .unwrap_or_default();

        info!(
            worker_count = handles.len(),
            timeout_ms = timeout.as_millis(),
            dropped_jobs = self.queue.len(),
            "initiating graceful worker shutdown"
        );

        self.cancellation_token.cancel();
        self.queue.close().await;

        let abort_handles: Vec<_> = handles.iter().map(JoinHandle::abort_handle).collect();

        let join_all = async {
            let mut first_panic = None;
            for (worker_id, handle) in handles.into_iter().enumerate() {
                if let Err(join_error) = handle.await {
                    error!(worker_id, error = %join_error, "worker task panicked");
                    first_panic.get_or_insert(DeliveryError::WorkerPanic {
                        worker_id,
                        error: join_error.to_string(),
                    });
                }
            }
            first_panic
        };

        let outcome = tokio::time::timeout(timeout, join_all).await;
        if outcome.is_err() {
            for handle in &abort_handles {
                handle.abort();
            }
        }
        self.client.close();

        match outcome {
            Ok(None) => {
                info!("worker pool shutdown completed");
                Ok(())
            },
            Ok(Some(panic)) => Err(panic),
            Err(_elapsed) => {
                error!(
                    timeout_ms = timeout.as_millis(),
                    "worker shutdown timed out, aborting remaining workers"
                );
                Err(DeliveryError::ShutdownTimeout { timeout })
            },
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if !self.cancellation_token.is_cancelled() && self.has_running_workers() {
            warn!("worker pool dropped without shutdown, cancelling workers");
            self.cancellation_token.cancel();
        }
    }
}
