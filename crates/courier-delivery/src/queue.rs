//! Bounded FIFO between request producers and workers.

use courier_core::Job;
use tokio::sync::{
    mpsc::{self, error::TrySendError},
    Mutex,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Fixed-capacity job queue with non-blocking enqueue.
///
/// Any number of producers may enqueue concurrently. Workers share the
/// receiving half through an async mutex, so each job is handed to exactly
/// one of them.
#[derive(Debug)]
pub struct JobQueue {
    sender: mpsc::Sender<Job>,
    receiver: Mutex<mpsc::Receiver<Job>>,
    capacity: usize,
}

impl JobQueue {
    /// Creates a queue holding at most `capacity` jobs.
    ///
    /// A capacity of zero is raised to one; an mpsc channel cannot be empty.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, receiver) = mpsc::channel(capacity);
        Self { sender, receiver: Mutex::new(receiver), capacity }
    }

    /// Adds a job without waiting.
    ///
    /// Returns `false` immediately if the queue is full or closed; the job is
    /// dropped and the queue is left unchanged.
    pub fn enqueue(&self, job: Job) -> bool {
        match self.sender.try_send(job) {
            Ok(()) => {
                debug!(queue_size = self.len(), "job enqueued");
                true
            },
            Err(TrySendError::Full(job)) => {
                warn!(
                    request_id = %job.request_id,
                    capacity = self.capacity,
                    "job queue full, rejecting job"
                );
                false
            },
            Err(TrySendError::Closed(job)) => {
                warn!(request_id = %job.request_id, "job queue closed, rejecting job");
                false
            },
        }
    }

    /// Waits for the next job.
    ///
    /// Returns `None` once `cancel` fires, or when the queue is closed and
    /// drained. Dropping the returned future never loses a job.
    pub async fn dequeue(&self, cancel: &CancellationToken) -> Option<Job> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            job = async { self.receiver.lock().await.recv().await } => job,
        }
    }

    /// Stops accepting new jobs. Already queued jobs can still be dequeued.
    pub async fn close(&self) {
        self.receiver.lock().await.close();
    }

    /// Whether `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Number of jobs waiting.
    pub fn len(&self) -> usize {
        self.capacity.saturating_sub(self.sender.capacity())
    }

    /// Whether no jobs are waiting.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of waiting jobs.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use courier_core::RequestId;

    use super::*;

    fn job(id: &str) -> Job {
        Job {
            request_id: RequestId::from(id),
            data: "payload".to_string(),
            iterations: 1,
            callback_url: None,
        }
    }

    #[tokio::test]
    async fn enqueue_beyond_capacity_is_rejected() {
        let queue = JobQueue::new(2);

        assert!(queue.enqueue(job("a")));
        assert!(queue.enqueue(job("b")));
        assert!(!queue.enqueue(job("c")));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.capacity(), 2);
    }

    #[tokio::test]
    async fn dequeue_is_fifo() {
        let queue = JobQueue::new(4);
        let cancel = CancellationToken::new();
        for id in ["a", "b", "c"] {
            assert!(queue.enqueue(job(id)));
        }

        for id in ["a", "b", "c"] {
            let next = queue.dequeue(&cancel).await.unwrap();
            assert_eq!(next.request_id.as_str(), id);
        }
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn dequeue_returns_none_on_cancel() {
        let queue = JobQueue::new(1);
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let result = tokio::time::timeout(Duration::from_secs(2), queue.dequeue(&cancel)).await;
        assert_eq!(result.unwrap(), None);
    }

    #[tokio::test]
    async fn closed_queue_rejects_but_drains() {
        let queue = JobQueue::new(2);
        let cancel = CancellationToken::new();
        assert!(queue.enqueue(job("a")));

        queue.close().await;

        assert!(queue.is_closed());
        assert!(!queue.enqueue(job("b")));
        assert_eq!(queue.dequeue(&cancel).await.unwrap().request_id.as_str(), "a");
        assert_eq!(queue.dequeue(&cancel).await, None);
    }
}
