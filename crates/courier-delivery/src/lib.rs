//! Background job pipeline with reliable callback delivery.
//!
//! Jobs enter a bounded in-memory queue. A fixed pool of workers drains it,
//! runs the work executor on the blocking thread pool, and hands results to
//! the callback dispatcher, which validates the destination against SSRF
//! rules and POSTs the result with exponential backoff and jitter.
//!
//! # Architecture
//!
//! 1. **Enqueue** - producers call `WorkerPool::enqueue`, which never blocks
//!    and returns `false` when the queue is full
//! 2. **Execute** - a worker claims the job, marks it `processing`, and runs
//!    the executor
//! 3. **Deliver** - the dispatcher posts the result, retrying failures
//! 4. **Record** - every outcome lands on the request's status record
//!
//! Delivery is at-least-once; the queue itself is not persisted.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use courier_core::{HashWorkExecutor, InMemoryStatusStore, RealClock};
//! use courier_delivery::{DeliveryConfig, DeliveryError, WorkerPool};
//!
//! # async fn example() -> Result<(), DeliveryError> {
//! let pool = WorkerPool::new(
//!     DeliveryConfig::default(),
//!     Arc::new(InMemoryStatusStore::new()),
//!     Arc::new(HashWorkExecutor),
//!     Arc::new(RealClock),
//! )?;
//! pool.start();
//! // ... enqueue jobs ...
//! pool.shutdown().await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod client;
pub mod dispatcher;
pub mod error;
pub mod queue;
pub mod retry;
pub mod ssrf;
mod worker;
pub mod worker_pool;

pub use client::{CallbackClient, ClientConfig};
pub use dispatcher::CallbackDispatcher;
pub use error::{DeliveryError, Result};
pub use queue::JobQueue;
pub use retry::RetryPolicy;
pub use ssrf::{PublicAddressResolver, SsrfPolicy, SsrfValidator};
pub use worker::DeliveryConfig;
pub use worker_pool::{PoolStats, WorkerPool};

/// Default number of concurrent workers.
pub const DEFAULT_WORKER_COUNT: usize = 10;

/// Default maximum number of queued jobs.
pub const DEFAULT_QUEUE_CAPACITY: usize = 10_000;

/// Default per-attempt callback timeout in milliseconds.
pub const DEFAULT_CALLBACK_TIMEOUT_MS: u64 = 10_000;

/// Default number of retries after the first callback attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default cap on concurrent outbound callback connections.
pub const DEFAULT_MAX_CONNECTIONS: usize = 100;
