//! Core domain models, persistence, and work execution.
//!
//! Provides the request lifecycle types shared by the delivery pipeline and
//! the HTTP layer, the status store abstraction with its SQLite and in-memory
//! backends, the deterministic work executor, and the clock abstraction used
//! to keep retry timing testable.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod models;
pub mod storage;
pub mod time;
pub mod work;

pub use error::{CoreError, Result};
pub use models::{
    AsyncWorkPayload, CallbackPayload, CallbackStatus, Job, RequestId, RequestMode, RequestRecord,
    RequestStatus, WorkPayload, WorkResult,
};
pub use storage::{memory::InMemoryStatusStore, sqlite::SqliteStatusStore, StatusStore};
pub use time::{Clock, RealClock, TestClock};
pub use work::{HashWorkExecutor, WorkExecutor};
