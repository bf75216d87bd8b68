//! Status store abstraction over request lifecycle records.
//!
//! The delivery pipeline only needs `get` and `save`. The HTTP layer and the
//! retention sweep additionally use `list`, `delete_created_before`, and
//! `ping`. Production uses `sqlite::SqliteStatusStore`; tests and ephemeral
//! deployments use `memory::InMemoryStatusStore`.

use std::{future::Future, pin::Pin};

use chrono::{DateTime, Utc};

use crate::{
    error::Result,
    models::{RequestId, RequestMode, RequestRecord},
};

pub mod memory;
pub mod sqlite;

/// Boxed future returned by store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Filter and pagination for `StatusStore::list`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListQuery {
    /// Only return records submitted in this mode.
    pub mode: Option<RequestMode>,
    /// Maximum records to return.
    pub limit: u32,
    /// Records to skip, newest first.
    pub offset: u32,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self { mode: None, limit: 100, offset: 0 }
    }
}

/// One page of records plus the total matching count.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordPage {
    /// Total records matching the filter, ignoring pagination.
    pub total: u64,
    /// Records on this page, newest first.
    pub records: Vec<RequestRecord>,
}

/// Persistence for request lifecycle records.
///
/// Writes to different keys may happen concurrently. `save` is an upsert:
/// the whole record replaces whatever was stored under its `request_id`.
pub trait StatusStore: Send + Sync + 'static {
    /// Fetches a record by id.
    fn get<'a>(&'a self, request_id: &'a RequestId) -> StoreFuture<'a, Option<RequestRecord>>;

    /// Inserts or replaces a record.
    fn save<'a>(&'a self, record: &'a RequestRecord) -> StoreFuture<'a, ()>;

    /// Lists records newest first.
    fn list(&self, query: ListQuery) -> StoreFuture<'_, RecordPage>;

    /// Deletes records created before `cutoff`, returning how many went.
    fn delete_created_before(&self, cutoff: DateTime<Utc>) -> StoreFuture<'_, u64>;

    /// Checks that the backend is reachable.
    fn ping(&self) -> StoreFuture<'_, ()>;
}
