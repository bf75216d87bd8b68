//! In-memory status store for tests and ephemeral deployments.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{ListQuery, RecordPage, StatusStore, StoreFuture};
use crate::{
    error::CoreError,
    models::{RequestId, RequestRecord},
};

/// Status store backed by a `HashMap` behind an async lock.
///
/// Clones share the same map. `set_unavailable` makes `ping` fail so health
/// reporting can be exercised without a real database.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStatusStore {
    records: Arc<RwLock<HashMap<RequestId, RequestRecord>>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryStatusStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Whether the store holds no records.
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    /// Toggles simulated backend failure for `ping`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::Release);
    }
}

impl StatusStore for InMemoryStatusStore {
    fn get<'a>(&'a self, request_id: &'a RequestId) -> StoreFuture<'a, Option<RequestRecord>> {
        Box::pin(async move { Ok(self.records.read().await.get(request_id).cloned()) })
    }

    fn save<'a>(&'a self, record: &'a RequestRecord) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.records.write().await.insert(record.request_id.clone(), record.clone());
            Ok(())
        })
    }

    fn list(&self, query: ListQuery) -> StoreFuture<'_, RecordPage> {
        Box::pin(async move {
            let records = self.records.read().await;
            let mut matching: Vec<&RequestRecord> = records
                .values()
                .filter(|record| query.mode.map_or(true, |mode| record.mode == mode))
                .collect();
            matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));

            let total = matching.len() as u64;
            let records = matching
                .into_iter()
                .skip(query.offset as usize)
                .take(query.limit as usize)
                .cloned()
                .collect();

            Ok(RecordPage { total, records })
        })
    }

    fn delete_created_before(&self, cutoff: DateTime<Utc>) -> StoreFuture<'_, u64> {
        Box::pin(async move {
            let mut records = self.records.write().await;
            let before = records.len();
            records.retain(|_, record| record.created_at >= cutoff);
            Ok((before - records.len()) as u64)
        })
    }

    fn ping(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            if self.unavailable.load(Ordering::Acquire) {
                return Err(CoreError::Database("in-memory store marked unavailable".to_string()));
            }
            Ok(())
        })
    }
}
