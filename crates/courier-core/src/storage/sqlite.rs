//! SQLite-backed status store.
//!
//! One `requests` table keyed by request id. Timestamps are stored as
//! fixed-width RFC 3339 text so lexical order matches chronological order,
//! and the work result is kept as a JSON column.

use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    FromRow, Row, SqlitePool,
};
use tracing::debug;

use super::{ListQuery, RecordPage, StatusStore, StoreFuture};
use crate::{
    error::{CoreError, Result},
    models::{RequestId, RequestMode, RequestRecord, RequestStatus, WorkResult},
};

const SCHEMA: [&str; 4] = [
    r"
    CREATE TABLE IF NOT EXISTS requests (
        id TEXT PRIMARY KEY,
        mode TEXT NOT NULL,
        status TEXT NOT NULL,
        payload_hash TEXT NOT NULL,
        created_at TEXT NOT NULL,
        completed_at TEXT,
        callback_url TEXT,
        callback_attempts INTEGER NOT NULL DEFAULT 0,
        callback_last_error TEXT,
        result_json TEXT
    )
    ",
    "CREATE INDEX IF NOT EXISTS idx_requests_mode ON requests(mode)",
    "CREATE INDEX IF NOT EXISTS idx_requests_created_at ON requests(created_at)",
    "CREATE INDEX IF NOT EXISTS idx_requests_status ON requests(status)",
];

/// Status store persisting records in SQLite.
#[derive(Debug, Clone)]
pub struct SqliteStatusStore {
    pool: SqlitePool,
}

impl SqliteStatusStore {
    /// Wraps an existing pool. Call `migrate` before use.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connects to `database_url`, creating the file if missing, and applies
    /// the schema.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Database` if the URL is invalid, the database
    /// cannot be opened, or the schema cannot be created.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        let store = Self::new(pool);
        store.migrate().await?;
        Ok(store)
    }

    /// Opens a private in-memory database with the schema applied.
    ///
    /// The pool holds a single connection that never expires, since every
    /// SQLite `:memory:` connection is its own database.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Database` if the database cannot be opened.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let store = Self::new(pool);
        store.migrate().await?;
        Ok(store)
    }

    /// Creates the `requests` table and its indexes if absent.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Database` if any statement fails.
    pub async fn migrate(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        debug!("requests schema ready");
        Ok(())
    }

    /// Returns the underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Closes every pooled connection.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

impl StatusStore for SqliteStatusStore {
    fn get<'a>(&'a self, request_id: &'a RequestId) -> StoreFuture<'a, Option<RequestRecord>> {
        Box::pin(async move {
            let record = sqlx::query_as::<_, RequestRecord>(
                r"
                SELECT id, mode, status, payload_hash, created_at, completed_at,
                       callback_url, callback_attempts, callback_last_error, result_json
                FROM requests
                WHERE id = ?
                ",
            )
            .bind(request_id.as_str())
            .fetch_optional(&self.pool)
            .await?;

            Ok(record)
        })
    }

    fn save<'a>(&'a self, record: &'a RequestRecord) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let result_json = record.result.as_ref().map(serde_json::to_string).transpose()?;

            sqlx::query(
                r"
                INSERT OR REPLACE INTO requests
                    (id, mode, status, payload_hash, created_at, completed_at,
                     callback_url, callback_attempts, callback_last_error, result_json)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ",
            )
            .bind(record.request_id.as_str())
            .bind(record.mode.as_str())
            .bind(record.status.as_str())
            .bind(&record.payload_hash)
            .bind(encode_timestamp(record.created_at))
            .bind(record.completed_at.map(encode_timestamp))
            .bind(record.callback_url.as_deref())
            .bind(i64::from(record.callback_attempts))
            .bind(record.callback_last_error.as_deref())
            .bind(result_json)
            .execute(&self.pool)
            .await?;

            Ok(())
        })
    }

    fn list(&self, query: ListQuery) -> StoreFuture<'_, RecordPage> {
        Box::pin(async move {
            let mode = query.mode.map(RequestMode::as_str);

            let (total,): (i64,) =
                sqlx::query_as("SELECT COUNT(*) FROM requests WHERE (? IS NULL OR mode = ?)")
                    .bind(mode)
                    .bind(mode)
                    .fetch_one(&self.pool)
                    .await?;

            let records = sqlx::query_as::<_, RequestRecord>(
                r"
                SELECT id, mode, status, payload_hash, created_at, completed_at,
                       callback_url, callback_attempts, callback_last_error, result_json
                FROM requests
                WHERE (? IS NULL OR mode = ?)
                ORDER BY created_at DESC
                LIMIT ? OFFSET ?
                ",
            )
            .bind(mode)
            .bind(mode)
            .bind(i64::from(query.limit))
            .bind(i64::from(query.offset))
            .fetch_all(&self.pool)
            .await?;

            Ok(RecordPage { total: u64::try_from(total).unwrap_or(0), records })
        })
    }

    fn delete_created_before(&self, cutoff: DateTime<Utc>) -> StoreFuture<'_, u64> {
        Box::pin(async move {
            let result = sqlx::query("DELETE FROM requests WHERE created_at < ?")
                .bind(encode_timestamp(cutoff))
                .execute(&self.pool)
                .await?;

            Ok(result.rows_affected())
        })
    }

    fn ping(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let _: (i32,) = sqlx::query_as("SELECT 1").fetch_one(&self.pool).await?;
            Ok(())
        })
    }
}

impl<'r> FromRow<'r, SqliteRow> for RequestRecord {
    fn from_row(row: &'r SqliteRow) -> std::result::Result<Self, sqlx::Error> {
        let mode: String = row.try_get("mode")?;
        let status: String = row.try_get("status")?;
        let created_at: String = row.try_get("created_at")?;
        let completed_at: Option<String> = row.try_get("completed_at")?;
        let attempts: i64 = row.try_get("callback_attempts")?;
        let result_json: Option<String> = row.try_get("result_json")?;

        let result = result_json
            .map(|json| serde_json::from_str::<WorkResult>(&json))
            .transpose()
            .map_err(|e| decode_error("result_json", CoreError::from(e)))?;

        Ok(Self {
            request_id: RequestId(row.try_get("id")?),
            mode: mode.parse().map_err(|e| decode_error("mode", e))?,
            status: status.parse::<RequestStatus>().map_err(|e| decode_error("status", e))?,
            payload_hash: row.try_get("payload_hash")?,
            created_at: decode_timestamp(&created_at)
                .map_err(|e| decode_error("created_at", e))?,
            completed_at: completed_at
                .as_deref()
                .map(decode_timestamp)
                .transpose()
                .map_err(|e| decode_error("completed_at", e))?,
            callback_url: row.try_get("callback_url")?,
            callback_attempts: u32::try_from(attempts).unwrap_or(u32::MAX),
            callback_last_error: row.try_get("callback_last_error")?,
            result,
        })
    }
}

fn encode_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode_timestamp(text: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| CoreError::Serialization(format!("invalid timestamp {text:?}: {e}")))
}

fn decode_error(column: &str, source: CoreError) -> sqlx::Error {
    sqlx::Error::ColumnDecode { index: column.to_string(), source: Box::new(source) }
}
