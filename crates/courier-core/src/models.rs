//! Request lifecycle models and strongly-typed identifiers.
//!
//! Defines the transient `Job` handed through the queue, the durable
//! `RequestRecord` tracked in the status store, the immutable `WorkResult`,
//! and the callback wire payload. Status transitions are encoded on
//! `RequestStatus`.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{CoreError, Result};

/// Maximum accepted length of `WorkPayload::data`, in characters.
pub const MAX_DATA_LEN: usize = 10_000;

/// Maximum accepted work iterations.
pub const MAX_ITERATIONS: u32 = 1_000_000;

/// Maximum accepted length of a callback URL.
pub const MAX_CALLBACK_URL_LEN: usize = 2048;

/// Iterations used when the caller does not specify any.
pub const DEFAULT_ITERATIONS: u32 = 1000;

/// Opaque request identifier.
///
/// Identifies exactly one job and one record for the whole lifecycle. Freshly
/// generated ids are UUID v4 strings, but any unique string is accepted.
///
/// # Example
///
/// ```
/// use courier_core::models::RequestId;
/// let id = RequestId::new();
/// println!("accepted request {id}");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub String);

impl RequestId {
    /// Creates a new random request id.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for RequestId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// How a request was submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestMode {
    /// Computed inline and returned in the HTTP response.
    Sync,
    /// Queued and delivered to a callback URL.
    Async,
}

impl RequestMode {
    /// Returns the storage representation.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sync => "sync",
            Self::Async => "async",
        }
    }
}

impl fmt::Display for RequestMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestMode {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sync" => Ok(Self::Sync),
            "async" => Ok(Self::Async),
            other => Err(CoreError::InvalidInput(format!("unknown request mode: {other}"))),
        }
    }
}

/// Lifecycle status of a request.
///
/// ```text
/// Pending -> Processing -> Completed
///                       -> CallbackPending -> CallbackSuccess
///                                          -> CallbackFailed
///                       -> Failed
/// ```
///
/// `Failed` marks work that never produced a result (executor failure or
/// rejection at enqueue time). `CallbackFailed` only ever describes delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    /// Accepted, not yet claimed by a worker.
    Pending,
    /// A worker is running the work executor.
    Processing,
    /// Work finished and no callback was requested.
    Completed,
    /// Work finished, callback delivery unresolved.
    CallbackPending,
    /// Callback acknowledged with a 2xx response.
    CallbackSuccess,
    /// Callback blocked or every attempt failed.
    CallbackFailed,
    /// Work could not be executed.
    Failed,
}

impl RequestStatus {
    /// Returns the storage representation.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::CallbackPending => "callback_pending",
            Self::CallbackSuccess => "callback_success",
            Self::CallbackFailed => "callback_failed",
            Self::Failed => "failed",
        }
    }

    /// Whether no further automatic transition happens from this status.
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::CallbackSuccess | Self::CallbackFailed | Self::Failed
        )
    }

    /// Whether moving from `self` to `next` is an allowed transition.
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Processing | Self::Failed)
                | (
                    Self::Processing,
                    Self::Completed | Self::CallbackPending | Self::Failed
                )
                | (Self::CallbackPending, Self::CallbackSuccess | Self::CallbackFailed)
        )
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "callback_pending" => Ok(Self::CallbackPending),
            "callback_success" => Ok(Self::CallbackSuccess),
            "callback_failed" => Ok(Self::CallbackFailed),
            "failed" => Ok(Self::Failed),
            other => Err(CoreError::InvalidInput(format!("unknown request status: {other}"))),
        }
    }
}

fn default_iterations() -> u32 {
    DEFAULT_ITERATIONS
}

/// Work input shared by the sync and async paths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkPayload {
    /// Input data to hash.
    pub data: String,
    /// Number of hash-chain iterations.
    #[serde(default = "default_iterations")]
    pub iterations: u32,
}

impl WorkPayload {
    /// Checks length and range constraints.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidInput` describing the first violated rule.
    pub fn validate(&self) -> Result<()> {
        let len = self.data.chars().count();
        if len == 0 || len > MAX_DATA_LEN {
            return Err(CoreError::InvalidInput(format!(
                "data must be between 1 and {MAX_DATA_LEN} characters"
            )));
        }
        if self.data.trim().is_empty() {
            return Err(CoreError::InvalidInput(
                "data cannot be empty or whitespace only".to_string(),
            ));
        }
        if self.iterations == 0 || self.iterations > MAX_ITERATIONS {
            return Err(CoreError::InvalidInput(format!(
                "iterations must be between 1 and {MAX_ITERATIONS}"
            )));
        }
        Ok(())
    }
}

/// Async submission: work input plus the URL the result is posted to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AsyncWorkPayload {
    /// Input data to hash.
    pub data: String,
    /// Number of hash-chain iterations.
    #[serde(default = "default_iterations")]
    pub iterations: u32,
    /// URL to POST the result to.
    pub callback_url: String,
}

impl AsyncWorkPayload {
    /// Returns the work portion of the submission.
    pub fn work(&self) -> WorkPayload {
        WorkPayload { data: self.data.clone(), iterations: self.iterations }
    }

    /// Checks the work constraints plus a cheap callback URL shape check.
    ///
    /// The full SSRF check runs at delivery time, after DNS resolution.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidInput` describing the first violated rule.
    pub fn validate(&self) -> Result<()> {
        self.work().validate()?;
        if !(self.callback_url.starts_with("http://") || self.callback_url.starts_with("https://"))
        {
            return Err(CoreError::InvalidInput("callback_url must be http or https".to_string()));
        }
        if self.callback_url.len() > MAX_CALLBACK_URL_LEN {
            return Err(CoreError::InvalidInput("callback_url too long".to_string()));
        }
        Ok(())
    }
}

/// Unit of work travelling through the queue.
///
/// Owned by the queue until a worker claims it; never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    /// Request this job belongs to.
    pub request_id: RequestId,
    /// Input data to hash.
    pub data: String,
    /// Number of hash-chain iterations.
    pub iterations: u32,
    /// Callback destination; `None` finishes the request as `Completed`.
    pub callback_url: Option<String>,
}

impl Job {
    /// Builds a job from an accepted async submission.
    pub fn from_async(request_id: RequestId, payload: &AsyncWorkPayload) -> Self {
        Self {
            request_id,
            data: payload.data.clone(),
            iterations: payload.iterations,
            callback_url: Some(payload.callback_url.clone()),
        }
    }

    /// Returns the work input carried by this job.
    pub fn payload(&self) -> WorkPayload {
        WorkPayload { data: self.data.clone(), iterations: self.iterations }
    }
}

/// Immutable output of the work executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkResult {
    /// Request the result belongs to.
    pub request_id: RequestId,
    /// Hex SHA-256 of the input data.
    pub input_hash: String,
    /// Hex digest at the end of the hash chain.
    pub output_hash: String,
    /// Iterations performed.
    pub iterations: u32,
    /// Wall time spent computing, in milliseconds.
    pub processing_time_ms: f64,
}

/// Durable lifecycle record for one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestRecord {
    /// Unique request identifier, exposed as `id` on the wire.
    #[serde(rename = "id")]
    pub request_id: RequestId,
    /// Submission mode.
    pub mode: RequestMode,
    /// Current lifecycle status.
    pub status: RequestStatus,
    /// Truncated SHA-256 of the input data.
    pub payload_hash: String,
    /// When the request was accepted.
    pub created_at: DateTime<Utc>,
    /// When the work finished.
    pub completed_at: Option<DateTime<Utc>>,
    /// Callback destination for async requests.
    pub callback_url: Option<String>,
    /// Failed delivery attempts so far.
    pub callback_attempts: u32,
    /// Most recent error, delivery or otherwise.
    pub callback_last_error: Option<String>,
    /// Work result once available.
    pub result: Option<WorkResult>,
}

impl RequestRecord {
    /// Creates a record for a newly accepted request.
    pub fn new(
        request_id: RequestId,
        mode: RequestMode,
        status: RequestStatus,
        data: &str,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            request_id,
            mode,
            status,
            payload_hash: payload_hash(data),
            created_at,
            completed_at: None,
            callback_url: None,
            callback_attempts: 0,
            callback_last_error: None,
            result: None,
        }
    }

    /// Sets the callback destination.
    #[must_use]
    pub fn with_callback_url(mut self, callback_url: impl Into<String>) -> Self {
        self.callback_url = Some(callback_url.into());
        self
    }

    /// Marks the record as terminally failed with the given error text.
    pub fn fail(&mut self, status: RequestStatus, error: impl Into<String>) {
        self.status = status;
        self.callback_last_error = Some(error.into());
    }
}

/// Outcome reported in a callback body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallbackStatus {
    /// Work succeeded; `result` is present.
    Success,
    /// Work failed; `error` is present.
    Error,
}

/// JSON body POSTed to a callback URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallbackPayload {
    /// Request the callback is for.
    pub request_id: RequestId,
    /// Outcome of the work.
    pub status: CallbackStatus,
    /// Work result on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<WorkResult>,
    /// Error message on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When the payload was built.
    pub timestamp: DateTime<Utc>,
}

impl CallbackPayload {
    /// Builds a success payload carrying the work result.
    pub fn success(result: WorkResult, timestamp: DateTime<Utc>) -> Self {
        Self {
            request_id: result.request_id.clone(),
            status: CallbackStatus::Success,
            result: Some(result),
            error: None,
            timestamp,
        }
    }
}

/// First 16 hex characters of the SHA-256 of `data`.
pub fn payload_hash(data: &str) -> String {
    let digest = Sha256::digest(data.as_bytes());
    let mut hex = format!("{digest:x}");
    hex.truncate(16);
    hex
}
