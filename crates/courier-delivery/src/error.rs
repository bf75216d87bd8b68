//! Error types for the job pipeline and callback delivery.
//!
//! Per-job failures never escape a worker iteration; they are converted to
//! text with `record_message` and stored on the request record. The
//! remaining variants surface from construction and shutdown.

use std::time::Duration;

use courier_core::CoreError;
use thiserror::Error;

/// Result type alias for delivery operations.
pub type Result<T> = std::result::Result<T, DeliveryError>;

/// Errors raised while queueing, executing, or delivering jobs.
#[derive(Debug, Clone, Error)]
pub enum DeliveryError {
    /// The job queue is at capacity or closed.
    #[error("job queue full")]
    QueueFull,

    /// The callback URL failed SSRF validation.
    #[error("callback URL blocked: {reason}")]
    SsrfBlocked {
        /// Why the URL was rejected
        reason: String,
    },

    /// The callback attempt exceeded its timeout.
    #[error("request timeout after {timeout_ms}ms")]
    Timeout {
        /// Configured per-attempt timeout
        timeout_ms: u64,
    },

    /// Transport-level failure: DNS, connect, TLS, or body I/O.
    #[error("network error: {message}")]
    Network {
        /// Transport error message
        message: String,
    },

    /// The receiver answered with a non-2xx status.
    #[error("HTTP {status_code}")]
    HttpStatus {
        /// Response status code
        status_code: u16,
    },

    /// Every callback attempt failed.
    #[error("delivery failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        /// Attempts made
        attempts: u32,
        /// Record message of the final failure
        last_error: String,
    },

    /// The work executor failed or panicked.
    #[error("work execution failed: {message}")]
    WorkExecution {
        /// Executor error message
        message: String,
    },

    /// The status store rejected an operation.
    #[error("storage error: {message}")]
    Storage {
        /// Store error message
        message: String,
    },

    /// Invalid pipeline or client configuration.
    #[error("invalid configuration: {message}")]
    Configuration {
        /// Configuration error message
        message: String,
    },

    /// Workers did not stop within the grace period.
    #[error("worker shutdown timed out after {timeout:?}")]
    ShutdownTimeout {
        /// Grace period that elapsed
        timeout: Duration,
    },

    /// A worker task panicked.
    #[error("worker {worker_id} panicked: {error}")]
    WorkerPanic {
        /// Index of the worker
        worker_id: usize,
        /// Join error text
        error: String,
    },
}

impl DeliveryError {
    /// Creates an SSRF rejection.
    pub fn ssrf_blocked(reason: impl Into<String>) -> Self {
        Self::SsrfBlocked { reason: reason.into() }
    }

    /// Creates a network error from a message.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network { message: message.into() }
    }

    /// Creates a timeout error.
    pub fn timeout(timeout: Duration) -> Self {
        Self::Timeout { timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX) }
    }

    /// Creates a non-2xx status error.
    pub fn http_status(status_code: u16) -> Self {
        Self::HttpStatus { status_code }
    }

    /// Creates a work execution error.
    pub fn work_execution(message: impl Into<String>) -> Self {
        Self::WorkExecution { message: message.into() }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// Whether another callback attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::Network { .. } | Self::HttpStatus { .. } => true,

            Self::QueueFull
            | Self::SsrfBlocked { .. }
            | Self::RetriesExhausted { .. }
            | Self::WorkExecution { .. }
            | Self::Storage { .. }
            | Self::Configuration { .. }
            | Self::ShutdownTimeout { .. }
            | Self::WorkerPanic { .. } => false,
        }
    }

    /// Text stored in `callback_last_error` for this failure.
    ///
    /// Attempt failures use the short forms `HTTP <code>`, `Timeout`, or the
    /// bare transport message.
    pub fn record_message(&self) -> String {
        match self {
            Self::HttpStatus { status_code } => format!("HTTP {status_code}"),
            Self::Timeout { .. } => "Timeout".to_string(),
            Self::Network { message } => message.clone(),
            Self::SsrfBlocked { .. } => "Callback URL blocked by security policy".to_string(),
            Self::RetriesExhausted { last_error, .. } => {
                format!("Max retries exceeded: {last_error}")
            },
            other => other.to_string(),
        }
    }
}

impl From<CoreError> for DeliveryError {
    fn from(error: CoreError) -> Self {
        match error {
            CoreError::Execution(message) => Self::WorkExecution { message },
            other => Self::Storage { message: other.to_string() },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors_identified_correctly() {
        assert!(DeliveryError::network("connection refused").is_retryable());
        assert!(DeliveryError::timeout(Duration::from_secs(10)).is_retryable());
        assert!(DeliveryError::http_status(500).is_retryable());
        assert!(DeliveryError::http_status(404).is_retryable());

        assert!(!DeliveryError::ssrf_blocked("loopback").is_retryable());
        assert!(!DeliveryError::QueueFull.is_retryable());
        assert!(!DeliveryError::work_execution("boom").is_retryable());
        assert!(!DeliveryError::configuration("bad").is_retryable());
    }

    #[test]
    fn record_messages_use_short_forms() {
        assert_eq!(DeliveryError::http_status(503).record_message(), "HTTP 503");
        assert_eq!(DeliveryError::timeout(Duration::from_millis(50)).record_message(), "Timeout");
        assert_eq!(
            DeliveryError::network("connection refused").record_message(),
            "connection refused"
        );
        assert_eq!(
            DeliveryError::ssrf_blocked("loopback address").record_message(),
            "Callback URL blocked by security policy"
        );
        assert_eq!(
            DeliveryError::RetriesExhausted { attempts: 4, last_error: "HTTP 500".into() }
                .record_message(),
            "Max retries exceeded: HTTP 500"
        );
    }

    #[test]
    fn core_errors_convert() {
        let error = DeliveryError::from(CoreError::Database("locked".into()));
        assert!(matches!(error, DeliveryError::Storage { .. }));

        let error = DeliveryError::from(CoreError::Execution("bad input".into()));
        assert!(matches!(error, DeliveryError::WorkExecution { .. }));
    }

    #[test]
    fn error_display_format() {
        assert_eq!(
            DeliveryError::timeout(Duration::from_millis(1500)).to_string(),
            "request timeout after 1500ms"
        );
        assert_eq!(
            DeliveryError::WorkerPanic { worker_id: 2, error: "boom".into() }.to_string(),
            "worker 2 panicked: boom"
        );
    }
}
