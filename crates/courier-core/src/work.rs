//! Deterministic CPU-bound work shared by the sync and async paths.

use std::{fmt::Write as _, time::Instant};

use sha2::{Digest, Sha256};

use crate::{
    error::Result,
    models::{RequestId, WorkPayload, WorkResult},
};

/// Computes a `WorkResult` from a payload.
///
/// Implementations are synchronous and may block; async callers run them on
/// a blocking thread. The same executor must serve both submission modes so
/// identical input yields identical hashes.
pub trait WorkExecutor: Send + Sync + 'static {
    /// Runs the work for one request.
    ///
    /// # Errors
    ///
    /// Returns an error if the work cannot be completed.
    fn execute(&self, request_id: &RequestId, payload: &WorkPayload) -> Result<WorkResult>;
}

/// Iterated SHA-256 hash chain.
///
/// `input_hash` is the hex digest of the data. Each iteration `i` hashes the
/// string `"{previous}:{i}"`; the final digest is `output_hash`.
#[derive(Debug, Clone, Copy, Default)]
pub struct HashWorkExecutor;

impl HashWorkExecutor {
    /// Creates a new hash executor.
    pub fn new() -> Self {
        Self
    }
}

impl WorkExecutor for HashWorkExecutor {
    fn execute(&self, request_id: &RequestId, payload: &WorkPayload) -> Result<WorkResult> {
        let started = Instant::now();

        let input_hash = hex_digest(payload.data.as_bytes());
        let mut current = input_hash.clone();
        let mut link = String::with_capacity(80);
        for i in 0..payload.iterations {
            link.clear();
            // Writing to a String cannot fail.
            let _ = write!(link, "{current}:{i}");
            current = hex_digest(link.as_bytes());
        }

        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

        Ok(WorkResult {
            request_id: request_id.clone(),
            input_hash,
            output_hash: current,
            iterations: payload.iterations,
            processing_time_ms: (elapsed_ms * 1000.0).round() / 1000.0,
        })
    }
}

fn hex_digest(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}
