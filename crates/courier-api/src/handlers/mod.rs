//! HTTP request handlers.
//!
//! Handlers are grouped by functionality:
//! - `work` - sync and async work submission
//! - `requests` - record lookup and listing
//! - `health` - health probe and manual cleanup
//!
//! All errors are rendered through `ApiError` as
//! `{"status": "error", "error": ..., "request_id": ...}`.

pub mod health;
pub mod requests;
pub mod work;

pub use health::{cleanup_requests, health_check};
pub use requests::{get_request, list_requests};
pub use work::{process_async, process_sync};
