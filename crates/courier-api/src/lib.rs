//! HTTP API for courier.
//!
//! Exposes sync and async work submission, request record queries, a health
//! probe, and manual cleanup. Also owns layered configuration and the
//! periodic retention sweep used by the binary.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod handlers;
pub mod retention;
pub mod server;

pub use config::Config;
pub use error::{ApiError, ErrorResponse};
pub use server::{create_router, start_server, AppState};
