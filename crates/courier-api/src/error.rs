//! HTTP error responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use courier_core::RequestId;
use serde::Serialize;
use thiserror::Error;

/// Body returned for every non-2xx response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Always `"error"`.
    pub status: &'static str,
    /// Human-readable description.
    pub error: String,
    /// Request the error relates to, when one was assigned.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<RequestId>,
}

/// Failures a handler can report.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Body or query failed validation.
    #[error("{0}")]
    Validation(String),

    /// No record exists for the requested id.
    #[error("Request not found")]
    NotFound,

    /// The job queue is full.
    #[error("Server overloaded, please retry later")]
    Overloaded {
        /// Request that was rejected.
        request_id: RequestId,
    },

    /// Work or storage failed.
    #[error("{message}")]
    Internal {
        /// Error text.
        message: String,
        /// Request being processed, if any.
        request_id: Option<RequestId>,
    },
}

impl ApiError {
    /// Internal error without an associated request.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into(), request_id: None }
    }

    /// HTTP status for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Overloaded { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn request_id(&self) -> Option<RequestId> {
        match self {
            Self::Overloaded { request_id } => Some(request_id.clone()),
            Self::Internal { request_id, .. } => request_id.clone(),
            Self::Validation(_) | Self::NotFound => None,
        }
    }
}

impl From<courier_core::CoreError> for ApiError {
    fn from(err: courier_core::CoreError) -> Self {
        match err {
            courier_core::CoreError::InvalidInput(message) => Self::Validation(message),
            courier_core::CoreError::NotFound(_) => Self::NotFound,
            other => Self::internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            status: "error",
            error: self.to_string(),
            request_id: self.request_id(),
        };
        (self.status_code(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use courier_core::CoreError;

    use super::*;

    #[test]
    fn status_codes_match_variants() {
        assert_eq!(
            ApiError::Validation("bad".to_string()).status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(ApiError::NotFound.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            ApiError::Overloaded { request_id: RequestId::from("r") }.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(ApiError::internal("boom").status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn core_validation_errors_become_422() {
        let error = ApiError::from(CoreError::InvalidInput("data too long".to_string()));
        assert!(matches!(error, ApiError::Validation(ref m) if m == "data too long"));

        let error = ApiError::from(CoreError::Database("locked".to_string()));
        assert_eq!(error.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn error_body_omits_missing_request_id() {
        let body = ErrorResponse { status: "error", error: "x".to_string(), request_id: None };
        let json = serde_json::to_value(body).unwrap();
        assert_eq!(json, serde_json::json!({ "status": "error", "error": "x" }));
    }
}
