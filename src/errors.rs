//! Gateway error types.
//!
//! Every engine operation returns [`GatewayError`].  The enum implements
//! [`axum::response::IntoResponse`] so handlers can simply return
//! `Err(GatewayError::NotFound { .. })` and get a JSON error body.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::storage::backend::StorageError;

/// Error kinds surfaced by the lifecycle and migration engines.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Record missing, or in the wrong lifecycle state for the operation.
    #[error("{message}")]
    NotFound { message: String },

    /// The caller lacks the required relationship to the record.
    #[error("{message}")]
    Forbidden { message: String },

    /// Adapter-level failure: network, auth, quota, or not-found at the provider.
    #[error("storage provider error: {0}")]
    Storage(#[from] StorageError),

    /// A provider identifier that is not configured.  Fatal configuration error.
    #[error("unknown storage provider `{provider}`")]
    UnknownProvider { provider: String },

    /// Malformed input, e.g. an upload without file bytes.
    #[error("{message}")]
    Validation { message: String },

    /// Metadata store or other unexpected internal failure.
    #[error("internal error: {0:#}")]
    Internal(#[from] anyhow::Error),
}

impl GatewayError {
    pub fn not_found(message: impl Into<String>) -> Self {
        GatewayError::NotFound {
            message: message.into(),
        }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        GatewayError::Forbidden {
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        GatewayError::Validation {
            message: message.into(),
        }
    }

    /// Stable machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::NotFound { .. } => "NotFound",
            GatewayError::Forbidden { .. } => "Forbidden",
            GatewayError::Storage(_) => "StorageError",
            GatewayError::UnknownProvider { .. } => "UnknownProvider",
            GatewayError::Validation { .. } => "ValidationError",
            GatewayError::Internal(_) => "InternalError",
        }
    }

    /// HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::NotFound { .. } => StatusCode::NOT_FOUND,
            GatewayError::Forbidden { .. } => StatusCode::FORBIDDEN,
            GatewayError::Storage(_) => StatusCode::BAD_GATEWAY,
            GatewayError::UnknownProvider { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::Validation { .. } => StatusCode::BAD_REQUEST,
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(code = self.code(), "{self}");
        }

        // Internal details stay in the log; clients get a generic message.
        let message = match &self {
            GatewayError::Internal(_) => "We encountered an internal error, please try again.".to_string(),
            other => other.to_string(),
        };

        let body = Json(json!({
            "error": message,
            "code": self.code(),
        }));

        (status, body).into_response()
    }
}
