//! Error types for the Gateway

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

use foundry_core::error::{ApprovalError, FoundryError};

/// Gateway error type
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0} is not attached to this gateway")]
    Unavailable(&'static str),

    #[error(transparent)]
    Core(#[from] FoundryError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::Core(FoundryError::Validation(_)) => StatusCode::BAD_REQUEST,
            GatewayError::Core(FoundryError::Approval(ApprovalError::Forbidden(_))) => {
                StatusCode::FORBIDDEN
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

/// Result type for Gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;
