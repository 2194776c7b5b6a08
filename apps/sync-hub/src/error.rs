//! Error types for the sync hub.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Sync hub errors.
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("Authentication failed: {0}")]
    Unauthorized(String),

    #[error("Failed to bind to {addr}: {reason}")]
    Bind { addr: String, reason: String },

    #[error("Server error: {0}")]
    Server(String),
}

impl IntoResponse for HubError {
    fn into_response(self) -> Response {
        let status = match &self {
            HubError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}
