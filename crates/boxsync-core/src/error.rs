//! # Error Types
//!
//! Domain errors for boxsync-core.
//!
//! ```text
//! boxsync-core  → CoreError   (this file)
//! boxsync-edge  → SyncError   (wraps CoreError)
//! sync-hub      → HubError    (wraps CoreError)
//! ```

use thiserror::Error;

/// Core domain errors.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A required identity field is missing or empty.
    #[error("{field} is required")]
    Required { field: &'static str },

    /// Failed to sign a session token.
    #[error("Failed to sign session token: {0}")]
    TokenSigning(String),

    /// Session token failed verification (signature, issuer, audience, expiry).
    #[error("Invalid session token: {0}")]
    InvalidToken(String),

    /// A wire message could not be encoded or decoded.
    #[error("Malformed message: {0}")]
    MalformedMessage(#[from] serde_json::Error),
}

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;
