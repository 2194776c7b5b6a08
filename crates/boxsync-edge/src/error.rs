//! # Sync Error Types
//!
//! Error types for the edge sync lifecycle.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │   Credentials   │  │     Transport           │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  Bootstrap-     │  │  ConnectionFailed       │ │
//! │  │  InvalidUrl     │  │   Unresolved    │  │  Disconnected           │ │
//! │  │  ConfigLoad     │  │  TokenUnavail.  │  │  Timeout / TLS / WS     │ │
//! │  └─────────────────┘  │  IdentityRecord │  └─────────────────────────┘ │
//! │                       │  DeviceInfo     │                               │
//! │  ┌─────────────────┐  │  Directory      │  ┌─────────────────────────┐ │
//! │  │  Sync pass      │  └─────────────────┘  │      Internal           │ │
//! │  │                 │                       │                         │ │
//! │  │  SyncEngine     │                       │  NotConnected           │ │
//! │  │  Notification   │                       │  ChannelError           │ │
//! │  └─────────────────┘                       │                         │ │
//! │                                            └─────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! None of these are process-fatal. Transport and token failures are retried
//! by the reconnect loop; sync pass failures wait for the next change signal.

use boxsync_core::CoreError;
use thiserror::Error;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Sync error type covering every edge-side failure.
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid sync configuration.
    #[error("Invalid sync configuration: {0}")]
    InvalidConfig(String),

    /// Invalid server or companion URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    // =========================================================================
    // Credential Errors
    // =========================================================================
    /// The directory has no practice binding for this device.
    ///
    /// Requires the device to be tagged centrally; not retried on its own.
    #[error("Device {device_id} has no practice binding in the directory")]
    BootstrapUnresolved { device_id: String },

    /// No session token could be produced for this attempt.
    #[error("No session token available: {0}")]
    TokenUnavailable(String),

    /// The persisted identity record could not be read or written.
    #[error("Identity record error: {0}")]
    IdentityRecord(String),

    /// The local companion did not report a device id.
    #[error("Device info lookup failed: {0}")]
    DeviceInfo(String),

    /// The device directory lookup failed.
    #[error("Device directory lookup failed: {0}")]
    Directory(String),

    // =========================================================================
    // Transport Errors
    // =========================================================================
    /// Failed to establish WebSocket connection.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// WebSocket disconnected unexpectedly.
    #[error("Disconnected from sync hub")]
    Disconnected,

    /// Connection timeout.
    #[error("Connection timeout after {0} seconds")]
    Timeout(u64),

    /// TLS/SSL error.
    #[error("TLS error: {0}")]
    TlsError(String),

    /// WebSocket protocol error.
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    /// A wire message could not be encoded or decoded.
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    // =========================================================================
    // Sync Pass Errors
    // =========================================================================
    /// The external sync engine failed.
    #[error("Sync engine failed: {0}")]
    SyncEngine(String),

    /// The upload notification to the tenant group failed.
    #[error("Upload notification failed: {0}")]
    Notification(String),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// No live connection to the hub.
    #[error("Not connected to sync hub")]
    NotConnected,

    /// Channel send/receive failed.
    #[error("Channel error: {0}")]
    ChannelError(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<CoreError> for SyncError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Required { .. } => SyncError::IdentityRecord(err.to_string()),
            CoreError::TokenSigning(msg) | CoreError::InvalidToken(msg) => {
                SyncError::TokenUnavailable(msg)
            }
            CoreError::MalformedMessage(e) => SyncError::InvalidMessage(e.to_string()),
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::InvalidMessage(err.to_string())
    }
}

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        SyncError::InvalidUrl(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for SyncError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match err {
            WsError::ConnectionClosed => SyncError::Disconnected,
            WsError::AlreadyClosed => SyncError::Disconnected,
            WsError::Protocol(p) => SyncError::WebSocketError(p.to_string()),
            WsError::Io(io) => SyncError::ConnectionFailed(io.to_string()),
            WsError::Tls(tls) => SyncError::TlsError(tls.to_string()),
            other => SyncError::WebSocketError(other.to_string()),
        }
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        SyncError::ConnectionFailed(err.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization (for retry logic)
// =============================================================================

impl SyncError {
    /// Returns true if the reconnect loop should simply try again later.
    ///
    /// Everything except configuration problems counts: an unattended box
    /// keeps retrying even while it waits to be provisioned.
    pub fn is_retryable(&self) -> bool {
        !self.is_config_error()
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_)
                | SyncError::InvalidUrl(_)
                | SyncError::ConfigLoadFailed(_)
        )
    }

    /// Returns true if bootstrap found no practice binding.
    pub fn is_bootstrap_unresolved(&self) -> bool {
        matches!(self, SyncError::BootstrapUnresolved { .. })
    }
}
