//! Sync hub configuration module.
//!
//! Configuration is loaded from environment variables with fallback to defaults.

use serde::{Deserialize, Serialize};

/// Default listening port for the hub.
pub const DEFAULT_HUB_PORT: u16 = 8080;

/// Default maximum WebSocket message size (1MB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Sync hub configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    /// Listening port
    pub port: u16,

    /// Bind address
    pub bind_addr: String,

    /// Shared HS256 key used to verify session tokens
    pub jwt_key: String,

    /// Expected token issuer
    pub jwt_issuer: String,

    /// Expected token audience (defaults to the issuer)
    pub jwt_audience: String,

    /// Max WebSocket message size in bytes
    pub max_message_size: usize,
}

impl HubConfig {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the configuration from a variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let jwt_issuer = lookup("JWT_ISSUER").unwrap_or_else(|| "boxsync".to_string());

        let config = HubConfig {
            port: lookup("HUB_PORT")
                .unwrap_or_else(|| DEFAULT_HUB_PORT.to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("HUB_PORT".to_string()))?,

            bind_addr: lookup("HUB_BIND_ADDR").unwrap_or_else(|| "0.0.0.0".to_string()),

            jwt_key: lookup("JWT_KEY")
                .filter(|key| !key.is_empty())
                .ok_or_else(|| ConfigError::MissingRequired("JWT_KEY".to_string()))?,

            jwt_audience: lookup("JWT_AUDIENCE").unwrap_or_else(|| jwt_issuer.clone()),
            jwt_issuer,

            max_message_size: lookup("MAX_MESSAGE_SIZE")
                .unwrap_or_else(|| DEFAULT_MAX_MESSAGE_SIZE.to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("MAX_MESSAGE_SIZE".to_string()))?,
        };

        Ok(config)
    }

    /// Returns the full bind address.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {0}")]
    InvalidValue(String),

    #[error("Missing required configuration: {0}")]
    MissingRequired(String),
}
