//! # Edge Configuration
//!
//! Configuration for the box-side sync agent.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     BOXSYNC_SERVER_URL=https://sync.example.com                        │
//! │     BOXSYNC_JWT_KEY=...                                                │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/boxsync/edge.toml (Linux)                                │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! [server]
//! url = "https://sync.example.com"
//!
//! [auth]
//! issuer = "boxsync"
//! key = "shared-signing-key"
//! expire_days = 7
//!
//! [identity]
//! record_path = "/var/lib/boxsync/practiceinfo.json"
//!
//! [companion]
//! url = "ws://localhost:5001/signalr"
//!
//! [directory]
//! url = "https://registry.example.com"
//! api_key = "..."
//! ```
//!
//! The quiet period, reconnect delay and status poll interval are fixed
//! constants ([`QUIET_PERIOD`], [`RECONNECT_DELAY`], [`STATUS_POLL_INTERVAL`]).

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Fixed Timings
// =============================================================================

/// Quiet period after the last change signal before a sync is triggered.
pub const QUIET_PERIOD: Duration = Duration::from_secs(5);

/// Delay between a failed or lost connection and the next connect attempt.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(10);

/// Interval at which the supervisor polls the connection status.
pub const STATUS_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Longest accepted token validity window (days).
pub const MAX_EXPIRE_DAYS: i64 = 3650;

// =============================================================================
// Sections
// =============================================================================

/// Central service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Base URL of the central API (http/https).
    #[serde(default = "default_server_url")]
    pub url: String,

    /// Connection timeout (seconds).
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

fn default_server_url() -> String {
    "http://localhost:5000".to_string()
}

fn default_connect_timeout() -> u64 {
    10
}

impl Default for ServerSettings {
    fn default() -> Self {
        ServerSettings {
            url: default_server_url(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

/// Session token signing parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSettings {
    #[serde(default = "default_issuer")]
    pub issuer: String,

    /// Defaults to the issuer when unset.
    #[serde(default)]
    pub audience: Option<String>,

    /// Shared HS256 signing key.
    #[serde(default)]
    pub key: String,

    /// Token validity window (days).
    #[serde(default = "default_expire_days")]
    pub expire_days: i64,
}

fn default_issuer() -> String {
    "boxsync".to_string()
}

fn default_expire_days() -> i64 {
    7
}

impl Default for AuthSettings {
    fn default() -> Self {
        AuthSettings {
            issuer: default_issuer(),
            audience: None,
            key: String::new(),
            expire_days: default_expire_days(),
        }
    }
}

/// Where the resolved identity is persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentitySettings {
    #[serde(default = "default_record_path")]
    pub record_path: PathBuf,
}

fn default_record_path() -> PathBuf {
    PathBuf::from("practiceinfo.json")
}

impl Default for IdentitySettings {
    fn default() -> Self {
        IdentitySettings {
            record_path: default_record_path(),
        }
    }
}

/// Local companion (box UI) channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompanionSettings {
    #[serde(default = "default_companion_url")]
    pub url: String,

    #[serde(default = "default_companion_timeout")]
    pub timeout_secs: u64,
}

fn default_companion_url() -> String {
    "ws://localhost:5001/signalr".to_string()
}

fn default_companion_timeout() -> u64 {
    15
}

impl Default for CompanionSettings {
    fn default() -> Self {
        CompanionSettings {
            url: default_companion_url(),
            timeout_secs: default_companion_timeout(),
        }
    }
}

/// Central device directory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DirectorySettings {
    #[serde(default)]
    pub url: Option<String>,

    #[serde(default)]
    pub api_key: Option<String>,
}

/// External sync engine endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Path of the sync proxy, relative to the server URL.
    #[serde(default = "default_engine_path")]
    pub path: String,

    #[serde(default = "default_engine_timeout")]
    pub timeout_secs: u64,
}

fn default_engine_path() -> String {
    "/sync/post".to_string()
}

fn default_engine_timeout() -> u64 {
    600
}

impl Default for EngineSettings {
    fn default() -> Self {
        EngineSettings {
            path: default_engine_path(),
            timeout_secs: default_engine_timeout(),
        }
    }
}

// =============================================================================
// Main Edge Configuration
// =============================================================================

/// Complete edge configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EdgeConfig {
    #[serde(default)]
    pub server: ServerSettings,

    #[serde(default)]
    pub auth: AuthSettings,

    #[serde(default)]
    pub identity: IdentitySettings,

    #[serde(default)]
    pub companion: CompanionSettings,

    #[serde(default)]
    pub directory: DirectorySettings,

    #[serde(default)]
    pub engine: EngineSettings,
}

impl EdgeConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (edge.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading edge config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_overrides(|name| std::env::var(name).ok());
        config.validate()?;

        Ok(config)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        if self.auth.key.is_empty() {
            return Err(SyncError::InvalidConfig(
                "auth.key (session signing key) must be set".into(),
            ));
        }
        if self.auth.issuer.is_empty() {
            return Err(SyncError::InvalidConfig("auth.issuer must be set".into()));
        }
        if !(1..=MAX_EXPIRE_DAYS).contains(&self.auth.expire_days) {
            return Err(SyncError::InvalidConfig(format!(
                "auth.expire_days must be between 1 and {}, got {}",
                MAX_EXPIRE_DAYS, self.auth.expire_days
            )));
        }

        let server = Url::parse(&self.server.url)?;
        if !matches!(server.scheme(), "http" | "https") {
            return Err(SyncError::InvalidUrl(format!(
                "Server URL must start with http:// or https://, got: {}",
                self.server.url
            )));
        }

        let companion = Url::parse(&self.companion.url)?;
        if !matches!(companion.scheme(), "ws" | "wss") {
            return Err(SyncError::InvalidUrl(format!(
                "Companion URL must start with ws:// or wss://, got: {}",
                self.companion.url
            )));
        }

        Ok(())
    }

    /// Applies overrides from a variable lookup (the process environment in
    /// production).
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("BOXSYNC_SERVER_URL") {
            debug!(url = %url, "Overriding server URL from environment");
            self.server.url = url;
        }
        if let Some(issuer) = lookup("BOXSYNC_JWT_ISSUER") {
            self.auth.issuer = issuer;
        }
        if let Some(audience) = lookup("BOXSYNC_JWT_AUDIENCE") {
            self.auth.audience = Some(audience);
        }
        if let Some(key) = lookup("BOXSYNC_JWT_KEY") {
            self.auth.key = key;
        }
        if let Some(days) = lookup("BOXSYNC_JWT_EXPIRE_DAYS") {
            if let Ok(d) = days.parse::<i64>() {
                self.auth.expire_days = d;
            }
        }
        if let Some(path) = lookup("BOXSYNC_IDENTITY_PATH") {
            debug!(path = %path, "Overriding identity record path from environment");
            self.identity.record_path = PathBuf::from(path);
        }
        if let Some(url) = lookup("BOXSYNC_COMPANION_URL") {
            self.companion.url = url;
        }
        if let Some(url) = lookup("BOXSYNC_DIRECTORY_URL") {
            self.directory.url = Some(url);
        }
        if let Some(key) = lookup("BOXSYNC_DIRECTORY_API_KEY") {
            self.directory.api_key = Some(key);
        }
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "boxsync", "edge")
            .map(|dirs| dirs.config_dir().join("edge.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    /// Token audience (falls back to the issuer).
    pub fn audience(&self) -> &str {
        self.auth.audience.as_deref().unwrap_or(&self.auth.issuer)
    }

    /// Realtime channel URL: the server URL with a ws/wss scheme and `/sync`.
    pub fn sync_url(&self) -> SyncResult<Url> {
        let mut url = Url::parse(&self.server.url)?;
        let scheme = match url.scheme() {
            "https" => "wss",
            _ => "ws",
        };
        url.set_scheme(scheme)
            .map_err(|_| SyncError::InvalidUrl(format!("cannot use {} as ws URL", url)))?;
        let base = url.path().trim_end_matches('/').to_string();
        url.set_path(&format!("{}/sync", base));
        Ok(url)
    }

    /// URL of the external sync engine endpoint.
    pub fn engine_url(&self) -> SyncResult<Url> {
        let mut url = Url::parse(&self.server.url)?;
        let base = url.path().trim_end_matches('/').to_string();
        let path = self.engine.path.trim_start_matches('/');
        url.set_path(&format!("{}/{}", base, path));
        Ok(url)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.server.connect_timeout_secs)
    }
}
