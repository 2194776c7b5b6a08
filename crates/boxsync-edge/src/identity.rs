//! # Credential Provisioner
//!
//! Resolves the box's practice binding once and issues session tokens.
//!
//! ## Bootstrap Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         ensure_identity()                               │
//! │                                                                         │
//! │  cached in SessionState? ──yes──► return                               │
//! │          │ no                                                           │
//! │          ▼                                                              │
//! │  identity record on disk? ──yes──► cache, return   (bootstrap skipped) │
//! │          │ no                                                           │
//! │          ▼                                                              │
//! │  companion.device_id() ──► directory.device_tags(id)                   │
//! │          │                          │                                   │
//! │          │              no practice tag ──► BootstrapUnresolved        │
//! │          ▼                                                              │
//! │  write record, cache, return                                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Once the record exists the bootstrap collaborators are never called again
//! for as long as the record is present.

use boxsync_core::DeviceIdentity;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::device::{DeviceDirectory, DeviceInfoSource};
use crate::error::{SyncError, SyncResult};
use crate::token::{SessionToken, TokenSigner};

// =============================================================================
// Session State
// =============================================================================

/// Identity and token cached for the life of the process.
#[derive(Debug, Default)]
pub struct SessionState {
    pub identity: Option<DeviceIdentity>,
    pub token: Option<SessionToken>,
}

impl SessionState {
    /// Practice id of the cached identity.
    pub fn practice_id(&self) -> Option<&str> {
        self.identity.as_ref().map(|i| i.practice_id.as_str())
    }
}

/// Session state shared by the connection manager and the orchestrator.
pub type SharedSession = Arc<Mutex<SessionState>>;

// =============================================================================
// Identity Record
// =============================================================================

/// The JSON file holding the resolved identity.
#[derive(Debug, Clone)]
pub struct IdentityFile {
    path: PathBuf,
}

impl IdentityFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        IdentityFile { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the record; `None` if the file does not exist.
    pub async fn load(&self) -> SyncResult<Option<DeviceIdentity>> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(SyncError::IdentityRecord(e.to_string())),
        };

        let identity: DeviceIdentity = serde_json::from_str(&contents)
            .map_err(|e| SyncError::IdentityRecord(format!("{}: {}", self.path.display(), e)))?;
        identity.validate()?;
        Ok(Some(identity))
    }

    /// Writes the record through a temporary file and a rename.
    pub async fn store(&self, identity: &DeviceIdentity) -> SyncResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| SyncError::IdentityRecord(e.to_string()))?;
        }

        let json = serde_json::to_string_pretty(identity)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| SyncError::IdentityRecord(e.to_string()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| SyncError::IdentityRecord(e.to_string()))?;

        Ok(())
    }
}

// =============================================================================
// Credential Provisioner
// =============================================================================

/// Resolves the device identity and issues session tokens.
pub struct CredentialProvisioner {
    record: IdentityFile,
    device_info: Arc<dyn DeviceInfoSource>,
    directory: Arc<dyn DeviceDirectory>,
    signer: Arc<dyn TokenSigner>,
}

impl CredentialProvisioner {
    pub fn new(
        record: IdentityFile,
        device_info: Arc<dyn DeviceInfoSource>,
        directory: Arc<dyn DeviceDirectory>,
        signer: Arc<dyn TokenSigner>,
    ) -> Self {
        CredentialProvisioner {
            record,
            device_info,
            directory,
            signer,
        }
    }

    /// Returns the identity, bootstrapping it if no record exists yet.
    ///
    /// The session lock is only taken to read and fill the cache; record I/O
    /// and the bootstrap round trips run without it.
    ///
    /// Fails with [`SyncError::BootstrapUnresolved`] when the directory has
    /// no practice binding for this device. That is not retried here.
    pub async fn ensure_identity(
        &self,
        session: &Mutex<SessionState>,
    ) -> SyncResult<DeviceIdentity> {
        let cached = session.lock().await.identity.clone();
        if let Some(identity) = cached {
            return Ok(identity);
        }

        let identity = self.resolve_identity().await?;
        let mut state = session.lock().await;
        Ok(state.identity.get_or_insert(identity).clone())
    }

    /// Loads the identity record, or runs the bootstrap and writes one.
    pub async fn resolve_identity(&self) -> SyncResult<DeviceIdentity> {
        if let Some(identity) = self.record.load().await? {
            debug!(practice_id = %identity.practice_id, "Loaded identity record");
            return Ok(identity);
        }

        info!(path = %self.record.path().display(), "No identity record, bootstrapping");
        let identity = self.bootstrap().await?;

        self.record.store(&identity).await?;
        info!(
            practice_id = %identity.practice_id,
            doctor_id = %identity.doctor_id,
            "Identity resolved and persisted"
        );
        Ok(identity)
    }

    async fn bootstrap(&self) -> SyncResult<DeviceIdentity> {
        let device_id = self.device_info.device_id().await?;
        debug!(device_id = %device_id, "Companion reported device id");

        let tags = self.directory.device_tags(&device_id).await?;
        let result = match tags {
            Some(tags) => tags.into_identity(&device_id),
            None => Err(SyncError::BootstrapUnresolved {
                device_id: device_id.clone(),
            }),
        };

        if let Err(SyncError::BootstrapUnresolved { .. }) = &result {
            warn!(
                device_id = %device_id,
                "Device has no practice tag; it must be provisioned in the directory"
            );
        }
        result
    }

    /// Returns the cached token while it is valid at `now`, otherwise signs
    /// a new one valid for the configured window.
    ///
    /// Every failure is reported as [`SyncError::TokenUnavailable`].
    pub fn session_token(
        &self,
        state: &mut SessionState,
        now: DateTime<Utc>,
    ) -> SyncResult<SessionToken> {
        if let Some(token) = &state.token {
            if token.is_valid_at(now) {
                return Ok(token.clone());
            }
        }

        let identity = state
            .identity
            .as_ref()
            .ok_or_else(|| SyncError::TokenUnavailable("identity not resolved".into()))?;

        let expires_at = now
            .checked_add_signed(self.signer.validity())
            .ok_or_else(|| {
                SyncError::TokenUnavailable("token validity window out of range".into())
            })?;
        let value = self
            .signer
            .sign(identity, now, expires_at)
            .map_err(|e| match e {
                SyncError::TokenUnavailable(msg) => SyncError::TokenUnavailable(msg),
                other => SyncError::TokenUnavailable(other.to_string()),
            })?;

        let token = SessionToken::new(value, expires_at);
        debug!(expires_at = %expires_at, "Issued session token");
        state.token = Some(token.clone());
        Ok(token)
    }
}
