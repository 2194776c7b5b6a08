//! # Sync Orchestrator
//!
//! Runs one sync pass on request and tells the practice's other boxes
//! when it uploaded something.
//!
//! ## Request Flow
//! ```text
//! request_sync()
//!     │
//!     ├── pass already running? ────────────► AlreadyRunning (dropped)
//!     ├── connection not Connected? ────────► Offline (nothing queued)
//!     ├── token / filter set unavailable? ──► PreconditionFailed
//!     │
//!     ▼
//! engine.synchronize(filters, token, progress)
//!     │
//!     ├── Err ──────────────────────────────► Failed (logged)
//!     ▼
//! uploaded > 0 ? ── yes ──► hub: UploadTrigger(practice)   (best effort)
//!     │
//!     ▼
//! Completed(report)
//! ```

use async_trait::async_trait;
use boxsync_core::{HubMessage, SyncReport, TenantFilterSet};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::agent::{NoOpEmitter, SyncEventEmitter};
use crate::connection::ConnectionManager;
use crate::debounce::SyncTrigger;
use crate::engine::{ProgressSink, SyncEngine, TracingProgress};
use crate::error::{SyncError, SyncResult};
use crate::token::SessionToken;

/// What a call to [`SyncOrchestrator::request_sync`] did.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    /// The engine ran and returned counts.
    Completed(SyncReport),
    /// Not connected; nothing ran and nothing was queued.
    Offline,
    /// Another pass was in progress; this request was dropped.
    AlreadyRunning,
    /// No valid token or tenant filter set.
    PreconditionFailed(String),
    /// The engine returned an error.
    Failed(String),
}

pub struct SyncOrchestrator {
    connection: Arc<ConnectionManager>,
    engine: Arc<dyn SyncEngine>,
    progress: Arc<dyn ProgressSink>,
    emitter: Arc<dyn SyncEventEmitter>,
    sync_guard: Mutex<()>,
    last_report: RwLock<Option<SyncReport>>,
    last_error: RwLock<Option<String>>,
}

impl SyncOrchestrator {
    pub fn new(connection: Arc<ConnectionManager>, engine: Arc<dyn SyncEngine>) -> Self {
        SyncOrchestrator {
            connection,
            engine,
            progress: Arc::new(TracingProgress),
            emitter: Arc::new(NoOpEmitter),
            sync_guard: Mutex::new(()),
            last_report: RwLock::new(None),
            last_error: RwLock::new(None),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_emitter(mut self, emitter: Arc<dyn SyncEventEmitter>) -> Self {
        self.emitter = emitter;
        self
    }

    pub async fn last_report(&self) -> Option<SyncReport> {
        self.last_report.read().await.clone()
    }

    pub async fn last_error(&self) -> Option<String> {
        self.last_error.read().await.clone()
    }

    /// Waits until no pass is running.
    pub async fn wait_idle(&self) {
        let _guard = self.sync_guard.lock().await;
    }

    /// Runs one sync pass if the box is connected and no pass is running.
    pub async fn request_sync(&self) -> SyncOutcome {
        let _guard = match self.sync_guard.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                debug!("Sync already in progress, dropping trigger");
                return SyncOutcome::AlreadyRunning;
            }
        };

        if !self.connection.is_connected().await {
            let state = self.connection.state().await;
            info!(state = %state, "Not connected, sync skipped");
            return SyncOutcome::Offline;
        }

        let (filters, token) = match self.prepare().await {
            Ok(prepared) => prepared,
            Err(e) => {
                warn!(error = %e, "Sync precondition failed");
                self.record_error(&e).await;
                return SyncOutcome::PreconditionFailed(e.to_string());
            }
        };
        let practice_id = filters.practice_id().to_string();

        info!(practice_id = %practice_id, "Sync pass starting");
        let report = match self
            .engine
            .synchronize(&filters, &token, self.progress.as_ref())
            .await
        {
            Ok(report) => report,
            Err(e) => {
                error!(practice_id = %practice_id, error = %e, "Sync pass failed");
                self.record_error(&e).await;
                return SyncOutcome::Failed(e.to_string());
            }
        };

        info!(
            practice_id = %practice_id,
            completed_at = %report.completed_at,
            downloaded = report.downloaded,
            uploaded = report.uploaded,
            errors = report.errors,
            conflicts = report.conflicts,
            "Sync pass completed"
        );
        if report.has_issues() {
            warn!(
                errors = report.errors,
                conflicts = report.conflicts,
                "Sync engine reported rows it could not apply cleanly"
            );
        }

        if report.has_uploads() {
            self.notify_upload(&practice_id).await;
        }

        *self.last_report.write().await = Some(report.clone());
        *self.last_error.write().await = None;
        self.emitter.emit_report(&report);

        SyncOutcome::Completed(report)
    }

    async fn prepare(&self) -> SyncResult<(TenantFilterSet, SessionToken)> {
        let mut session = self.connection.session().lock().await;
        let token = self
            .connection
            .provisioner()
            .session_token(&mut session, Utc::now())?;

        let practice_id = session
            .practice_id()
            .ok_or_else(|| SyncError::IdentityRecord("identity not resolved".into()))?;
        let filters = TenantFilterSet::for_practice(practice_id);
        if !filters.is_complete() {
            return Err(SyncError::InvalidConfig(format!(
                "incomplete tenant filter set for practice '{}'",
                practice_id
            )));
        }

        Ok((filters, token))
    }

    async fn notify_upload(&self, practice_id: &str) {
        match self
            .connection
            .invoke(HubMessage::upload_trigger(practice_id))
            .await
        {
            Ok(()) => debug!(practice_id, "Upload notification sent"),
            Err(e) => {
                let e = SyncError::Notification(e.to_string());
                warn!(practice_id, error = %e, "Upload notification not delivered");
            }
        }
    }

    async fn record_error(&self, e: &SyncError) {
        *self.last_error.write().await = Some(e.to_string());
        self.emitter.emit_error(&e.to_string(), e.is_retryable());
    }
}

#[async_trait]
impl SyncTrigger for SyncOrchestrator {
    async fn request_sync(&self) {
        let outcome = SyncOrchestrator::request_sync(self).await;
        debug!(?outcome, "Triggered sync finished");
    }
}
