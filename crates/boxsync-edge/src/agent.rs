//! # Sync Agent
//!
//! Wires the provisioner, connection manager, orchestrator and debouncer
//! into one running unit.
//!
//! ## Agent Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        SyncAgent Architecture                           │
//! │                                                                         │
//! │  notify_local_change() ──┐                                              │
//! │                          ▼                                              │
//! │  hub ChangeDetect ──► ChangeDebouncer ──(5s quiet)──► SyncOrchestrator  │
//! │        ▲                                                   │            │
//! │        │ inbound                                engine     │ Upload-    │
//! │        │                                                   │ Trigger    │
//! │  ┌─────┴──────────────────────────────────────────────┐    │            │
//! │  │ ConnectionManager (supervisor task)                 │◄───┘            │
//! │  │   CredentialProvisioner → token → HubConnector      │                 │
//! │  │   on connect: one request_sync()                    │                 │
//! │  └─────────────────────────────────────────────────────┘                 │
//! │                                                                         │
//! │  STATUS EVENTS (to the host via SyncEventEmitter):                     │
//! │  • state changes  • completed passes  • errors                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use boxsync_core::{ChangeSource, HubMessage, SyncReport};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{EdgeConfig, QUIET_PERIOD};
use crate::connection::{ConnectionManager, ConnectionState, HubConnector};
use crate::debounce::ChangeDebouncer;
use crate::device::{HttpDeviceDirectory, LoopbackDeviceInfo};
use crate::engine::{HttpSyncEngine, ProgressSink, SyncEngine};
use crate::error::{SyncError, SyncResult};
use crate::identity::{CredentialProvisioner, IdentityFile, SessionState};
use crate::orchestrator::{SyncOrchestrator, SyncOutcome};
use crate::token::JwtSigner;
use crate::transport::WsConnector;

// =============================================================================
// Sync Status
// =============================================================================

/// Current sync status for external queries.
#[derive(Debug, Clone)]
pub struct SyncStatus {
    /// Current connection state.
    pub connection_state: ConnectionState,

    /// Whether currently connected to the hub.
    pub is_connected: bool,

    /// Practice this box is bound to, once resolved.
    pub practice_id: Option<String>,

    /// Counts from the last completed pass.
    pub last_report: Option<SyncReport>,

    /// Last error message (if any).
    pub last_error: Option<String>,
}

impl Default for SyncStatus {
    fn default() -> Self {
        SyncStatus {
            connection_state: ConnectionState::Disconnected,
            is_connected: false,
            practice_id: None,
            last_report: None,
            last_error: None,
        }
    }
}

// =============================================================================
// Event Emitter Trait
// =============================================================================

/// Trait for emitting sync events to a host (UI, supervisor, ...).
pub trait SyncEventEmitter: Send + Sync {
    /// Emits a connection state change.
    fn emit_state(&self, state: ConnectionState);

    /// Emits the counts of a completed pass.
    fn emit_report(&self, report: &SyncReport);

    /// Emits a sync error event.
    fn emit_error(&self, message: &str, retryable: bool);
}

/// No-op event emitter.
pub struct NoOpEmitter;

impl SyncEventEmitter for NoOpEmitter {
    fn emit_state(&self, _state: ConnectionState) {}
    fn emit_report(&self, _report: &SyncReport) {}
    fn emit_error(&self, _message: &str, _retryable: bool) {}
}

// =============================================================================
// Sync Agent
// =============================================================================

/// A fully wired, not yet started agent.
pub struct SyncAgent {
    connection: Arc<ConnectionManager>,
    orchestrator: Arc<SyncOrchestrator>,
    inbound_rx: mpsc::Receiver<HubMessage>,
    quiet_period: Duration,
}

impl SyncAgent {
    /// Spawns the supervisor, debouncer and message router.
    pub fn start(self) -> SyncAgentHandle {
        info!("Starting sync agent");

        let (debouncer, debounce_task) =
            ChangeDebouncer::spawn(self.orchestrator.clone(), self.quiet_period);

        let (supervisor_tx, supervisor_rx) = mpsc::channel(1);
        let supervisor = tokio::spawn(
            self.connection
                .clone()
                .run(self.orchestrator.clone(), supervisor_rx),
        );

        let (router_tx, router_rx) = mpsc::channel(1);
        let router = tokio::spawn(message_router(
            self.inbound_rx,
            debouncer.clone(),
            router_rx,
        ));

        SyncAgentHandle {
            connection: self.connection,
            orchestrator: self.orchestrator,
            debouncer,
            shutdown_txs: vec![supervisor_tx, router_tx],
            tasks: Arc::new(Mutex::new(vec![supervisor, router, debounce_task])),
        }
    }
}

/// Routes hub pushes: `ChangeDetect` becomes a remote change signal.
async fn message_router(
    mut inbound_rx: mpsc::Receiver<HubMessage>,
    debouncer: ChangeDebouncer,
    mut shutdown_rx: mpsc::Receiver<()>,
) {
    loop {
        tokio::select! {
            msg = inbound_rx.recv() => match msg {
                Some(HubMessage::ChangeDetect { tenant_id }) => {
                    debug!(tenant_id = %tenant_id, "Remote change detected");
                    debouncer.signal(ChangeSource::Remote);
                }
                Some(HubMessage::Event { tag, data }) => {
                    info!(tag = %tag, data = %data, "Tenant event received");
                }
                Some(HubMessage::Error { code, message }) => {
                    warn!(code = %code, message = %message, "Received error from hub");
                }
                Some(other) => {
                    debug!(msg_type = %other.type_name(), "Unhandled message type");
                }
                None => break,
            },

            _ = shutdown_rx.recv() => {
                info!("Message router received shutdown");
                break;
            }
        }
    }

    info!("Message router stopped");
}

// =============================================================================
// Agent Handle (for external control)
// =============================================================================

/// Handle for controlling a running agent.
#[derive(Clone)]
pub struct SyncAgentHandle {
    connection: Arc<ConnectionManager>,
    orchestrator: Arc<SyncOrchestrator>,
    debouncer: ChangeDebouncer,
    shutdown_txs: Vec<mpsc::Sender<()>>,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl SyncAgentHandle {
    /// Reports a write to the local store.
    pub fn notify_local_change(&self) {
        self.debouncer.signal(ChangeSource::Local);
    }

    /// Runs a pass now, bypassing the debounce window.
    pub async fn request_sync(&self) -> SyncOutcome {
        self.orchestrator.request_sync().await
    }

    /// Gets the current sync status.
    pub async fn status(&self) -> SyncStatus {
        let connection_state = self.connection.state().await;
        let practice_id = self
            .connection
            .session()
            .lock()
            .await
            .practice_id()
            .map(str::to_string);

        SyncStatus {
            connection_state,
            is_connected: connection_state == ConnectionState::Connected,
            practice_id,
            last_report: self.orchestrator.last_report().await,
            last_error: self.orchestrator.last_error().await,
        }
    }

    /// Stops the agent.
    ///
    /// Background loops stop right away, pending waits are abandoned, and
    /// a pass that is already running is allowed to finish.
    pub async fn shutdown(&self) {
        info!("Shutting down sync agent");

        for tx in &self.shutdown_txs {
            let _ = tx.send(()).await;
        }
        self.debouncer.shutdown().await;

        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().await.drain(..).collect();
        for task in tasks {
            let _ = task.await;
        }

        self.orchestrator.wait_idle().await;
        info!("Sync agent stopped");
    }
}

// =============================================================================
// Builder Pattern
// =============================================================================

/// Builder for creating a SyncAgent.
pub struct SyncAgentBuilder {
    provisioner: CredentialProvisioner,
    connector: Arc<dyn HubConnector>,
    engine: Arc<dyn SyncEngine>,
    emitter: Option<Arc<dyn SyncEventEmitter>>,
    progress: Option<Arc<dyn ProgressSink>>,
}

impl SyncAgentBuilder {
    pub fn new(
        provisioner: CredentialProvisioner,
        connector: Arc<dyn HubConnector>,
        engine: Arc<dyn SyncEngine>,
    ) -> Self {
        SyncAgentBuilder {
            provisioner,
            connector,
            engine,
            emitter: None,
            progress: None,
        }
    }

    /// Wires the production collaborators from configuration.
    pub fn from_config(config: &EdgeConfig) -> SyncResult<Self> {
        config.validate()?;

        let directory_url = config.directory.url.clone().ok_or_else(|| {
            SyncError::InvalidConfig("directory.url is required for bootstrap".into())
        })?;
        let lookup_timeout = Duration::from_secs(config.companion.timeout_secs);

        let provisioner = CredentialProvisioner::new(
            IdentityFile::new(config.identity.record_path.clone()),
            Arc::new(LoopbackDeviceInfo::new(
                config.companion.url.clone(),
                lookup_timeout,
            )),
            Arc::new(HttpDeviceDirectory::new(
                &directory_url,
                config.directory.api_key.clone(),
                lookup_timeout,
            )?),
            Arc::new(JwtSigner::from_config(config)?),
        );

        let connector = Arc::new(WsConnector::from_config(config)?);
        let engine = Arc::new(HttpSyncEngine::new(
            config.engine_url()?,
            Duration::from_secs(config.engine.timeout_secs),
        )?);

        Ok(Self::new(provisioner, connector, engine))
    }

    /// Sets the event emitter.
    pub fn with_emitter(mut self, emitter: Arc<dyn SyncEventEmitter>) -> Self {
        self.emitter = Some(emitter);
        self
    }

    /// Sets the progress sink handed to the engine.
    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Builds the SyncAgent.
    pub fn build(self) -> SyncAgent {
        let emitter = self.emitter.unwrap_or_else(|| Arc::new(NoOpEmitter));
        let (inbound_tx, inbound_rx) = mpsc::channel(100);

        let connection = Arc::new(
            ConnectionManager::new(
                Arc::new(self.provisioner),
                Arc::new(Mutex::new(SessionState::default())),
                self.connector,
                inbound_tx,
            )
            .with_emitter(emitter.clone()),
        );

        let mut orchestrator =
            SyncOrchestrator::new(connection.clone(), self.engine).with_emitter(emitter);
        if let Some(progress) = self.progress {
            orchestrator = orchestrator.with_progress(progress);
        }

        SyncAgent {
            connection,
            orchestrator: Arc::new(orchestrator),
            inbound_rx,
            quiet_period: QUIET_PERIOD,
        }
    }
}
