//! # boxsync-edge: Edge Sync Orchestrator
//!
//! Everything that runs on a box to keep its local store in step with the
//! central store: identity and credentials, the realtime hub connection,
//! change debouncing and the sync pass itself.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Edge Sync Architecture                           │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                 SyncAgent (wiring + lifecycle)                   │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │                                         │
//! │         ┌─────────────────────┼─────────────────────┐                  │
//! │         ▼                     ▼                     ▼                   │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │ Credential-    │  │ Connection-    │  │ ChangeDebouncer        │    │
//! │  │ Provisioner    │  │ Manager        │  │                        │    │
//! │  │                │  │                │  │ local + remote change  │    │
//! │  │ identity file, │  │ connect, poll, │  │ signals, 5s quiet      │    │
//! │  │ bootstrap,     │  │ reconnect 10s  │  │ period, one trigger    │    │
//! │  │ cached token   │  │ after loss     │  │ per burst              │    │
//! │  └────────────────┘  └───────┬────────┘  └───────────┬────────────┘    │
//! │                              │                       ▼                  │
//! │                              │            ┌────────────────────────┐    │
//! │                              └───────────►│ SyncOrchestrator       │    │
//! │                               UploadTrigger│ engine pass + notify   │    │
//! │                                           └────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`agent`] - `SyncAgent` wiring, handle and builder
//! - [`config`] - Edge configuration (TOML + environment)
//! - [`connection`] - Connection state machine and reconnect supervisor
//! - [`debounce`] - Change signal coalescing
//! - [`device`] - Device info and directory collaborators
//! - [`engine`] - External sync engine seam
//! - [`error`] - Sync error types
//! - [`identity`] - Identity record and credential provisioning
//! - [`orchestrator`] - One sync pass at a time
//! - [`token`] - Session tokens and signing
//! - [`transport`] - WebSocket hub connector
//!
//! ## Usage
//!
//! ```rust,ignore
//! use boxsync_edge::{EdgeConfig, SyncAgentBuilder};
//!
//! let config = EdgeConfig::load(None)?;
//! let handle = SyncAgentBuilder::from_config(&config)?.build().start();
//!
//! handle.notify_local_change();
//! println!("Connected: {}", handle.status().await.is_connected);
//!
//! handle.shutdown().await;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod agent;
pub mod config;
pub mod connection;
pub mod debounce;
pub mod device;
pub mod engine;
pub mod error;
pub mod identity;
pub mod orchestrator;
pub mod token;
pub mod transport;

// =============================================================================
// Re-exports
// =============================================================================

pub use agent::{
    NoOpEmitter, SyncAgent, SyncAgentBuilder, SyncAgentHandle, SyncEventEmitter, SyncStatus,
};
pub use config::{
    EdgeConfig, MAX_EXPIRE_DAYS, QUIET_PERIOD, RECONNECT_DELAY, STATUS_POLL_INTERVAL,
};
pub use connection::{ConnectionManager, ConnectionState, HubConnector, HubLink};
pub use debounce::{ChangeDebouncer, SyncTrigger};
pub use device::{DeviceDirectory, DeviceInfoSource, DirectoryTags};
pub use engine::{HttpSyncEngine, ProgressSink, SyncEngine, TracingProgress};
pub use error::{SyncError, SyncResult};
pub use identity::{CredentialProvisioner, IdentityFile, SessionState, SharedSession};
pub use orchestrator::{SyncOrchestrator, SyncOutcome};
pub use token::{JwtSigner, SessionToken, TokenSigner};
pub use transport::WsConnector;
