//! # sync-hub: Central Realtime Service
//!
//! Authenticates boxes on `/sync`, groups their connections by practice and
//! relays change notifications within a group.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           Sync Hub                                      │
//! │                                                                         │
//! │  Box (P1) ──┐                                                           │
//! │  Box (P1) ──┼──► /sync ──► auth ──► TenantHub ──► ChangeDetect("P1")   │
//! │  Box (P2) ──┘   (ws)     (bearer)   (groups)      to every P1 member   │
//! │                                                                         │
//! │  Portal ─────────────────────────► ungrouped                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration
//! Environment variables:
//! - `HUB_PORT` - listening port (default: 8080)
//! - `HUB_BIND_ADDR` - bind address (default: 0.0.0.0)
//! - `JWT_KEY` - shared HS256 key (required)
//! - `JWT_ISSUER` - expected issuer (default: boxsync)
//! - `JWT_AUDIENCE` - expected audience (default: the issuer)
//! - `MAX_MESSAGE_SIZE` - max WebSocket message size (default: 1MB)

pub mod auth;
pub mod config;
pub mod error;
pub mod hub;
pub mod server;

// Re-exports
pub use config::{ConfigError, HubConfig};
pub use error::HubError;
pub use hub::{ConnectionId, TenantHub};
pub use server::{router, run, serve, AppState};
