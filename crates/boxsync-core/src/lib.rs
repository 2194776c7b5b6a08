//! # boxsync-core: Domain Types for Box Synchronization
//!
//! Types shared between the edge sync agent running on each box and the
//! central realtime hub. Nothing in this crate performs I/O.
//!
//! ## Data Model
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Core Data Model                                │
//! │                                                                         │
//! │  ┌──────────────────┐   ┌──────────────────┐   ┌──────────────────┐    │
//! │  │  DeviceIdentity  │   │ TenantFilterSet  │   │   SyncReport     │    │
//! │  │  ──────────────  │   │  ──────────────  │   │  ──────────────  │    │
//! │  │  device_id       │──►│  practice_id     │   │  completed_at    │    │
//! │  │  practice_id     │   │  table → column  │   │  downloaded      │    │
//! │  │  doctor_id       │   │  (fixed set)     │   │  uploaded        │    │
//! │  │  doctor_email    │   └──────────────────┘   │  errors          │    │
//! │  └────────┬─────────┘                          │  conflicts       │    │
//! │           │                                    └──────────────────┘    │
//! │           ▼                                                             │
//! │  ┌──────────────────┐   ┌──────────────────────────────────────────┐   │
//! │  │  SessionClaims   │   │  HubMessage (JSON, adjacently tagged)    │   │
//! │  │  sub, PracticeId │   │  ChangeDetect / UploadTrigger /          │   │
//! │  │  iss, aud, exp   │   │  RegisterChange / Event / Ping / Pong    │   │
//! │  └──────────────────┘   └──────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod claims;
pub mod error;
pub mod filters;
pub mod identity;
pub mod protocol;
pub mod report;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use claims::{SessionClaims, ADMIN_TENANT, PRACTICE_CLAIM};
pub use error::{CoreError, CoreResult};
pub use filters::{FilterClause, TenantFilterSet, PRACTICE_TABLES};
pub use identity::{ChangeSource, DeviceIdentity};
pub use protocol::{CompanionMessage, HubMessage};
pub use report::SyncReport;
