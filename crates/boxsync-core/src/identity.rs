//! # Device Identity
//!
//! The practice binding resolved for a box during bootstrap.
//!
//! The identity is persisted to a small JSON record on the box. Once that
//! record exists it is the only source of truth: the bootstrap lookups are
//! never repeated for the lifetime of the record.
//!
//! ## Record Format
//! ```json
//! { "DoctorEmail": "dr@example.com", "DoctorId": "d-1", "PracticeId": "P1" }
//! ```
//! `DeviceId` is written alongside when known; records without it still load.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Resolved identity of a box.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeviceIdentity {
    /// Hardware-rooted device id reported by the companion service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,

    /// Practice (tenant) this box belongs to.
    pub practice_id: String,

    /// Doctor the box acts on behalf of.
    pub doctor_id: String,

    /// Doctor email, used as the token subject.
    pub doctor_email: String,
}

impl DeviceIdentity {
    /// Creates a new identity.
    pub fn new(
        device_id: Option<String>,
        practice_id: impl Into<String>,
        doctor_id: impl Into<String>,
        doctor_email: impl Into<String>,
    ) -> Self {
        DeviceIdentity {
            device_id,
            practice_id: practice_id.into(),
            doctor_id: doctor_id.into(),
            doctor_email: doctor_email.into(),
        }
    }

    /// Checks that every field needed to sign a session token is present.
    pub fn validate(&self) -> CoreResult<()> {
        if self.practice_id.trim().is_empty() {
            return Err(CoreError::Required {
                field: "practice_id",
            });
        }
        if self.doctor_id.trim().is_empty() {
            return Err(CoreError::Required { field: "doctor_id" });
        }
        if self.doctor_email.trim().is_empty() {
            return Err(CoreError::Required {
                field: "doctor_email",
            });
        }
        Ok(())
    }
}

/// Where a change signal came from.
///
/// Signals from both sources are indistinguishable once they reach the
/// debouncer; the source is only carried for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeSource {
    /// A write to the local store on this box.
    Local,
    /// A `ChangeDetect` notification pushed by the hub.
    Remote,
}

impl std::fmt::Display for ChangeSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChangeSource::Local => write!(f, "local"),
            ChangeSource::Remote => write!(f, "remote"),
        }
    }
}
