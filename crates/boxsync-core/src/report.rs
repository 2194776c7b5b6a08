//! # Sync Report
//!
//! Counts produced by one pass of the external sync engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome counts of a single sync pass. Read-only to the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    /// When the engine finished the pass.
    pub completed_at: DateTime<Utc>,

    /// Rows pulled from the central store.
    #[serde(default)]
    pub downloaded: u64,

    /// Rows pushed to the central store.
    #[serde(default)]
    pub uploaded: u64,

    /// Rows the engine failed to apply.
    #[serde(default)]
    pub errors: u64,

    /// Rows the engine had to resolve as conflicts.
    #[serde(default)]
    pub conflicts: u64,
}

impl SyncReport {
    /// True when this pass pushed anything other boxes should pull.
    pub fn has_uploads(&self) -> bool {
        self.uploaded > 0
    }

    /// True when the engine reported errors or conflicts.
    pub fn has_issues(&self) -> bool {
        self.errors > 0 || self.conflicts > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_counts_default_to_zero() {
        let json = r#"{"completedAt":"2024-05-01T10:00:00Z","uploaded":3}"#;
        let report: SyncReport = serde_json::from_str(json).unwrap();

        assert_eq!(report.uploaded, 3);
        assert_eq!(report.downloaded, 0);
        assert!(report.has_uploads());
        assert!(!report.has_issues());
    }
}
