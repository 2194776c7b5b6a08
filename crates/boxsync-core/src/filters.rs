//! # Tenant Filter Set
//!
//! Every synchronized table is scoped to one practice. The mapping from
//! table to scoping column is fixed; only the practice id varies per box.

use serde::{Deserialize, Serialize};

/// Synchronized tables and the column that scopes each one to a practice.
pub const PRACTICE_TABLES: [(&str, &str); 8] = [
    ("Practices", "Id"),
    ("AspNetUsers", "PracticeId"),
    ("Exams", "PracticeId"),
    ("Locations", "PracticeId"),
    ("Patients", "PracticeId"),
    ("PracticeSettings", "PracticeId"),
    ("ScanData", "PracticeId"),
    ("Scans", "PracticeId"),
];

/// A single `table.column = practice_id` filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterClause {
    pub table: String,
    pub column: String,
}

/// The filters applied to every sync pass for one practice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantFilterSet {
    practice_id: String,
    clauses: Vec<FilterClause>,
}

impl TenantFilterSet {
    /// Builds the fixed filter set for a practice.
    pub fn for_practice(practice_id: impl Into<String>) -> Self {
        let clauses = PRACTICE_TABLES
            .iter()
            .map(|(table, column)| FilterClause {
                table: table.to_string(),
                column: column.to_string(),
            })
            .collect();

        TenantFilterSet {
            practice_id: practice_id.into(),
            clauses,
        }
    }

    /// The practice id every clause is compared against.
    pub fn practice_id(&self) -> &str {
        &self.practice_id
    }

    pub fn clauses(&self) -> &[FilterClause] {
        &self.clauses
    }

    /// Returns the scoping column for a table, if it is synchronized.
    pub fn column_for(&self, table: &str) -> Option<&str> {
        self.clauses
            .iter()
            .find(|c| c.table == table)
            .map(|c| c.column.as_str())
    }

    /// True when the practice id is set and every synchronized table has a clause.
    pub fn is_complete(&self) -> bool {
        !self.practice_id.trim().is_empty()
            && PRACTICE_TABLES
                .iter()
                .all(|(table, column)| self.column_for(table) == Some(*column))
    }
}
