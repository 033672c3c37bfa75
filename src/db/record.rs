// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Inventory records and their categorization state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{DropsortError, Result};

/// Where a file is in the ingest lifecycle
///
/// The legacy flag view (`is_new`, `is_to_categorize`, `is_deleted`,
/// `active`) is derived from this, so no invalid flag combination can be
/// stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum FileState {
    /// Seen on disk, not yet run through the classifier
    Discovered,
    /// Persisted without a prediction; retried on a later pass
    PendingCategorization,
    /// Carries a machine-predicted, unconfirmed category
    Categorized { category: String },
    /// Moved into the destination tree under a confirmed category
    Relocated { category: String },
    /// Soft-deleted
    Retired,
}

impl FileState {
    pub const DISCOVERED: &'static str = "discovered";
    pub const PENDING: &'static str = "pending_categorization";
    pub const CATEGORIZED: &'static str = "categorized";
    pub const RELOCATED: &'static str = "relocated";
    pub const RETIRED: &'static str = "retired";

    /// Every state name, in lifecycle order
    pub const NAMES: [&'static str; 5] = [
        Self::DISCOVERED,
        Self::PENDING,
        Self::CATEGORIZED,
        Self::RELOCATED,
        Self::RETIRED,
    ];

    /// Stable name used for storage and filtering
    pub fn name(&self) -> &'static str {
        match self {
            Self::Discovered => Self::DISCOVERED,
            Self::PendingCategorization => Self::PENDING,
            Self::Categorized { .. } => Self::CATEGORIZED,
            Self::Relocated { .. } => Self::RELOCATED,
            Self::Retired => Self::RETIRED,
        }
    }

    pub fn category(&self) -> Option<&str> {
        match self {
            Self::Categorized { category } | Self::Relocated { category } => Some(category),
            _ => None,
        }
    }

    /// Rebuild a state from its stored columns
    pub fn from_parts(name: &str, category: Option<String>) -> Option<Self> {
        match (name, category) {
            (Self::DISCOVERED, _) => Some(Self::Discovered),
            (Self::PENDING, _) => Some(Self::PendingCategorization),
            (Self::CATEGORIZED, Some(category)) => Some(Self::Categorized { category }),
            (Self::RELOCATED, Some(category)) => Some(Self::Relocated { category }),
            (Self::RETIRED, _) => Some(Self::Retired),
            _ => None,
        }
    }
}

/// One entry per physical file ever seen
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: String,
    pub name: String,
    /// Source directory at last scan
    pub path: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
    #[serde(flatten)]
    pub state: FileState,
    /// User hold: skip when building relocation batches
    pub not_to_move: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FileRecord {
    /// A freshly scanned file with a new id
    pub fn discovered(
        name: impl Into<String>,
        path: impl Into<String>,
        size: u64,
        last_modified: DateTime<Utc>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: new_file_id(),
            name: name.into(),
            path: path.into(),
            size,
            last_modified,
            state: FileState::Discovered,
            not_to_move: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn category(&self) -> Option<&str> {
        self.state.category()
    }

    pub fn is_new(&self) -> bool {
        matches!(
            self.state,
            FileState::Discovered | FileState::PendingCategorization | FileState::Categorized { .. }
        )
    }

    pub fn is_to_categorize(&self) -> bool {
        self.is_new()
    }

    pub fn is_deleted(&self) -> bool {
        self.state == FileState::Retired
    }

    pub fn is_active(&self) -> bool {
        !self.is_deleted()
    }

    /// Attach a provisional (predicted) category
    pub fn categorize(&mut self, category: impl Into<String>) -> Result<()> {
        if !self.is_to_categorize() {
            return Err(self.transition_error("categorize"));
        }
        self.state = FileState::Categorized { category: category.into() };
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Record that no prediction could be made
    pub fn mark_unclassified(&mut self) {
        if self.state == FileState::Discovered {
            self.state = FileState::PendingCategorization;
        }
    }

    /// Confirm the category after the file was moved
    pub fn relocate(&mut self, category: impl Into<String>) -> Result<()> {
        if self.is_deleted() {
            return Err(self.transition_error("relocate"));
        }
        self.state = FileState::Relocated { category: category.into() };
        self.not_to_move = false;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Set or clear the relocation hold
    pub fn set_hold(&mut self, hold: bool) -> Result<()> {
        if !self.is_to_categorize() {
            return Err(self.transition_error("hold"));
        }
        self.not_to_move = hold;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn retire(&mut self) {
        self.state = FileState::Retired;
        self.not_to_move = false;
        self.updated_at = Utc::now();
    }

    fn transition_error(&self, action: &str) -> DropsortError {
        DropsortError::InvalidTransition(format!(
            "cannot {} record {} in state '{}'",
            action,
            self.id,
            self.state.name()
        ))
    }
}

/// Generate a new UUID for file records
pub fn new_file_id() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> FileRecord {
        FileRecord::discovered("invoice_2024.pdf", "/inbox", 10, Utc::now())
    }

    #[test]
    fn test_discovered_flags() {
        let r = record();
        assert!(r.is_new());
        assert!(r.is_to_categorize());
        assert!(r.is_active());
        assert_eq!(r.category(), None);
    }

    #[test]
    fn test_relocation_clears_flags() {
        let mut r = record();
        r.categorize("Invoices").unwrap();
        r.set_hold(true).unwrap();
        assert_eq!(r.category(), Some("Invoices"));

        r.relocate("Finance").unwrap();
        assert!(!r.is_new());
        assert!(!r.is_to_categorize());
        assert!(!r.not_to_move);
        assert_eq!(r.category(), Some("Finance"));
        assert!(r.categorize("Other").is_err());
        assert!(matches!(r.set_hold(true), Err(DropsortError::InvalidTransition(_))));
    }

    #[test]
    fn test_unclassified_then_retired() {
        let mut r = record();
        r.mark_unclassified();
        assert_eq!(r.state, FileState::PendingCategorization);
        assert!(r.is_to_categorize());

        r.retire();
        assert!(r.is_deleted());
        assert!(!r.is_active());
        assert!(r.relocate("Invoices").is_err());
    }

    #[test]
    fn test_state_from_parts() {
        assert_eq!(
            FileState::from_parts("categorized", Some("A".into())),
            Some(FileState::Categorized { category: "A".into() })
        );
        assert_eq!(FileState::from_parts("relocated", None), None);
        assert_eq!(FileState::from_parts("bogus", None), None);
    }

    #[test]
    fn test_serializes_flat_state() {
        let mut r = record();
        r.categorize("Invoices").unwrap();
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["state"], "categorized");
        assert_eq!(json["category"], "Invoices");
    }
}
