// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Batch relocation of inventory files into the category tree

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::{keys, ConfigProvider};
use crate::corpus::{TrainingCorpus, TrainingExample};
use crate::db::{Database, FileRecord, FileState};
use crate::events::{MoveStatus, Notification, NotificationHub};
use crate::jobs::CancellationToken;
use crate::{DropsortError, Result};

/// A record id with the category it should be filed under
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelocationItem {
    pub id: String,
    pub category: String,
}

impl RelocationItem {
    pub fn new(id: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            category: category.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ItemOutcome {
    Moved { destination: PathBuf },
    Failed { reason: String },
    IdNotPresent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemReport {
    pub id: String,
    pub category: String,
    #[serde(flatten)]
    pub outcome: ItemOutcome,
}

/// Per-item results of one relocation job
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelocationReport {
    pub items: Vec<ItemReport>,
    pub moved: usize,
    pub failed: usize,
    pub missing: usize,
    /// Stopped early; items after the last report were not attempted
    pub cancelled: bool,
    pub elapsed_ms: u64,
}

/// Moves files and confirms their records
pub struct BatchRelocator {
    config: Arc<dyn ConfigProvider>,
    db: Database,
    hub: NotificationHub,
}

impl BatchRelocator {
    pub fn new(config: Arc<dyn ConfigProvider>, db: Database, hub: NotificationHub) -> Self {
        Self { config, db, hub }
    }

    /// Relocate each item independently, in order
    ///
    /// Items are not filtered by their hold flag here; see
    /// [`relocation_candidates`]. Only configuration problems fail the
    /// whole job.
    pub fn relocate(
        &self,
        items: &[RelocationItem],
        job_id: &str,
        cancel: &CancellationToken,
    ) -> Result<RelocationReport> {
        let started = Instant::now();
        let origin = self.config.get_path(keys::ORIGIN_DIRECTORY)?;
        let destination_root = self.config.get_path(keys::DESTINATION_ROOT)?;
        let corpus = TrainingCorpus::from_config(self.config.as_ref())?;

        let mut report = RelocationReport::default();
        for item in items {
            if cancel.is_cancelled() {
                warn!("Relocation job {} cancelled before item {}", job_id, item.id);
                report.cancelled = true;
                break;
            }

            let outcome = match self.db.get_active_file(&item.id) {
                Ok(Some(record)) => {
                    match self.move_record(record, &item.category, &origin, &destination_root, &corpus) {
                        Ok(destination) => {
                            report.moved += 1;
                            self.publish(&item.id, format!("Completed {}", destination.display()), MoveStatus::Completed);
                            ItemOutcome::Moved { destination }
                        }
                        Err(e) => {
                            error!("Failed to relocate {}: {}", item.id, e);
                            report.failed += 1;
                            self.publish(&item.id, e.to_string(), MoveStatus::Failed);
                            ItemOutcome::Failed { reason: e.to_string() }
                        }
                    }
                }
                Ok(None) => {
                    debug!("Relocation item {} has no active record", item.id);
                    report.missing += 1;
                    self.publish(&item.id, format!("Record {} not found", item.id), MoveStatus::IdNotPresent);
                    ItemOutcome::IdNotPresent
                }
                Err(e) => {
                    error!("Failed to look up {}: {}", item.id, e);
                    report.failed += 1;
                    self.publish(&item.id, e.to_string(), MoveStatus::Failed);
                    ItemOutcome::Failed { reason: e.to_string() }
                }
            };

            report.items.push(ItemReport {
                id: item.id.clone(),
                category: item.category.clone(),
                outcome,
            });
        }

        report.elapsed_ms = started.elapsed().as_millis() as u64;
        let summary = format!(
            "Moved {} of {} files in {} ms ({} failed, {} not found{})",
            report.moved,
            items.len(),
            report.elapsed_ms,
            report.failed,
            report.missing,
            if report.cancelled { ", cancelled" } else { "" }
        );
        info!("Relocation job {}: {}", job_id, summary);
        self.publish(job_id, summary, MoveStatus::Completed);
        Ok(report)
    }

    fn move_record(
        &self,
        record: FileRecord,
        category: &str,
        origin: &Path,
        destination_root: &Path,
        corpus: &TrainingCorpus,
    ) -> Result<PathBuf> {
        validate_category(category)?;
        let mut updated = record.clone();
        updated.relocate(category)?;

        let source = origin.join(&record.name);
        let folder = destination_root.join(category);
        let destination = folder.join(&record.name);

        updated.path = folder.to_string_lossy().into_owned();

        fs::create_dir_all(&folder)?;
        if destination.exists() {
            return Err(DropsortError::DestinationExists(destination.display().to_string()));
        }
        move_file(&source, &destination)?;

        // A failed item leaves both the file and its record where they were
        if let Err(e) = self.confirm(&record, &updated, category, corpus) {
            if let Err(undo) = move_file(&destination, &source) {
                error!(
                    "Could not move {} back from {}: {}",
                    record.name,
                    destination.display(),
                    undo
                );
            }
            return Err(e);
        }

        self.publish(&record.id, format!("Moved {} to {}", record.name, category), MoveStatus::Moved);
        Ok(destination)
    }

    /// Persist the relocated record, then learn from the move
    fn confirm(
        &self,
        record: &FileRecord,
        updated: &FileRecord,
        category: &str,
        corpus: &TrainingCorpus,
    ) -> Result<()> {
        self.db.update_file(updated)?;
        if let Err(e) = corpus.append(&TrainingExample::new(&record.id, category, &record.name)) {
            if let Err(restore) = self.db.update_file(record) {
                error!("Could not restore record {}: {}", record.id, restore);
            }
            return Err(e);
        }
        Ok(())
    }

    fn publish(&self, subject: &str, message: String, status: MoveStatus) {
        self.hub.publish(Notification::moved(subject, message, status));
    }
}

/// Relocation items for every categorized record not on hold
///
/// This is where the hold flag is enforced; the relocator itself moves
/// whatever it is given.
pub fn relocation_candidates(db: &Database) -> Result<Vec<RelocationItem>> {
    Ok(db
        .list_files(Some(FileState::CATEGORIZED), usize::MAX)?
        .into_iter()
        .filter(|r| !r.not_to_move)
        .filter_map(|r| {
            let category = r.category()?.to_string();
            Some(RelocationItem::new(r.id, category))
        })
        .collect())
}

/// A category must be usable as one directory name
pub fn validate_category(category: &str) -> Result<()> {
    let invalid = category.trim().is_empty()
        || category == "."
        || category == ".."
        || category.contains(|c| matches!(c, '/' | '\\' | '\0'));
    if invalid {
        return Err(DropsortError::InvalidCategory(category.to_string()));
    }
    Ok(())
}

/// Rename, falling back to copy-then-remove (e.g. across filesystems)
fn move_file(source: &Path, destination: &Path) -> io::Result<()> {
    match fs::rename(source, destination) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Err(e),
        Err(e) => {
            debug!("Rename {:?} failed ({}), copying instead", source, e);
            fs::copy(source, destination)?;
            if let Err(e) = fs::remove_file(source) {
                let _ = fs::remove_file(destination);
                return Err(e);
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_category() {
        assert!(validate_category("Invoices").is_ok());
        assert!(validate_category("Tax 2024").is_ok());
        for bad in ["", "  ", ".", "..", "a/b", "a\\b"] {
            assert!(
                matches!(validate_category(bad), Err(DropsortError::InvalidCategory(_))),
                "{:?} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_move_file_missing_source() {
        let dir = tempfile::tempdir().unwrap();
        let err = move_file(&dir.path().join("nope"), &dir.path().join("dest")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_item_report_serializes_flat() {
        let report = ItemReport {
            id: "1".into(),
            category: "Docs".into(),
            outcome: ItemOutcome::IdNotPresent,
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["outcome"], "id_not_present");
        assert_eq!(json["category"], "Docs");
    }
}
