// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Inventory synchronization: reconcile the origin directory with the store

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::classifier::{CategoryClassifier, Prediction};
use crate::config::{keys, ConfigProvider, SyncConfig};
use crate::db::{Database, FileRecord};
use crate::events::{Notification, NotificationHub, SyncStage};
use crate::jobs::CancellationToken;
use crate::watcher::should_process;
use crate::{DropsortError, Result};

/// Counts from one synchronization pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncReport {
    /// Eligible files found in the origin directory
    pub scanned: usize,
    /// New inventory records created
    pub added: usize,
    /// Previously unclassified records that received a prediction
    pub reclassified: usize,
    /// Records (new or old) still without a prediction
    pub unclassified: usize,
    pub elapsed_ms: u64,
}

/// A regular file found in the origin directory
#[derive(Debug, Clone)]
pub struct ScannedFile {
    pub name: String,
    pub size: u64,
    pub modified: DateTime<Utc>,
}

/// Inventory synchronizer
pub struct Synchronizer {
    config: Arc<dyn ConfigProvider>,
    db: Database,
    classifier: Arc<CategoryClassifier>,
    hub: NotificationHub,
    ignore: Vec<glob::Pattern>,
}

impl Synchronizer {
    pub fn new(
        config: Arc<dyn ConfigProvider>,
        db: Database,
        classifier: Arc<CategoryClassifier>,
        hub: NotificationHub,
        settings: &SyncConfig,
    ) -> Result<Self> {
        let ignore = settings
            .ignore_patterns
            .iter()
            .map(|p| {
                glob::Pattern::new(p).map_err(|e| {
                    DropsortError::Config(format!("invalid ignore pattern '{}': {}", p, e))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { config, db, classifier, hub, ignore })
    }

    /// Add inventory records for files the store has not seen yet
    ///
    /// New records are classified before their first insert. A failed
    /// prediction leaves them unclassified; a failed directory read aborts
    /// the pass before anything is written.
    pub fn synchronize(&self, job_id: &str, cancel: &CancellationToken) -> Result<SyncReport> {
        let started = Instant::now();
        let origin = self.config.get_path(keys::ORIGIN_DIRECTORY)?;
        if !origin.is_dir() {
            return Err(DropsortError::Config(format!(
                "origin directory {:?} does not exist",
                origin
            )));
        }

        self.progress(job_id, format!("Scanning {}", origin.display()), SyncStage::Scanning);
        let scanned = scan_origin(&origin, &self.ignore)?;
        cancel.check()?;

        let dir = origin.to_string_lossy().into_owned();
        let mut new_records = Vec::new();
        for file in &scanned {
            if self.db.find_active_by_name(&file.name)?.is_none() {
                new_records.push(FileRecord::discovered(&file.name, &dir, file.size, file.modified));
            }
        }
        let mut pending = self.db.list_unclassified()?;
        debug!("{} new files, {} awaiting a prediction", new_records.len(), pending.len());

        let names: Vec<&str> = new_records
            .iter()
            .chain(pending.iter())
            .map(|r| r.name.as_str())
            .collect();
        let predictions = if names.is_empty() {
            HashMap::new()
        } else {
            self.progress(job_id, format!("Classifying {} files", names.len()), SyncStage::Classifying);
            self.predict(&names)
        };
        cancel.check()?;

        let mut unclassified = 0;
        for record in new_records.iter_mut() {
            match predictions.get(&record.name) {
                Some(p) => record.categorize(p.category.clone())?,
                None => {
                    record.mark_unclassified();
                    unclassified += 1;
                }
            }
        }

        self.progress(job_id, format!("Saving {} new records", new_records.len()), SyncStage::Persisting);
        let added = if new_records.is_empty() { 0 } else { self.db.insert_files(&new_records)? };

        let mut reclassified = 0;
        for record in pending.iter_mut() {
            match predictions.get(&record.name) {
                Some(p) => {
                    record.categorize(p.category.clone())?;
                    self.db.update_file(record)?;
                    reclassified += 1;
                }
                None => unclassified += 1,
            }
        }

        let report = SyncReport {
            scanned: scanned.len(),
            added,
            reclassified,
            unclassified,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            "Synchronized {}: {} scanned, {} added, {} reclassified, {} unclassified",
            origin.display(),
            report.scanned,
            report.added,
            report.reclassified,
            report.unclassified
        );
        self.progress(
            job_id,
            format!("Scanned {} files, added {}", report.scanned, report.added),
            SyncStage::Completed,
        );
        Ok(report)
    }

    fn predict(&self, names: &[&str]) -> HashMap<String, Prediction> {
        match self.classifier.classify(names) {
            Ok(results) => results.into_iter().collect(),
            Err(e) => {
                warn!("Classification failed, leaving {} files unclassified: {}", names.len(), e);
                HashMap::new()
            }
        }
    }

    fn progress(&self, job_id: &str, message: String, stage: SyncStage) {
        self.hub.publish(Notification::refresh(job_id, message, stage));
    }
}

/// List eligible regular files directly inside `dir`, sorted by name
///
/// Entries that vanish mid-scan are skipped. Any other read error is
/// returned; callers treat a partial listing as unusable.
pub fn scan_origin(dir: &Path, ignore: &[glob::Pattern]) -> Result<Vec<ScannedFile>> {
    let mut files = Vec::new();

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path: PathBuf = entry.path();
        let name = match entry.file_name().into_string() {
            Ok(n) => n,
            Err(raw) => {
                warn!("Skipping non UTF-8 file name: {:?}", raw);
                continue;
            }
        };
        if !should_process(&path) || ignore.iter().any(|p| p.matches(&name)) {
            continue;
        }

        // Symlinks and directories are not inventory entries
        let meta = match entry.metadata() {
            Ok(meta) if meta.is_file() => meta,
            Ok(_) => continue,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("{:?} vanished during the scan", path);
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        let modified = meta
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());

        files.push(ScannedFile {
            name,
            size: meta.len(),
            modified,
        });
    }

    files.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_filters_entries() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.pdf", "a.txt", ".hidden", "download.part", "Thumbs.db", "skip.log"] {
            fs::write(dir.path().join(name), "x").unwrap();
        }
        fs::create_dir(dir.path().join("folder")).unwrap();

        let ignore = vec![glob::Pattern::new("*.log").unwrap()];
        let files = scan_origin(dir.path(), &ignore).unwrap();
        let names: Vec<&str> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["a.txt", "b.pdf"]);
        assert_eq!(files[0].size, 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_scan_skips_symlinks() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("real.pdf"), "x").unwrap();
        std::os::unix::fs::symlink(dir.path().join("real.pdf"), dir.path().join("alias.pdf")).unwrap();
        std::os::unix::fs::symlink(dir.path().join("missing.pdf"), dir.path().join("dangling.pdf")).unwrap();

        let files = scan_origin(dir.path(), &[]).unwrap();
        let names: Vec<&str> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["real.pdf"]);
    }

    #[test]
    fn test_scan_missing_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(scan_origin(&dir.path().join("gone"), &[]).is_err());
    }
}
