// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Wiring of the ingest → classify → relocate → retrain pipeline

use std::sync::Arc;

use crate::classifier::{CategoryClassifier, ModelStatus, Prediction, TrainingSummary};
use crate::config::{AppConfig, ConfigProvider};
use crate::db::Database;
use crate::events::NotificationHub;
use crate::jobs::CancellationToken;
use crate::relocate::{relocation_candidates, BatchRelocator, RelocationItem, RelocationReport};
use crate::sync::{SyncReport, Synchronizer};
use crate::Result;

/// All pipeline components sharing one config, store and hub
pub struct Pipeline {
    config: Arc<AppConfig>,
    db: Database,
    hub: NotificationHub,
    classifier: Arc<CategoryClassifier>,
    synchronizer: Synchronizer,
    relocator: BatchRelocator,
}

impl Pipeline {
    pub fn new(config: AppConfig, db: Database) -> Result<Self> {
        let config = Arc::new(config);
        let provider: Arc<dyn ConfigProvider> = config.clone();
        let hub = NotificationHub::new(config.notifications.capacity);
        let classifier = Arc::new(CategoryClassifier::new(provider.clone(), &config.classifier));
        let synchronizer = Synchronizer::new(
            provider.clone(),
            db.clone(),
            classifier.clone(),
            hub.clone(),
            &config.sync,
        )?;
        let relocator = BatchRelocator::new(provider, db.clone(), hub.clone());

        Ok(Self {
            config,
            db,
            hub,
            classifier,
            synchronizer,
            relocator,
        })
    }

    /// Open the configured database and build the pipeline on it
    pub fn open(config: AppConfig) -> Result<Self> {
        let db = Database::open(&config.database.path)?;
        Self::new(config, db)
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn hub(&self) -> &NotificationHub {
        &self.hub
    }

    pub fn classifier(&self) -> &CategoryClassifier {
        &self.classifier
    }

    pub fn synchronize(&self, job_id: &str, cancel: &CancellationToken) -> Result<SyncReport> {
        self.synchronizer.synchronize(job_id, cancel)
    }

    pub fn relocate(
        &self,
        items: &[RelocationItem],
        job_id: &str,
        cancel: &CancellationToken,
    ) -> Result<RelocationReport> {
        self.relocator.relocate(items, job_id, cancel)
    }

    pub fn train(&self) -> Result<TrainingSummary> {
        self.classifier.train_and_save()
    }

    pub fn classify(&self, names: &[String]) -> Result<Vec<(String, Prediction)>> {
        self.classifier.classify(names)
    }

    pub fn model_status(&self) -> Result<ModelStatus> {
        self.classifier.status()
    }

    /// Categorized records that are not on hold
    pub fn relocation_candidates(&self) -> Result<Vec<RelocationItem>> {
        relocation_candidates(&self.db)
    }
}
