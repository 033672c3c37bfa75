// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Category classifier: load-or-train model over file names
//!
//! The model artifact lives at `model_path/model_name`. [`CategoryClassifier`]
//! keeps the loaded artifact in an explicit [`ModelHandle`] slot that is
//! swapped whole after each successful retrain, so concurrent readers keep
//! the version they started with.

mod model;

pub use model::{tokenize, CategoryStats, NaiveBayesModel, Prediction, MODEL_FORMAT};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Instant, SystemTime};
use tracing::{debug, info, warn};

use crate::config::{keys, ClassifierConfig, ConfigProvider};
use crate::corpus::TrainingCorpus;
use crate::{DropsortError, Result};

/// A loaded model together with the artifact it came from
#[derive(Debug)]
pub struct ModelHandle {
    pub model: NaiveBayesModel,
    pub path: PathBuf,
    /// Artifact modification time when loaded
    pub modified: Option<SystemTime>,
}

/// Outcome of a training run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingSummary {
    pub model_version: String,
    pub model_path: PathBuf,
    pub trained_at: DateTime<Utc>,
    pub examples: usize,
    pub categories: Vec<String>,
    pub vocabulary_size: usize,
    pub elapsed_ms: u64,
}

/// Model artifact state as seen on disk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelStatus {
    pub model_path: PathBuf,
    pub present: bool,
    pub version: Option<String>,
    pub trained_at: Option<DateTime<Utc>>,
    pub examples: Option<usize>,
    /// The corpus changed since the artifact was trained
    pub stale: bool,
}

/// Classifier engine
pub struct CategoryClassifier {
    config: Arc<dyn ConfigProvider>,
    smoothing: f64,
    current: RwLock<Option<Arc<ModelHandle>>>,
    training: Mutex<()>,
}

impl CategoryClassifier {
    pub fn new(config: Arc<dyn ConfigProvider>, settings: &ClassifierConfig) -> Self {
        Self {
            config,
            smoothing: settings.smoothing,
            current: RwLock::new(None),
            training: Mutex::new(()),
        }
    }

    /// Artifact location from the current settings
    pub fn model_path(&self) -> Result<PathBuf> {
        self.config.joined_path(keys::MODEL_PATH, keys::MODEL_NAME)
    }

    /// Training corpus from the current settings
    pub fn corpus(&self) -> Result<TrainingCorpus> {
        TrainingCorpus::from_config(self.config.as_ref())
    }

    /// Predict a category for each file name
    ///
    /// Trains first when no artifact exists. Fails with
    /// [`DropsortError::ModelUnavailable`] when there is nothing to train on.
    pub fn classify<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<(String, Prediction)>> {
        let handle = self.current_model()?;
        Ok(names
            .iter()
            .map(|name| {
                let name = name.as_ref();
                (name.to_string(), handle.model.predict(name))
            })
            .collect())
    }

    /// The model to classify with, loading or training as needed
    pub fn current_model(&self) -> Result<Arc<ModelHandle>> {
        let path = self.model_path()?;
        match fs::metadata(&path) {
            Ok(meta) => {
                let modified = meta.modified().ok();
                if let Some(handle) = self.loaded()? {
                    if handle.path == path && modified.is_some() && handle.modified == modified {
                        return Ok(handle);
                    }
                }
                match load_artifact(&path) {
                    Ok(model) => {
                        debug!("Loaded model {} from {:?}", model.version, path);
                        Ok(self.install(ModelHandle { model, path, modified })?)
                    }
                    Err(e) => {
                        warn!("Model artifact {:?} unreadable ({}), retraining", path, e);
                        self.retrain_for_classify()
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No model artifact at {:?}, training from corpus", path);
                self.retrain_for_classify()
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Fit on the whole corpus and publish a new artifact
    ///
    /// The previous artifact is only replaced after the new one is fully
    /// written.
    pub fn train_and_save(&self) -> Result<TrainingSummary> {
        let _guard = self
            .training
            .lock()
            .map_err(|_| DropsortError::Config("Training lock poisoned".to_string()))?;
        let started = Instant::now();

        let corpus = self.corpus()?;
        if !corpus.exists() {
            return Err(DropsortError::TrainingDataInvalid(format!(
                "no training corpus at {:?}",
                corpus.path()
            )));
        }
        let examples = corpus.read_all()?;
        let mut model = NaiveBayesModel::fit(&examples, self.smoothing)?;
        model.corpus_digest = corpus.digest()?;

        let path = self.model_path()?;
        write_atomically(&path, &serde_json::to_vec_pretty(&model)?)?;
        let modified = fs::metadata(&path)?.modified().ok();

        let summary = TrainingSummary {
            model_version: model.version.clone(),
            model_path: path.clone(),
            trained_at: model.trained_at,
            examples: model.example_count,
            categories: model.category_names(),
            vocabulary_size: model.vocabulary_size,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            "Trained model {} on {} examples ({} categories) in {}ms",
            summary.model_version,
            summary.examples,
            summary.categories.len(),
            summary.elapsed_ms
        );

        self.install(ModelHandle { model, path, modified })?;
        Ok(summary)
    }

    /// Describe the artifact on disk without training
    pub fn status(&self) -> Result<ModelStatus> {
        let path = self.model_path()?;
        let model = if path.exists() { load_artifact(&path).ok() } else { None };
        let corpus_digest = self.corpus()?.digest()?;
        let stale = match &model {
            Some(m) => m.corpus_digest != corpus_digest,
            None => false,
        };

        Ok(ModelStatus {
            present: model.is_some(),
            version: model.as_ref().map(|m| m.version.clone()),
            trained_at: model.as_ref().map(|m| m.trained_at),
            examples: model.as_ref().map(|m| m.example_count),
            stale,
            model_path: path,
        })
    }

    /// Version of the model currently held in memory
    pub fn loaded_version(&self) -> Option<String> {
        self.loaded().ok().flatten().map(|h| h.model.version.clone())
    }

    fn retrain_for_classify(&self) -> Result<Arc<ModelHandle>> {
        match self.train_and_save() {
            Ok(_) => self
                .loaded()?
                .ok_or_else(|| DropsortError::ModelUnavailable("model not installed".to_string())),
            Err(DropsortError::TrainingDataInvalid(reason)) => {
                Err(DropsortError::ModelUnavailable(reason))
            }
            Err(e) => Err(e),
        }
    }

    fn loaded(&self) -> Result<Option<Arc<ModelHandle>>> {
        self.current
            .read()
            .map(|slot| slot.clone())
            .map_err(|_| DropsortError::Config("Model lock poisoned".to_string()))
    }

    fn install(&self, handle: ModelHandle) -> Result<Arc<ModelHandle>> {
        let handle = Arc::new(handle);
        let mut slot = self
            .current
            .write()
            .map_err(|_| DropsortError::Config("Model lock poisoned".to_string()))?;
        *slot = Some(handle.clone());
        Ok(handle)
    }
}

fn load_artifact(path: &Path) -> Result<NaiveBayesModel> {
    let data = fs::read(path)?;
    let model: NaiveBayesModel = serde_json::from_slice(&data)?;
    if model.format != MODEL_FORMAT {
        return Err(DropsortError::ModelUnavailable(format!(
            "unsupported model format {}",
            model.format
        )));
    }
    Ok(model)
}

/// Write to a sibling temp file, then rename over the target
fn write_atomically(path: &Path, data: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir)?;

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| DropsortError::Config(format!("invalid model path {:?}", path)))?;
    let tmp = dir.join(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4()));

    let result = (|| -> Result<()> {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(data)?;
        file.sync_all()?;
        fs::rename(&tmp, path)?;
        Ok(())
    })();
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::corpus::TrainingExample;

    fn classifier(root: &Path) -> (CategoryClassifier, TrainingCorpus) {
        let config = Arc::new(AppConfig::rooted_at(root));
        let classifier = CategoryClassifier::new(config.clone(), &config.classifier);
        let corpus = classifier.corpus().unwrap();
        (classifier, corpus)
    }

    fn seed(corpus: &TrainingCorpus) {
        for (i, (category, name)) in [
            ("Invoices", "invoice_2023.pdf"),
            ("Invoices", "invoice_feb.pdf"),
            ("Photos", "IMG_1001.jpg"),
        ]
        .iter()
        .enumerate()
        {
            corpus.append(&TrainingExample::new(i.to_string(), *category, *name)).unwrap();
        }
    }

    #[test]
    fn test_cold_start_trains_and_writes_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let (classifier, corpus) = classifier(dir.path());
        seed(&corpus);
        assert!(!classifier.model_path().unwrap().exists());

        let results = classifier.classify(&["invoice_2024.pdf"]).unwrap();
        assert_eq!(results[0].0, "invoice_2024.pdf");
        assert_eq!(results[0].1.category, "Invoices");
        assert!(classifier.model_path().unwrap().exists());
        assert!(classifier.loaded_version().is_some());
    }

    #[test]
    fn test_no_corpus_means_model_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let (classifier, _) = classifier(dir.path());
        assert!(matches!(
            classifier.classify(&["a.pdf"]),
            Err(DropsortError::ModelUnavailable(_))
        ));
        assert!(matches!(
            classifier.train_and_save(),
            Err(DropsortError::TrainingDataInvalid(_))
        ));
    }

    #[test]
    fn test_failed_training_keeps_previous_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let (classifier, corpus) = classifier(dir.path());
        seed(&corpus);
        let first = classifier.train_and_save().unwrap();
        let before = fs::read(&first.model_path).unwrap();

        fs::write(corpus.path(), "id;category;name\n").unwrap();
        assert!(matches!(
            classifier.train_and_save(),
            Err(DropsortError::TrainingDataInvalid(_))
        ));
        assert_eq!(fs::read(&first.model_path).unwrap(), before);
        assert_eq!(classifier.loaded_version(), Some(first.model_version));
    }

    #[test]
    fn test_classification_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let (classifier, corpus) = classifier(dir.path());
        seed(&corpus);
        classifier.train_and_save().unwrap();

        let first = classifier.classify(&["report_q1.pdf"]).unwrap();
        for _ in 0..5 {
            assert_eq!(classifier.classify(&["report_q1.pdf"]).unwrap(), first);
        }
    }

    #[test]
    fn test_missing_artifact_is_retrained_even_when_cached() {
        let dir = tempfile::tempdir().unwrap();
        let (classifier, corpus) = classifier(dir.path());
        seed(&corpus);
        let summary = classifier.train_and_save().unwrap();

        fs::remove_file(&summary.model_path).unwrap();
        classifier.classify(&["x.pdf"]).unwrap();
        assert!(summary.model_path.exists());
        assert_ne!(classifier.loaded_version(), Some(summary.model_version));
    }

    #[test]
    fn test_status_reports_stale_model() {
        let dir = tempfile::tempdir().unwrap();
        let (classifier, corpus) = classifier(dir.path());
        assert!(!classifier.status().unwrap().present);

        seed(&corpus);
        classifier.train_and_save().unwrap();
        let status = classifier.status().unwrap();
        assert!(status.present);
        assert!(!status.stale);
        assert_eq!(status.examples, Some(3));

        corpus.append(&TrainingExample::new("9", "Photos", "beach.jpg")).unwrap();
        assert!(classifier.status().unwrap().stale);
    }

    #[test]
    fn test_no_temp_files_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let (classifier, corpus) = classifier(dir.path());
        seed(&corpus);
        let summary = classifier.train_and_save().unwrap();

        let models_dir = summary.model_path.parent().unwrap();
        let names: Vec<String> = fs::read_dir(models_dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["category_model.json".to_string()]);
    }
}
