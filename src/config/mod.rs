// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Configuration management for dropsort
//!
//! Pipeline locations (origin directory, destination root, model and corpus
//! files) are stored as environment-tagged settings and resolved through the
//! [`ConfigProvider`] trait at call time. Everything else is plain serde
//! configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::{DropsortError, Result};

/// Setting keys consumed by the pipeline
pub mod keys {
    pub const ORIGIN_DIRECTORY: &str = "origin_directory";
    pub const DESTINATION_ROOT: &str = "destination_root";
    pub const MODEL_PATH: &str = "model_path";
    pub const MODEL_NAME: &str = "model_name";
    pub const TRAINING_CORPUS_PATH: &str = "training_corpus_path";
    pub const TRAINING_CORPUS_NAME: &str = "training_corpus_name";

    /// Every key the pipeline needs to run
    pub const REQUIRED: [&str; 6] = [
        ORIGIN_DIRECTORY,
        DESTINATION_ROOT,
        MODEL_PATH,
        MODEL_NAME,
        TRAINING_CORPUS_PATH,
        TRAINING_CORPUS_NAME,
    ];
}

/// Lookup of named pipeline settings for the active environment
pub trait ConfigProvider: Send + Sync {
    /// Current value of a setting
    fn get(&self, key: &str) -> Result<String>;

    /// A setting interpreted as a filesystem path
    fn get_path(&self, key: &str) -> Result<PathBuf> {
        self.get(key).map(PathBuf::from)
    }

    /// A directory setting joined with a file-name setting
    fn joined_path(&self, dir_key: &str, name_key: &str) -> Result<PathBuf> {
        Ok(self.get_path(dir_key)?.join(self.get(name_key)?))
    }
}

/// Main application configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    /// Environment used to filter settings
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Environment-tagged pipeline settings
    #[serde(default = "default_settings")]
    pub settings: Vec<Setting>,

    /// Inventory synchronization settings
    #[serde(default)]
    pub sync: SyncConfig,

    /// Classifier settings
    #[serde(default)]
    pub classifier: ClassifierConfig,

    /// Notification hub settings
    #[serde(default)]
    pub notifications: NotificationConfig,

    /// Web API settings
    #[serde(default)]
    pub web: WebConfig,

    /// Database settings
    #[serde(default)]
    pub database: DatabaseConfig,
}

/// A single key/value setting
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Setting {
    pub key: String,
    pub value: String,
    #[serde(default = "default_environment")]
    pub environment: String,
    #[serde(default = "default_true")]
    pub active: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SyncConfig {
    /// Glob patterns for file names the synchronizer ignores
    #[serde(default)]
    pub ignore_patterns: Vec<String>,
    /// How long watch mode waits for a new file to stop growing
    #[serde(default = "default_stable_wait")]
    pub stable_wait_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ClassifierConfig {
    /// Additive (Laplace) smoothing for token likelihoods
    #[serde(default = "default_smoothing")]
    pub smoothing: f64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct NotificationConfig {
    /// Broadcast buffer per subscriber
    #[serde(default = "default_capacity")]
    pub capacity: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WebConfig {
    #[serde(default = "default_web_host")]
    pub host: String,
    #[serde(default = "default_web_port")]
    pub port: u16,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

// Default value functions
fn default_environment() -> String { "default".to_string() }
fn default_true() -> bool { true }
fn default_stable_wait() -> u64 { 10 }
fn default_smoothing() -> f64 { 1.0 }
fn default_capacity() -> usize { 256 }
fn default_web_host() -> String { "127.0.0.1".to_string() }
fn default_web_port() -> u16 { 8080 }
fn default_db_path() -> String { "dropsort.db".to_string() }

fn default_settings() -> Vec<Setting> {
    [
        (keys::ORIGIN_DIRECTORY, "./inbox"),
        (keys::DESTINATION_ROOT, "./sorted"),
        (keys::MODEL_PATH, "./models"),
        (keys::MODEL_NAME, "category_model.json"),
        (keys::TRAINING_CORPUS_PATH, "./data"),
        (keys::TRAINING_CORPUS_NAME, "training_corpus.csv"),
    ]
    .into_iter()
    .map(|(key, value)| Setting {
        key: key.to_string(),
        value: value.to_string(),
        environment: default_environment(),
        active: true,
    })
    .collect()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            environment: default_environment(),
            settings: default_settings(),
            sync: SyncConfig::default(),
            classifier: ClassifierConfig::default(),
            notifications: NotificationConfig::default(),
            web: WebConfig::default(),
            database: DatabaseConfig::default(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            ignore_patterns: Vec::new(),
            stable_wait_secs: default_stable_wait(),
        }
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self { smoothing: default_smoothing() }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self { capacity: default_capacity() }
    }
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            host: default_web_host(),
            port: default_web_port(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: default_db_path() }
    }
}

impl AppConfig {
    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            // Missing sections fall back to their serde defaults
            let content = std::fs::read_to_string(path)?;
            let config: Self = serde_json::from_str(&content)
                .map_err(|e| DropsortError::Config(format!("Failed to parse config: {}", e)))?;
            Ok(config)
        } else {
            tracing::info!("Config file not found at {:?}, using defaults", path);
            Ok(Self::default())
        }
    }

    /// Save configuration to a JSON file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Default configuration with every pipeline location under `root`
    pub fn rooted_at(root: &Path) -> Self {
        let mut config = Self::default();

        // Locations live in settings; the database path is plain config
        let dir = |name: &str| root.join(name).to_string_lossy().into_owned();
        config.set(keys::ORIGIN_DIRECTORY, dir("inbox"));
        config.set(keys::DESTINATION_ROOT, dir("sorted"));
        config.set(keys::MODEL_PATH, dir("models"));
        config.set(keys::TRAINING_CORPUS_PATH, dir("data"));
        config.database.path = dir("dropsort.db");
        config
    }

    /// Set a value for the active environment, replacing any active entry
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        let environment = self.environment.clone();

        // Inactive entries are left untouched
        match self
            .settings
            .iter_mut()
            .find(|s| s.active && s.key == key && s.environment == environment)
        {
            Some(setting) => setting.value = value,
            None => self.settings.push(Setting {
                key: key.to_string(),
                value,
                environment,
                active: true,
            }),
        }
    }

    /// Check that every required setting resolves
    pub fn validate(&self) -> Result<()> {
        // Blank values count as missing
        let missing: Vec<&str> = keys::REQUIRED
            .iter()
            .copied()
            .filter(|key| self.get(key).is_err())
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(DropsortError::Config(format!(
                "missing settings for environment '{}': {}",
                self.environment,
                missing.join(", ")
            )))
        }
    }
}

impl ConfigProvider for AppConfig {
    fn get(&self, key: &str) -> Result<String> {
        // Only the active entry for the current environment counts
        self.settings
            .iter()
            .find(|s| s.active && s.key == key && s.environment == self.environment)
            .map(|s| s.value.trim().to_string())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                DropsortError::Config(format!(
                    "setting '{}' is not defined for environment '{}'",
                    key, self.environment
                ))
            })
    }
}
