// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Error types for dropsort

use thiserror::Error;

/// Result type alias for dropsort operations
pub type Result<T> = std::result::Result<T, DropsortError>;

/// dropsort error types
#[derive(Error, Debug)]
pub enum DropsortError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("File system error: {0}")]
    FileSystem(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Training corpus error: {0}")]
    Corpus(#[from] csv::Error),

    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),

    #[error("Classification unavailable: {0}")]
    ModelUnavailable(String),

    #[error("Training data invalid: {0}")]
    TrainingDataInvalid(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Invalid category name: {0:?}")]
    InvalidCategory(String),

    #[error("Invalid state transition: {0}")]
    InvalidTransition(String),

    #[error("Destination already exists: {0}")]
    DestinationExists(String),

    #[error("Job cancelled")]
    Cancelled,
}
