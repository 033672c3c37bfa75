// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Dropsort: watched-folder file sorter
//!
//! Files landing in an origin directory are inventoried, given a provisional
//! category by a naive Bayes classifier over their names, and relocated into
//! a per-category tree once confirmed. Every confirmed move is appended to a
//! training corpus that the next retrain learns from.

pub mod classifier;
pub mod config;
pub mod corpus;
pub mod db;
pub mod error;
pub mod events;
pub mod jobs;
pub mod pipeline;
pub mod relocate;
pub mod sync;
pub mod watcher;
pub mod web;

pub use config::AppConfig;
pub use error::{DropsortError, Result};
pub use pipeline::Pipeline;
