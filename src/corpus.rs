// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Append-only training corpus of confirmed placements
//!
//! One `;`-delimited line per example: `recordId;category;name`. A header
//! row is written when the file is created.

use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::config::{keys, ConfigProvider};
use crate::{DropsortError, Result};

const HEADER: [&str; 3] = ["id", "category", "name"];

/// A labeled example: a file name and the category it was filed under
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingExample {
    pub record_id: String,
    pub category: String,
    pub name: String,
}

impl TrainingExample {
    pub fn new(
        record_id: impl Into<String>,
        category: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            record_id: record_id.into(),
            category: category.into(),
            name: name.into(),
        }
    }
}

/// Training corpus file
#[derive(Debug, Clone)]
pub struct TrainingCorpus {
    path: PathBuf,
}

impl TrainingCorpus {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Resolve the corpus location from the current settings
    pub fn from_config(config: &dyn ConfigProvider) -> Result<Self> {
        let path = config.joined_path(keys::TRAINING_CORPUS_PATH, keys::TRAINING_CORPUS_NAME)?;
        Ok(Self::new(path))
    }

    /// Append one example, writing the header first on a new file
    pub fn append(&self, example: &TrainingExample) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        let mut buf = Vec::new();
        if file.metadata()?.len() == 0 {
            buf.extend(encode_line(&HEADER)?);
        }
        buf.extend(encode_line(&[
            example.record_id.as_str(),
            example.category.as_str(),
            example.name.as_str(),
        ])?);

        // One write per append keeps concurrent appenders from interleaving
        file.write_all(&buf)?;
        Ok(())
    }

    /// Read every well-formed example; malformed lines are skipped
    pub fn read_all(&self) -> Result<Vec<TrainingExample>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b';')
            .has_headers(false)
            .flexible(true)
            .from_path(&self.path)?;

        let mut examples = Vec::new();
        for (line, record) in reader.records().enumerate() {
            let record = match record {
                Ok(r) => r,
                Err(e) => {
                    warn!("Skipping unreadable corpus line {}: {}", line + 1, e);
                    continue;
                }
            };
            if line == 0 && is_header(&record) {
                continue;
            }
            match (record.get(0), record.get(1), record.get(2), record.len()) {
                (Some(id), Some(category), Some(name), 3)
                    if !category.trim().is_empty() && !name.trim().is_empty() =>
                {
                    examples.push(TrainingExample::new(id, category.trim(), name));
                }
                _ => warn!("Skipping malformed corpus line {}: {:?}", line + 1, record),
            }
        }

        Ok(examples)
    }

    /// BLAKE3 digest of the corpus bytes, if the file exists
    pub fn digest(&self) -> Result<Option<String>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let data = fs::read(&self.path)?;
        Ok(Some(blake3::hash(&data).to_hex().to_string()))
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Get corpus file path
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn encode_line(fields: &[&str]) -> Result<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b';')
        .terminator(csv::Terminator::Any(b'\n'))
        .has_headers(false)
        .from_writer(Vec::new());
    writer.write_record(fields)?;
    writer
        .into_inner()
        .map_err(|e| DropsortError::FileSystem(e.into_error()))
}

fn is_header(record: &csv::StringRecord) -> bool {
    record.len() == HEADER.len()
        && record
            .iter()
            .zip(HEADER)
            .all(|(field, expected)| field.trim().eq_ignore_ascii_case(expected))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_writes_header_once() {
        let dir = tempfile::tempdir().unwrap();
        let corpus = TrainingCorpus::new(dir.path().join("data").join("corpus.csv"));

        corpus.append(&TrainingExample::new("1", "Invoices", "invoice_2024.pdf")).unwrap();
        corpus.append(&TrainingExample::new("2", "Photos", "IMG_0001.jpg")).unwrap();

        let text = fs::read_to_string(corpus.path()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines, vec!["id;category;name", "1;Invoices;invoice_2024.pdf", "2;Photos;IMG_0001.jpg"]);
        assert_eq!(corpus.read_all().unwrap().len(), 2);
    }

    #[test]
    fn test_read_skips_malformed_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corpus.csv");
        fs::write(&path, "id;category;name\n1;Invoices;a.pdf\nbroken line\n3;;empty.txt\n4;Music;song.mp3\n").unwrap();

        let examples = TrainingCorpus::new(path).read_all().unwrap();
        let names: Vec<&str> = examples.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["a.pdf", "song.mp3"]);
    }

    #[test]
    fn test_headerless_file_keeps_first_row() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corpus.csv");
        fs::write(&path, "1;Invoices;a.pdf\n").unwrap();
        assert_eq!(TrainingCorpus::new(path).read_all().unwrap().len(), 1);
    }

    #[test]
    fn test_delimiter_in_name_survives() {
        let dir = tempfile::tempdir().unwrap();
        let corpus = TrainingCorpus::new(dir.path().join("corpus.csv"));
        corpus.append(&TrainingExample::new("9", "Notes", "a;b \"c\".txt")).unwrap();

        let examples = corpus.read_all().unwrap();
        assert_eq!(examples, vec![TrainingExample::new("9", "Notes", "a;b \"c\".txt")]);
    }

    #[test]
    fn test_missing_corpus() {
        let dir = tempfile::tempdir().unwrap();
        let corpus = TrainingCorpus::new(dir.path().join("none.csv"));
        assert!(corpus.read_all().unwrap().is_empty());
        assert!(corpus.digest().unwrap().is_none());
        assert!(!corpus.exists());
    }
}
