// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Multinomial naive Bayes over file-name tokens

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::corpus::TrainingExample;
use crate::{DropsortError, Result};

/// Bumped whenever the serialized layout changes
pub const MODEL_FORMAT: u32 = 1;

/// Token emitted for every run of digits
const NUMBER_TOKEN: &str = "#num";

/// Longest suffix still treated as an extension
const MAX_EXTENSION_LEN: usize = 8;

/// Predicted category with the posterior probability of the winner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub category: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CategoryStats {
    /// Training examples filed under this category
    pub documents: usize,
    /// Sum of all token counts
    pub total_tokens: usize,
    pub token_counts: BTreeMap<String, usize>,
}

/// Serialized classifier artifact
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NaiveBayesModel {
    pub format: u32,
    /// Unique per training run
    pub version: String,
    pub trained_at: DateTime<Utc>,
    pub example_count: usize,
    /// Digest of the corpus file this model was fitted on
    #[serde(default)]
    pub corpus_digest: Option<String>,
    pub smoothing: f64,
    pub vocabulary_size: usize,
    pub categories: BTreeMap<String, CategoryStats>,
}

impl NaiveBayesModel {
    /// Fit a model on labeled examples
    pub fn fit(examples: &[TrainingExample], smoothing: f64) -> Result<Self> {
        if examples.is_empty() {
            return Err(DropsortError::TrainingDataInvalid(
                "corpus contains no valid examples".to_string(),
            ));
        }
        if !(smoothing.is_finite() && smoothing > 0.0) {
            return Err(DropsortError::TrainingDataInvalid(format!(
                "smoothing must be positive, got {}",
                smoothing
            )));
        }

        let mut categories: BTreeMap<String, CategoryStats> = BTreeMap::new();
        let mut vocabulary = std::collections::BTreeSet::new();

        for example in examples {
            let stats = categories.entry(example.category.clone()).or_default();
            stats.documents += 1;
            for token in tokenize(&example.name) {
                stats.total_tokens += 1;
                *stats.token_counts.entry(token.clone()).or_default() += 1;
                vocabulary.insert(token);
            }
        }

        Ok(Self {
            format: MODEL_FORMAT,
            version: uuid::Uuid::new_v4().to_string(),
            trained_at: Utc::now(),
            example_count: examples.len(),
            corpus_digest: None,
            smoothing,
            vocabulary_size: vocabulary.len(),
            categories,
        })
    }

    /// Log-posterior (unnormalized) per category, in category order
    pub fn scores(&self, name: &str) -> Vec<(String, f64)> {
        let tokens: Vec<String> = tokenize(name)
            .into_iter()
            .filter(|t| self.is_known(t))
            .collect();
        let vocab = self.vocabulary_size.max(1) as f64;

        self.categories
            .iter()
            .map(|(category, stats)| {
                let prior = (stats.documents as f64 / self.example_count as f64).ln();
                let denominator = stats.total_tokens as f64 + self.smoothing * vocab;
                let likelihood: f64 = tokens
                    .iter()
                    .map(|t| {
                        let count = stats.token_counts.get(t).copied().unwrap_or(0) as f64;
                        ((count + self.smoothing) / denominator).ln()
                    })
                    .sum();
                (category.clone(), prior + likelihood)
            })
            .collect()
    }

    /// Highest-scoring category; exact ties go to the smallest category name
    pub fn predict(&self, name: &str) -> Prediction {
        let scores = self.scores(name);
        let mut best: Option<&(String, f64)> = None;
        for entry in &scores {
            if best.map_or(true, |b| entry.1 > b.1) {
                best = Some(entry);
            }
        }

        match best {
            Some((category, top)) => {
                let total: f64 = scores.iter().map(|(_, s)| (s - top).exp()).sum();
                Prediction {
                    category: category.clone(),
                    confidence: 1.0 / total,
                }
            }
            // fit() never produces a model without categories
            None => Prediction {
                category: String::new(),
                confidence: 0.0,
            },
        }
    }

    pub fn category_names(&self) -> Vec<String> {
        self.categories.keys().cloned().collect()
    }

    fn is_known(&self, token: &str) -> bool {
        self.categories.values().any(|s| s.token_counts.contains_key(token))
    }
}

#[derive(Clone, Copy, PartialEq)]
enum CharClass {
    Lower,
    Upper,
    Digit,
    Separator,
}

fn classify_char(c: char) -> CharClass {
    if c.is_ascii_digit() {
        CharClass::Digit
    } else if c.is_uppercase() {
        CharClass::Upper
    } else if c.is_alphabetic() {
        CharClass::Lower
    } else {
        CharClass::Separator
    }
}

fn push_word(word: &mut String, digits: bool, tokens: &mut Vec<String>) {
    if digits {
        tokens.push(NUMBER_TOKEN.to_string());
    } else if word.chars().count() >= 2 {
        tokens.push(word.to_lowercase());
    }
    word.clear();
}

/// Split a file name into classifier features
///
/// Words are split on punctuation, letter/digit boundaries and camelCase
/// humps, then lowercased. Digit runs collapse to one number token and the
/// extension becomes an `ext:` token.
pub fn tokenize(name: &str) -> Vec<String> {
    let (stem, extension) = match name.rsplit_once('.') {
        Some((stem, ext))
            if !stem.is_empty()
                && !ext.is_empty()
                && ext.len() <= MAX_EXTENSION_LEN
                && ext.chars().all(|c| c.is_ascii_alphanumeric()) =>
        {
            (stem, Some(ext))
        }
        _ => (name, None),
    };

    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut current_class = CharClass::Separator;

    for c in stem.chars() {
        let class = classify_char(c);
        let is_letter = matches!(class, CharClass::Lower | CharClass::Upper);
        let was_letter = matches!(current_class, CharClass::Lower | CharClass::Upper);

        let boundary = match (current_class, class) {
            (_, CharClass::Separator) => true,
            (CharClass::Separator, _) => false,
            (CharClass::Lower, CharClass::Upper) => true,
            _ => is_letter != was_letter,
        };

        if boundary && !current.is_empty() {
            push_word(&mut current, !was_letter, &mut tokens);
        }
        if class != CharClass::Separator {
            current.push(c);
        }
        current_class = class;
    }
    if !current.is_empty() {
        push_word(&mut current, current_class == CharClass::Digit, &mut tokens);
    }

    if let Some(ext) = extension {
        tokens.push(format!("ext:{}", ext.to_ascii_lowercase()));
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    fn example(category: &str, name: &str) -> TrainingExample {
        TrainingExample::new("id", category, name)
    }

    #[test]
    fn test_tokenize_splits_words_numbers_and_extension() {
        assert_eq!(
            tokenize("Invoice_2024-03 ACME.pdf"),
            vec!["invoice", "#num", "#num", "acme", "ext:pdf"]
        );
        assert_eq!(tokenize("report_q1.PDF"), vec!["report", "#num", "ext:pdf"]);
        assert_eq!(tokenize("holidayPhotoBeach.jpeg"), vec!["holiday", "photo", "beach", "ext:jpeg"]);
    }

    #[test]
    fn test_tokenize_edge_cases() {
        assert!(tokenize("").is_empty());
        assert_eq!(tokenize(".bashrc"), vec!["bashrc"]);
        assert_eq!(tokenize("archive.tar.gz"), vec!["archive", "tar", "ext:gz"]);
        assert_eq!(tokenize("a b c"), Vec::<String>::new());
    }

    #[test]
    fn test_fit_rejects_empty_corpus() {
        assert!(matches!(
            NaiveBayesModel::fit(&[], 1.0),
            Err(DropsortError::TrainingDataInvalid(_))
        ));
        assert!(NaiveBayesModel::fit(&[example("A", "a.txt")], 0.0).is_err());
    }

    #[test]
    fn test_predicts_by_name_tokens() {
        let model = NaiveBayesModel::fit(
            &[
                example("Invoices", "invoice_2023.pdf"),
                example("Invoices", "invoice_march.pdf"),
                example("Photos", "IMG_2041.jpg"),
                example("Photos", "holiday_beach.jpg"),
            ],
            1.0,
        )
        .unwrap();

        let p = model.predict("invoice_2024.pdf");
        assert_eq!(p.category, "Invoices");
        assert!(p.confidence > 0.5 && p.confidence <= 1.0);
        assert_eq!(model.predict("beach_sunset.jpg").category, "Photos");
        assert_eq!(model.category_names(), vec!["Invoices", "Photos"]);
        assert_eq!(model.scores("x").len(), 2);
    }

    #[test]
    fn test_ties_resolve_to_smallest_category() {
        let model = NaiveBayesModel::fit(&[example("Zeta", "a.txt"), example("Alpha", "b.txt")], 1.0)
            .unwrap();
        let p = model.predict("unrelated");
        assert_eq!(p.category, "Alpha");
        assert!((p.confidence - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_serialized_model_predicts_identically() {
        let model = NaiveBayesModel::fit(
            &[example("Docs", "notes_meeting.txt"), example("Music", "song_live.mp3")],
            0.5,
        )
        .unwrap();
        let restored: NaiveBayesModel =
            serde_json::from_str(&serde_json::to_string(&model).unwrap()).unwrap();
        assert_eq!(model.predict("meeting.txt"), restored.predict("meeting.txt"));
        assert_eq!(restored.version, model.version);
    }
}
