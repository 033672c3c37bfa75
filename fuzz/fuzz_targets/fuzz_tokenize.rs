// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

#![no_main]

use arbitrary::Arbitrary;
use dropsort::classifier::{tokenize, NaiveBayesModel};
use dropsort::corpus::TrainingExample;
use libfuzzer_sys::fuzz_target;

#[derive(Arbitrary, Debug)]
struct Input {
    name: String,
    examples: Vec<(String, String)>,
}

fuzz_target!(|input: Input| {
    for token in tokenize(&input.name) {
        assert!(!token.is_empty());
    }

    let examples: Vec<TrainingExample> = input
        .examples
        .iter()
        .take(32)
        .enumerate()
        .map(|(i, (category, name))| TrainingExample::new(i.to_string(), category, name))
        .collect();
    if let Ok(model) = NaiveBayesModel::fit(&examples, 1.0) {
        let prediction = model.predict(&input.name);
        assert!(prediction.confidence.is_finite());
    }
});
