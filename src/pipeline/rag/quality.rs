//! Post-retrieval quality filter.
//!
//! Drops results that are unlikely to help answer a query: low relevance,
//! too short, carrying extraction banners or known garbled-OCR fragments,
//! or made mostly of symbols. Order of the survivors is preserved.

use serde::{Deserialize, Serialize};

use crate::config::QualityConfig;
use crate::pipeline::extraction::ContentUnit;

/// Lowercase substrings marking low-signal content.
const LOW_SIGNAL_MARKERS: &[&str] = &[
    "[table from image",
    "[image",
    "==================================================",
    "---        ea      laud",
    "~ > -",
];

/// Minimum share of alphanumeric-or-whitespace characters.
const MIN_MEANINGFUL_RATIO: f32 = 0.3;

/// Anything retrieval can hand back with text content.
pub trait RetrievedContent {
    fn content(&self) -> &str;
}

impl RetrievedContent for ContentUnit {
    fn content(&self) -> &str {
        ContentUnit::content(self)
    }
}

impl RetrievedContent for String {
    fn content(&self) -> &str {
        self
    }
}

/// A retrieval hit as exchanged with the retrieval collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredResult {
    pub content: String,
    pub score: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl RetrievedContent for ScoredResult {
    fn content(&self) -> &str {
        &self.content
    }
}

pub fn filter_low_quality<T: RetrievedContent>(
    results: Vec<(T, f32)>,
    min_relevance: f32,
    min_length: usize,
) -> Vec<(T, f32)> {
    results
        .into_iter()
        .filter(|(doc, score)| is_acceptable(doc.content(), *score, min_relevance, min_length))
        .collect()
}

pub fn filter_with(results: Vec<ScoredResult>, config: &QualityConfig) -> Vec<ScoredResult> {
    let pairs = results.into_iter().map(|r| {
        let score = r.score;
        (r, score)
    });
    filter_low_quality(pairs.collect(), config.min_relevance, config.min_length)
        .into_iter()
        .map(|(r, _)| r)
        .collect()
}

fn is_acceptable(content: &str, score: f32, min_relevance: f32, min_length: usize) -> bool {
    if score < min_relevance {
        return false;
    }
    if content.trim().chars().count() < min_length {
        return false;
    }

    let lower = content.to_lowercase();
    if LOW_SIGNAL_MARKERS.iter().any(|m| lower.contains(m)) {
        return false;
    }

    meaningful_ratio(content) >= MIN_MEANINGFUL_RATIO
}

/// Share of characters that are alphanumeric or whitespace; 0 for empty text.
pub fn meaningful_ratio(content: &str) -> f32 {
    let total = content.chars().count();
    if total == 0 {
        return 0.0;
    }
    let meaningful = content
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .count();
    meaningful as f32 / total as f32
}
