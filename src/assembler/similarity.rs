//! Text similarity metrics used for near-duplicate detection.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// Similarity of two normalised strings in `[0, 1]`; 1 means identical.
pub trait Similarity: Send + Sync {
    fn similarity(&self, a: &str, b: &str) -> f32;
}

/// Levenshtein distance over Unicode scalar values.
pub fn edit_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let n = b.len();

    let mut prev = (0..=n).collect::<Vec<_>>();
    let mut curr = vec![0; n + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[n]
}

/// `1 - distance / longer length`. Tolerates single-glyph OCR jitter.
#[derive(Debug, Clone, Copy, Default)]
pub struct LevenshteinRatio;

impl Similarity for LevenshteinRatio {
    fn similarity(&self, a: &str, b: &str) -> f32 {
        let longest = a.chars().count().max(b.chars().count());
        if longest == 0 {
            return 1.0;
        }
        1.0 - edit_distance(a, b) as f32 / longest as f32
    }
}

/// Shared words over all words. Insensitive to word order.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenJaccard;

impl Similarity for TokenJaccard {
    fn similarity(&self, a: &str, b: &str) -> f32 {
        let a: HashSet<&str> = a.split_whitespace().collect();
        let b: HashSet<&str> = b.split_whitespace().collect();
        if a.is_empty() && b.is_empty() {
            return 1.0;
        }
        let shared = a.intersection(&b).count();
        let all = a.union(&b).count();
        shared as f32 / all as f32
    }
}

/// Configurable choice of built-in metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SimilarityMetric {
    #[default]
    Levenshtein,
    Jaccard,
}

impl SimilarityMetric {
    pub fn build(self) -> Box<dyn Similarity> {
        match self {
            SimilarityMetric::Levenshtein => Box::new(LevenshteinRatio),
            SimilarityMetric::Jaccard => Box::new(TokenJaccard),
        }
    }
}

impl fmt::Display for SimilarityMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SimilarityMetric::Levenshtein => write!(f, "levenshtein"),
            SimilarityMetric::Jaccard => write!(f, "jaccard"),
        }
    }
}

impl FromStr for SimilarityMetric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "levenshtein" => Ok(SimilarityMetric::Levenshtein),
            "jaccard" => Ok(SimilarityMetric::Jaccard),
            other => Err(format!(
                "unknown similarity metric '{other}' (expected levenshtein or jaccard)"
            )),
        }
    }
}
