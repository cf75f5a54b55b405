//! Turning per-frame OCR spans into a stable stream of speakable chunks.

#[allow(clippy::module_inception)]
pub mod assembler;
pub mod lines;
pub mod similarity;

pub use assembler::{AssemblerConfig, TextAssembler, normalize};
pub use lines::{Line, group_lines};
pub use similarity::{LevenshteinRatio, Similarity, SimilarityMetric, TokenJaccard};
