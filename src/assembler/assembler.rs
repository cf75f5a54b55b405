//! Cross-frame deduplication and sequencing of recognised lines.

use crate::assembler::lines::{Line, group_lines};
use crate::assembler::similarity::{Similarity, SimilarityMetric};
use crate::defaults;
use crate::error::ReaderError;
use crate::pipeline::state::RunSettings;
use crate::pipeline::types::{AssembledChunk, TextSpan};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq)]
pub struct AssemblerConfig {
    /// How many accepted lines are remembered for deduplication.
    pub window_size: usize,
    /// Largest horizontal gap inside a line, in line heights.
    pub max_word_gap: f32,
    pub metric: SimilarityMetric,
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self {
            window_size: defaults::WINDOW_SIZE,
            max_word_gap: defaults::MAX_WORD_GAP,
            metric: SimilarityMetric::default(),
        }
    }
}

/// Case-folds and collapses whitespace.
pub fn normalize(text: &str) -> String {
    text.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Turns per-frame spans into a stream of new, ordered chunks.
pub struct TextAssembler {
    config: AssemblerConfig,
    similarity: Box<dyn Similarity>,
    window: VecDeque<String>,
    previous_frame: Vec<String>,
    next_sequence_no: u64,
    last_activity: Instant,
}

impl TextAssembler {
    pub fn new(config: AssemblerConfig) -> Self {
        let similarity = config.metric.build();
        Self::with_similarity(config, similarity)
    }

    /// Uses a custom metric instead of the configured built-in.
    pub fn with_similarity(config: AssemblerConfig, similarity: Box<dyn Similarity>) -> Self {
        Self {
            window: VecDeque::with_capacity(config.window_size),
            config,
            similarity,
            previous_frame: Vec::new(),
            next_sequence_no: 0,
            last_activity: Instant::now(),
        }
    }

    /// Continues numbering from `sequence_no`.
    pub fn starting_at(mut self, sequence_no: u64) -> Self {
        self.next_sequence_no = sequence_no;
        self
    }

    /// Sequence number the next chunk will get.
    pub fn next_sequence_no(&self) -> u64 {
        self.next_sequence_no
    }

    /// Assembles one frame's spans into zero or more new chunks.
    ///
    /// Spans from other frames and malformed spans are ignored. Returned chunks
    /// are in reading order with consecutive sequence numbers.
    pub fn assemble(
        &mut self,
        frame_id: u64,
        spans: impl IntoIterator<Item = TextSpan>,
        settings: &RunSettings,
    ) -> Vec<AssembledChunk> {
        let mut usable = Vec::new();
        for span in spans {
            if let Err(reason) = check_span(&span, frame_id) {
                let error = ReaderError::MalformedSpanSet {
                    frame_id,
                    reason: reason.to_string(),
                };
                tracing::debug!("{error}");
                continue;
            }
            usable.push(span);
        }

        let lines = group_lines(usable, self.config.max_word_gap);
        let mut seen_this_frame: Vec<String> = Vec::with_capacity(lines.len());
        let mut chunks = Vec::new();

        for line in lines {
            let normalized = normalize(&line.text());
            if normalized.is_empty() {
                continue;
            }
            let duplicate = self.is_duplicate(&normalized, &seen_this_frame, settings.dedup_threshold);
            seen_this_frame.push(normalized.clone());
            if duplicate {
                tracing::trace!(frame_id, line = %normalized, "duplicate line");
                continue;
            }
            chunks.push(self.emit(line, normalized, frame_id, settings));
        }

        self.previous_frame = seen_this_frame;
        chunks
    }

    fn is_duplicate(&self, normalized: &str, this_frame: &[String], threshold: f32) -> bool {
        self.window
            .iter()
            .chain(self.previous_frame.iter())
            .chain(this_frame.iter())
            .any(|known| self.similarity.similarity(normalized, known) >= threshold)
    }

    fn emit(
        &mut self,
        line: Line,
        normalized: String,
        frame_id: u64,
        settings: &RunSettings,
    ) -> AssembledChunk {
        if self.config.window_size > 0 {
            if self.window.len() == self.config.window_size {
                self.window.pop_front();
            }
            self.window.push_back(normalized);
        }
        self.last_activity = Instant::now();

        let sequence_no = self.next_sequence_no;
        self.next_sequence_no += 1;
        let chunk = AssembledChunk {
            text: line.text(),
            spans: line.spans,
            sequence_no,
            language: settings.language.clone(),
            source_frame_id: frame_id,
        };
        tracing::debug!(sequence_no, frame_id, text = %chunk.text, "chunk assembled");
        chunk
    }

    /// True once nothing new was accepted for `silence`.
    pub fn is_idle(&self, silence: Duration) -> bool {
        self.last_activity.elapsed() >= silence
    }
}

fn check_span(span: &TextSpan, frame_id: u64) -> Result<(), &'static str> {
    if span.source_frame_id != frame_id {
        return Err("span from another frame");
    }
    if span.text.trim().is_empty() {
        return Err("empty text");
    }
    if !span.confidence.is_finite() {
        return Err("non-finite confidence");
    }
    if !span.bbox.is_valid() {
        return Err("degenerate bounding box");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembler::similarity::TokenJaccard;
    use crate::pipeline::types::{BoundingBox, LanguagePack};

    fn span(text: &str, x: f32, y: f32, frame_id: u64) -> TextSpan {
        TextSpan::new(text, 0.9, BoundingBox::new(x, y, 40.0, 10.0), frame_id)
    }

    fn hello_world(frame_id: u64) -> Vec<TextSpan> {
        vec![span("HELLO", 0.0, 0.0, frame_id), span("WORLD", 50.0, 0.0, frame_id)]
    }

    fn texts(chunks: &[AssembledChunk]) -> Vec<&str> {
        chunks.iter().map(|c| c.text.as_str()).collect()
    }

    #[test]
    fn test_repeated_frame_yields_one_chunk() {
        let mut assembler = TextAssembler::new(AssemblerConfig::default());
        let settings = RunSettings::default();
        let mut all = Vec::new();
        for frame_id in 1..=5 {
            all.extend(assembler.assemble(frame_id, hello_world(frame_id), &settings));
        }
        assert_eq!(texts(&all), vec!["HELLO WORLD"]);
        assert_eq!(all[0].sequence_no, 0);
        assert_eq!(all[0].source_frame_id, 1);
        assert_eq!(all[0].language, LanguagePack::default());
    }

    #[test]
    fn test_lines_are_emitted_top_to_bottom() {
        let mut assembler = TextAssembler::new(AssemblerConfig::default());
        let spans = vec![
            span("TWO", 50.0, 30.0, 1),
            span("LINE", 0.0, 30.0, 1),
            span("LINE", 0.0, 0.0, 1),
            span("ONE", 50.0, 0.0, 1),
        ];
        let chunks = assembler.assemble(1, spans, &RunSettings::default());
        assert_eq!(texts(&chunks), vec!["LINE ONE", "LINE TWO"]);
        assert_eq!(chunks[0].sequence_no + 1, chunks[1].sequence_no);
    }

    #[test]
    fn test_ocr_jitter_is_a_duplicate() {
        let mut assembler = TextAssembler::new(AssemblerConfig::default());
        let settings = RunSettings::default();
        assert_eq!(assembler.assemble(1, hello_world(1), &settings).len(), 1);
        let jittered = vec![span("HELL0", 0.0, 0.0, 2), span("WORLD", 50.0, 0.0, 2)];
        assert!(assembler.assemble(2, jittered, &settings).is_empty());
    }

    #[test]
    fn test_same_line_twice_in_one_frame_is_spoken_once() {
        let mut assembler = TextAssembler::new(AssemblerConfig::default());
        let spans = vec![span("EXIT", 0.0, 0.0, 1), span("EXIT", 0.0, 100.0, 1)];
        assert_eq!(assembler.assemble(1, spans, &RunSettings::default()).len(), 1);
    }

    #[test]
    fn test_foreign_and_malformed_spans_are_ignored() {
        let mut assembler = TextAssembler::new(AssemblerConfig::default());
        let spans = vec![
            span("OTHER", 0.0, 0.0, 9),
            TextSpan::new("FLAT", 0.9, BoundingBox::new(0.0, 50.0, 10.0, 0.0), 1),
            TextSpan::new("NAN", f32::NAN, BoundingBox::new(0.0, 80.0, 10.0, 10.0), 1),
            span("KEPT", 0.0, 120.0, 1),
        ];
        let chunks = assembler.assemble(1, spans, &RunSettings::default());
        assert_eq!(texts(&chunks), vec!["KEPT"]);
    }

    #[test]
    fn test_window_forgets_old_lines() {
        let config = AssemblerConfig {
            window_size: 2,
            ..Default::default()
        };
        let mut assembler = TextAssembler::new(config);
        let settings = RunSettings::default();
        let frames = ["ALPHA", "BRAVO", "CHARLIE", "DELTA", "ALPHA"];
        let mut spoken = Vec::new();
        for (i, word) in frames.iter().enumerate() {
            let frame_id = i as u64 + 1;
            for chunk in assembler.assemble(frame_id, vec![span(word, 0.0, 0.0, frame_id)], &settings) {
                spoken.push(chunk.text);
            }
        }
        assert_eq!(spoken, vec!["ALPHA", "BRAVO", "CHARLIE", "DELTA", "ALPHA"]);
    }

    #[test]
    fn test_previous_frame_is_remembered_even_with_empty_window() {
        let config = AssemblerConfig {
            window_size: 0,
            ..Default::default()
        };
        let mut assembler = TextAssembler::new(config);
        let settings = RunSettings::default();
        assert_eq!(assembler.assemble(1, hello_world(1), &settings).len(), 1);
        assert!(assembler.assemble(2, hello_world(2), &settings).is_empty());
    }

    #[test]
    fn test_sequence_numbers_continue_from_start() {
        let mut assembler = TextAssembler::new(AssemblerConfig::default()).starting_at(41);
        let chunks = assembler.assemble(1, hello_world(1), &RunSettings::default());
        assert_eq!(chunks[0].sequence_no, 41);
        assert_eq!(assembler.next_sequence_no(), 42);
    }

    #[test]
    fn test_custom_metric_is_used() {
        let mut assembler =
            TextAssembler::with_similarity(AssemblerConfig::default(), Box::new(TokenJaccard));
        let settings = RunSettings::default();
        assert_eq!(assembler.assemble(1, hello_world(1), &settings).len(), 1);
        let swapped = vec![span("WORLD", 0.0, 0.0, 2), span("HELLO", 50.0, 0.0, 2)];
        assert!(assembler.assemble(2, swapped, &settings).is_empty());
    }

    #[test]
    fn test_idle_after_silence() {
        let assembler = TextAssembler::new(AssemblerConfig::default());
        assert!(!assembler.is_idle(Duration::from_secs(60)));
        assert!(assembler.is_idle(Duration::ZERO));
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("  Hello \n  WORLD "), "hello world");
        assert_eq!(normalize("   "), "");
    }
}
