//! Reading-order grouping of one frame's spans into lines.

use crate::pipeline::types::{BoundingBox, TextSpan};

/// Spans sharing a row with no wide gap between them.
#[derive(Debug, Clone, PartialEq)]
pub struct Line {
    pub spans: Vec<TextSpan>,
    pub bbox: BoundingBox,
}

impl Line {
    fn new(span: TextSpan) -> Self {
        Self {
            bbox: span.bbox,
            spans: vec![span],
        }
    }

    fn push(&mut self, span: TextSpan) {
        self.bbox = self.bbox.union(&span.bbox);
        self.spans.push(span);
    }

    /// Span texts joined with single spaces.
    pub fn text(&self) -> String {
        self.spans
            .iter()
            .map(|span| span.text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Groups spans into lines: top to bottom, then left to right.
///
/// Two spans share a row when they overlap vertically by at least half the
/// smaller height. A row is split where the horizontal gap exceeds
/// `max_word_gap` times the row height.
pub fn group_lines(mut spans: Vec<TextSpan>, max_word_gap: f32) -> Vec<Line> {
    spans.sort_by(|a, b| a.bbox.y.total_cmp(&b.bbox.y).then(a.bbox.x.total_cmp(&b.bbox.x)));

    let mut rows: Vec<Line> = Vec::new();
    for span in spans {
        let row = rows.iter_mut().find(|row| {
            let overlap = row.bbox.vertical_overlap(&span.bbox);
            overlap >= 0.5 * row.bbox.height.min(span.bbox.height)
        });
        match row {
            Some(row) => row.push(span),
            None => rows.push(Line::new(span)),
        }
    }
    rows.sort_by(|a, b| a.bbox.y.total_cmp(&b.bbox.y));

    let mut lines = Vec::new();
    for row in rows {
        let max_gap = max_word_gap * row.bbox.height;
        let mut spans = row.spans;
        spans.sort_by(|a, b| a.bbox.x.total_cmp(&b.bbox.x));

        let mut current: Option<Line> = None;
        for span in spans {
            current = Some(match current {
                Some(mut line) if span.bbox.x - line.bbox.right() <= max_gap => {
                    line.push(span);
                    line
                }
                Some(line) => {
                    lines.push(line);
                    Line::new(span)
                }
                None => Line::new(span),
            });
        }
        lines.extend(current);
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span(text: &str, x: f32, y: f32) -> TextSpan {
        TextSpan::new(text, 0.9, BoundingBox::new(x, y, 40.0, 10.0), 1)
    }

    fn texts(lines: &[Line]) -> Vec<String> {
        lines.iter().map(Line::text).collect()
    }

    #[test]
    fn test_rows_in_reading_order() {
        let spans = vec![
            span("TWO", 50.0, 30.0),
            span("LINE", 0.0, 31.0),
            span("ONE", 50.0, 0.0),
            span("LINE", 0.0, 1.0),
        ];
        assert_eq!(texts(&group_lines(spans, 2.5)), vec!["LINE ONE", "LINE TWO"]);
    }

    #[test]
    fn test_wide_gap_splits_row() {
        let spans = vec![span("LEFT", 0.0, 0.0), span("RIGHT", 200.0, 0.0)];
        assert_eq!(texts(&group_lines(spans, 2.5)), vec!["LEFT", "RIGHT"]);
    }

    #[test]
    fn test_slight_baseline_drift_stays_on_row() {
        let spans = vec![span("A", 0.0, 0.0), span("B", 45.0, 4.0), span("C", 90.0, 2.0)];
        let lines = group_lines(spans, 2.5);
        assert_eq!(texts(&lines), vec!["A B C"]);
        assert_eq!(lines[0].bbox, BoundingBox::new(0.0, 0.0, 130.0, 14.0));
    }

    #[test]
    fn test_no_spans_no_lines() {
        assert!(group_lines(Vec::new(), 2.5).is_empty());
    }
}
