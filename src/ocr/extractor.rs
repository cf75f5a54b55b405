//! Bounded OCR calls and span filtering.

use crate::error::{ReaderError, Result};
use crate::ocr::engine::{OcrEngine, RecognizedText};
use crate::pipeline::error::{ErrorReporter, StationError};
use crate::pipeline::state::RunSettings;
use crate::pipeline::stop::StopSignal;
use crate::pipeline::types::{FrameTransform, LanguagePack, PreparedFrame, TextSpan};
use crate::pipeline::worker::BoundedWorker;
use image::GrayImage;
use std::sync::Arc;
use std::time::Duration;

type Recognition = Result<Vec<RecognizedText>>;

/// Runs the OCR engine on its own thread and turns its output into spans.
pub struct TextExtractor {
    engine_name: String,
    worker: BoundedWorker<(GrayImage, LanguagePack), Recognition>,
    timeout: Duration,
    stop: StopSignal,
    reporter: Arc<dyn ErrorReporter>,
}

impl TextExtractor {
    pub fn new(
        engine: Arc<dyn OcrEngine>,
        timeout: Duration,
        stop: StopSignal,
        reporter: Arc<dyn ErrorReporter>,
    ) -> Result<Self> {
        let engine_name = engine.name().to_string();
        let worker = BoundedWorker::spawn("ocr", move |(image, language): (GrayImage, LanguagePack)| {
            engine.recognize(&image, &language)
        })?;
        Ok(Self {
            engine_name,
            worker,
            timeout,
            stop,
            reporter,
        })
    }

    /// Recognises text in `frame`.
    ///
    /// Failures are reported and yield no spans; the caller simply moves on to
    /// the next frame.
    pub fn extract(&mut self, frame: PreparedFrame, settings: &RunSettings) -> ExtractedSpans {
        let frame_id = frame.source_frame_id;
        let transform = frame.transform;
        let request = (frame.image, settings.language.clone());

        let recognized = match self.worker.call(request, self.timeout, Some(&self.stop)) {
            Ok(Ok(recognized)) => recognized,
            Ok(Err(error)) => {
                self.report(frame_id, error.to_string());
                return ExtractedSpans::failed(frame_id);
            }
            Err(call_error) => {
                self.report(frame_id, format!("{} {call_error}", self.engine_name));
                return ExtractedSpans::failed(frame_id);
            }
        };

        tracing::debug!(frame_id, raw = recognized.len(), "OCR finished");
        ExtractedSpans {
            inner: recognized.into_iter(),
            transform,
            frame_id,
            threshold: settings.confidence_threshold,
            failed: false,
        }
    }

    fn report(&self, frame_id: u64, message: String) {
        let error = ReaderError::ExtractionFailure { frame_id, message };
        self.reporter
            .report("extractor", &StationError::Recoverable(error.to_string()));
    }

    /// Stops the OCR thread. Returns `false` if it had to be detached.
    pub fn shutdown(self, wait: Duration) -> bool {
        self.worker.shutdown(wait)
    }
}

/// Lazily validated, threshold-filtered spans of one frame.
pub struct ExtractedSpans {
    inner: std::vec::IntoIter<RecognizedText>,
    transform: FrameTransform,
    frame_id: u64,
    threshold: f32,
    failed: bool,
}

impl ExtractedSpans {
    fn failed(frame_id: u64) -> Self {
        Self {
            inner: Vec::new().into_iter(),
            transform: FrameTransform::default(),
            frame_id,
            threshold: 1.0,
            failed: true,
        }
    }

    pub fn frame_id(&self) -> u64 {
        self.frame_id
    }

    /// Whether the OCR call itself failed.
    pub fn is_failure(&self) -> bool {
        self.failed
    }
}

impl Iterator for ExtractedSpans {
    type Item = TextSpan;

    fn next(&mut self) -> Option<TextSpan> {
        for raw in self.inner.by_ref() {
            let text = raw.text.trim();
            let malformed = if text.is_empty() {
                Some("empty text")
            } else if !raw.confidence.is_finite() || !(0.0..=1.0).contains(&raw.confidence) {
                Some("confidence out of range")
            } else if !raw.bbox.is_valid() {
                Some("degenerate bounding box")
            } else {
                None
            };
            if let Some(reason) = malformed {
                let error = ReaderError::MalformedSpanSet {
                    frame_id: self.frame_id,
                    reason: reason.to_string(),
                };
                tracing::debug!("{error}, span dropped");
                continue;
            }
            if raw.confidence < self.threshold {
                tracing::trace!(frame_id = self.frame_id, text, confidence = raw.confidence, "below threshold");
                continue;
            }
            let bbox = self.transform.map_box(&raw.bbox);
            if !bbox.is_valid() {
                continue;
            }
            return Some(TextSpan::new(text, raw.confidence, bbox, self.frame_id));
        }
        None
    }
}
